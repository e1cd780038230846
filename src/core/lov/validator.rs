#![allow(clippy::result_large_err)] // Validation aggregates every offending field into one AppError.

use crate::core::config::{FieldSchema, WorkflowConfiguration};
use crate::core::error::AppError;
use crate::core::lov::LovCache;
use crate::core::stats::values_equivalent;
use crate::core::types::ErrorCategory;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Validates free-text field values against their bound list of values.
pub struct LovValidator {
    cache: Arc<LovCache>,
}

impl LovValidator {
    pub fn new(cache: Arc<LovCache>) -> Self {
        Self { cache }
    }

    /// Check every LOV-bound field in `new_data` against its provider's
    /// entries by key or label. Unchanged values (versus `prior_data`) and
    /// empty new values are skipped; all violations are aggregated into one
    /// error naming each offending field.
    pub async fn validate_field_data(
        &self,
        configuration: &WorkflowConfiguration,
        new_data: &Map<String, Value>,
        prior_data: &Map<String, Value>,
    ) -> Result<(), AppError> {
        let mut violations = Vec::new();
        for field in &configuration.fields {
            let provider = match &field.schema {
                FieldSchema::Text {
                    lov: Some(provider),
                    ..
                } => provider,
                _ => continue,
            };
            let new_value = match new_data.get(&field.slug) {
                Some(value) if !value.is_null() => value,
                _ => continue,
            };
            let text = match new_value.as_str() {
                Some(text) if !text.trim().is_empty() => text,
                _ => continue,
            };
            if values_equivalent(Some(new_value), prior_data.get(&field.slug)) {
                continue;
            }

            let entries = self.cache.list(provider, false).await?;
            let known = entries
                .iter()
                .any(|entry| entry.key == text || entry.label == text);
            if !known {
                violations.push(format!(
                    "{}: '{}' is not in the bound list of values",
                    field.slug, text
                ));
            }
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("invalid list value(s): {}", violations.join("; ")),
            )
            .with_code("CF-LOV-001"))
        }
    }
}

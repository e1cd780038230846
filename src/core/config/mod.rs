#![allow(clippy::result_large_err)] // Configuration APIs return AppError to preserve structured validation context without boxing.

use crate::core::entities::DRAFT_STATUS;
use crate::core::error::AppError;
use crate::core::lov::provider::LovProvider;
use crate::core::types::ErrorCategory;
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};

fn default_params_value() -> Value {
    Value::Object(Map::new())
}

fn slug_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("slug pattern"))
}

/// Static definition of a workflow: statuses, fields, approvals, access.
/// Loaded read-only at runtime and never mutated by the engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowConfiguration {
    pub workflow_id: String,
    pub name: String,
    #[serde(default)]
    pub access: Vec<String>,
    #[serde(default)]
    pub nouns: NounLabels,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub fields: Vec<WorkflowField>,
    pub statuses: Vec<WorkflowStatus>,
    #[serde(default)]
    pub approvals: Vec<ApprovalDefinition>,
}

/// Display nouns used when surfacing cards of this workflow.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NounLabels {
    pub singular: String,
    pub plural: String,
}

impl Default for NounLabels {
    fn default() -> Self {
        Self {
            singular: "card".to_string(),
            plural: "cards".to_string(),
        }
    }
}

/// User-defined field carried in a card's `fieldData`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowField {
    pub slug: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema: FieldSchema,
}

/// Kind-specific constraints for a workflow field. Only `text` fields may
/// bind an LOV provider or act as the document identifier, which the tagged
/// representation enforces structurally.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FieldSchema {
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lov: Option<LovProvider>,
        #[serde(default)]
        identifier: bool,
    },
    Choice {
        choices: Vec<String>,
    },
    MultiChoice {
        choices: Vec<String>,
    },
    Bool {},
    Url {},
    List {},
}

/// Status node in the workflow graph. Preconditions are declared on the
/// *target* status: each status lists which origins may enter it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowStatus {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub terminal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precondition: Option<StatusPrecondition>,
    #[serde(default)]
    pub transition: Vec<ActionDefinition>,
    #[serde(default, rename = "finally")]
    pub finally_actions: Vec<ActionDefinition>,
}

/// Entry gate for a status.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StatusPrecondition {
    /// Allowed origin statuses; empty means any.
    #[serde(default)]
    pub from: Vec<String>,
    /// Required field slugs; `$.`-prefixed entries reference top-level card fields.
    #[serde(default)]
    pub required: Vec<String>,
    /// Authorization allow-list; `*` = anyone, `owner` = the card owner.
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub approvals: Vec<ApprovalRequirement>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApprovalRequirement {
    pub key: String,
}

/// Side-effecting action attached to a status transition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActionDefinition {
    pub kind: String,
    #[serde(default = "default_params_value")]
    pub params: Value,
}

/// Who may approve under an approval key.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApprovalDefinition {
    pub slug: String,
    #[serde(default)]
    pub allowed: Vec<AllowedApprover>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AllowedApprover {
    Basic {
        /// Placeholder-resolvable pattern naming the approver; absence means
        /// anyone may approve.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        by: Option<String>,
    },
}

impl WorkflowConfiguration {
    /// Load and validate a workflow configuration from a YAML file.
    pub fn load_from_file(path: &Path) -> Result<Self, AppError> {
        let text = fs::read_to_string(path).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to read {}: {}", path.display(), err),
            )
        })?;
        let config: WorkflowConfiguration = serde_yaml::from_str(&text).map_err(|err| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("failed to parse {}: {}", path.display(), err),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration against schema requirements.
    pub fn validate(&self) -> Result<(), AppError> {
        if !slug_pattern().is_match(&self.workflow_id) {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("invalid workflow id: {}", self.workflow_id),
            ));
        }
        if self.statuses.is_empty() {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "workflow must define at least one status",
            ));
        }

        let mut field_slugs = HashSet::new();
        let mut identifier_count = 0;
        for field in &self.fields {
            if !slug_pattern().is_match(&field.slug) || field.slug.contains('-') {
                return Err(AppError::new(
                    ErrorCategory::ValidationError,
                    format!("invalid field slug: {}", field.slug),
                ));
            }
            if !field_slugs.insert(field.slug.clone()) {
                return Err(AppError::new(
                    ErrorCategory::ValidationError,
                    format!("duplicate field slug: {}", field.slug),
                ));
            }
            if let FieldSchema::Text {
                identifier,
                pattern,
                ..
            } = &field.schema
            {
                if *identifier {
                    identifier_count += 1;
                }
                if let Some(pattern) = pattern {
                    Regex::new(pattern).map_err(|err| {
                        AppError::new(
                            ErrorCategory::ValidationError,
                            format!("field {} has invalid pattern: {}", field.slug, err),
                        )
                    })?;
                }
            }
        }
        if identifier_count > 1 {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "at most one field may be marked as the document identifier",
            ));
        }

        let approval_slugs: HashSet<&str> = self
            .approvals
            .iter()
            .map(|approval| approval.slug.as_str())
            .collect();

        let mut status_slugs = HashSet::new();
        for status in &self.statuses {
            if !slug_pattern().is_match(&status.slug) {
                return Err(AppError::new(
                    ErrorCategory::ValidationError,
                    format!("invalid status slug: {}", status.slug),
                ));
            }
            if !status_slugs.insert(status.slug.clone()) {
                return Err(AppError::new(
                    ErrorCategory::ValidationError,
                    format!("duplicate status slug: {}", status.slug),
                ));
            }
        }

        for status in &self.statuses {
            if let Some(precondition) = &status.precondition {
                for origin in &precondition.from {
                    if origin != DRAFT_STATUS && !status_slugs.contains(origin) {
                        return Err(AppError::new(
                            ErrorCategory::ValidationError,
                            format!(
                                "status {} precondition references unknown origin status: {}",
                                status.slug, origin
                            ),
                        ));
                    }
                }
                for requirement in &precondition.approvals {
                    if !approval_slugs.contains(requirement.key.as_str()) {
                        return Err(AppError::new(
                            ErrorCategory::ValidationError,
                            format!(
                                "status {} requires unknown approval key: {}",
                                status.slug, requirement.key
                            ),
                        ));
                    }
                }
            }
            for action in status.transition.iter().chain(&status.finally_actions) {
                if action.kind.trim().is_empty() {
                    return Err(AppError::new(
                        ErrorCategory::ValidationError,
                        format!("status {} declares an action with empty kind", status.slug),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn status(&self, slug: &str) -> Option<&WorkflowStatus> {
        self.statuses.iter().find(|status| status.slug == slug)
    }

    pub fn field(&self, slug: &str) -> Option<&WorkflowField> {
        self.fields.iter().find(|field| field.slug == slug)
    }

    pub fn approval(&self, slug: &str) -> Option<&ApprovalDefinition> {
        self.approvals.iter().find(|approval| approval.slug == slug)
    }

    /// Check the workflow access list against a user email. Patterns: `*`
    /// matches anyone, `@domain` matches the email domain, anything else is a
    /// literal email. An empty list leaves the workflow open.
    pub fn is_user_allowed(&self, email: &str) -> bool {
        if self.access.is_empty() {
            return true;
        }
        self.access.iter().any(|pattern| {
            if pattern == "*" {
                return true;
            }
            if let Some(domain) = pattern.strip_prefix('@') {
                return email
                    .rsplit_once('@')
                    .map(|(_, host)| host.eq_ignore_ascii_case(domain))
                    .unwrap_or(false);
            }
            pattern.eq_ignore_ascii_case(email)
        })
    }

    /// Validate card field data against the declared field schemas,
    /// aggregating every violation into one error.
    pub fn validate_card_fields(&self, field_data: &Map<String, Value>) -> Result<(), AppError> {
        let mut violations = Vec::new();
        for field in &self.fields {
            let value = match field_data.get(&field.slug) {
                Some(value) if !value.is_null() => value,
                _ => continue,
            };
            if let Some(message) = schema_violation(&field.schema, value) {
                violations.push(format!("{}: {}", field.slug, message));
            }
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("invalid field value(s): {}", violations.join("; ")),
            )
            .with_code("CF-FLD-001"))
        }
    }
}

fn schema_violation(schema: &FieldSchema, value: &Value) -> Option<String> {
    match schema {
        FieldSchema::Number { min, max } => {
            let number = match value.as_f64() {
                Some(number) => number,
                None => return Some("expected a number".to_string()),
            };
            if let Some(min) = min {
                if number < *min {
                    return Some(format!("{} is below minimum {}", number, min));
                }
            }
            if let Some(max) = max {
                if number > *max {
                    return Some(format!("{} is above maximum {}", number, max));
                }
            }
            None
        }
        FieldSchema::Text { pattern, .. } => {
            let text = match value.as_str() {
                Some(text) => text,
                None => return Some("expected a string".to_string()),
            };
            if let Some(pattern) = pattern {
                // Patterns were compiled at configuration load.
                if let Ok(re) = Regex::new(pattern) {
                    if !re.is_match(text) {
                        return Some(format!("'{}' does not match pattern {}", text, pattern));
                    }
                }
            }
            None
        }
        FieldSchema::Choice { choices } => {
            let text = match value.as_str() {
                Some(text) => text,
                None => return Some("expected a string".to_string()),
            };
            if !choices.iter().any(|choice| choice == text) {
                return Some(format!("'{}' is not one of the declared choices", text));
            }
            None
        }
        FieldSchema::MultiChoice { choices } => {
            let items = match value.as_array() {
                Some(items) => items,
                None => return Some("expected an array".to_string()),
            };
            for item in items {
                match item.as_str() {
                    Some(text) if choices.iter().any(|choice| choice == text) => {}
                    Some(text) => {
                        return Some(format!("'{}' is not one of the declared choices", text))
                    }
                    None => return Some("expected an array of strings".to_string()),
                }
            }
            None
        }
        FieldSchema::Bool {} => {
            if value.as_bool().is_none() {
                return Some("expected a boolean".to_string());
            }
            None
        }
        FieldSchema::Url {} => {
            let text = match value.as_str() {
                Some(text) => text,
                None => return Some("expected a string".to_string()),
            };
            if url::Url::parse(text).is_err() {
                return Some(format!("'{}' is not a valid URL", text));
            }
            None
        }
        FieldSchema::List {} => {
            if value.as_array().is_none() {
                return Some("expected an array".to_string());
            }
            None
        }
    }
}

/// Read-only registry of loaded workflow configurations.
#[derive(Default)]
pub struct WorkflowRegistry {
    inner: DashMap<String, Arc<WorkflowConfiguration>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, config: WorkflowConfiguration) -> Result<(), AppError> {
        let id = config.workflow_id.clone();
        if self.inner.contains_key(&id) {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("duplicate workflow id: {}", id),
            ));
        }
        self.inner.insert(id, Arc::new(config));
        Ok(())
    }

    pub fn get(&self, workflow_id: &str) -> Option<Arc<WorkflowConfiguration>> {
        self.inner.get(workflow_id).map(|entry| entry.value().clone())
    }

    pub fn workflow_ids(&self) -> Vec<String> {
        self.inner.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Load every `.yaml`/`.yml` file in a directory into the registry.
    pub fn load_dir(dir: &Path) -> Result<Self, AppError> {
        let registry = WorkflowRegistry::new();
        let entries = fs::read_dir(dir).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to read config directory {}: {}", dir.display(), err),
            )
        })?;
        for entry in entries {
            let entry = entry.map_err(|err| {
                AppError::new(
                    ErrorCategory::IoError,
                    format!("failed to enumerate {}: {}", dir.display(), err),
                )
            })?;
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext == "yaml" || ext == "yml")
                .unwrap_or(false);
            if !is_yaml {
                continue;
            }
            let config = WorkflowConfiguration::load_from_file(&path)?;
            registry.insert(config)?;
        }
        Ok(registry)
    }
}

#![allow(clippy::result_large_err)] // Each sub-validator raises a distinct AppError with full context.

use crate::core::approvals;
use crate::core::auth::AuthUser;
use crate::core::config::{StatusPrecondition, WorkflowStatus};
use crate::core::entities::CardEntry;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use serde_json::{Map, Value};

/// Destination payload accompanying a transition request. Top-level
/// overrides and fieldData patches merge over the current card on write.
#[derive(Debug, Clone, Default)]
pub struct DestinationContext {
    pub fields: Map<String, Value>,
    pub field_data: Map<String, Value>,
}

/// Run every precondition declared on the target status, in fixed order:
/// origin status, user authorization, required fields, approvals. The
/// required-field and approval checks aggregate all violations into a
/// single error each.
pub fn validate_all(
    target: &WorkflowStatus,
    current_status: &str,
    user: &AuthUser,
    card: &CardEntry,
    destination: &DestinationContext,
) -> Result<(), AppError> {
    let precondition = match &target.precondition {
        Some(precondition) => precondition,
        None => return Ok(()),
    };
    validate_origin(precondition, &target.slug, current_status)?;
    validate_user(precondition, &target.slug, user, card)?;
    validate_required_fields(precondition, &target.slug, card, destination)?;
    validate_approvals(precondition, &target.slug, card)?;
    Ok(())
}

fn validate_origin(
    precondition: &StatusPrecondition,
    target: &str,
    current_status: &str,
) -> Result<(), AppError> {
    if precondition.from.is_empty() {
        return Ok(());
    }
    if precondition.from.iter().any(|origin| origin == current_status) {
        return Ok(());
    }
    Err(AppError::new(
        ErrorCategory::ValidationError,
        format!(
            "status {} cannot be entered from {}; allowed origins: {}",
            target,
            current_status,
            precondition.from.join(", ")
        ),
    )
    .with_code("CF-PRE-001"))
}

fn validate_user(
    precondition: &StatusPrecondition,
    target: &str,
    user: &AuthUser,
    card: &CardEntry,
) -> Result<(), AppError> {
    if precondition.users.is_empty() {
        return Ok(());
    }
    let authorized = precondition.users.iter().any(|entry| match entry.as_str() {
        "*" => true,
        "owner" => card.owner == user.email || card.owner == user.uid,
        literal => literal == user.email || literal == user.uid,
    });
    if authorized {
        return Ok(());
    }
    Err(AppError::new(
        ErrorCategory::ValidationError,
        format!("user {} is not authorized to move cards into {}", user.email, target),
    )
    .with_code("CF-PRE-002"))
}

fn validate_required_fields(
    precondition: &StatusPrecondition,
    target: &str,
    card: &CardEntry,
    destination: &DestinationContext,
) -> Result<(), AppError> {
    if precondition.required.is_empty() {
        return Ok(());
    }

    // Destination context wins over the current card on conflicting keys.
    let mut merged = card.field_data.clone();
    for (key, value) in &destination.field_data {
        merged.insert(key.clone(), value.clone());
    }

    let mut missing = Vec::new();
    for entry in &precondition.required {
        let present = if let Some(field) = entry.strip_prefix("$.") {
            let value = destination
                .fields
                .get(field)
                .cloned()
                .or_else(|| card.top_level_field(field));
            value.map(|value| !is_empty(&value)).unwrap_or(false)
        } else {
            merged
                .get(entry)
                .map(|value| !is_empty(value))
                .unwrap_or(false)
        };
        if !present {
            missing.push(entry.clone());
        }
    }
    if missing.is_empty() {
        return Ok(());
    }
    Err(AppError::new(
        ErrorCategory::ValidationError,
        format!(
            "status {} requires field(s) with no value: {}",
            target,
            missing.join(", ")
        ),
    )
    .with_code("CF-PRE-003"))
}

fn validate_approvals(
    precondition: &StatusPrecondition,
    target: &str,
    card: &CardEntry,
) -> Result<(), AppError> {
    if precondition.approvals.is_empty() {
        return Ok(());
    }
    let unsatisfied: Vec<&str> = precondition
        .approvals
        .iter()
        .filter(|requirement| !approvals::is_requirement_satisfied(card, requirement))
        .map(|requirement| requirement.key.as_str())
        .collect();
    if unsatisfied.is_empty() {
        return Ok(());
    }
    Err(AppError::new(
        ErrorCategory::ValidationError,
        format!(
            "status {} requires unsatisfied approval(s): {}",
            target,
            unsatisfied.join(", ")
        ),
    )
    .with_code("CF-PRE-004"))
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

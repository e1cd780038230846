use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub use crate::core::types::ActivityAction;

/// Reserved origin status. Cards start here; configurations may reference it
/// in `precondition.from` without declaring it.
pub const DRAFT_STATUS: &str = "draft";

/// Timestamp as stored in card documents. Older writers persisted raw epoch
/// milliseconds; newer ones persist RFC 3339 strings. Both normalize through
/// [`TimestampValue::as_millis`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimestampValue {
    Millis(i64),
    Instant(DateTime<Utc>),
}

impl TimestampValue {
    pub fn now() -> Self {
        TimestampValue::Instant(Utc::now())
    }

    pub fn as_millis(&self) -> i64 {
        match self {
            TimestampValue::Millis(ms) => *ms,
            TimestampValue::Instant(instant) => instant.timestamp_millis(),
        }
    }
}

/// A single approval vote recorded on a card under an approval key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalToken {
    pub kind: ApprovalKind,
    pub author: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub is_negative: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voided: Option<bool>,
}

impl ApprovalToken {
    /// A token counts until it has been explicitly voided.
    pub fn is_active(&self) -> bool {
        !self.voided.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalKind {
    Basic,
}

/// Card document as persisted in the `cards` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardEntry {
    pub workflow_id: String,
    pub workflow_card_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: String,
    #[serde(rename = "type")]
    pub card_type: String,
    #[serde(default)]
    pub value: f64,
    pub owner: String,
    #[serde(default)]
    pub field_data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_tokens: Option<HashMap<String, Vec<ApprovalToken>>>,
    pub status_since: TimestampValue,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl CardEntry {
    /// Look up a top-level card field by its wire name, as referenced by
    /// `$.`-prefixed placeholders and precondition entries.
    pub fn top_level_field(&self, key: &str) -> Option<Value> {
        match key {
            "workflowId" => Some(Value::String(self.workflow_id.clone())),
            "workflowCardId" => Some(Value::String(self.workflow_card_id.clone())),
            "title" => Some(Value::String(self.title.clone())),
            "description" => self
                .description
                .as_ref()
                .map(|text| Value::String(text.clone())),
            "status" => Some(Value::String(self.status.clone())),
            "type" => Some(Value::String(self.card_type.clone())),
            "value" => serde_json::Number::from_f64(self.value).map(Value::Number),
            "owner" => Some(Value::String(self.owner.clone())),
            "createdBy" => Some(Value::String(self.created_by.clone())),
            "updatedBy" => Some(Value::String(self.updated_by.clone())),
            "statusSince" => serde_json::to_value(self.status_since).ok(),
            _ => None,
        }
    }

    /// Tokens recorded for the given approval key, voided entries included.
    pub fn approval_tokens_for(&self, key: &str) -> &[ApprovalToken] {
        self.approval_tokens
            .as_ref()
            .and_then(|tokens| tokens.get(key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// One entry in a card's change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Value>,
}

/// Immutable append-only record of a card mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogEntry {
    pub workflow_id: String,
    pub card_id: String,
    pub card_title: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub action: ActivityAction,
    pub changes: Vec<FieldChange>,
}

/// A card currently sitting in a status, tracked inside [`StatusStats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEntry {
    pub card_id: String,
    pub status_since: TimestampValue,
    #[serde(default)]
    pub value: f64,
    pub user_id: String,
}

/// Per-(workflow, status) aggregate maintained incrementally from
/// transition events. `current_pendings` is keyed by card id so pending
/// upserts and removals stay idempotent under duplicate delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusStats {
    pub workflow_id: String,
    pub status: String,
    #[serde(default)]
    pub total_transition_time: i64,
    #[serde(default)]
    pub total_transition_count: i64,
    #[serde(default)]
    pub current_pendings: HashMap<String, PendingEntry>,
    pub last_updated: DateTime<Utc>,
}

/// One list-of-values entry as returned by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LovEntry {
    pub key: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Cached provider fetch, one document per distinct provider configuration.
/// Staleness is checked lazily against `expired_at`; nothing sweeps the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedLovData {
    pub kind: String,
    pub cache_key: String,
    pub values: Vec<LovEntry>,
    pub expired_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

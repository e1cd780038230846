#![allow(clippy::result_large_err)] // Aggregation failures abort the whole batch and carry document context.

use crate::core::auth::AuthUser;
use crate::core::entities::{ActivityLogEntry, CardEntry, FieldChange, PendingEntry};
use crate::core::error::AppError;
use crate::core::store::{DocumentStore, WriteBatch, ACTIVITY_COLLECTION, STATS_COLLECTION};
use crate::core::types::{ActivityAction, ErrorCategory};
use chrono::Utc;
use indexmap::IndexSet;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Top-level scalar card fields covered by the diff, in report order.
const SCALAR_KEYS: [&str; 6] = ["title", "status", "value", "type", "owner", "description"];

/// Classify a card write from its before/after snapshots.
pub fn classify(
    before: Option<&CardEntry>,
    after: Option<&CardEntry>,
) -> Result<ActivityAction, AppError> {
    match (before, after) {
        (None, Some(_)) => Ok(ActivityAction::Create),
        (Some(_), None) => Ok(ActivityAction::Delete),
        (Some(before), Some(after)) if before.status != after.status => Ok(ActivityAction::Transit),
        (Some(_), Some(_)) => Ok(ActivityAction::Update),
        (None, None) => Err(AppError::new(
            ErrorCategory::InternalError,
            "card write with neither before nor after snapshot",
        )
        .with_code("CF-STAT-001")),
    }
}

/// Values are equivalent when both are absent under normalization
/// (null, undefined, and the empty array are interchangeable) or deeply
/// equal: arrays element-wise, objects by key-set union.
pub fn values_equivalent(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (normalize(a), normalize(b)) {
        (None, None) => true,
        (Some(a), Some(b)) => deep_equivalent(a, b),
        _ => false,
    }
}

fn normalize(value: Option<&Value>) -> Option<&Value> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) if items.is_empty() => None,
        other => other,
    }
}

fn deep_equivalent(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(left), Value::Array(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .zip(right)
                    .all(|(l, r)| values_equivalent(Some(l), Some(r)))
        }
        (Value::Object(left), Value::Object(right)) => {
            let mut keys: IndexSet<&String> = left.keys().collect();
            keys.extend(right.keys());
            keys.into_iter()
                .all(|key| values_equivalent(left.get(key), right.get(key)))
        }
        (a, b) => a == b,
    }
}

/// Produce the ordered field-level diff between two card snapshots: the
/// fixed scalar fields first, then the union of `fieldData` keys. Only
/// genuinely non-equivalent pairs are recorded.
pub fn generate_changes(
    before: Option<&CardEntry>,
    after: Option<&CardEntry>,
) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    for key in SCALAR_KEYS {
        let from = before.and_then(|card| card.top_level_field(key));
        let to = after.and_then(|card| card.top_level_field(key));
        if !values_equivalent(from.as_ref(), to.as_ref()) {
            changes.push(FieldChange {
                key: key.to_string(),
                from,
                to,
            });
        }
    }

    let mut keys: IndexSet<String> = IndexSet::new();
    if let Some(card) = before {
        keys.extend(card.field_data.keys().cloned());
    }
    if let Some(card) = after {
        keys.extend(card.field_data.keys().cloned());
    }
    for key in keys {
        let from = before.and_then(|card| card.field_data.get(&key));
        let to = after.and_then(|card| card.field_data.get(&key));
        if !values_equivalent(from, to) {
            changes.push(FieldChange {
                key,
                from: from.cloned(),
                to: to.cloned(),
            });
        }
    }
    changes
}

/// Reactive side channel invoked on every persisted card write: derives the
/// activity log entry and the per-status statistics adjustments, then
/// commits both in one atomic batch.
pub struct Aggregator {
    store: Arc<dyn DocumentStore>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn stats_doc_id(workflow_id: &str, status: &str) -> String {
        format!("{}:{}", workflow_id, status)
    }

    pub async fn record_write(
        &self,
        before: Option<&CardEntry>,
        after: Option<&CardEntry>,
        user: &AuthUser,
    ) -> Result<(), AppError> {
        let action = classify(before, after)?;
        let changes = generate_changes(before, after);
        if action != ActivityAction::Delete && changes.is_empty() {
            debug!(action = %action, "card write produced no changes, skipping activity log");
            return Ok(());
        }

        let subject = after.or(before).expect("classify rejects double-None");
        let now = Utc::now();
        let entry = ActivityLogEntry {
            workflow_id: subject.workflow_id.clone(),
            card_id: subject.workflow_card_id.clone(),
            card_title: subject.title.clone(),
            user_id: user.email.clone(),
            timestamp: now,
            action,
            changes,
        };

        let mut batch = WriteBatch::new();
        let log_id = format!(
            "{}:{}:{}",
            entry.workflow_id,
            entry.card_id,
            Uuid::new_v4()
        );
        batch.merge_set(ACTIVITY_COLLECTION, log_id, serde_json::to_value(&entry)?);

        match action {
            ActivityAction::Create => {
                let card = after.expect("create has an after snapshot");
                self.push_entering(&mut batch, card, user);
            }
            ActivityAction::Transit => {
                let previous = before.expect("transit has a before snapshot");
                let card = after.expect("transit has an after snapshot");
                self.push_leaving(&mut batch, previous);
                self.push_entering(&mut batch, card, user);
            }
            ActivityAction::Delete => {
                // A deleted card stops pending in its status; deletion is not
                // counted as a transition.
                let previous = before.expect("delete has a before snapshot");
                let doc_id = Self::stats_doc_id(&previous.workflow_id, &previous.status);
                batch.merge_set(
                    STATS_COLLECTION,
                    doc_id.clone(),
                    stats_base(&previous.workflow_id, &previous.status),
                );
                batch.map_delete(
                    STATS_COLLECTION,
                    doc_id,
                    "currentPendings",
                    previous.workflow_card_id.clone(),
                );
            }
            ActivityAction::Update => {
                // Status unchanged: zero stats mutation.
            }
        }

        self.store.commit(batch).await?;
        Ok(())
    }

    fn push_entering(&self, batch: &mut WriteBatch, card: &CardEntry, user: &AuthUser) {
        let doc_id = Self::stats_doc_id(&card.workflow_id, &card.status);
        batch.merge_set(
            STATS_COLLECTION,
            doc_id.clone(),
            stats_base(&card.workflow_id, &card.status),
        );
        let pending = PendingEntry {
            card_id: card.workflow_card_id.clone(),
            status_since: card.status_since,
            value: card.value,
            user_id: user.email.clone(),
        };
        batch.map_put(
            STATS_COLLECTION,
            doc_id,
            "currentPendings",
            card.workflow_card_id.clone(),
            serde_json::to_value(pending).expect("pending entry serializes"),
        );
    }

    fn push_leaving(&self, batch: &mut WriteBatch, previous: &CardEntry) {
        let elapsed = (Utc::now().timestamp_millis() - previous.status_since.as_millis()).max(0);
        let doc_id = Self::stats_doc_id(&previous.workflow_id, &previous.status);
        batch.merge_set(
            STATS_COLLECTION,
            doc_id.clone(),
            stats_base(&previous.workflow_id, &previous.status),
        );
        batch.increment(
            STATS_COLLECTION,
            doc_id.clone(),
            "totalTransitionTime",
            elapsed,
        );
        batch.increment(STATS_COLLECTION, doc_id.clone(), "totalTransitionCount", 1);
        batch.map_delete(
            STATS_COLLECTION,
            doc_id,
            "currentPendings",
            previous.workflow_card_id.clone(),
        );
    }
}

fn stats_base(workflow_id: &str, status: &str) -> Value {
    json!({
        "workflowId": workflow_id,
        "status": status,
        "lastUpdated": Utc::now(),
    })
}

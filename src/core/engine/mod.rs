#![allow(clippy::result_large_err)] // The engine returns AppError to preserve full diagnostic context; boxing would discard transition state.

use crate::core::actions::ActionRunner;
use crate::core::auth::AuthUser;
use crate::core::config::WorkflowRegistry;
use crate::core::entities::{CardEntry, TimestampValue};
use crate::core::error::AppError;
use crate::core::lov::LovValidator;
use crate::core::precondition::{self, DestinationContext};
use crate::core::stats::Aggregator;
use crate::core::store::CardStore;
use crate::core::types::{ErrorCategory, RunTopology};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Transition request as received from the RPC boundary.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    pub workflow_id: String,
    pub card_id: String,
    pub status: String,
    /// Top-level card field overrides merged on write.
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// `fieldData` patch merged on write; wins over the card on conflicts.
    #[serde(default)]
    pub field_data: Map<String, Value>,
}

/// Timing telemetry returned from a committed transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionTelemetry {
    pub total_ms: u64,
    pub pre_action_ms: Vec<u64>,
    pub post_action_ms: Vec<u64>,
}

/// Top-level state machine. Statuses are the workflow's declared slugs;
/// each status gates its own entry through the precondition declared on it.
pub struct TransitionEngine {
    configs: Arc<WorkflowRegistry>,
    cards: Arc<CardStore>,
    runner: ActionRunner,
    aggregator: Arc<Aggregator>,
    lov: Arc<LovValidator>,
}

impl TransitionEngine {
    pub fn new(
        configs: Arc<WorkflowRegistry>,
        cards: Arc<CardStore>,
        runner: ActionRunner,
        aggregator: Arc<Aggregator>,
        lov: Arc<LovValidator>,
    ) -> Self {
        Self {
            configs,
            cards,
            runner,
            aggregator,
            lov,
        }
    }

    /// Move a card into the requested status. Pre-transition actions run
    /// serially before persistence and abort it on failure; post-transition
    /// actions run in parallel after persistence and are reported without
    /// rolling the committed status change back.
    pub async fn transit(
        &self,
        request: &TransitionRequest,
        user: &AuthUser,
    ) -> Result<TransitionTelemetry, AppError> {
        let started = Instant::now();

        let configuration = self.configs.get(&request.workflow_id).ok_or_else(|| {
            AppError::new(
                ErrorCategory::ConfigurationError,
                format!("unknown workflow: {}", request.workflow_id),
            )
            .with_code("CF-ENG-001")
        })?;
        let target = configuration.status(&request.status).ok_or_else(|| {
            AppError::new(
                ErrorCategory::ConfigurationError,
                format!(
                    "workflow {} has no status {}",
                    request.workflow_id, request.status
                ),
            )
            .with_code("CF-ENG-002")
        })?;

        let current = self
            .cards
            .get_card(&request.workflow_id, &request.card_id)
            .await?;
        if request.status == current.status {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!(
                    "card {} is already in status {}; no transition required",
                    request.card_id, request.status
                ),
            )
            .with_code("CF-ENG-003"));
        }

        let destination = DestinationContext {
            fields: request.fields.clone(),
            field_data: request.field_data.clone(),
        };
        precondition::validate_all(target, &current.status, user, &current, &destination)?;

        let updated = apply_destination(&current, request, user);
        configuration.validate_card_fields(&updated.field_data)?;
        self.lov
            .validate_field_data(configuration.as_ref(), &updated.field_data, &current.field_data)
            .await?;

        // Pre-transition actions observe the card as it still is.
        let pre_action_ms = self
            .runner
            .run(&current, &target.transition, RunTopology::Serial)
            .await?;

        self.cards.put_card(&updated).await?;
        self.aggregator
            .record_write(Some(&current), Some(&updated), user)
            .await?;
        info!(
            workflow = %request.workflow_id,
            card = %request.card_id,
            from = %current.status,
            to = %request.status,
            "transition committed"
        );

        let post_action_ms = self
            .runner
            .run(&updated, &target.finally_actions, RunTopology::Parallel)
            .await
            .map_err(|mut err| {
                err.add_context(
                    "transition",
                    "status change already committed; finally action failed",
                );
                err
            })?;

        Ok(TransitionTelemetry {
            total_ms: started.elapsed().as_millis() as u64,
            pre_action_ms,
            post_action_ms,
        })
    }
}

/// Merge the destination context into the card, stamping the transition
/// time and the acting user. Workflow and card identifiers are never
/// overridden by the context.
fn apply_destination(
    current: &CardEntry,
    request: &TransitionRequest,
    user: &AuthUser,
) -> CardEntry {
    let mut updated = current.clone();
    for (key, value) in &request.fields {
        match key.as_str() {
            "title" => {
                if let Some(text) = value.as_str() {
                    updated.title = text.to_string();
                }
            }
            "description" => {
                updated.description = value.as_str().map(str::to_string);
            }
            "type" => {
                if let Some(text) = value.as_str() {
                    updated.card_type = text.to_string();
                }
            }
            "value" => {
                if let Some(number) = value.as_f64() {
                    updated.value = number;
                }
            }
            "owner" => {
                if let Some(text) = value.as_str() {
                    updated.owner = text.to_string();
                }
            }
            other => {
                warn!(field = other, "ignoring unsupported top-level override");
            }
        }
    }
    for (key, value) in &request.field_data {
        updated.field_data.insert(key.clone(), value.clone());
    }
    updated.status = request.status.clone();
    updated.status_since = TimestampValue::now();
    updated.updated_by = user.email.clone();
    updated.updated_at = Utc::now();
    updated
}

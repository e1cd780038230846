#![allow(clippy::result_large_err)] // Executor param parsing returns AppError for consistent diagnostics.

use crate::core::actions::ActionExecutor;
use crate::core::auth::AuthUser;
use crate::core::entities::CardEntry;
use crate::core::error::AppError;
use crate::core::stats::Aggregator;
use crate::core::store::CardStore;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

struct SetOwnerParams {
    to: String,
}

impl SetOwnerParams {
    fn parse(value: &Value) -> Result<Self, AppError> {
        let to = value
            .get("to")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                AppError::new(
                    ErrorCategory::ValidationError,
                    "set-owner requires a non-empty 'to' address",
                )
            })?
            .to_string();
        Ok(Self { to })
    }
}

/// Reassigns the card owner through a merge-style partial update. Writing
/// the same owner twice is a no-op, so redelivery is harmless.
pub struct SetOwnerExecutor {
    cards: Arc<CardStore>,
    aggregator: Arc<Aggregator>,
}

impl SetOwnerExecutor {
    pub fn new(cards: Arc<CardStore>, aggregator: Arc<Aggregator>) -> Self {
        Self { cards, aggregator }
    }
}

#[async_trait]
impl ActionExecutor for SetOwnerExecutor {
    fn kind(&self) -> &'static str {
        "set-owner"
    }

    fn validate_params(&self, params: &Value) -> Result<(), AppError> {
        SetOwnerParams::parse(params).map(|_| ())
    }

    async fn execute(&self, card: &CardEntry, params: Value) -> Result<(), AppError> {
        let parsed = SetOwnerParams::parse(&params)?;
        if card.owner == parsed.to {
            return Ok(());
        }
        let before = self
            .cards
            .get_card(&card.workflow_id, &card.workflow_card_id)
            .await?;
        self.cards
            .update_card(
                &card.workflow_id,
                &card.workflow_card_id,
                json!({ "owner": parsed.to }),
            )
            .await?;
        let after = self
            .cards
            .get_card(&card.workflow_id, &card.workflow_card_id)
            .await?;
        let actor = AuthUser {
            uid: card.updated_by.clone(),
            email: card.updated_by.clone(),
        };
        self.aggregator
            .record_write(Some(&before), Some(&after), &actor)
            .await
    }
}

#![allow(clippy::result_large_err)] // Executor param parsing returns AppError for consistent diagnostics.

use crate::core::actions::ActionExecutor;
use crate::core::entities::CardEntry;
use crate::core::error::AppError;
use crate::core::mail::{EmailMessage, MailerRegistry};
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

struct SendEmailParams {
    from: String,
    to: String,
    cc: Option<String>,
    bcc: Option<String>,
    subject: String,
    message: String,
}

impl SendEmailParams {
    fn parse(value: &Value) -> Result<Self, AppError> {
        let required = |field: &str| -> Result<String, AppError> {
            value
                .get(field)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    AppError::new(
                        ErrorCategory::ValidationError,
                        format!("send-email requires a non-empty '{}'", field),
                    )
                })
        };
        let optional = |field: &str| {
            value
                .get(field)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Ok(Self {
            from: required("from")?,
            to: required("to")?,
            cc: optional("cc"),
            bcc: optional("bcc"),
            subject: required("subject")?,
            message: required("message")?,
        })
    }
}

/// Sends an email through the mailer bound to the sender address's domain.
pub struct SendEmailExecutor {
    mailers: Arc<MailerRegistry>,
}

impl SendEmailExecutor {
    pub fn new(mailers: Arc<MailerRegistry>) -> Self {
        Self { mailers }
    }
}

#[async_trait]
impl ActionExecutor for SendEmailExecutor {
    fn kind(&self) -> &'static str {
        "send-email"
    }

    fn validate_params(&self, params: &Value) -> Result<(), AppError> {
        SendEmailParams::parse(params).map(|_| ())
    }

    async fn execute(&self, card: &CardEntry, params: Value) -> Result<(), AppError> {
        let parsed = SendEmailParams::parse(&params)?;
        let mailer = self.mailers.sender_for(&parsed.from)?;
        let message = EmailMessage {
            from: parsed.from,
            to: parsed.to,
            cc: parsed.cc,
            bcc: parsed.bcc,
            subject: parsed.subject,
            body: parsed.message,
        };
        let message_id = mailer.send(&message).await?;
        info!(
            card = %card.workflow_card_id,
            to = %message.to,
            message_id = %message_id,
            "transition email sent"
        );
        Ok(())
    }
}

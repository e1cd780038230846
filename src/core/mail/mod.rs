#![allow(clippy::result_large_err)] // Sender lookup returns AppError naming the unconfigured domain.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Outbound message handed to a mailer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcc: Option<String>,
    pub subject: String,
    pub body: String,
}

/// Email transport seam; implementations wrap a real delivery vendor.
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, message: &EmailMessage) -> Result<String, AppError>;
}

/// Mailers are selected by the sender address's domain; sending from an
/// unconfigured domain is an error, never a silent drop.
#[derive(Default)]
pub struct MailerRegistry {
    mailers: HashMap<String, Arc<dyn Mailer>>,
}

impl MailerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<D: Into<String>>(mut self, domain: D, mailer: Arc<dyn Mailer>) -> Self {
        self.mailers.insert(domain.into().to_lowercase(), mailer);
        self
    }

    pub fn sender_for(&self, from_address: &str) -> Result<Arc<dyn Mailer>, AppError> {
        let domain = from_address.rsplit_once('@').map(|(_, host)| host).ok_or_else(|| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("sender address '{}' has no domain", from_address),
            )
        })?;
        self.mailers
            .get(&domain.to_lowercase())
            .cloned()
            .ok_or_else(|| {
                AppError::new(
                    ErrorCategory::MailError,
                    format!("no mail sender configured for domain {}", domain),
                )
                .with_code("CF-MAIL-001")
            })
    }
}

/// Transport that records sends through tracing. Used by the local serve
/// mode and tests.
#[derive(Default)]
pub struct LoggingMailer;

impl LoggingMailer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Mailer for LoggingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<String, AppError> {
        let message_id = uuid::Uuid::new_v4().to_string();
        info!(
            from = %message.from,
            to = %message.to,
            subject = %message.subject,
            message_id = %message_id,
            "email dispatched"
        );
        Ok(message_id)
    }
}

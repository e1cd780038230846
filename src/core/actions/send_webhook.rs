#![allow(clippy::result_large_err)] // Executor param parsing returns AppError for consistent diagnostics.

use crate::core::actions::ActionExecutor;
use crate::core::entities::CardEntry;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

struct SendWebhookParams {
    url: String,
    method: Method,
    headers: BTreeMap<String, String>,
    body: Option<Value>,
}

impl SendWebhookParams {
    fn parse(value: &Value) -> Result<Self, AppError> {
        let url = value
            .get("url")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                AppError::new(
                    ErrorCategory::ValidationError,
                    "send-webhook requires a non-empty 'url'",
                )
            })?
            .to_string();
        url::Url::parse(&url).map_err(|err| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("send-webhook url '{}' is invalid: {}", url, err),
            )
        })?;

        let method = match value.get("method").and_then(Value::as_str) {
            Some(name) => Method::from_bytes(name.to_uppercase().as_bytes()).map_err(|_| {
                AppError::new(
                    ErrorCategory::ValidationError,
                    format!("send-webhook method '{}' is invalid", name),
                )
            })?,
            None => Method::POST,
        };

        let mut headers = BTreeMap::new();
        if let Some(map) = value.get("headers").and_then(Value::as_object) {
            for (name, header_value) in map {
                let text = header_value.as_str().ok_or_else(|| {
                    AppError::new(
                        ErrorCategory::ValidationError,
                        format!("send-webhook header '{}' must be a string", name),
                    )
                })?;
                headers.insert(name.clone(), text.to_string());
            }
        }

        Ok(Self {
            url,
            method,
            headers,
            body: value.get("body").cloned().filter(|body| !body.is_null()),
        })
    }

    fn has_content_type(&self) -> bool {
        self.headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case("content-type"))
    }
}

/// Issues an HTTP request from the resolved action definition. The
/// `Content-Type` is auto-detected from the body shape only when the caller
/// did not set one.
pub struct SendWebhookExecutor {
    http: reqwest::Client,
}

impl SendWebhookExecutor {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ActionExecutor for SendWebhookExecutor {
    fn kind(&self) -> &'static str {
        "send-webhook"
    }

    fn validate_params(&self, params: &Value) -> Result<(), AppError> {
        SendWebhookParams::parse(params).map(|_| ())
    }

    async fn execute(&self, card: &CardEntry, params: Value) -> Result<(), AppError> {
        let parsed = SendWebhookParams::parse(&params)?;

        let mut header_map = HeaderMap::new();
        for (name, text) in &parsed.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                AppError::new(
                    ErrorCategory::ValidationError,
                    format!("send-webhook header name '{}' is invalid", name),
                )
            })?;
            let header_value = HeaderValue::from_str(text).map_err(|_| {
                AppError::new(
                    ErrorCategory::ValidationError,
                    format!("send-webhook header '{}' has an invalid value", name),
                )
            })?;
            header_map.insert(name, header_value);
        }

        let mut request = self.http.request(parsed.method.clone(), &parsed.url);
        if let Some(body) = &parsed.body {
            let (payload, detected) = encode_body(body);
            if !parsed.has_content_type() {
                header_map.insert(CONTENT_TYPE, HeaderValue::from_static(detected));
            }
            request = request.body(payload);
        }
        request = request.headers(header_map);

        debug!(card = %card.workflow_card_id, url = %parsed.url, method = %parsed.method, "dispatching webhook");
        let response = request.send().await.map_err(|err| {
            AppError::new(
                ErrorCategory::HttpError,
                format!("webhook request to {} failed: {}", parsed.url, err),
            )
            .with_code("CF-ACT-HTTP")
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::new(
                ErrorCategory::HttpError,
                format!(
                    "webhook to {} returned {}: {}",
                    parsed.url,
                    status,
                    text.trim()
                ),
            )
            .with_code("CF-ACT-HTTP"));
        }
        Ok(())
    }
}

/// Serialize the body and pick a content type from its shape: structured
/// JSON for objects/arrays; for strings, XML when it opens a tag, form
/// encoding when it looks like `k=v&k=v`, plain text otherwise.
fn encode_body(body: &Value) -> (String, &'static str) {
    match body {
        Value::String(text) => {
            let trimmed = text.trim_start();
            if trimmed.starts_with('<') {
                (text.clone(), "application/xml")
            } else if looks_form_encoded(text) {
                (text.clone(), "application/x-www-form-urlencoded")
            } else if serde_json::from_str::<Value>(text).is_ok() {
                (text.clone(), "application/json")
            } else {
                (text.clone(), "text/plain")
            }
        }
        composite => (
            serde_json::to_string(composite).unwrap_or_default(),
            "application/json",
        ),
    }
}

fn looks_form_encoded(text: &str) -> bool {
    !text.is_empty()
        && text.split('&').all(|pair| {
            pair.split_once('=')
                .map(|(key, _)| !key.is_empty() && !key.contains(' '))
                .unwrap_or(false)
        })
}

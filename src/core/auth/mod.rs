#![allow(clippy::result_large_err)] // Verification returns AppError for consistent diagnostics.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use subtle::ConstantTimeEq;

/// Identity attached to every authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub uid: String,
    pub email: String,
}

/// Token verification seam. The real deployment fronts a managed identity
/// provider; the engine only needs uid and email back.
#[async_trait]
pub trait AuthProvider: Send + Sync + 'static {
    async fn verify_token(&self, bearer: &str) -> Result<AuthUser, AppError>;
}

/// Token-table provider used by the served boundary and tests.
#[derive(Default)]
pub struct StaticTokenAuth {
    tokens: Vec<(String, AuthUser)>,
}

impl StaticTokenAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Into<String>>(mut self, token: T, user: AuthUser) -> Self {
        self.tokens.push((token.into(), user));
        self
    }

    /// Load a token table from TOML of the shape
    /// `[tokens.<token>] uid = "..." email = "..."`.
    pub fn from_toml_file(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to read token file {}: {}", path.display(), err),
            )
        })?;
        let parsed: TokenFile = toml::from_str(&text).map_err(|err| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("failed to parse token file {}: {}", path.display(), err),
            )
        })?;
        let mut auth = StaticTokenAuth::new();
        for (token, user) in parsed.tokens {
            auth = auth.register(token, user);
        }
        Ok(auth)
    }
}

#[derive(Deserialize)]
struct TokenFile {
    #[serde(default)]
    tokens: HashMap<String, AuthUser>,
}

#[async_trait]
impl AuthProvider for StaticTokenAuth {
    async fn verify_token(&self, bearer: &str) -> Result<AuthUser, AppError> {
        for (token, user) in &self.tokens {
            if token.as_bytes().ct_eq(bearer.as_bytes()).into() {
                return Ok(user.clone());
            }
        }
        Err(AppError::new(ErrorCategory::AuthError, "invalid bearer token").with_code("CF-AUTH-401"))
    }
}

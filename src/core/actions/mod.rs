#![allow(clippy::result_large_err)] // Executor trait and registry return AppError directly for structured diagnostics without boxing.

pub mod runner;
pub mod send_email;
pub mod send_webhook;
pub mod set_owner;

use crate::core::entities::CardEntry;
use crate::core::error::AppError;
use crate::core::mail::MailerRegistry;
use crate::core::stats::Aggregator;
use crate::core::store::CardStore;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub use runner::ActionRunner;

/// Trait implemented by transition action executors.
#[async_trait]
pub trait ActionExecutor: Send + Sync + 'static {
    /// Action kind used in workflow configurations.
    fn kind(&self) -> &'static str;

    /// Validate params ahead of execution.
    fn validate_params(&self, params: &Value) -> Result<(), AppError>;

    /// Execute the action with placeholder-resolved params.
    async fn execute(&self, card: &CardEntry, params: Value) -> Result<(), AppError>;
}

/// Builder used to register executors before the engine starts.
pub struct ExecutorRegistryBuilder {
    executors: HashMap<String, Arc<dyn ActionExecutor>>,
}

impl Default for ExecutorRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorRegistryBuilder {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    pub fn register<T: ActionExecutor>(&mut self, executor: T) -> &mut Self {
        let kind = executor.kind();
        if self.executors.contains_key(kind) {
            panic!("duplicate action executor registered: {}", kind);
        }
        self.executors.insert(kind.to_string(), Arc::new(executor));
        self
    }

    pub fn build(self) -> ExecutorRegistry {
        ExecutorRegistry {
            inner: Arc::new(self.executors),
        }
    }
}

/// Immutable registry consulted by the action runner.
#[derive(Clone)]
pub struct ExecutorRegistry {
    inner: Arc<HashMap<String, Arc<dyn ActionExecutor>>>,
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        ExecutorRegistryBuilder::new().build()
    }

    pub fn builder() -> ExecutorRegistryBuilder {
        ExecutorRegistryBuilder::new()
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn ActionExecutor>> {
        self.inner.get(kind).cloned()
    }
}

/// Collaborators injected into the built-in executors.
pub struct BuiltinExecutorDeps {
    pub cards: Arc<CardStore>,
    pub aggregator: Arc<Aggregator>,
    pub mailers: Arc<MailerRegistry>,
    pub http: reqwest::Client,
}

/// Register the built-in executors into the supplied builder.
pub fn register_builtins(builder: &mut ExecutorRegistryBuilder, deps: BuiltinExecutorDeps) {
    builder
        .register(set_owner::SetOwnerExecutor::new(
            deps.cards,
            deps.aggregator,
        ))
        .register(send_email::SendEmailExecutor::new(deps.mailers))
        .register(send_webhook::SendWebhookExecutor::new(deps.http));
}

#![allow(clippy::result_large_err)] // Runner failures keep the failing action's kind and index in context.

use crate::core::actions::{ActionExecutor, ExecutorRegistry};
use crate::core::config::ActionDefinition;
use crate::core::entities::CardEntry;
use crate::core::error::AppError;
use crate::core::placeholder;
use crate::core::types::{ErrorCategory, RunTopology};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

/// Orchestrates a list of actions against a card. Params are resolved
/// against the card via the placeholder resolver before dispatch, so the
/// executors only ever see concrete values.
pub struct ActionRunner {
    registry: ExecutorRegistry,
}

impl ActionRunner {
    pub fn new(registry: ExecutorRegistry) -> Self {
        Self { registry }
    }

    /// Run the actions in the requested topology and return per-action
    /// elapsed milliseconds, in declaration order.
    pub async fn run(
        &self,
        card: &CardEntry,
        actions: &[ActionDefinition],
        topology: RunTopology,
    ) -> Result<Vec<u64>, AppError> {
        if actions.is_empty() {
            return Ok(Vec::new());
        }
        match topology {
            RunTopology::Serial => self.run_serial(card, actions).await,
            RunTopology::Parallel => self.run_parallel(card, actions).await,
        }
    }

    async fn run_serial(
        &self,
        card: &CardEntry,
        actions: &[ActionDefinition],
    ) -> Result<Vec<u64>, AppError> {
        let context = placeholder::with_context(card);
        let mut elapsed = Vec::with_capacity(actions.len());
        for action in actions {
            let executor = self.lookup(&action.kind)?;
            let params = context.resolve_value(&action.params)?;
            let started = Instant::now();
            executor.execute(card, params).await.map_err(|mut err| {
                err.add_context("action", &action.kind);
                err
            })?;
            elapsed.push(started.elapsed().as_millis() as u64);
        }
        Ok(elapsed)
    }

    async fn run_parallel(
        &self,
        card: &CardEntry,
        actions: &[ActionDefinition],
    ) -> Result<Vec<u64>, AppError> {
        let context = placeholder::with_context(card);
        let mut futures = Vec::with_capacity(actions.len());
        for (index, action) in actions.iter().enumerate() {
            let executor = self.lookup(&action.kind)?;
            let params = context.resolve_value(&action.params)?;
            let card = card.clone();
            futures.push(async move {
                let started = Instant::now();
                let result = executor.execute(&card, params).await;
                (index, result, started.elapsed().as_millis() as u64)
            });
        }

        let mut elapsed = vec![0_u64; actions.len()];
        let mut first_failure: Option<(usize, AppError)> = None;
        for (index, result, ms) in join_all(futures).await {
            elapsed[index] = ms;
            if let Err(err) = result {
                error!(kind = %actions[index].kind, %err, "parallel action failed");
                let is_earlier = first_failure
                    .as_ref()
                    .map(|(held, _)| index < *held)
                    .unwrap_or(true);
                if is_earlier {
                    first_failure = Some((index, err));
                }
            }
        }
        match first_failure {
            Some((index, mut err)) => {
                err.add_context("action", &actions[index].kind);
                Err(err)
            }
            None => Ok(elapsed),
        }
    }

    fn lookup(&self, kind: &str) -> Result<Arc<dyn ActionExecutor>, AppError> {
        self.registry.get(kind).ok_or_else(|| {
            AppError::new(
                ErrorCategory::ConfigurationError,
                format!("no action executor registered for kind: {}", kind),
            )
            .with_code("CF-ACT-001")
        })
    }
}

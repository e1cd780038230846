use async_trait::async_trait;
use cardflow::core::actions::{ActionExecutor, ActionRunner, ExecutorRegistry};
use cardflow::core::config::ActionDefinition;
use cardflow::core::entities::{CardEntry, TimestampValue};
use cardflow::core::error::AppError;
use cardflow::core::types::{ErrorCategory, RunTopology};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn card() -> CardEntry {
    CardEntry {
        workflow_id: "demo".to_string(),
        workflow_card_id: "card-1".to_string(),
        title: "Card".to_string(),
        description: None,
        status: "open".to_string(),
        card_type: "task".to_string(),
        value: 0.0,
        owner: "owner@acme.test".to_string(),
        field_data: Map::new(),
        approval_tokens: None,
        status_since: TimestampValue::Millis(0),
        created_by: "owner@acme.test".to_string(),
        created_at: Utc::now(),
        updated_by: "owner@acme.test".to_string(),
        updated_at: Utc::now(),
    }
}

struct SleepExecutor {
    executed: Arc<AtomicUsize>,
}

#[async_trait]
impl ActionExecutor for SleepExecutor {
    fn kind(&self) -> &'static str {
        "sleep"
    }

    fn validate_params(&self, _params: &Value) -> Result<(), AppError> {
        Ok(())
    }

    async fn execute(&self, _card: &CardEntry, params: Value) -> Result<(), AppError> {
        let ms = params.get("ms").and_then(Value::as_u64).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        self.executed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FailExecutor;

#[async_trait]
impl ActionExecutor for FailExecutor {
    fn kind(&self) -> &'static str {
        "fail"
    }

    fn validate_params(&self, _params: &Value) -> Result<(), AppError> {
        Ok(())
    }

    async fn execute(&self, _card: &CardEntry, _params: Value) -> Result<(), AppError> {
        Err(AppError::new(ErrorCategory::InternalError, "boom"))
    }
}

fn runner(executed: Arc<AtomicUsize>) -> ActionRunner {
    let mut builder = ExecutorRegistry::builder();
    builder.register(SleepExecutor { executed }).register(FailExecutor);
    ActionRunner::new(builder.build())
}

fn sleep_action(ms: u64) -> ActionDefinition {
    ActionDefinition {
        kind: "sleep".to_string(),
        params: json!({ "ms": ms }),
    }
}

#[tokio::test]
async fn serial_topology_runs_one_after_another() {
    let executed = Arc::new(AtomicUsize::new(0));
    let runner = runner(executed.clone());
    let actions = vec![sleep_action(100), sleep_action(50)];

    let started = Instant::now();
    let elapsed = runner
        .run(&card(), &actions, RunTopology::Serial)
        .await
        .unwrap();
    let total = started.elapsed();

    assert!(total >= Duration::from_millis(150), "took {:?}", total);
    assert_eq!(elapsed.len(), 2);
    assert!(elapsed[0] >= 100, "first action took {}ms", elapsed[0]);
    assert!(elapsed[1] >= 50, "second action took {}ms", elapsed[1]);
    assert_eq!(executed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn parallel_topology_overlaps_actions() {
    let executed = Arc::new(AtomicUsize::new(0));
    let runner = runner(executed.clone());
    let actions = vec![sleep_action(100), sleep_action(50)];

    let started = Instant::now();
    let elapsed = runner
        .run(&card(), &actions, RunTopology::Parallel)
        .await
        .unwrap();
    let total = started.elapsed();

    assert!(total >= Duration::from_millis(100), "took {:?}", total);
    assert!(total < Duration::from_millis(150), "took {:?}", total);
    assert_eq!(elapsed.len(), 2);
    assert_eq!(executed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn serial_failure_aborts_remaining_actions() {
    let executed = Arc::new(AtomicUsize::new(0));
    let runner = runner(executed.clone());
    let actions = vec![
        ActionDefinition {
            kind: "fail".to_string(),
            params: json!({}),
        },
        sleep_action(10),
    ];
    let err = runner
        .run(&card(), &actions, RunTopology::Serial)
        .await
        .unwrap_err();
    assert!(err.message.contains("boom"));
    assert_eq!(executed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn parallel_failure_propagates_without_dropping_siblings() {
    let executed = Arc::new(AtomicUsize::new(0));
    let runner = runner(executed.clone());
    let actions = vec![
        sleep_action(20),
        ActionDefinition {
            kind: "fail".to_string(),
            params: json!({}),
        },
    ];
    let err = runner
        .run(&card(), &actions, RunTopology::Parallel)
        .await
        .unwrap_err();
    assert!(err.message.contains("boom"));
    // The sibling sleep action still ran to completion.
    assert_eq!(executed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_kind_is_a_hard_error_naming_the_kind() {
    let runner = runner(Arc::new(AtomicUsize::new(0)));
    let actions = vec![ActionDefinition {
        kind: "launch-rocket".to_string(),
        params: json!({}),
    }];
    let err = runner
        .run(&card(), &actions, RunTopology::Serial)
        .await
        .unwrap_err();
    assert!(err.message.contains("launch-rocket"), "got: {}", err.message);
}

#[tokio::test]
async fn params_are_placeholder_resolved_before_dispatch() {
    struct CaptureExecutor {
        seen: Arc<std::sync::Mutex<Option<Value>>>,
    }

    #[async_trait]
    impl ActionExecutor for CaptureExecutor {
        fn kind(&self) -> &'static str {
            "capture"
        }

        fn validate_params(&self, _params: &Value) -> Result<(), AppError> {
            Ok(())
        }

        async fn execute(&self, _card: &CardEntry, params: Value) -> Result<(), AppError> {
            *self.seen.lock().unwrap() = Some(params);
            Ok(())
        }
    }

    let seen = Arc::new(std::sync::Mutex::new(None));
    let mut builder = ExecutorRegistry::builder();
    builder.register(CaptureExecutor { seen: seen.clone() });
    let runner = ActionRunner::new(builder.build());

    let actions = vec![ActionDefinition {
        kind: "capture".to_string(),
        params: json!({ "subject": "Card $.title", "nested": { "owner": "$.owner" } }),
    }];
    runner
        .run(&card(), &actions, RunTopology::Serial)
        .await
        .unwrap();

    let captured = seen.lock().unwrap().clone().unwrap();
    assert_eq!(captured["subject"], "Card Card");
    assert_eq!(captured["nested"]["owner"], "owner@acme.test");
}

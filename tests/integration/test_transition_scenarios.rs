use cardflow::core::auth::{AuthUser, StaticTokenAuth};
use cardflow::core::config::WorkflowRegistry;
use cardflow::core::engine::TransitionRequest;
use cardflow::core::entities::{
    ApprovalKind, ApprovalToken, CardEntry, TimestampValue, DRAFT_STATUS,
};
use cardflow::core::mail::MailerRegistry;
use cardflow::core::sheets::StaticRangeReader;
use cardflow::core::store::{DocumentStore, MemoryDocumentStore, STATS_COLLECTION};
use cardflow::core::{approvals, stats::Aggregator};
use cardflow::rpc::{self, AppState};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;

const WORKFLOW: &str = r##"
workflow_id: lead-to-proposal
name: Lead to proposal
types: [lead]
fields:
  - slug: budgetLink
    title: Budget link
    schema: { kind: url }
  - slug: contactPoint
    title: Contact point
    schema: { kind: text }
  - slug: year
    title: Year
    schema: { kind: number }
statuses:
  - slug: brewing
    title: Brewing
    precondition:
      from: [draft]
  - slug: proposal-approved
    title: Proposal approved
    precondition:
      from: [brewing]
      required: [budgetLink, contactPoint]
      users: ["*"]
      approvals:
        - key: proposal-approved
    finally:
      - kind: set-owner
        params:
          to: "#.contactPoint"
approvals:
  - slug: proposal-approved
    allowed:
      - kind: basic
        by: "$.owner"
"##;

fn user() -> AuthUser {
    AuthUser {
        uid: "u-sam".to_string(),
        email: "sam@acme.test".to_string(),
    }
}

fn build() -> Arc<AppState> {
    let registry = WorkflowRegistry::new();
    let config = serde_yaml::from_str(WORKFLOW).expect("parse workflow");
    registry.insert(config).expect("insert workflow");
    rpc::build_state(
        Arc::new(registry),
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(StaticTokenAuth::new()),
        Arc::new(MailerRegistry::new()),
        Arc::new(StaticRangeReader::new()),
    )
}

async fn seed_card(state: &AppState) -> CardEntry {
    let mut field_data = Map::new();
    field_data.insert("year".to_string(), json!(2024));
    let now = Utc::now();
    let card = CardEntry {
        workflow_id: "lead-to-proposal".to_string(),
        workflow_card_id: "card-1".to_string(),
        title: "Acme deal".to_string(),
        description: None,
        status: DRAFT_STATUS.to_string(),
        card_type: "lead".to_string(),
        value: 5000.0,
        owner: "sam@acme.test".to_string(),
        field_data,
        approval_tokens: None,
        status_since: TimestampValue::Instant(now),
        created_by: "sam@acme.test".to_string(),
        created_at: now,
        updated_by: "sam@acme.test".to_string(),
        updated_at: now,
    };
    state.cards.put_card(&card).await.unwrap();
    state
        .aggregator
        .record_write(None, Some(&card), &user())
        .await
        .unwrap();
    card
}

fn request(status: &str, field_data: Value) -> TransitionRequest {
    TransitionRequest {
        workflow_id: "lead-to-proposal".to_string(),
        card_id: "card-1".to_string(),
        status: status.to_string(),
        fields: Map::new(),
        field_data: field_data.as_object().cloned().unwrap_or_default(),
    }
}

async fn stats_doc(state: &AppState, status: &str) -> Value {
    state
        .store
        .get(STATS_COLLECTION, &Aggregator::stats_doc_id("lead-to-proposal", status))
        .await
        .unwrap()
        .unwrap_or(Value::Null)
}

#[tokio::test]
async fn transition_to_current_status_is_rejected_before_preconditions() {
    let state = build();
    seed_card(&state).await;
    state
        .engine
        .transit(&request("brewing", json!({})), &user())
        .await
        .unwrap();

    let err = state
        .engine
        .transit(&request("brewing", json!({})), &user())
        .await
        .unwrap_err();
    assert!(
        err.message.contains("no transition required"),
        "got: {}",
        err.message
    );
}

#[tokio::test]
async fn unknown_workflow_and_status_are_configuration_errors() {
    let state = build();
    seed_card(&state).await;

    let mut bad_workflow = request("brewing", json!({}));
    bad_workflow.workflow_id = "missing".to_string();
    assert!(state.engine.transit(&bad_workflow, &user()).await.is_err());

    let err = state
        .engine
        .transit(&request("shipped", json!({})), &user())
        .await
        .unwrap_err();
    assert!(err.message.contains("shipped"), "got: {}", err.message);
}

#[tokio::test]
async fn lead_to_proposal_end_to_end() {
    let state = build();
    seed_card(&state).await;
    state
        .engine
        .transit(&request("brewing", json!({})), &user())
        .await
        .unwrap();

    // Missing required fields are reported together.
    let err = state
        .engine
        .transit(&request("proposal-approved", json!({})), &user())
        .await
        .unwrap_err();
    assert!(err.message.contains("budgetLink"), "got: {}", err.message);
    assert!(err.message.contains("contactPoint"), "got: {}", err.message);

    // With the fields supplied, the approval requirement still blocks.
    let context = json!({
        "budgetLink": "https://sheets.test/budget-1",
        "contactPoint": "lee@acme.test"
    });
    let err = state
        .engine
        .transit(&request("proposal-approved", context.clone()), &user())
        .await
        .unwrap_err();
    assert!(
        err.message.contains("proposal-approved"),
        "got: {}",
        err.message
    );

    // The card owner is the authorized approver.
    let mut card = state
        .cards
        .get_card("lead-to-proposal", "card-1")
        .await
        .unwrap();
    let config = state.configs.get("lead-to-proposal").unwrap();
    assert!(approvals::can_user_approve(
        &user(),
        "proposal-approved",
        &card,
        config.as_ref()
    ));
    card.approval_tokens
        .get_or_insert_with(Default::default)
        .entry("proposal-approved".to_string())
        .or_default()
        .push(ApprovalToken {
            kind: ApprovalKind::Basic,
            author: "sam@acme.test".to_string(),
            date: Utc::now(),
            note: "approved".to_string(),
            is_negative: false,
            voided: None,
        });
    state.cards.put_card(&card).await.unwrap();

    let telemetry = state
        .engine
        .transit(&request("proposal-approved", context), &user())
        .await
        .unwrap();
    assert_eq!(telemetry.pre_action_ms.len(), 0);
    assert_eq!(telemetry.post_action_ms.len(), 1);

    // The finally action reassigned the owner to the resolved contact point.
    let card = state
        .cards
        .get_card("lead-to-proposal", "card-1")
        .await
        .unwrap();
    assert_eq!(card.status, "proposal-approved");
    assert_eq!(card.owner, "lee@acme.test");
    assert_eq!(card.field_data["budgetLink"], "https://sheets.test/budget-1");

    // Brewing lost its pending entry and gained one completed transition.
    let brewing = stats_doc(&state, "brewing").await;
    assert_eq!(brewing["totalTransitionCount"], 1);
    assert!(brewing["totalTransitionTime"].as_i64().unwrap() >= 0);
    assert!(brewing["currentPendings"]
        .as_object()
        .unwrap()
        .is_empty());

    // Proposal-approved now holds exactly the card's pending entry.
    let approved = stats_doc(&state, "proposal-approved").await;
    let pendings = approved["currentPendings"].as_object().unwrap();
    assert_eq!(pendings.len(), 1);
    assert_eq!(pendings["card-1"]["cardId"], "card-1");
    assert_eq!(pendings["card-1"]["value"], 5000.0);
}

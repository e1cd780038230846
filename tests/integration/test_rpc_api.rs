use cardflow::core::auth::{AuthUser, StaticTokenAuth};
use cardflow::core::config::WorkflowRegistry;
use cardflow::core::mail::MailerRegistry;
use cardflow::core::sheets::StaticRangeReader;
use cardflow::core::store::MemoryDocumentStore;
use cardflow::rpc::{self, AppState};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;

const WORKFLOW: &str = r#"
workflow_id: helpdesk
name: Helpdesk
access: ["@acme.test"]
types: [incident]
fields:
  - slug: impact
    title: Impact
    schema: { kind: choice, choices: [low, high] }
statuses:
  - slug: triage
    title: Triage
    precondition:
      from: [draft]
  - slug: resolved
    title: Resolved
    terminal: true
"#;

fn build_state() -> Arc<AppState> {
    let registry = WorkflowRegistry::new();
    registry
        .insert(serde_yaml::from_str(WORKFLOW).expect("parse workflow"))
        .expect("insert workflow");
    let auth = StaticTokenAuth::new().register(
        "secret-token",
        AuthUser {
            uid: "u-sam".to_string(),
            email: "sam@acme.test".to_string(),
        },
    );
    rpc::build_state(
        Arc::new(registry),
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(auth),
        Arc::new(MailerRegistry::new()),
        Arc::new(StaticRangeReader::new()),
    )
}

async fn spawn_server() -> SocketAddr {
    let state = build_state();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        rpc::serve_rpc_with_ready_notifier(state, "127.0.0.1:0", tx)
            .await
            .expect("server runs");
    });
    rx.await.expect("server ready")
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

#[tokio::test]
async fn requests_without_bearer_token_get_envelope_401() {
    let addr = spawn_server().await;
    let response = client()
        .post(format!("http://{}/v1/cards", addr))
        .json(&json!({ "workflowId": "helpdesk", "title": "x", "type": "incident" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["reason"].is_string());
}

#[tokio::test]
async fn card_lifecycle_over_the_wire() {
    let addr = spawn_server().await;
    let base = format!("http://{}", addr);
    let http = client();

    // Create.
    let response = http
        .post(format!("{}/v1/cards", base))
        .bearer_auth("secret-token")
        .json(&json!({
            "workflowId": "helpdesk",
            "title": "Printer on fire",
            "type": "incident",
            "value": 10,
            "fieldData": { "impact": "high" }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    let card_id = body["result"]["cardId"].as_str().unwrap().to_string();

    // Direct status edits are rejected.
    let response = http
        .patch(format!("{}/v1/cards/helpdesk/{}", base, card_id))
        .bearer_auth("secret-token")
        .json(&json!({ "fields": { "status": "resolved" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);

    // Transit into triage.
    let response = http
        .post(format!("{}/v1/cards/transit", base))
        .bearer_auth("secret-token")
        .json(&json!({
            "workflowId": "helpdesk",
            "cardId": card_id,
            "status": "triage"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert!(body["result"]["totalMs"].is_number());

    // The card reflects the transition.
    let response = http
        .get(format!("{}/v1/cards/helpdesk/{}", base, card_id))
        .bearer_auth("secret-token")
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["status"], "triage");

    // Activity log recorded the create and the transition.
    let response = http
        .get(format!("{}/v1/cards/helpdesk/{}/activity", base, card_id))
        .bearer_auth("secret-token")
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"].as_array().unwrap().len(), 2);

    // Stats expose the pending entry under triage.
    let response = http
        .get(format!("{}/v1/stats/helpdesk", base))
        .bearer_auth("secret-token")
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    let pendings = body["result"]["triage"]["currentPendings"].as_object().unwrap();
    assert!(pendings.contains_key(&card_id));

    // Invalid choice values are rejected with an aggregated reason.
    let response = http
        .patch(format!("{}/v1/cards/helpdesk/{}", base, card_id))
        .bearer_auth("secret-token")
        .json(&json!({ "fieldData": { "impact": "apocalyptic" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["reason"].as_str().unwrap().contains("impact"));

    // Delete.
    let response = http
        .delete(format!("{}/v1/cards/helpdesk/{}", base, card_id))
        .bearer_auth("secret-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = http
        .get(format!("{}/v1/cards/helpdesk/{}", base, card_id))
        .bearer_auth("secret-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn lov_invalidate_requires_a_bound_field() {
    let addr = spawn_server().await;
    let response = client()
        .post(format!("http://{}/v1/lov/invalidate", addr))
        .bearer_auth("secret-token")
        .json(&json!({ "workflowId": "helpdesk", "fieldSlug": "impact" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["reason"].as_str().unwrap().contains("impact"));
}

use cardflow::core::auth::AuthUser;
use cardflow::core::config::WorkflowStatus;
use cardflow::core::entities::{ApprovalKind, ApprovalToken, CardEntry, TimestampValue};
use cardflow::core::precondition::{self, DestinationContext};
use chrono::Utc;
use serde_json::{json, Map};
use std::collections::HashMap;

fn status(yaml: &str) -> WorkflowStatus {
    serde_yaml::from_str(yaml).expect("parse status")
}

fn card(status: &str, field_data: serde_json::Value) -> CardEntry {
    CardEntry {
        workflow_id: "demo".to_string(),
        workflow_card_id: "card-1".to_string(),
        title: "Card".to_string(),
        description: None,
        status: status.to_string(),
        card_type: "task".to_string(),
        value: 10.0,
        owner: "owner@acme.test".to_string(),
        field_data: field_data.as_object().cloned().unwrap_or_else(Map::new),
        approval_tokens: None,
        status_since: TimestampValue::Millis(0),
        created_by: "owner@acme.test".to_string(),
        created_at: Utc::now(),
        updated_by: "owner@acme.test".to_string(),
        updated_at: Utc::now(),
    }
}

fn owner() -> AuthUser {
    AuthUser {
        uid: "u-owner".to_string(),
        email: "owner@acme.test".to_string(),
    }
}

#[test]
fn status_without_precondition_accepts_everything() {
    let target = status("{slug: done, title: Done}");
    let card = card("open", json!({}));
    let result = precondition::validate_all(
        &target,
        "open",
        &owner(),
        &card,
        &DestinationContext::default(),
    );
    assert!(result.is_ok());
}

#[test]
fn origin_outside_from_list_is_rejected() {
    let target = status(
        r#"
slug: done
title: Done
precondition:
  from: [review]
"#,
    );
    let card = card("open", json!({}));
    let err = precondition::validate_all(
        &target,
        "open",
        &owner(),
        &card,
        &DestinationContext::default(),
    )
    .unwrap_err();
    assert!(err.message.contains("review"), "got: {}", err.message);
}

#[test]
fn missing_required_fields_aggregate_into_one_error() {
    let target = status(
        r#"
slug: done
title: Done
precondition:
  required: [a, b, c]
"#,
    );
    let card = card("open", json!({"a": "set"}));
    let err = precondition::validate_all(
        &target,
        "open",
        &owner(),
        &card,
        &DestinationContext::default(),
    )
    .unwrap_err();
    assert!(err.message.contains('b'), "got: {}", err.message);
    assert!(err.message.contains('c'), "got: {}", err.message);
    assert!(!err.message.contains("a,"), "got: {}", err.message);
}

#[test]
fn destination_context_satisfies_required_fields() {
    let target = status(
        r#"
slug: done
title: Done
precondition:
  required: [budgetLink]
"#,
    );
    let card = card("open", json!({}));
    let mut destination = DestinationContext::default();
    destination
        .field_data
        .insert("budgetLink".to_string(), json!("https://sheet.test/b"));
    let result = precondition::validate_all(&target, "open", &owner(), &card, &destination);
    assert!(result.is_ok());
}

#[test]
fn dollar_prefixed_entries_check_top_level_fields() {
    let target = status(
        r#"
slug: done
title: Done
precondition:
  required: ["$.description"]
"#,
    );
    let without = card("open", json!({}));
    let err = precondition::validate_all(
        &target,
        "open",
        &owner(),
        &without,
        &DestinationContext::default(),
    )
    .unwrap_err();
    assert!(err.message.contains("$.description"));

    let mut with = card("open", json!({}));
    with.description = Some("ready".to_string());
    let result = precondition::validate_all(
        &target,
        "open",
        &owner(),
        &with,
        &DestinationContext::default(),
    );
    assert!(result.is_ok());
}

#[test]
fn user_entries_support_wildcard_owner_and_literals() {
    let target = status(
        r#"
slug: done
title: Done
precondition:
  users: [owner]
"#,
    );
    let card = card("open", json!({}));
    assert!(precondition::validate_all(
        &target,
        "open",
        &owner(),
        &card,
        &DestinationContext::default()
    )
    .is_ok());

    let stranger = AuthUser {
        uid: "u-other".to_string(),
        email: "other@acme.test".to_string(),
    };
    assert!(precondition::validate_all(
        &target,
        "open",
        &stranger,
        &card,
        &DestinationContext::default()
    )
    .is_err());

    let wildcard = status(
        r#"
slug: done
title: Done
precondition:
  users: ["*"]
"#,
    );
    assert!(precondition::validate_all(
        &wildcard,
        "open",
        &stranger,
        &card,
        &DestinationContext::default()
    )
    .is_ok());
}

#[test]
fn unsatisfied_approvals_aggregate_into_one_error() {
    let target = status(
        r#"
slug: done
title: Done
precondition:
  approvals:
    - key: legal
    - key: budget
"#,
    );
    let mut card = card("open", json!({}));
    let mut tokens = HashMap::new();
    tokens.insert(
        "legal".to_string(),
        vec![ApprovalToken {
            kind: ApprovalKind::Basic,
            author: "counsel@acme.test".to_string(),
            date: Utc::now(),
            note: String::new(),
            is_negative: false,
            voided: None,
        }],
    );
    card.approval_tokens = Some(tokens);
    let err = precondition::validate_all(
        &target,
        "open",
        &owner(),
        &card,
        &DestinationContext::default(),
    )
    .unwrap_err();
    assert!(err.message.contains("budget"), "got: {}", err.message);
    assert!(!err.message.contains("legal"), "got: {}", err.message);
}

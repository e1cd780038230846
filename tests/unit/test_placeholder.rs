use cardflow::core::entities::{ApprovalKind, ApprovalToken, CardEntry, TimestampValue};
use cardflow::core::placeholder;
use chrono::{TimeZone, Utc};
use serde_json::{json, Map};
use std::collections::HashMap;

fn card() -> CardEntry {
    let mut field_data = Map::new();
    field_data.insert("contactPoint".to_string(), json!("lee@acme.test"));
    field_data.insert("year".to_string(), json!(2024));

    let mut approval_tokens = HashMap::new();
    approval_tokens.insert(
        "budget".to_string(),
        vec![ApprovalToken {
            kind: ApprovalKind::Basic,
            author: "cfo@acme.test".to_string(),
            date: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            note: String::new(),
            is_negative: false,
            voided: None,
        }],
    );

    CardEntry {
        workflow_id: "lead-to-proposal".to_string(),
        workflow_card_id: "card-1".to_string(),
        title: "Acme deal".to_string(),
        description: None,
        status: "brewing".to_string(),
        card_type: "lead".to_string(),
        value: 1200.0,
        owner: "sam@acme.test".to_string(),
        field_data,
        approval_tokens: Some(approval_tokens),
        status_since: TimestampValue::Millis(0),
        created_by: "sam@acme.test".to_string(),
        created_at: Utc::now(),
        updated_by: "sam@acme.test".to_string(),
        updated_at: Utc::now(),
    }
}

#[test]
fn text_without_tokens_is_unchanged() {
    let card = card();
    let context = placeholder::with_context(&card);
    let text = "no placeholders in here, just $100 and an email@host";
    assert_eq!(context.resolve(text).unwrap(), text);
}

#[test]
fn repeated_tokens_resolve_identically() {
    let card = card();
    let context = placeholder::with_context(&card);
    assert_eq!(
        context.resolve("$.owner and again $.owner").unwrap(),
        "sam@acme.test and again sam@acme.test"
    );
}

#[test]
fn required_missing_token_names_the_token() {
    let card = card();
    let context = placeholder::with_context(&card);
    let err = context.resolve("$.description").unwrap_err();
    assert!(err.message.contains("$.description"), "got: {}", err.message);
    assert!(err.message.contains("required"), "got: {}", err.message);
}

#[test]
fn optional_missing_token_resolves_empty() {
    let card = card();
    let context = placeholder::with_context(&card);
    assert_eq!(context.resolve("$.description?").unwrap(), "");
    assert_eq!(context.resolve("[$.description?]").unwrap(), "[]");
}

#[test]
fn field_data_and_top_level_sigils_differ() {
    let card = card();
    let context = placeholder::with_context(&card);
    assert_eq!(
        context.resolve("to: #.contactPoint").unwrap(),
        "to: lee@acme.test"
    );
    assert_eq!(context.resolve("year #.year").unwrap(), "year 2024");
    assert_eq!(context.resolve("title: $.title").unwrap(), "title: Acme deal");
}

#[test]
fn approval_sigil_resolves_latest_author() {
    let card = card();
    let context = placeholder::with_context(&card);
    assert_eq!(context.resolve("@.budget").unwrap(), "cfo@acme.test");
    let err = context.resolve("@.legal").unwrap_err();
    assert!(err.message.contains("@.legal"));
    assert_eq!(context.resolve("@.legal?").unwrap(), "");
}

#[test]
fn unmatched_syntax_is_left_verbatim() {
    let card = card();
    let context = placeholder::with_context(&card);
    assert_eq!(context.resolve("$. alone").unwrap(), "$. alone");
    assert_eq!(context.resolve("%.owner").unwrap(), "%.owner");
}

#[test]
fn recursive_resolution_preserves_shape() {
    let card = card();
    let context = placeholder::with_context(&card);
    let value = json!({
        "to": "#.contactPoint",
        "subject": "Deal $.title",
        "headers": {"X-Card": "$.workflowCardId"},
        "retries": 3,
        "flags": [true, "#.year"]
    });
    let resolved = context.resolve_value(&value).unwrap();
    assert_eq!(
        resolved,
        json!({
            "to": "lee@acme.test",
            "subject": "Deal Acme deal",
            "headers": {"X-Card": "card-1"},
            "retries": 3,
            "flags": [true, "2024"]
        })
    );
}

#[test]
fn deep_nesting_is_rejected() {
    let card = card();
    let context = placeholder::with_context(&card);
    let mut value = json!("leaf");
    for _ in 0..100 {
        value = json!([value]);
    }
    assert!(context.resolve_value(&value).is_err());
}

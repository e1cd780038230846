use cardflow::core::entities::{CardEntry, TimestampValue};
use cardflow::core::stats::{classify, generate_changes, values_equivalent};
use cardflow::core::types::ActivityAction;
use chrono::Utc;
use serde_json::{json, Map, Value};

fn card(status: &str, field_data: Value) -> CardEntry {
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

#[test]
fn null_undefined_and_empty_array_are_interchangeable() {
    assert!(values_equivalent(None, Some(&json!(null))));
    assert!(values_equivalent(Some(&json!([])), None));
    assert!(values_equivalent(Some(&json!(null)), Some(&json!([]))));
    assert!(!values_equivalent(Some(&json!([])), Some(&json!(["x"]))));
    assert!(!values_equivalent(Some(&json!(0)), None));
}

#[test]
fn undefined_tags_versus_empty_tags_is_no_change() {
    let before = card("open", json!({"tags": null}));
    let after = card("open", json!({"tags": []}));
    assert!(generate_changes(Some(&before), Some(&after)).is_empty());
}

#[test]
fn growing_an_array_is_one_change() {
    let before = card("open", json!({"tags": []}));
    let after = card("open", json!({"tags": ["x"]}));
    let changes = generate_changes(Some(&before), Some(&after));
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].key, "tags");
    assert_eq!(changes[0].from, Some(json!([])));
    assert_eq!(changes[0].to, Some(json!(["x"])));
}

#[test]
fn arrays_compare_element_wise() {
    let before = card("open", json!({"steps": [{"done": false}, {"done": true}]}));
    let same = card("open", json!({"steps": [{"done": false}, {"done": true}]}));
    let different = card("open", json!({"steps": [{"done": true}, {"done": true}]}));
    assert!(generate_changes(Some(&before), Some(&same)).is_empty());
    assert_eq!(generate_changes(Some(&before), Some(&different)).len(), 1);
}

#[test]
fn scalar_fields_participate_in_the_diff() {
    let before = card("open", json!({}));
    let mut after = card("closed", json!({}));
    after.value = 25.0;
    let changes = generate_changes(Some(&before), Some(&after));
    let keys: Vec<&str> = changes.iter().map(|change| change.key.as_str()).collect();
    assert_eq!(keys, vec!["status", "value"]);
}

#[test]
fn field_key_space_is_the_union_of_both_sides() {
    let before = card("open", json!({"a": 1}));
    let after = card("open", json!({"b": 2}));
    let changes = generate_changes(Some(&before), Some(&after));
    let keys: Vec<&str> = changes.iter().map(|change| change.key.as_str()).collect();
    assert_eq!(keys, vec!["a", "b"]);
    assert_eq!(changes[0].to, None);
    assert_eq!(changes[1].from, None);
}

#[test]
fn classification_matches_snapshots() {
    let open = card("open", json!({}));
    let closed = card("closed", json!({}));
    assert_eq!(classify(None, Some(&open)).unwrap(), ActivityAction::Create);
    assert_eq!(classify(Some(&open), None).unwrap(), ActivityAction::Delete);
    assert_eq!(
        classify(Some(&open), Some(&closed)).unwrap(),
        ActivityAction::Transit
    );
    assert_eq!(
        classify(Some(&open), Some(&open)).unwrap(),
        ActivityAction::Update
    );
    assert!(classify(None, None).is_err());
}

use super::*;

#[test]
fn empty_condition_encodes_to_empty_object() {
    assert_eq!(Condition::new().to_json(), "{}");
    assert_eq!(Condition::new().encode(), "condition=%7B%7D");
}

#[test]
fn fields_serialize_in_fixed_order_with_run_id_key() {
    let condition = Condition::new()
        .with_run_id("r1")
        .with_limit(10)
        .with_series("loss");
    assert_eq!(
        condition.to_json(),
        r#"{"series":"loss","limit":10,"runId":"r1"}"#
    );
}

#[test]
fn order_map_is_normalized_regardless_of_insertion_order() {
    let a = Condition::new()
        .with_order("timestamp", SortOrder::Asc)
        .with_order("id", SortOrder::Desc);
    let b = Condition::new()
        .with_order("id", SortOrder::Desc)
        .with_order("timestamp", SortOrder::Asc);
    assert_eq!(a.encode(), b.encode());
    assert_eq!(a.to_json(), r#"{"order":{"id":"DESC","timestamp":"ASC"}}"#);
}

#[test]
fn ranges_serialize_as_two_element_arrays() {
    let condition = Condition {
        id: Some(SingleOrRange::Range(5, 9)),
        timestamp: Some(SingleOrRange::Single("2024-01-01".to_owned())),
        ..Condition::default()
    };
    assert_eq!(
        condition.to_json(),
        r#"{"id":[5,9],"timestamp":"2024-01-01"}"#
    );
}

#[test]
fn encode_percent_escapes_json() {
    let encoded = Condition::new().with_series("a b").encode();
    assert_eq!(encoded, "condition=%7B%22series%22%3A%22a%20b%22%7D");
}

#[test]
fn merged_overlay_wins_and_combines_order() {
    let base = Condition::new()
        .with_run_id("r1")
        .with_limit(100)
        .with_order("id", SortOrder::Desc);
    let extra = Condition::new()
        .with_series("loss")
        .with_order("timestamp", SortOrder::Asc)
        .with_limit(5);

    let merged = base.merged(&extra);
    assert_eq!(merged.run_id.as_deref(), Some("r1"));
    assert_eq!(merged.series.as_deref(), Some("loss"));
    assert_eq!(merged.limit, Some(5));
    assert_eq!(merged.order.len(), 2);
}

#[test]
fn condition_parses_back_from_canonical_json() {
    let condition = Condition::new()
        .with_series("loss")
        .with_order("id", SortOrder::Desc);
    let parsed: Condition = serde_json::from_str(&condition.to_json()).expect("parse");
    assert_eq!(parsed, condition);
}

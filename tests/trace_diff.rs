use zumanji::domain::call::{call_id, CallRecord};
use zumanji::domain::matcher::OpTag;
use zumanji::domain::trace_diff::{diff_key, diff_traces};

fn call(interface: &str, command: &str) -> CallRecord {
    CallRecord {
        interface: interface.to_string(),
        command: command.to_string(),
        args: Vec::new(),
        function: Some("handler".to_string()),
        filename: Some("views.py".to_string()),
        lineno: Some(12),
        duration: 0.01,
        time: "2012-05-16T03:43:59.000000".to_string(),
        depth: 1,
        stacktrace: Vec::new(),
        id: call_id(interface, command, Some("views.py"), Some("handler")),
    }
}

fn tags(records: &[zumanji::domain::trace_diff::DiffEntry]) -> Vec<OpTag> {
    records.iter().map(|e| e.tag).collect()
}

#[test]
fn test_identical_traces_have_no_diffs() {
    let trace = vec![call("sql", "SELECT 1"), call("redis", "GET")];
    let diff = diff_traces(&trace, &trace);

    assert_eq!(diff.num_diffs, 0);
    assert_eq!(tags(&diff.previous.records), vec![OpTag::Equal, OpTag::Equal]);
    assert_eq!(tags(&diff.current.records), vec![OpTag::Equal, OpTag::Equal]);
    assert_eq!(diff.calls.len(), 2);
}

#[test]
fn test_appended_calls_are_inserts_with_placeholders() {
    let previous = vec![call("sql", "SELECT 1")];
    let current = vec![call("sql", "SELECT 1"), call("cache", "get"), call("cache", "set")];
    let diff = diff_traces(&previous, &current);

    assert_eq!(
        tags(&diff.current.records),
        vec![OpTag::Equal, OpTag::Insert, OpTag::Insert]
    );
    // Both sides stay aligned row by row.
    assert_eq!(diff.previous.records.len(), diff.current.records.len());
    assert!(diff.previous.records[1].record.is_none());
    assert_eq!(diff.previous.records[1].key, diff.current.records[1].key);
    assert_eq!(diff.num_diffs, 4);
}

#[test]
fn test_dropped_calls_are_deletes() {
    let previous = vec![call("sql", "SELECT 1"), call("sql", "SELECT 2")];
    let current = vec![call("sql", "SELECT 1")];
    let diff = diff_traces(&previous, &current);

    assert_eq!(tags(&diff.previous.records), vec![OpTag::Equal, OpTag::Delete]);
    assert!(diff.current.records[1].record.is_none());
    assert_eq!(diff.previous.records[1].key, diff_key(1, &previous[1]));
    assert_eq!(diff.num_diffs, 2);
}

// Disjoint non-empty traces align as one `replace` run on each side, not as
// separate deletes and inserts. Every entry still counts as a difference.
#[test]
fn test_disjoint_traces_count_every_call_as_a_difference() {
    let previous = vec![call("sql", "SELECT 1")];
    let current = vec![call("redis", "GET"), call("redis", "SET")];
    let diff = diff_traces(&previous, &current);

    assert_eq!(tags(&diff.previous.records), vec![OpTag::Replace]);
    assert_eq!(tags(&diff.current.records), vec![OpTag::Replace, OpTag::Replace]);
    assert_eq!(diff.num_diffs, 3);
}

#[test]
fn test_empty_sides() {
    let trace = vec![call("sql", "SELECT 1")];

    let diff = diff_traces(&[], &[]);
    assert!(diff.is_empty());
    assert_eq!(diff.num_diffs, 0);

    let diff = diff_traces(&[], &trace);
    assert_eq!(tags(&diff.current.records), vec![OpTag::Insert]);
    assert_eq!(diff.num_diffs, 2);

    let diff = diff_traces(&trace, &[]);
    assert_eq!(tags(&diff.previous.records), vec![OpTag::Delete]);
}

#[test]
fn test_keys_embed_position() {
    // The same call site twice in one trace yields two distinct keys.
    let trace = vec![call("sql", "SELECT 1"), call("sql", "SELECT 1")];
    let diff = diff_traces(&[], &trace);
    assert_eq!(diff.calls.len(), 2);
    assert!(diff.calls.contains_key(&format!("0_{}", trace[0].id)));
    assert!(diff.calls.contains_key(&format!("1_{}", trace[1].id)));
}

#[test]
fn test_diff_serializes_lowercase_tags() {
    let diff = diff_traces(&[call("sql", "SELECT 1")], &[]);
    let value = serde_json::to_value(&diff).unwrap();
    assert_eq!(value["previous"]["records"][0]["tag"], "delete");
    assert_eq!(value["num_diffs"], 2);
}

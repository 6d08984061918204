//! Call-record normalization.
//!
//! Both report versions are reduced to one [`CallRecord`] shape, and every
//! record gets a call-site fingerprint so traces from different runs can be
//! lined up.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::macros::format_description;

use crate::common::ImportError;
use crate::domain::payload::{PayloadVersion, RawCall, TestPayload};

/// Hex characters kept from the fingerprint digest.
const CALL_ID_LEN: usize = 32;

/// One instrumented call captured during a test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub interface: String,
    pub command: String,
    pub args: Vec<Value>,
    pub function: Option<String>,
    pub filename: Option<String>,
    pub lineno: Option<u64>,
    /// Seconds.
    pub duration: f64,
    /// ISO-8601 with microseconds. Version 2 derives it from `start`,
    /// rendered in UTC so a re-import gives the same value on any machine.
    pub time: String,
    pub depth: usize,
    pub stacktrace: Vec<Value>,
    /// Call-site fingerprint, shared by every call with the same
    /// interface, command, filename and function.
    pub id: String,
}

/// Fingerprint over `(interface, command, filename, function)`, in that order.
pub fn call_id(interface: &str, command: &str, filename: Option<&str>, function: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(interface.as_bytes());
    hasher.update(command.as_bytes());
    hasher.update(filename.unwrap_or("").as_bytes());
    hasher.update(function.unwrap_or("").as_bytes());
    let digest = hasher.finalize();

    hex_encode_truncated(&digest, CALL_ID_LEN)
}

fn hex_encode_truncated(bytes: &[u8], max_chars: usize) -> String {
    let mut s = String::with_capacity(max_chars + 1);
    for byte in bytes.iter().take(max_chars.div_ceil(2)) {
        let _ = write!(s, "{byte:02x}");
    }
    s.truncate(max_chars);
    s
}

/// Normalize every call of a test into its ordered trace.
///
/// Version 1 traces are ordered by interface tag, version 2 traces by start
/// time. Both sorts are stable.
pub fn normalize_trace(test: &TestPayload, version: PayloadVersion) -> Result<Vec<CallRecord>, ImportError> {
    match version {
        PayloadVersion::V1 => {
            // `interfaces` is a BTreeMap, so iteration is already tag-ordered.
            let mut trace = Vec::new();
            for (interface, calls) in &test.interfaces {
                for (n, raw) in calls.iter().enumerate() {
                    let context = format!("{interface} call #{n} of test {}", test.id);
                    trace.push(normalize_v1(interface, raw, &context)?);
                }
            }
            Ok(trace)
        }
        PayloadVersion::V2 => {
            let mut calls = Vec::with_capacity(test.calls.len());
            for (n, raw) in test.calls.iter().enumerate() {
                let context = format!("call #{n} of test {}", test.id);
                let start = number_field(raw, "start", &context)?;
                calls.push((start, raw, context));
            }
            calls.sort_by(|a, b| a.0.total_cmp(&b.0));
            calls
                .into_iter()
                .map(|(start, raw, context)| normalize_v2(raw, start, &context))
                .collect()
        }
    }
}

/// Version 1: `(interface_tag, payload)` with interface-specific fields.
pub fn normalize_v1(interface: &str, raw: &RawCall, context: &str) -> Result<CallRecord, ImportError> {
    let stacktrace = array_field(raw, "stacktrace", context)?;
    let frame = stacktrace
        .first()
        .ok_or_else(|| ImportError::missing("stacktrace[0]", context))?;
    let function = Some(frame_str(frame, "function", context)?);
    let filename = Some(frame_str(frame, "filename", context)?);
    let lineno = frame_lineno(frame, context)?;

    let (command, args) = match interface {
        "sql" => (
            str_field(raw, "query", context)?,
            into_args(required_value(raw, "query_params", context)?.clone()),
        ),
        "redis" | "pipelined_redis" => {
            let command = str_field(raw, "command", context)?;
            let args = match raw.get("actions") {
                Some(actions) => into_args(actions.clone()),
                None => vec![required_value(raw, "other_args", context)?.clone()],
            };
            (command, args)
        }
        "cache" => (
            str_field(raw, "action", context)?,
            vec![required_value(raw, "key", context)?.clone()],
        ),
        _ => (
            format!(
                "{}:{}",
                filename.as_deref().unwrap_or(""),
                function.as_deref().unwrap_or("")
            ),
            Vec::new(),
        ),
    };

    let id = call_id(interface, &command, filename.as_deref(), function.as_deref());
    Ok(CallRecord {
        interface: interface.to_string(),
        command,
        args,
        lineno,
        function,
        filename,
        duration: number_field(raw, "duration", context)?,
        time: str_field(raw, "time", context)?,
        depth: stacktrace.len(),
        stacktrace: stacktrace.clone(),
        id,
    })
}

/// Version 2: `type`/`name`/`args` plus numeric `start`/`end` timestamps.
pub fn normalize_v2(raw: &RawCall, start: f64, context: &str) -> Result<CallRecord, ImportError> {
    let interface = str_field(raw, "type", context)?;
    let command = str_field(raw, "name", context)?;
    let stacktrace = match raw.get("stacktrace") {
        None | Some(Value::Null) => Vec::new(),
        Some(_) => array_field(raw, "stacktrace", context)?.clone(),
    };
    let frame = stacktrace.first();
    let function = frame.and_then(|f| optional_str(f, "function"));
    let filename = frame.and_then(|f| optional_str(f, "filename"));

    let duration = match raw.get("end") {
        None | Some(Value::Null) => 0.0,
        Some(_) => number_field(raw, "end", context)? - start,
    };

    let id = call_id(&interface, &command, filename.as_deref(), function.as_deref());
    Ok(CallRecord {
        args: into_args(required_value(raw, "args", context)?.clone()),
        lineno: frame.and_then(|f| f.get("lineno")).and_then(Value::as_u64),
        function,
        filename,
        duration,
        time: format_epoch(start, context)?,
        depth: stacktrace.len(),
        stacktrace,
        interface,
        command,
        id,
    })
}

/// Render seconds since the epoch as an ISO-8601 timestamp (UTC, microseconds).
fn format_epoch(seconds: f64, context: &str) -> Result<String, ImportError> {
    let nanos = (seconds * 1_000_000_000.0).round() as i128;
    let moment = OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map_err(|e| ImportError::invalid("start", context, e.to_string()))?;
    let format =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]");
    moment
        .format(format)
        .map_err(|e| ImportError::invalid("start", context, e.to_string()))
}

fn into_args(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn optional_str(frame: &Value, key: &str) -> Option<String> {
    frame.get(key).and_then(Value::as_str).map(str::to_string)
}

/// A key that must be present; `null` is a legal value.
fn required_value<'a>(raw: &'a RawCall, key: &str, context: &str) -> Result<&'a Value, ImportError> {
    raw.get(key).ok_or_else(|| ImportError::missing(key, context))
}

fn frame_str(frame: &Value, key: &str, context: &str) -> Result<String, ImportError> {
    match frame.get(key) {
        None | Some(Value::Null) => Err(ImportError::missing(format!("stacktrace[0].{key}"), context)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ImportError::invalid(
            format!("stacktrace[0].{key}"),
            context,
            format!("expected a string, got {other}"),
        )),
    }
}

fn frame_lineno(frame: &Value, context: &str) -> Result<Option<u64>, ImportError> {
    match frame.get("lineno") {
        None => Err(ImportError::missing("stacktrace[0].lineno", context)),
        Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            ImportError::invalid("stacktrace[0].lineno", context, format!("expected a line number, got {value}"))
        }),
    }
}

fn str_field(raw: &RawCall, key: &str, context: &str) -> Result<String, ImportError> {
    match raw.get(key) {
        None | Some(Value::Null) => Err(ImportError::missing(key, context)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ImportError::invalid(key, context, format!("expected a string, got {other}"))),
    }
}

/// Numbers may arrive as JSON numbers or numeric strings.
fn number_field(raw: &RawCall, key: &str, context: &str) -> Result<f64, ImportError> {
    match raw.get(key) {
        None | Some(Value::Null) => Err(ImportError::missing(key, context)),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| ImportError::invalid(key, context, format!("{n} is not a float"))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| ImportError::invalid(key, context, e.to_string())),
        Some(other) => Err(ImportError::invalid(key, context, format!("expected a number, got {other}"))),
    }
}

fn array_field<'a>(raw: &'a RawCall, key: &str, context: &str) -> Result<&'a Vec<Value>, ImportError> {
    match raw.get(key) {
        None | Some(Value::Null) => Err(ImportError::missing(key, context)),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(ImportError::invalid(key, context, format!("expected a list, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawCall {
        match value {
            Value::Object(map) => map,
            _ => panic!("test fixture must be an object"),
        }
    }

    fn frame() -> Value {
        json!({"filename": "app/models.py", "function": "save", "lineno": 42})
    }

    #[test]
    fn test_call_id_is_stable_hex() {
        let id = call_id("sql", "SELECT 1", Some("a.py"), Some("f"));
        assert_eq!(id.len(), CALL_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, call_id("sql", "SELECT 1", Some("a.py"), Some("f")));
        assert_ne!(id, call_id("sql", "SELECT 2", Some("a.py"), Some("f")));
        // Missing frame fields hash like empty strings.
        assert_eq!(call_id("sql", "q", None, None), call_id("sql", "q", Some(""), Some("")));
    }

    #[test]
    fn test_v1_sql_call() {
        let call = raw(json!({
            "query": "SELECT * FROM auth_user WHERE id = %s",
            "query_params": [1],
            "duration": 0.004,
            "time": "2012-05-16T03:43:59.230000",
            "stacktrace": [frame(), {"filename": "app/views.py", "function": "index"}],
        }));
        let record = normalize_v1("sql", &call, "test").unwrap();

        assert_eq!(record.interface, "sql");
        assert_eq!(record.command, "SELECT * FROM auth_user WHERE id = %s");
        assert_eq!(record.args, vec![json!(1)]);
        assert_eq!(record.function.as_deref(), Some("save"));
        assert_eq!(record.filename.as_deref(), Some("app/models.py"));
        assert_eq!(record.lineno, Some(42));
        assert_eq!(record.depth, 2);
        assert_eq!(record.duration, 0.004);
        assert_eq!(record.time, "2012-05-16T03:43:59.230000");
    }

    #[test]
    fn test_v1_redis_falls_back_to_other_args() {
        let call = raw(json!({
            "command": "GET",
            "other_args": "user:1",
            "duration": 0.001,
            "time": "t",
            "stacktrace": [frame()],
        }));
        let record = normalize_v1("redis", &call, "test").unwrap();
        assert_eq!(record.args, vec![json!("user:1")]);

        let call = raw(json!({
            "command": "pipeline",
            "actions": [["GET", "a"], ["SET", "b", 1]],
            "duration": 0.001,
            "time": "t",
            "stacktrace": [frame()],
        }));
        let record = normalize_v1("pipelined_redis", &call, "test").unwrap();
        assert_eq!(record.args.len(), 2);
    }

    #[test]
    fn test_v1_cache_and_generic_interfaces() {
        let call = raw(json!({
            "action": "get", "key": "k", "duration": 0.0, "time": "t", "stacktrace": [frame()],
        }));
        let record = normalize_v1("cache", &call, "test").unwrap();
        assert_eq!(record.command, "get");
        assert_eq!(record.args, vec![json!("k")]);

        let call = raw(json!({"duration": 0.2, "time": "t", "stacktrace": [frame()]}));
        let record = normalize_v1("http", &call, "test").unwrap();
        assert_eq!(record.command, "app/models.py:save");
        assert!(record.args.is_empty());
    }

    #[test]
    fn test_v1_missing_query_is_fatal() {
        let call = raw(json!({"duration": 0.1, "time": "t", "stacktrace": [frame()]}));
        let err = normalize_v1("sql", &call, "sql call #0 of test a.b").unwrap_err();
        assert!(matches!(err, ImportError::MissingField { ref field, .. } if field == "query"));
    }

    #[test]
    fn test_v1_requires_a_frame() {
        let call = raw(json!({"query": "q", "duration": 0.1, "time": "t", "stacktrace": []}));
        let err = normalize_v1("sql", &call, "test").unwrap_err();
        assert!(matches!(err, ImportError::MissingField { ref field, .. } if field == "stacktrace[0]"));
    }

    fn missing_field(interface: &str, call: Value) -> String {
        match normalize_v1(interface, &raw(call), "test") {
            Err(ImportError::MissingField { field, .. }) => field,
            other => panic!("expected a missing field, got {other:?}"),
        }
    }

    #[test]
    fn test_v1_sql_requires_query_params() {
        let call = json!({"query": "q", "duration": 0.1, "time": "t", "stacktrace": [frame()]});
        assert_eq!(missing_field("sql", call), "query_params");

        // A present but null value is still accepted.
        let call = raw(json!({
            "query": "q", "query_params": null, "duration": 0.1, "time": "t", "stacktrace": [frame()],
        }));
        assert!(normalize_v1("sql", &call, "test").unwrap().args.is_empty());
    }

    #[test]
    fn test_v1_redis_requires_actions_or_other_args() {
        let call = json!({"command": "GET", "duration": 0.1, "time": "t", "stacktrace": [frame()]});
        assert_eq!(missing_field("redis", call.clone()), "other_args");
        assert_eq!(missing_field("pipelined_redis", call), "other_args");
    }

    #[test]
    fn test_v1_cache_requires_key() {
        let call = json!({"action": "get", "duration": 0.1, "time": "t", "stacktrace": [frame()]});
        assert_eq!(missing_field("cache", call), "key");
    }

    #[test]
    fn test_v1_frame_requires_location() {
        let call = json!({"duration": 0.1, "time": "t", "stacktrace": [{}]});
        assert_eq!(missing_field("http", call), "stacktrace[0].function");

        let call = json!({
            "query": "q", "query_params": [], "duration": 0.1, "time": "t",
            "stacktrace": [{"function": "save"}],
        });
        assert_eq!(missing_field("sql", call), "stacktrace[0].filename");

        let call = json!({
            "action": "get", "key": "k", "duration": 0.1, "time": "t",
            "stacktrace": [{"function": "save", "filename": "app/models.py"}],
        });
        assert_eq!(missing_field("cache", call), "stacktrace[0].lineno");
    }

    #[test]
    fn test_v2_requires_args() {
        let call = raw(json!({"type": "sql", "name": "SELECT 1", "start": 1.0}));
        let err = normalize_v2(&call, 1.0, "test").unwrap_err();
        assert!(matches!(err, ImportError::MissingField { ref field, .. } if field == "args"));
    }

    #[test]
    fn test_hex_encode_truncated() {
        assert_eq!(hex_encode_truncated(&[0xab, 0x01, 0xff], 4), "ab01");
        assert_eq!(hex_encode_truncated(&[0xab, 0x01, 0xff], 3), "ab0");
        assert_eq!(hex_encode_truncated(&[0x0f], 8), "0f");
    }

    #[test]
    fn test_v2_call_duration_and_time() {
        let call = raw(json!({
            "type": "sql",
            "name": "SELECT 1",
            "args": ["x"],
            "start": 1337139839.5,
            "end": 1337139840.0,
            "stacktrace": [frame()],
        }));
        let record = normalize_v2(&call, 1337139839.5, "test").unwrap();
        assert_eq!(record.interface, "sql");
        assert_eq!(record.command, "SELECT 1");
        assert_eq!(record.duration, 0.5);
        assert_eq!(record.time, "2012-05-16T03:43:59.500000");
        assert_eq!(record.function.as_deref(), Some("save"));
    }

    #[test]
    fn test_v2_without_end_or_stacktrace() {
        let call = raw(json!({"type": "cache", "name": "get", "args": [], "start": "12.5"}));
        let record = normalize_v2(&call, 12.5, "test").unwrap();
        assert_eq!(record.duration, 0.0);
        assert_eq!(record.depth, 0);
        assert!(record.function.is_none());
        assert!(record.filename.is_none());
        assert!(record.args.is_empty());
    }

    #[test]
    fn test_fingerprint_ignores_timing() {
        let early = raw(json!({
            "type": "sql", "name": "q", "args": [], "start": 1.0, "end": 2.0, "stacktrace": [frame()],
        }));
        let late = raw(json!({
            "type": "sql", "name": "q", "args": [], "start": 50.0, "end": 50.25, "stacktrace": [frame()],
        }));
        let a = normalize_v2(&early, 1.0, "test").unwrap();
        let b = normalize_v2(&late, 50.0, "test").unwrap();
        assert_ne!(a.duration, b.duration);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_v2_trace_is_ordered_by_start() {
        let test: TestPayload = serde_json::from_value(json!({
            "id": "a.b",
            "duration": 1.0,
            "calls": [
                {"type": "sql", "name": "second", "args": [], "start": 2.0},
                {"type": "sql", "name": "first", "args": [], "start": "1.0"},
            ],
        }))
        .unwrap();
        let trace = normalize_trace(&test, PayloadVersion::V2).unwrap();
        let names: Vec<_> = trace.iter().map(|c| c.command.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_v1_trace_is_ordered_by_interface() {
        let test: TestPayload = serde_json::from_value(json!({
            "id": "a.b",
            "duration": 1.0,
            "interfaces": {
                "sql": [{"query": "q", "query_params": [], "duration": 0.1, "time": "t", "stacktrace": [frame()]}],
                "cache": [{"action": "get", "key": "k", "duration": 0.1, "time": "t", "stacktrace": [frame()]}],
            },
        }))
        .unwrap();
        let trace = normalize_trace(&test, PayloadVersion::V1).unwrap();
        let interfaces: Vec<_> = trace.iter().map(|c| c.interface.as_str()).collect();
        assert_eq!(interfaces, vec!["cache", "sql"]);
    }
}

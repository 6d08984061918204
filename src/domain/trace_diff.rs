//! Call-by-call diff between two traces.
//!
//! Calls are keyed by `"{position}_{call_id}"`. Embedding the position keeps
//! keys unique inside one trace even though the same call site may repeat.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::call::CallRecord;
use crate::domain::matcher::{OpTag, SequenceMatcher};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffEntry {
    pub tag: OpTag,
    pub key: String,
    /// `None` is a placeholder for a call that only exists on the other side.
    pub record: Option<CallRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffSide {
    pub records: Vec<DiffEntry>,
}

impl DiffSide {
    fn push(&mut self, tag: OpTag, key: &str, record: Option<&CallRecord>) {
        self.records.push(DiffEntry {
            tag,
            key: key.to_string(),
            record: record.cloned(),
        });
    }

    fn num_diffs(&self) -> usize {
        self.records.iter().filter(|e| e.tag != OpTag::Equal).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TraceDiff {
    pub previous: DiffSide,
    pub current: DiffSide,
    /// Every keyed call of both traces; current wins on a shared key.
    pub calls: BTreeMap<String, CallRecord>,
    /// Non-`equal` entries across both sides.
    pub num_diffs: usize,
}

impl TraceDiff {
    /// True when both traces were empty.
    pub fn is_empty(&self) -> bool {
        self.previous.records.is_empty() && self.current.records.is_empty()
    }
}

pub fn diff_key(position: usize, call: &CallRecord) -> String {
    format!("{}_{}", position, call.id)
}

/// Align `previous` against `current`.
///
/// When the traces share no key, both non-empty sides come back as a single
/// `replace` run, so `num_diffs` is the combined length of the traces.
/// Pure `delete`/`insert` runs only appear next to matching calls or
/// against an empty side.
pub fn diff_traces(previous: &[CallRecord], current: &[CallRecord]) -> TraceDiff {
    if previous.is_empty() && current.is_empty() {
        return TraceDiff::default();
    }

    let prev_keys: Vec<String> = previous.iter().enumerate().map(|(i, c)| diff_key(i, c)).collect();
    let cur_keys: Vec<String> = current.iter().enumerate().map(|(i, c)| diff_key(i, c)).collect();

    let mut diff = TraceDiff::default();
    for op in SequenceMatcher::new(&prev_keys, &cur_keys).opcodes() {
        let prev_range = op.a_start..op.a_end;
        let cur_range = op.b_start..op.b_end;
        match op.tag {
            OpTag::Equal | OpTag::Replace => {
                for i in prev_range {
                    diff.previous.push(op.tag, &prev_keys[i], Some(&previous[i]));
                }
                for j in cur_range {
                    diff.current.push(op.tag, &cur_keys[j], Some(&current[j]));
                }
            }
            OpTag::Delete => {
                for i in prev_range {
                    diff.previous.push(op.tag, &prev_keys[i], Some(&previous[i]));
                    diff.current.push(op.tag, &prev_keys[i], None);
                }
            }
            OpTag::Insert => {
                for j in cur_range {
                    diff.previous.push(op.tag, &cur_keys[j], None);
                    diff.current.push(op.tag, &cur_keys[j], Some(&current[j]));
                }
            }
        }
    }

    diff.calls = prev_keys
        .into_iter()
        .zip(previous.iter().cloned())
        .chain(cur_keys.into_iter().zip(current.iter().cloned()))
        .collect();
    diff.num_diffs = diff.previous.num_diffs() + diff.current.num_diffs();
    diff
}

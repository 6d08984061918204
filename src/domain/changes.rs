// Build-over-build change summary of per-interface call counts.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::domain::model::{TestNode, TestTree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    /// The label does not exist in the comparison build.
    New,
    Changed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Increase,
    Decrease,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceChange {
    pub current: u64,
    pub previous: u64,
    pub delta: i64,
    /// Signed display form: `+2`, `-3`.
    pub change: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
}

impl InterfaceChange {
    fn between(current: u64, previous: u64) -> Option<Self> {
        let delta = current as i64 - previous as i64;
        if delta == 0 {
            return None;
        }
        Some(Self {
            current,
            previous,
            delta,
            change: if delta > 0 { format!("+{delta}") } else { delta.to_string() },
            kind: if delta > 0 { ChangeKind::Increase } else { ChangeKind::Decrease },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeChange {
    pub label: String,
    pub status: ChangeStatus,
    pub interfaces: BTreeMap<String, InterfaceChange>,
}

impl NodeChange {
    pub fn total_delta(&self) -> i64 {
        self.interfaces.values().map(|c| c.delta).sum()
    }
}

/// Compare `current` nodes against the same labels in `previous`.
///
/// Nodes without any call-count change are dropped unless they are new.
/// The result is sorted by total delta, largest first; ties keep input
/// order. Without a comparison build there is nothing to report.
pub fn summarize_changes<'a>(
    previous: Option<&TestTree>,
    current: impl IntoIterator<Item = &'a TestNode>,
) -> Vec<NodeChange> {
    let Some(previous) = previous else {
        return Vec::new();
    };

    let mut changes: Vec<NodeChange> = current
        .into_iter()
        .filter_map(|node| {
            let Some(last) = previous.get(&node.label) else {
                return Some(NodeChange {
                    label: node.label.clone(),
                    status: ChangeStatus::New,
                    interfaces: BTreeMap::new(),
                });
            };

            let interfaces: BTreeSet<&String> = node.data.keys().chain(last.data.keys()).collect();
            let interfaces: BTreeMap<String, InterfaceChange> = interfaces
                .into_iter()
                .filter_map(|name| {
                    InterfaceChange::between(node.calls(name), last.calls(name))
                        .map(|change| (name.clone(), change))
                })
                .collect();

            (!interfaces.is_empty()).then(|| NodeChange {
                label: node.label.clone(),
                status: ChangeStatus::Changed,
                interfaces,
            })
        })
        .collect();

    changes.sort_by_key(|c| std::cmp::Reverse(c.total_delta()));
    changes
}

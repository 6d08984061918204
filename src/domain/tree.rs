//! Test hierarchy construction.
//!
//! Leaf ids are dotted paths (`a.b.c`). Every strict prefix is a candidate
//! branch, but a candidate is only materialized when its leaves fan out into
//! at least two distinct immediate sub-groups; single-child chains collapse
//! and their contents attach to the nearest materialized ancestor. Branch
//! statistics are then folded bottom-up from each branch's direct children.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::model::{NodeId, NodeKind, TestNode, TestTree};
use crate::domain::stats::{BranchAccumulator, DurationStats, InterfaceData};

/// A normalized test record, ready to become a leaf node.
#[derive(Debug, Clone)]
pub struct LeafInput {
    pub label: String,
    pub description: String,
    pub duration: f64,
    pub data: InterfaceData,
}

/// Strict dotted prefixes of `label`, shortest first, each paired with the
/// path one segment longer (its immediate child on the way to `label`).
fn prefixes(label: &str) -> impl Iterator<Item = (&str, &str)> {
    let dots: Vec<usize> = label.match_indices('.').map(|(i, _)| i).collect();
    (0..dots.len()).map(move |n| {
        let child_end = dots.get(n + 1).copied().unwrap_or(label.len());
        (&label[..dots[n]], &label[..child_end])
    })
}

/// Candidate branch labels that survive collapse.
///
/// A label that is itself a leaf id never becomes a branch.
pub fn materialized_branches<'a>(labels: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    let labels: BTreeSet<&str> = labels.into_iter().collect();
    let mut groupings: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for label in &labels {
        for (prefix, child) in prefixes(label) {
            groupings.entry(prefix).or_default().insert(child);
        }
    }

    groupings
        .into_iter()
        .filter(|(prefix, children)| children.len() >= 2 && !labels.contains(prefix))
        .map(|(prefix, _)| prefix.to_string())
        .collect()
}

/// Nearest materialized ancestor of `label`, walking the dot-path upward.
fn resolve_parent<'a>(label: &str, branches: &'a BTreeSet<String>) -> Option<&'a str> {
    label
        .rmatch_indices('.')
        .map(|(i, _)| &label[..i])
        .find_map(|prefix| branches.get(prefix).map(String::as_str))
}

/// Build the collapsed, aggregated tree for one build's leaves.
///
/// Leaf labels must be unique; a repeated label keeps its first record.
pub fn build_tree(leaves: Vec<LeafInput>) -> TestTree {
    let mut by_label: BTreeMap<String, LeafInput> = BTreeMap::new();
    for leaf in leaves {
        by_label.entry(leaf.label.clone()).or_insert(leaf);
    }
    let branches = materialized_branches(by_label.keys().map(String::as_str));

    // Arena order is label order, which puts every ancestor before its
    // descendants.
    let mut labels: Vec<&str> = by_label
        .keys()
        .map(String::as_str)
        .chain(branches.iter().map(String::as_str))
        .collect();
    labels.sort_unstable();

    let ids: BTreeMap<&str, NodeId> = labels
        .iter()
        .enumerate()
        .map(|(i, label)| (*label, NodeId(i)))
        .collect();

    let mut nodes: Vec<TestNode> = labels
        .iter()
        .map(|label| {
            let parent = resolve_parent(label, &branches).map(|p| ids[p]);
            match by_label.get(*label) {
                Some(leaf) => TestNode {
                    label: leaf.label.clone(),
                    description: leaf.description.clone(),
                    kind: NodeKind::Leaf,
                    num_tests: 0,
                    duration: DurationStats::single(leaf.duration),
                    data: leaf.data.clone(),
                    parent,
                    children: Vec::new(),
                },
                None => TestNode {
                    label: label.to_string(),
                    description: String::new(),
                    kind: NodeKind::Branch,
                    num_tests: 0,
                    duration: DurationStats::default(),
                    data: InterfaceData::new(),
                    parent,
                    children: Vec::new(),
                },
            }
        })
        .collect();

    for i in 0..nodes.len() {
        if let Some(parent) = nodes[i].parent {
            nodes[parent.0].children.push(NodeId(i));
        }
    }

    // Reverse label order visits descendants before their ancestors.
    for i in (0..nodes.len()).rev() {
        if nodes[i].is_leaf() {
            continue;
        }
        let mut means = Vec::with_capacity(nodes[i].children.len());
        let mut num_tests = 0;
        let mut interfaces = BranchAccumulator::default();
        for child in &nodes[i].children {
            let child = &nodes[child.0];
            means.push(child.duration.mean);
            num_tests += child.leaf_count();
            interfaces.add_child(&child.data);
        }

        let branch = &mut nodes[i];
        branch.num_tests = num_tests;
        branch.duration = DurationStats::aggregate(&means);
        branch.data = interfaces.finish();
    }

    TestTree::from_nodes(nodes)
}

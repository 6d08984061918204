use std::collections::BTreeSet;

use proptest::prelude::*;
use zumanji::domain::model::NodeKind;
use zumanji::domain::stats::{InterfaceData, InterfaceStats};
use zumanji::domain::tree::{build_tree, LeafInput};

fn label_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "d"]), 1..5)
        .prop_map(|parts| parts.join("."))
}

fn leaves_strategy() -> impl Strategy<Value = Vec<LeafInput>> {
    prop::collection::btree_set(label_strategy(), 0..24).prop_flat_map(|labels| {
        let n = labels.len();
        (
            Just(labels),
            prop::collection::vec((0.0f64..10.0, 0u64..5), n),
        )
            .prop_map(|(labels, values)| {
                labels
                    .into_iter()
                    .zip(values)
                    .map(|(label, (duration, calls))| {
                        let mut data = InterfaceData::new();
                        data.insert(
                            "sql".to_string(),
                            InterfaceStats {
                                mean_calls: calls,
                                mean_duration: duration / 2.0,
                                ..Default::default()
                            },
                        );
                        LeafInput {
                            label,
                            description: String::new(),
                            duration,
                            data,
                        }
                    })
                    .collect()
            })
    })
}

proptest! {
    #[test]
    fn prop_leaf_count_conserved(leaves in leaves_strategy()) {
        let expected: BTreeSet<String> = leaves.iter().map(|l| l.label.clone()).collect();
        let tree = build_tree(leaves);

        let actual: BTreeSet<String> = tree.leaves().map(|n| n.label.clone()).collect();
        prop_assert_eq!(&actual, &expected);

        let root_total: usize = tree.roots().map(|n| n.leaf_count()).sum();
        prop_assert_eq!(root_total, expected.len());
    }

    #[test]
    fn prop_links_are_consistent(leaves in leaves_strategy()) {
        let tree = build_tree(leaves);

        for node in tree.nodes() {
            match tree.parent(node) {
                Some(parent) => {
                    prop_assert_eq!(parent.kind, NodeKind::Branch);
                    let prefix = format!("{}.", parent.label);
                    prop_assert!(node.label.starts_with(&prefix));
                    prop_assert!(tree.children(parent).any(|c| c.label == node.label));
                }
                None => prop_assert!(tree.roots().any(|r| r.label == node.label)),
            }
            // Every ancestor chain ends at a root.
            prop_assert!(tree.ancestors(&node.label).count() < tree.len());
        }
    }

    #[test]
    fn prop_branches_aggregate_their_children(leaves in leaves_strategy()) {
        let tree = build_tree(leaves);

        for branch in tree.nodes().iter().filter(|n| n.kind == NodeKind::Branch) {
            let children: Vec<_> = tree.children(branch).collect();
            prop_assert!(children.len() >= 2);

            let leaves: usize = children.iter().map(|c| c.leaf_count()).sum();
            prop_assert_eq!(branch.num_tests, leaves);

            let calls: u64 = children.iter().map(|c| c.calls("sql")).sum();
            prop_assert_eq!(branch.calls("sql"), calls);

            let mean: f64 = children.iter().map(|c| c.duration.mean).sum();
            prop_assert!((branch.duration.mean - mean).abs() < 1e-9);
            prop_assert!(branch.duration.lower <= branch.duration.upper90);
            prop_assert!(branch.duration.upper90 <= branch.duration.upper);
        }
    }

    #[test]
    fn prop_build_is_deterministic(leaves in leaves_strategy()) {
        let first = build_tree(leaves.clone());
        let second = build_tree(leaves.into_iter().rev().collect());
        prop_assert_eq!(first, second);
    }
}

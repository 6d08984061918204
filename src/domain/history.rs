// Historical call counts of tests across a project's recent builds.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::common::StorageError;
use crate::domain::model::{Build, BuildKey};
use crate::domain::store::BuildStore;

/// Call counts of one test in one build, one value per call type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryPoint {
    /// `None` for padding in front of a short history.
    pub build: Option<BuildKey>,
    /// Empty when the build has no test with this label.
    pub calls: Vec<u64>,
}

/// For every label, the `mean_calls` of each `call_types` interface over the
/// last `points` builds of the project, ending with `build` itself.
///
/// Series are left-padded with empty points to exactly `points` entries.
pub fn historical_calls(
    store: &dyn BuildStore,
    build: &Build,
    labels: &[&str],
    call_types: &[String],
    points: usize,
) -> Result<BTreeMap<String, Vec<HistoryPoint>>, StorageError> {
    let earlier: Vec<Build> = store
        .list_builds(&build.key.project)?
        .into_iter()
        .filter(|b| b.datetime < build.datetime && b.key != build.key)
        .collect();
    let skip = earlier.len().saturating_sub(points.saturating_sub(1));
    let keys: Vec<&BuildKey> = earlier[skip..]
        .iter()
        .map(|b| &b.key)
        .chain(std::iter::once(&build.key))
        .collect();

    let mut series: BTreeMap<String, Vec<HistoryPoint>> =
        labels.iter().map(|l| (l.to_string(), Vec::new())).collect();
    for key in keys {
        let tree = store.get_tree(key)?.unwrap_or_default();
        for (label, entries) in series.iter_mut() {
            let calls: Vec<u64> = tree
                .get(label)
                .map(|node| call_types.iter().map(|t| node.calls(t)).collect())
                .unwrap_or_default();
            entries.push(HistoryPoint {
                build: Some(key.clone()),
                calls,
            });
        }
    }

    for entries in series.values_mut() {
        let missing = points.saturating_sub(entries.len());
        entries.splice(
            0..0,
            std::iter::repeat(HistoryPoint { build: None, calls: Vec::new() }).take(missing),
        );
        let excess = entries.len().saturating_sub(points);
        entries.drain(..excess);
    }
    Ok(series)
}

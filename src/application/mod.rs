// Use cases: importing a report, and comparing persisted builds.

use std::collections::BTreeMap;
use std::collections::HashSet;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::common::ImportError;
use crate::domain::call::{normalize_trace, CallRecord};
use crate::domain::changes::{summarize_changes, NodeChange};
use crate::domain::model::{Build, BuildKey, BuildSnapshot, TestTree};
use crate::domain::payload::BuildPayload;
use crate::domain::stats::LeafAccumulator;
use crate::domain::store::BuildStore;
use crate::domain::trace_diff::{diff_traces, TraceDiff};
use crate::domain::tree::{build_tree, LeafInput};

/// Project/revision labels supplied out-of-band; they win over the payload's.
#[derive(Debug, Clone, Default)]
pub struct ImportTarget {
    pub project: Option<String>,
    pub revision: Option<String>,
}

/// Turns one JSON report into a persisted build.
pub struct ImportPipeline<'a> {
    pub store: &'a dyn BuildStore,
}

impl<'a> ImportPipeline<'a> {
    pub fn new(store: &'a dyn BuildStore) -> Self {
        Self { store }
    }

    /// Parse raw JSON bytes and import them.
    pub fn import_slice(&self, bytes: &[u8], target: &ImportTarget) -> Result<Build, ImportError> {
        let payload = BuildPayload::from_slice(bytes)?;
        self.import(&payload, target)
    }

    /// Import a parsed report, replacing any earlier build with the same
    /// (project, revision).
    ///
    /// The whole snapshot is assembled in memory first, so every format error
    /// surfaces before the store is written.
    pub fn import(&self, payload: &BuildPayload, target: &ImportTarget) -> Result<Build, ImportError> {
        let snapshot = prepare_snapshot(payload, target)?;
        let build = snapshot.build.clone();
        let num_nodes = snapshot.tree.len();

        self.store.replace_build(snapshot)?;

        info!(
            project = %build.key.project,
            revision = %build.key.revision,
            num_tests = build.num_tests,
            num_nodes,
            "imported build"
        );
        Ok(build)
    }
}

fn resolve_key(payload: &BuildPayload, target: &ImportTarget) -> Result<BuildKey, ImportError> {
    let pick = |explicit: &Option<String>, embedded: &Option<String>| {
        explicit
            .iter()
            .chain(embedded.iter())
            .find(|label| !label.is_empty())
            .cloned()
    };
    let project = pick(&target.project, &payload.project).ok_or(ImportError::MissingProject)?;
    let revision = pick(&target.revision, &payload.revision).ok_or(ImportError::MissingRevision)?;
    Ok(BuildKey::new(project, revision))
}

/// Build the complete snapshot for a report without touching storage.
pub fn prepare_snapshot(payload: &BuildPayload, target: &ImportTarget) -> Result<BuildSnapshot, ImportError> {
    let key = resolve_key(payload, target)?;
    let version = payload.schema_version()?;
    let datetime = payload.timestamp()?;

    let mut seen = HashSet::new();
    let mut leaves = Vec::with_capacity(payload.tests.len());
    let mut traces: BTreeMap<String, Vec<CallRecord>> = BTreeMap::new();
    let mut total_duration = 0.0;

    for test in &payload.tests {
        if !seen.insert(test.id.as_str()) {
            warn!(label = %test.id, "duplicate test id, keeping the first record");
            continue;
        }

        let trace = normalize_trace(test, version)?;
        let mut acc = LeafAccumulator::default();
        for call in &trace {
            acc.record(&call.interface, call.duration);
        }

        debug!(label = %test.id, calls = trace.len(), "creating leaf");
        total_duration += test.duration;
        leaves.push(LeafInput {
            label: test.id.clone(),
            description: test.description(),
            duration: test.duration,
            data: acc.finish(),
        });
        traces.insert(test.id.clone(), trace);
    }

    let num_tests = leaves.len();
    let tree = build_tree(leaves);
    for branch in tree.nodes().iter().filter(|n| !n.is_leaf()) {
        debug!(label = %branch.label, num_tests = branch.num_tests, "created branch");
    }

    Ok(BuildSnapshot {
        build: Build {
            key,
            datetime,
            tags: payload.tags.clone(),
            num_tests,
            total_duration,
        },
        tree,
        traces,
    })
}

/// Read-only comparisons between persisted builds.
pub struct CompareUsecase<'a> {
    pub store: &'a dyn BuildStore,
}

impl<'a> CompareUsecase<'a> {
    pub fn new(store: &'a dyn BuildStore) -> Self {
        Self { store }
    }

    pub fn build(&self, key: &BuildKey) -> Result<Build> {
        self.store
            .get_build(key)?
            .with_context(|| format!("Build not found: {key}"))
    }

    pub fn tree(&self, key: &BuildKey) -> Result<TestTree> {
        self.store
            .get_tree(key)?
            .with_context(|| format!("Build not found: {key}"))
    }

    /// The explicit comparison build, or the previous build of the project.
    pub fn comparison_build(&self, build: &Build, against: Option<&BuildKey>) -> Result<Option<Build>> {
        match against {
            Some(key) => Ok(Some(self.build(key)?)),
            None => Ok(self.store.previous_build(build)?),
        }
    }

    /// Diff the trace of `label` in `current` against `previous_label`
    /// (default: the same label) in the comparison build.
    ///
    /// Without `against`, the comparison build is the latest earlier build
    /// that ran `previous_label`.
    pub fn trace_diff(
        &self,
        current: &BuildKey,
        label: &str,
        against: Option<&BuildKey>,
        previous_label: Option<&str>,
    ) -> Result<TraceDiff> {
        let build = self.build(current)?;
        let trace = self.store.get_trace(current, label)?.unwrap_or_default();
        let previous_label = previous_label.unwrap_or(label);

        let comparison = match against {
            Some(key) => Some(self.build(key)?),
            None => self.store.previous_test(&build, previous_label)?,
        };
        let previous_trace = match comparison {
            Some(other) => self
                .store
                .get_trace(&other.key, previous_label)?
                .unwrap_or_default(),
            None => Vec::new(),
        };

        Ok(diff_traces(&previous_trace, &trace))
    }

    /// Call-count changes of every node of `current` against the comparison build.
    pub fn changes(&self, current: &BuildKey, against: Option<&BuildKey>) -> Result<Vec<NodeChange>> {
        let build = self.build(current)?;
        let tree = self.tree(current)?;
        let previous_tree = match self.comparison_build(&build, against)? {
            Some(other) => Some(self.tree(&other.key)?),
            None => None,
        };
        Ok(summarize_changes(previous_tree.as_ref(), tree.nodes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::store::MemoryBuildStore;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> BuildPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_explicit_target_wins() {
        let p = payload(json!({
            "time": "2012-05-16T03:43:59.0", "project": "embedded", "revision": "r0", "tests": [],
        }));
        let target = ImportTarget { project: Some("cli".to_string()), revision: None };
        let key = resolve_key(&p, &target).unwrap();
        assert_eq!(key, BuildKey::new("cli", "r0"));
    }

    #[test]
    fn test_missing_identity_fails_before_storage() {
        let store = MemoryBuildStore::default();
        let pipeline = ImportPipeline::new(&store);

        let p = payload(json!({"time": "2012-05-16T03:43:59.0", "revision": "r0", "tests": []}));
        let err = pipeline.import(&p, &ImportTarget::default()).unwrap_err();
        assert!(matches!(err, ImportError::MissingProject));

        let p = payload(json!({"time": "2012-05-16T03:43:59.0", "project": "p", "tests": []}));
        let err = pipeline.import(&p, &ImportTarget::default()).unwrap_err();
        assert!(matches!(err, ImportError::MissingRevision));

        assert!(store.list_builds("p").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let p = payload(json!({
            "version": 2,
            "time": "2012-05-16T03:43:59.0",
            "project": "p",
            "revision": "r",
            "tests": [
                {"id": "t.a", "duration": 1.0},
                {"id": "t.a", "duration": 5.0},
            ],
        }));
        let snapshot = prepare_snapshot(&p, &ImportTarget::default()).unwrap();
        assert_eq!(snapshot.build.num_tests, 1);
        assert_eq!(snapshot.build.total_duration, 1.0);
    }

    #[test]
    fn test_compare_defaults_to_previous_build() {
        let store = MemoryBuildStore::default();
        let pipeline = ImportPipeline::new(&store);
        let report = |revision: &str, time: &str, calls: usize| {
            let calls: Vec<_> = (0..calls)
                .map(|n| json!({"type": "sql", "name": "SELECT 1", "args": [], "start": n as f64, "end": n as f64 + 0.5}))
                .collect();
            payload(json!({
                "version": 2, "time": time, "project": "p", "revision": revision,
                "tests": [{"id": "t.a", "duration": 1.0, "calls": calls}],
            }))
        };
        pipeline.import(&report("r1", "2012-05-16T00:00:00.0", 3), &ImportTarget::default()).unwrap();
        pipeline.import(&report("r2", "2012-05-17T00:00:00.0", 5), &ImportTarget::default()).unwrap();

        let compare = CompareUsecase::new(&store);
        let changes = compare.changes(&BuildKey::new("p", "r2"), None).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].interfaces["sql"].change, "+2");

        let diff = compare.trace_diff(&BuildKey::new("p", "r2"), "t.a", None, None).unwrap();
        assert_eq!(diff.num_diffs, 4);

        let err = compare.changes(&BuildKey::new("p", "missing"), None).unwrap_err();
        assert!(err.to_string().contains("Build not found"));
    }

    #[test]
    fn test_trace_diff_skips_builds_without_the_test() {
        let store = MemoryBuildStore::default();
        let pipeline = ImportPipeline::new(&store);
        let report = |revision: &str, time: &str, labels: &[&str]| {
            let tests: Vec<_> = labels
                .iter()
                .map(|label| json!({
                    "id": label,
                    "duration": 1.0,
                    "calls": [{"type": "sql", "name": "SELECT 1", "args": [], "start": 1.0, "end": 1.5}],
                }))
                .collect();
            payload(json!({
                "version": 2, "time": time, "project": "p", "revision": revision, "tests": tests,
            }))
        };
        pipeline.import(&report("r1", "2012-05-16T00:00:00.0", &["t.a"]), &ImportTarget::default()).unwrap();
        pipeline.import(&report("r2", "2012-05-17T00:00:00.0", &["t.b"]), &ImportTarget::default()).unwrap();
        pipeline.import(&report("r3", "2012-05-18T00:00:00.0", &["t.a"]), &ImportTarget::default()).unwrap();

        let compare = CompareUsecase::new(&store);
        let diff = compare.trace_diff(&BuildKey::new("p", "r3"), "t.a", None, None).unwrap();
        assert_eq!(diff.num_diffs, 0);
        assert_eq!(diff.previous.records.len(), 1);

        // An explicit comparison build is used as given.
        let against = BuildKey::new("p", "r2");
        let diff = compare.trace_diff(&BuildKey::new("p", "r3"), "t.a", Some(&against), None).unwrap();
        assert_eq!(diff.num_diffs, 2);
    }
}

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::Db;

use crate::common::StorageError;
use crate::domain::call::CallRecord;
use crate::domain::model::{Build, BuildKey, BuildSnapshot, TestTree};

/// Trait for build storage backends.
/// Implementations must be thread-safe (Send + Sync).
///
/// `replace_build` is the only mutator and is all-or-nothing: readers see
/// either the previous build for that key or the complete new one.
pub trait BuildStore: Send + Sync {
    /// Delete any build with the same key, then write `snapshot`.
    fn replace_build(&self, snapshot: BuildSnapshot) -> Result<(), StorageError>;
    fn get_build(&self, key: &BuildKey) -> Result<Option<Build>, StorageError>;
    fn get_tree(&self, key: &BuildKey) -> Result<Option<TestTree>, StorageError>;
    /// The ordered trace of a leaf, `None` for branches and unknown labels.
    fn get_trace(&self, key: &BuildKey, label: &str) -> Result<Option<Vec<CallRecord>>, StorageError>;
    /// Builds of a project, oldest first.
    fn list_builds(&self, project: &str) -> Result<Vec<Build>, StorageError>;

    /// Latest build of the same project strictly older than `build`.
    fn previous_build(&self, build: &Build) -> Result<Option<Build>, StorageError> {
        Ok(self
            .list_builds(&build.key.project)?
            .into_iter()
            .filter(|b| b.datetime < build.datetime && b.key != build.key)
            .last())
    }

    /// Earliest build of the same project strictly newer than `build`.
    fn next_build(&self, build: &Build) -> Result<Option<Build>, StorageError> {
        Ok(self
            .list_builds(&build.key.project)?
            .into_iter()
            .find(|b| b.datetime > build.datetime && b.key != build.key))
    }

    /// Latest strictly older build whose tree has a node labelled `label`.
    fn previous_test(&self, build: &Build, label: &str) -> Result<Option<Build>, StorageError> {
        let earlier = self
            .list_builds(&build.key.project)?
            .into_iter()
            .rev()
            .filter(|b| b.datetime < build.datetime && b.key != build.key);
        first_with_label(self, earlier, label)
    }

    /// Earliest strictly newer build whose tree has a node labelled `label`.
    fn next_test(&self, build: &Build, label: &str) -> Result<Option<Build>, StorageError> {
        let later = self
            .list_builds(&build.key.project)?
            .into_iter()
            .filter(|b| b.datetime > build.datetime && b.key != build.key);
        first_with_label(self, later, label)
    }
}

fn first_with_label<S: BuildStore + ?Sized>(
    store: &S,
    builds: impl Iterator<Item = Build>,
    label: &str,
) -> Result<Option<Build>, StorageError> {
    for build in builds {
        let has_label = store
            .get_tree(&build.key)?
            .is_some_and(|tree| tree.get(label).is_some());
        if has_label {
            return Ok(Some(build));
        }
    }
    Ok(None)
}

fn sort_builds(builds: &mut [Build]) {
    builds.sort_by(|a, b| a.datetime.cmp(&b.datetime).then_with(|| a.key.cmp(&b.key)));
}

// ============================================================================
// MemoryBuildStore - in-memory storage using DashMap
// ============================================================================

/// Each key maps to one immutable snapshot, so a replace is a single insert.
#[derive(Default)]
pub struct MemoryBuildStore {
    builds: DashMap<BuildKey, Arc<BuildSnapshot>>,
}

impl MemoryBuildStore {
    fn snapshot(&self, key: &BuildKey) -> Option<Arc<BuildSnapshot>> {
        self.builds.get(key).map(|r| Arc::clone(r.value()))
    }
}

impl BuildStore for MemoryBuildStore {
    fn replace_build(&self, snapshot: BuildSnapshot) -> Result<(), StorageError> {
        self.builds.insert(snapshot.build.key.clone(), Arc::new(snapshot));
        Ok(())
    }

    fn get_build(&self, key: &BuildKey) -> Result<Option<Build>, StorageError> {
        Ok(self.snapshot(key).map(|s| s.build.clone()))
    }

    fn get_tree(&self, key: &BuildKey) -> Result<Option<TestTree>, StorageError> {
        Ok(self.snapshot(key).map(|s| s.tree.clone()))
    }

    fn get_trace(&self, key: &BuildKey, label: &str) -> Result<Option<Vec<CallRecord>>, StorageError> {
        Ok(self.snapshot(key).and_then(|s| s.traces.get(label).cloned()))
    }

    fn list_builds(&self, project: &str) -> Result<Vec<Build>, StorageError> {
        let mut builds: Vec<Build> = self
            .builds
            .iter()
            .filter(|r| r.key().project == project)
            .map(|r| r.value().build.clone())
            .collect();
        sort_builds(&mut builds);
        Ok(builds)
    }
}

// ============================================================================
// DiskBuildStore - persistent storage using sled
// ============================================================================

/// Value of the `builds` tree.
#[derive(Serialize, Deserialize)]
struct StoredBuild {
    build: Build,
    tree: TestTree,
}

pub struct DiskBuildStore {
    db: Db,
    // Trees for different data types
    builds_tree: sled::Tree,
    traces_tree: sled::Tree,
}

impl DiskBuildStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let builds_tree = db.open_tree("builds")?;
        let traces_tree = db.open_tree("traces")?;

        Ok(Self {
            db,
            builds_tree,
            traces_tree,
        })
    }

    fn load(&self, key: &BuildKey) -> Result<Option<StoredBuild>, StorageError> {
        match self.builds_tree.get(key.storage_key())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl BuildStore for DiskBuildStore {
    fn replace_build(&self, snapshot: BuildSnapshot) -> Result<(), StorageError> {
        let key = snapshot.build.key.clone();
        let build_key = key.storage_key();
        let stored = StoredBuild {
            build: snapshot.build,
            tree: snapshot.tree,
        };
        let build_bytes = bincode::serialize(&stored)?;
        let trace_entries = snapshot
            .traces
            .iter()
            .map(|(label, trace)| -> Result<_, StorageError> {
                Ok((key.trace_key(label), serde_json::to_vec(trace)?))
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        (&self.builds_tree, &self.traces_tree)
            .transaction(|(builds, traces)| {
                if let Some(old) = builds.get(&build_key)? {
                    let old: StoredBuild = bincode::deserialize(&old)
                        .map_err(|e| ConflictableTransactionError::Abort(StorageError::Codec(e)))?;
                    for leaf in old.tree.leaves() {
                        traces.remove(key.trace_key(&leaf.label))?;
                    }
                }
                builds.insert(build_key.as_slice(), build_bytes.as_slice())?;
                for (trace_key, bytes) in &trace_entries {
                    traces.insert(trace_key.as_slice(), bytes.as_slice())?;
                }
                Ok(())
            })
            .map_err(|e: TransactionError<StorageError>| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => StorageError::Backend(e),
            })?;

        self.db.flush()?;
        Ok(())
    }

    fn get_build(&self, key: &BuildKey) -> Result<Option<Build>, StorageError> {
        Ok(self.load(key)?.map(|s| s.build))
    }

    fn get_tree(&self, key: &BuildKey) -> Result<Option<TestTree>, StorageError> {
        Ok(self.load(key)?.map(|s| s.tree))
    }

    fn get_trace(&self, key: &BuildKey, label: &str) -> Result<Option<Vec<CallRecord>>, StorageError> {
        match self.traces_tree.get(key.trace_key(label))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn list_builds(&self, project: &str) -> Result<Vec<Build>, StorageError> {
        let mut builds = Vec::new();
        for entry in self.builds_tree.scan_prefix(BuildKey::project_prefix(project)) {
            let (_, bytes) = entry?;
            let stored: StoredBuild = bincode::deserialize(&bytes)?;
            builds.push(stored.build);
        }
        sort_builds(&mut builds);
        Ok(builds)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

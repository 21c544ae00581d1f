//! In-memory cluster for testing
//!
//! Implements both client contracts without requiring a Kubernetes cluster.
//! Objects get a resource version on insert that is bumped on every write, so
//! optimistic concurrency behaves like the API server.

use async_trait::async_trait;
use cvmanager_core::{ContainerVersion, WorkloadKind};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use super::{ContainerVersionClient, WorkloadClient, WorkloadObject};
use crate::error::{KubeError, Result};
use crate::selector::parse_selector_string;

type Store<T> = HashMap<String, BTreeMap<String, T>>;

/// In-memory cluster for testing
#[derive(Clone, Default)]
pub struct MockCluster {
    /// Storage: (namespace, kind) -> name -> object
    workloads: Arc<RwLock<HashMap<(String, WorkloadKind), BTreeMap<String, WorkloadObject>>>>,
    /// Storage: namespace -> name -> declaration
    container_versions: Arc<RwLock<Store<ContainerVersion>>>,
    /// Kinds whose list call fails
    failing_lists: Arc<RwLock<HashSet<WorkloadKind>>>,
    /// Status updates that will lose a race against a simulated concurrent writer
    pending_conflicts: Arc<RwLock<usize>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<OperationCounts>>,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone)]
pub struct OperationCounts {
    pub lists: usize,
    pub gets: usize,
    pub replaces: usize,
    pub status_updates: usize,
}

impl MockCluster {
    /// Create a new empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or overwrite a workload object
    pub fn insert_workload(&self, namespace: &str, mut object: WorkloadObject) {
        let name = object.name().to_string();
        {
            let meta = object.metadata_mut();
            meta.namespace = Some(namespace.to_string());
            meta.resource_version = Some(next_version(meta.resource_version.as_deref()));
        }

        let mut store = self.workloads.write().unwrap();
        store
            .entry((namespace.to_string(), object.kind()))
            .or_default()
            .insert(name, object);
    }

    /// Add or overwrite a ContainerVersion declaration
    pub fn insert_container_version(&self, namespace: &str, mut cv: ContainerVersion) {
        let name = cv.metadata.name.clone().unwrap_or_default();
        cv.metadata.namespace = Some(namespace.to_string());
        cv.metadata.resource_version =
            Some(next_version(cv.metadata.resource_version.as_deref()));

        let mut store = self.container_versions.write().unwrap();
        store
            .entry(namespace.to_string())
            .or_default()
            .insert(name, cv);
    }

    /// Make every subsequent list of `kind` fail with a server error
    pub fn fail_list(&self, kind: WorkloadKind) {
        self.failing_lists.write().unwrap().insert(kind);
    }

    /// Make the next `count` status updates fail with a conflict, as if another
    /// writer updated the declaration first
    pub fn inject_status_conflicts(&self, count: usize) {
        *self.pending_conflicts.write().unwrap() = count;
    }

    /// Current stored copy of a workload
    pub fn workload(&self, namespace: &str, kind: WorkloadKind, name: &str) -> Option<WorkloadObject> {
        let store = self.workloads.read().unwrap();
        store
            .get(&(namespace.to_string(), kind))
            .and_then(|objects| objects.get(name))
            .cloned()
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations.read().unwrap().clone()
    }

    /// Reset operation counts
    pub fn reset_counts(&self) {
        let mut ops = self.operations.write().unwrap();
        *ops = OperationCounts::default();
    }
}

fn next_version(current: Option<&str>) -> String {
    let current: u64 = current.and_then(|v| v.parse().ok()).unwrap_or(0);
    (current + 1).to_string()
}

fn server_error(message: String) -> KubeError {
    KubeError::Api(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

fn matches_labels(object: &WorkloadObject, wanted: &BTreeMap<String, String>) -> bool {
    let labels = object.metadata().labels.as_ref();
    wanted
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

#[async_trait]
impl WorkloadClient for MockCluster {
    async fn list(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<WorkloadObject>> {
        {
            let mut ops = self.operations.write().unwrap();
            ops.lists += 1;
        }

        if self.failing_lists.read().unwrap().contains(&kind) {
            return Err(server_error(format!("listing {} failed", kind.plural())));
        }

        let wanted = parse_selector_string(selector)?;
        let store = self.workloads.read().unwrap();
        Ok(store
            .get(&(namespace.to_string(), kind))
            .map(|objects| {
                objects
                    .values()
                    .filter(|o| matches_labels(o, &wanted))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<WorkloadObject> {
        {
            let mut ops = self.operations.write().unwrap();
            ops.gets += 1;
        }

        self.workload(namespace, kind, name)
            .ok_or_else(|| KubeError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    async fn replace(&self, namespace: &str, object: &WorkloadObject) -> Result<WorkloadObject> {
        {
            let mut ops = self.operations.write().unwrap();
            ops.replaces += 1;
        }

        let kind = object.kind();
        let name = object.name().to_string();
        let mut store = self.workloads.write().unwrap();
        let stored = store
            .get_mut(&(namespace.to_string(), kind))
            .and_then(|objects| objects.get_mut(&name))
            .ok_or_else(|| KubeError::NotFound {
                kind: kind.to_string(),
                name: name.clone(),
                namespace: namespace.to_string(),
            })?;

        let stored_version = stored.metadata().resource_version.clone();
        if let Some(expected) = &object.metadata().resource_version
            && Some(expected) != stored_version.as_ref()
        {
            return Err(KubeError::Conflict {
                kind: kind.to_string(),
                name,
            });
        }

        let mut updated = object.clone();
        updated.metadata_mut().resource_version = Some(next_version(stored_version.as_deref()));
        *stored = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl ContainerVersionClient for MockCluster {
    async fn get(&self, namespace: &str, name: &str) -> Result<ContainerVersion> {
        {
            let mut ops = self.operations.write().unwrap();
            ops.gets += 1;
        }

        let store = self.container_versions.read().unwrap();
        store
            .get(namespace)
            .and_then(|cvs| cvs.get(name))
            .cloned()
            .ok_or_else(|| KubeError::NotFound {
                kind: "ContainerVersion".to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    async fn list(&self, namespace: &str) -> Result<Vec<ContainerVersion>> {
        {
            let mut ops = self.operations.write().unwrap();
            ops.lists += 1;
        }

        let store = self.container_versions.read().unwrap();
        Ok(store
            .get(namespace)
            .map(|cvs| cvs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn update_status(
        &self,
        namespace: &str,
        cv: &ContainerVersion,
    ) -> Result<ContainerVersion> {
        {
            let mut ops = self.operations.write().unwrap();
            ops.status_updates += 1;
        }

        let name = cv.metadata.name.clone().unwrap_or_default();
        let mut store = self.container_versions.write().unwrap();
        let stored = store
            .get_mut(namespace)
            .and_then(|cvs| cvs.get_mut(&name))
            .ok_or_else(|| KubeError::NotFound {
                kind: "ContainerVersion".to_string(),
                name: name.clone(),
                namespace: namespace.to_string(),
            })?;

        {
            let mut pending = self.pending_conflicts.write().unwrap();
            if *pending > 0 {
                *pending -= 1;
                stored.metadata.resource_version =
                    Some(next_version(stored.metadata.resource_version.as_deref()));
            }
        }

        if let Some(expected) = &cv.metadata.resource_version
            && Some(expected) != stored.metadata.resource_version.as_ref()
        {
            return Err(KubeError::Conflict {
                kind: "ContainerVersion".to_string(),
                name,
            });
        }

        stored.status = cv.status.clone();
        stored.metadata.resource_version =
            Some(next_version(stored.metadata.resource_version.as_deref()));
        Ok(stored.clone())
    }
}

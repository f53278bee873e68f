//! Store interfaces the controller reads from and writes to, plus an
//! in-memory implementation of all three.
//!
//! - [`ClusterRegistry`] lists member clusters.
//! - [`WorkloadStore`] holds workload descriptors and their requirements.
//! - [`BindingStore`] holds resource bindings with optimistic concurrency.

use std::collections::BTreeMap;

use meshplace_core::{Cluster, LabelSelector, NetworkRequirement, ResourceBinding, WorkloadDescriptor};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

pub type ResourceVersion = u64;

/// A stored object and the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: ResourceVersion,
}

/// A workload as the controller sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadRecord {
    pub descriptor: WorkloadDescriptor,
    #[serde(default)]
    pub requirement: Option<NetworkRequirement>,
    /// Set once deletion has been requested.
    #[serde(default)]
    pub deleting: bool,
}

impl WorkloadRecord {
    pub fn new(descriptor: WorkloadDescriptor) -> Self {
        Self {
            descriptor,
            requirement: None,
            deleting: false,
        }
    }

    pub fn with_requirement(mut self, requirement: NetworkRequirement) -> Self {
        self.requirement = Some(requirement);
        self
    }

    pub fn key(&self) -> String {
        self.descriptor.key()
    }

    /// Whether the scheduling-relevant parts of two records are identical.
    pub fn same_spec(&self, other: &WorkloadRecord) -> bool {
        self.descriptor == other.descriptor && self.requirement == other.requirement
    }
}

pub trait ClusterRegistry: Send + Sync {
    fn list(&self, selector: &LabelSelector) -> StoreResult<Vec<Cluster>>;
    fn get(&self, id: &str) -> StoreResult<Option<Cluster>>;
}

pub trait WorkloadStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<Versioned<WorkloadRecord>>>;
}

pub trait BindingStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<Versioned<ResourceBinding>>>;

    /// Fails with `Conflict` if a binding for the workload already exists.
    fn create(&self, binding: ResourceBinding) -> StoreResult<Versioned<ResourceBinding>>;

    /// Fails with `Conflict` when `version` is not the stored version.
    fn update(
        &self,
        binding: ResourceBinding,
        version: ResourceVersion,
    ) -> StoreResult<Versioned<ResourceBinding>>;

    /// Returns whether a binding was removed.
    fn delete(&self, key: &str) -> StoreResult<bool>;
}

// ── In-memory store ───────────────────────────────────────────────

#[derive(Default)]
struct Tables {
    clusters: BTreeMap<String, Cluster>,
    workloads: BTreeMap<String, Versioned<WorkloadRecord>>,
    bindings: BTreeMap<String, Versioned<ResourceBinding>>,
    next_version: ResourceVersion,
}

impl Tables {
    fn bump(&mut self) -> ResourceVersion {
        self.next_version += 1;
        self.next_version
    }
}

/// Process-local store backing all three interfaces.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_cluster(&self, cluster: Cluster) {
        self.tables.write().clusters.insert(cluster.id.clone(), cluster);
    }

    pub fn remove_cluster(&self, id: &str) -> bool {
        self.tables.write().clusters.remove(id).is_some()
    }

    /// Insert or replace a workload, returning the stored version.
    pub fn put_workload(&self, record: WorkloadRecord) -> Versioned<WorkloadRecord> {
        let mut tables = self.tables.write();
        let version = tables.bump();
        let stored = Versioned {
            value: record,
            version,
        };
        tables.workloads.insert(stored.value.key(), stored.clone());
        stored
    }

    /// Flag a workload as being deleted. Returns the updated record.
    pub fn mark_deleting(&self, key: &str) -> Option<Versioned<WorkloadRecord>> {
        let mut tables = self.tables.write();
        let version = tables.bump();
        let stored = tables.workloads.get_mut(key)?;
        stored.value.deleting = true;
        stored.version = version;
        Some(stored.clone())
    }

    pub fn remove_workload(&self, key: &str) -> Option<WorkloadRecord> {
        self.tables.write().workloads.remove(key).map(|v| v.value)
    }

    pub fn workload_keys(&self) -> Vec<String> {
        self.tables.read().workloads.keys().cloned().collect()
    }
}

impl ClusterRegistry for MemoryStore {
    fn list(&self, selector: &LabelSelector) -> StoreResult<Vec<Cluster>> {
        Ok(self
            .tables
            .read()
            .clusters
            .values()
            .filter(|c| selector.matches(c))
            .cloned()
            .collect())
    }

    fn get(&self, id: &str) -> StoreResult<Option<Cluster>> {
        Ok(self.tables.read().clusters.get(id).cloned())
    }
}

impl WorkloadStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<Versioned<WorkloadRecord>>> {
        Ok(self.tables.read().workloads.get(key).cloned())
    }
}

impl BindingStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<Versioned<ResourceBinding>>> {
        Ok(self.tables.read().bindings.get(key).cloned())
    }

    fn create(&self, binding: ResourceBinding) -> StoreResult<Versioned<ResourceBinding>> {
        let mut tables = self.tables.write();
        if tables.bindings.contains_key(&binding.workload) {
            return Err(StoreError::Conflict {
                key: binding.workload,
                reason: "binding already exists".to_string(),
            });
        }
        let version = tables.bump();
        let stored = Versioned {
            value: binding,
            version,
        };
        tables.bindings.insert(stored.value.workload.clone(), stored.clone());
        Ok(stored)
    }

    fn update(
        &self,
        binding: ResourceBinding,
        version: ResourceVersion,
    ) -> StoreResult<Versioned<ResourceBinding>> {
        let mut tables = self.tables.write();
        let current = match tables.bindings.get(&binding.workload) {
            Some(current) => current.version,
            None => return Err(StoreError::NotFound(binding.workload)),
        };
        if current != version {
            return Err(StoreError::Conflict {
                key: binding.workload,
                reason: format!("stale version {version}, stored {current}"),
            });
        }
        let version = tables.bump();
        let stored = Versioned {
            value: binding,
            version,
        };
        tables.bindings.insert(stored.value.workload.clone(), stored.clone());
        Ok(stored)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.tables.write().bindings.remove(key).is_some())
    }
}

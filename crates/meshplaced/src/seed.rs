//! Seed files: the clusters, topology reports and workloads a daemon starts
//! from when it has no external registry to talk to.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use meshplace_controller::{MemoryStore, WorkloadRecord};
use meshplace_core::Cluster;
use meshplace_topology::{DomainTopology, TopologyGraph, TopologyUpdate};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub clusters: Vec<Cluster>,
    #[serde(default)]
    pub topology: Vec<TopologyUpdate>,
    #[serde(default)]
    pub workloads: Vec<WorkloadRecord>,
}

impl Seed {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading seed {}", path.display()))?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> anyhow::Result<Self> {
        let seed: Seed = serde_json::from_str(content)?;

        let mut clusters = HashSet::new();
        for cluster in &seed.clusters {
            if !clusters.insert(cluster.id.as_str()) {
                anyhow::bail!("duplicate cluster {}", cluster.id);
            }
        }
        let mut workloads = HashSet::new();
        for record in &seed.workloads {
            if !workloads.insert(record.key()) {
                anyhow::bail!("duplicate workload {}", record.key());
            }
        }
        Ok(seed)
    }

    pub fn workload(&self, key: &str) -> Option<&WorkloadRecord> {
        self.workloads.iter().find(|w| w.key() == key)
    }

    /// Clusters the registry would offer as candidates.
    pub fn ready_clusters(&self) -> Vec<Cluster> {
        self.clusters.iter().filter(|c| c.ready).cloned().collect()
    }

    /// Build the topology from every report, in order.
    pub fn topology(&self) -> anyhow::Result<DomainTopology> {
        let graph = TopologyGraph::from_updates(self.topology.iter().cloned())?;
        Ok(DomainTopology::from_graph(graph))
    }

    pub fn load_clusters(&self, store: &MemoryStore) {
        for cluster in &self.clusters {
            store.put_cluster(cluster.clone());
        }
    }
}

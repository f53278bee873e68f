//! Shared types used across meshplace crates.
//!
//! Workloads, network requirements, clusters and bindings. Everything here
//! is plain data: serializable, cloneable, and free of interior mutability.
//! Ordered collections (`Vec`, `BTreeMap`) are used wherever iteration order
//! can leak into a scheduling decision.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::labels;

/// Identifier of a member cluster.
pub type ClusterId = String;

/// Identifier of a network domain in the topology graph.
pub type DomainId = String;

/// Name of a workload component.
pub type ComponentName = String;

/// Identifier of a communication endpoint inside a component.
pub type EndpointId = String;

// ── Workload ──────────────────────────────────────────────────────

/// A multi-component workload submitted for placement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkloadDescriptor {
    pub namespace: String,
    pub name: String,
    /// Components in declaration order. Allocation follows this order.
    pub components: Vec<Component>,
}

impl WorkloadDescriptor {
    /// Queue / store key: `{namespace}/{name}`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// How replicas of a component are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// `replicas` instances spread over the selected clusters.
    #[default]
    Workload,
    /// One instance on every feasible cluster; `replicas` is ignored.
    Daemon,
}

/// One schedulable unit of a workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Component {
    pub name: ComponentName,
    pub replicas: u32,
    #[serde(default)]
    pub kind: ComponentKind,
    /// Demand of a single replica.
    #[serde(default)]
    pub resources: ResourceDemand,
    #[serde(default)]
    pub placement: PlacementConstraints,
}

/// Per-replica resource demand.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ResourceDemand {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
}

/// Placement constraints declared by a component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlacementConstraints {
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    /// Labels the cluster must carry with exactly these values.
    #[serde(default)]
    pub affinity: BTreeMap<String, String>,
    #[serde(default)]
    pub supplier: Option<String>,
    #[serde(default)]
    pub runtime: Option<String>,
    /// Allowed geolocations. Empty means anywhere.
    #[serde(default)]
    pub geolocations: Vec<String>,
}

// ── Taints ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

/// A taint carried by a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: String,
    pub effect: TaintEffect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TolerationOperator {
    #[default]
    Equal,
    Exists,
}

/// A toleration declared by a component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Toleration {
    /// Empty key with `Exists` tolerates every taint.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub operator: TolerationOperator,
    #[serde(default)]
    pub value: String,
    /// `None` matches all effects.
    #[serde(default)]
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    /// Kubernetes toleration matching.
    pub fn tolerates(&self, taint: &Taint) -> bool {
        if let Some(effect) = self.effect
            && effect != taint.effect
        {
            return false;
        }
        if self.key.is_empty() {
            return self.operator == TolerationOperator::Exists;
        }
        if self.key != taint.key {
            return false;
        }
        match self.operator {
            TolerationOperator::Exists => true,
            TolerationOperator::Equal => self.value == taint.value,
        }
    }
}

// ── Network requirement ───────────────────────────────────────────

/// Communication graph over a workload's components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NetworkRequirement {
    pub name: String,
    pub communications: Vec<NetworkCommunication>,
}

/// The endpoints of one component and the edges leaving them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkCommunication {
    /// Component name this group belongs to.
    pub name: ComponentName,
    pub self_ids: Vec<EndpointId>,
    #[serde(default)]
    pub edges: Vec<InterEndpointEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterEndpointEdge {
    pub source: EndpointId,
    pub destination: EndpointId,
    pub sla: SlaDemand,
}

impl InterEndpointEdge {
    /// Human-readable label used in logs and failure reports.
    pub fn label(&self) -> String {
        format!("{}->{}", self.source, self.destination)
    }
}

/// Upper bounds on accumulated delay, loss and jitter, plus the bandwidth
/// that must be reserved on every traversed link.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SlaDemand {
    pub delay: u64,
    pub loss: u64,
    pub jitter: u64,
    pub bandwidth: u64,
}

impl NetworkRequirement {
    /// Map every declared endpoint to the component that owns it.
    pub fn endpoint_owners(&self) -> BTreeMap<&str, &str> {
        let mut owners = BTreeMap::new();
        for comm in &self.communications {
            for id in &comm.self_ids {
                owners.insert(id.as_str(), comm.name.as_str());
            }
        }
        owners
    }

    /// Components that take part in at least one edge, with the largest
    /// bandwidth they send and receive over any single edge.
    pub fn component_bandwidth_demands(&self) -> BTreeMap<&str, BandwidthDemand> {
        let owners = self.endpoint_owners();
        let mut demands: BTreeMap<&str, BandwidthDemand> = BTreeMap::new();
        for comm in &self.communications {
            for edge in &comm.edges {
                let bandwidth = edge.sla.bandwidth;
                if let Some(sender) = owners.get(edge.source.as_str()) {
                    let entry = demands.entry(sender).or_default();
                    entry.outbound = entry.outbound.max(bandwidth);
                }
                if let Some(receiver) = owners.get(edge.destination.as_str()) {
                    let entry = demands.entry(receiver).or_default();
                    entry.inbound = entry.inbound.max(bandwidth);
                }
            }
        }
        demands
    }
}

/// Largest single-edge bandwidth a component sends and receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BandwidthDemand {
    pub outbound: u64,
    pub inbound: u64,
}

// ── Cluster ───────────────────────────────────────────────────────

/// CPU and memory quantities.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ResourceList {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
}

impl ResourceList {
    /// How many replicas of `demand` fit. `None` means unbounded.
    pub fn fits(&self, demand: &ResourceDemand) -> Option<u64> {
        let cpu = (demand.cpu_millis > 0).then(|| self.cpu_millis / demand.cpu_millis);
        let mem = (demand.memory_bytes > 0).then(|| self.memory_bytes / demand.memory_bytes);
        match (cpu, mem) {
            (Some(c), Some(m)) => Some(c.min(m)),
            (Some(c), None) => Some(c),
            (None, Some(m)) => Some(m),
            (None, None) => None,
        }
    }

    /// Subtract `count` replicas of `demand`, saturating at zero.
    pub fn consume(&mut self, demand: &ResourceDemand, count: u32) {
        let n = u64::from(count);
        self.cpu_millis = self.cpu_millis.saturating_sub(demand.cpu_millis.saturating_mul(n));
        self.memory_bytes = self
            .memory_bytes
            .saturating_sub(demand.memory_bytes.saturating_mul(n));
    }
}

/// Summary of node readiness inside a cluster.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NodeStatistics {
    pub ready_nodes: u32,
    pub not_ready_nodes: u32,
    pub unknown_nodes: u32,
    pub lost_nodes: u32,
}

/// A member cluster as reported by the cluster registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub id: ClusterId,
    pub network_domain: DomainId,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
    pub capacity: ResourceList,
    pub allocatable: ResourceList,
    #[serde(default)]
    pub nodes: NodeStatistics,
    #[serde(default = "default_ready")]
    pub ready: bool,
}

fn default_ready() -> bool {
    true
}

impl Cluster {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Backed by virtual (overlay) nodes rather than physical hosts.
    pub fn is_virtual(&self) -> bool {
        self.label(labels::VIRTUAL_NODE) == Some("true")
    }
}

/// Equality-based label selector. Empty selects everything.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn matches(&self, cluster: &Cluster) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| cluster.label(k) == Some(v.as_str()))
    }
}

// ── Binding ───────────────────────────────────────────────────────

/// Replicas of each component placed on one cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BindingEntry {
    pub cluster: ClusterId,
    pub replicas: BTreeMap<ComponentName, u32>,
}

/// The placement decision for a workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ResourceBinding {
    /// Workload key (`{namespace}/{name}`).
    pub workload: String,
    /// Ordered by cluster id.
    pub entries: Vec<BindingEntry>,
}

impl ResourceBinding {
    /// Total replicas of `component` across all entries.
    pub fn replicas_of(&self, component: &str) -> u32 {
        self.entries
            .iter()
            .filter_map(|e| e.replicas.get(component))
            .sum()
    }

    /// Clusters hosting at least one replica of `component`.
    pub fn clusters_of(&self, component: &str) -> BTreeSet<&str> {
        self.entries
            .iter()
            .filter(|e| e.replicas.get(component).copied().unwrap_or(0) > 0)
            .map(|e| e.cluster.as_str())
            .collect()
    }
}

// ── Validation ────────────────────────────────────────────────────

/// Reasons a workload / requirement pair cannot be scheduled at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("workload has no components")]
    NoComponents,

    #[error("duplicate component name: {0}")]
    DuplicateComponent(String),

    #[error("component {0} requests zero replicas")]
    ZeroReplicas(String),

    #[error("communication {0} does not name a component of the workload")]
    UnknownComponent(String),

    #[error("endpoint {0} is declared more than once")]
    DuplicateEndpoint(String),

    #[error("communication {0} declares edges but no endpoints")]
    NoEndpoints(String),

    #[error("edge {edge} references undeclared endpoint {endpoint}")]
    UndeclaredEndpoint { edge: String, endpoint: String },
}

/// Structural checks run before any plugin sees the request.
pub fn validate_request(
    workload: &WorkloadDescriptor,
    requirement: Option<&NetworkRequirement>,
) -> Result<(), ValidationError> {
    if workload.components.is_empty() {
        return Err(ValidationError::NoComponents);
    }

    let mut names = HashSet::new();
    for component in &workload.components {
        if !names.insert(component.name.as_str()) {
            return Err(ValidationError::DuplicateComponent(component.name.clone()));
        }
        if component.kind == ComponentKind::Workload && component.replicas == 0 {
            return Err(ValidationError::ZeroReplicas(component.name.clone()));
        }
    }

    let Some(requirement) = requirement else {
        return Ok(());
    };

    let mut endpoints = HashSet::new();
    for comm in &requirement.communications {
        if !names.contains(comm.name.as_str()) {
            return Err(ValidationError::UnknownComponent(comm.name.clone()));
        }
        if comm.self_ids.is_empty() && !comm.edges.is_empty() {
            return Err(ValidationError::NoEndpoints(comm.name.clone()));
        }
        for id in &comm.self_ids {
            if !endpoints.insert(id.as_str()) {
                return Err(ValidationError::DuplicateEndpoint(id.clone()));
            }
        }
    }

    for comm in &requirement.communications {
        for edge in &comm.edges {
            for endpoint in [&edge.source, &edge.destination] {
                if !endpoints.contains(endpoint.as_str()) {
                    return Err(ValidationError::UndeclaredEndpoint {
                        edge: edge.label(),
                        endpoint: endpoint.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}

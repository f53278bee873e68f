//! Shared, lock-protected topology state.

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{AdmissionError, FlowFailure, TopologyResult};
use crate::flow::FlowDemand;
use crate::graph::{RefreshSummary, TopologyGraph};
use crate::reservation::{AdmittedFlow, Reservation, ReservationGuard};
use crate::wire::TopologyUpdate;

/// Process-wide topology. Reads work on snapshots; admission, release and
/// refresh each run as one write-locked critical section.
#[derive(Debug, Default)]
pub struct DomainTopology {
    graph: RwLock<TopologyGraph>,
}

impl DomainTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_graph(graph: TopologyGraph) -> Self {
        Self {
            graph: RwLock::new(graph),
        }
    }

    /// A point-in-time copy of the graph.
    pub fn snapshot(&self) -> TopologyGraph {
        self.graph.read().clone()
    }

    /// Run `f` against the graph under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&TopologyGraph) -> R) -> R {
        f(&self.graph.read())
    }

    pub fn apply_update(&self, update: TopologyUpdate) -> TopologyResult<RefreshSummary> {
        self.graph.write().apply_update(update)
    }

    /// Decode a wire message and apply it.
    pub fn apply_bytes(&self, data: &[u8]) -> TopologyResult<RefreshSummary> {
        let update = TopologyUpdate::from_bytes(data)?;
        self.apply_update(update)
    }

    /// A copy of the graph with `held` released, as seen by a run that is
    /// allowed to reuse that bandwidth.
    pub fn snapshot_without(&self, held: &Reservation) -> TopologyGraph {
        let mut graph = self.snapshot();
        for entry in held.flows() {
            graph.release(&entry.path.hops, entry.flow.sla.bandwidth);
        }
        graph
    }

    /// Find and reserve a path for every flow, in order. Either all flows
    /// are admitted or none keeps any bandwidth, and the error lists every
    /// flow that failed.
    pub fn admit(&self, flows: &[FlowDemand]) -> Result<ReservationGuard<'_>, AdmissionError> {
        let mut graph = self.graph.write();
        let admitted = admit_all(&mut graph, flows)?;
        drop(graph);

        if !admitted.is_empty() {
            info!(flows = admitted.len(), "bandwidth reserved");
        }
        Ok(ReservationGuard::new(self, Reservation { flows: admitted }))
    }

    /// Admit `flows` in place of `previous`, whose bandwidth is available to
    /// them. Runs in one critical section: on success `previous` is released
    /// and the new reservation is committed; on failure `previous` is held
    /// exactly as before.
    pub fn admit_replacing(
        &self,
        previous: &Reservation,
        flows: &[FlowDemand],
    ) -> Result<Reservation, AdmissionError> {
        let mut graph = self.graph.write();
        for entry in previous.flows() {
            graph.release(&entry.path.hops, entry.flow.sla.bandwidth);
        }

        match admit_all(&mut graph, flows) {
            Ok(admitted) => {
                info!(
                    flows = admitted.len(),
                    replaced = previous.flows().len(),
                    "bandwidth reserved in place of previous reservation"
                );
                Ok(Reservation { flows: admitted })
            }
            Err(err) => {
                for entry in previous.flows() {
                    graph.reserve(&entry.path.hops, entry.flow.sla.bandwidth);
                }
                Err(err)
            }
        }
    }

    /// Return a committed reservation's bandwidth.
    pub fn release(&self, reservation: &Reservation) {
        if reservation.is_empty() {
            return;
        }
        let mut graph = self.graph.write();
        for entry in reservation.flows() {
            graph.release(&entry.path.hops, entry.flow.sla.bandwidth);
        }
    }
}

/// Reserve a path for each flow on `graph`. On any failure every
/// reservation made here is undone before returning.
fn admit_all(graph: &mut TopologyGraph, flows: &[FlowDemand]) -> Result<Vec<AdmittedFlow>, AdmissionError> {
    let mut admitted: Vec<AdmittedFlow> = Vec::with_capacity(flows.len());
    let mut failures = Vec::new();

    for flow in flows {
        match graph.shortest_path(flow) {
            Ok(path) => {
                graph.reserve(&path.hops, flow.sla.bandwidth);
                debug!(
                    flow = %flow,
                    path = ?path.domains,
                    delay = path.delay,
                    "flow admitted"
                );
                admitted.push(AdmittedFlow {
                    flow: flow.clone(),
                    path,
                });
            }
            Err(reason) => {
                debug!(flow = %flow, %reason, "flow rejected");
                failures.push(FlowFailure {
                    flow: flow.clone(),
                    reason,
                });
            }
        }
    }

    if !failures.is_empty() {
        for entry in &admitted {
            graph.release(&entry.path.hops, entry.flow.sla.bandwidth);
        }
        return Err(AdmissionError { failures });
    }
    Ok(admitted)
}

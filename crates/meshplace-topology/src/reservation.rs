//! Bandwidth reservations held on behalf of a binding.

use serde::Serialize;
use tracing::debug;

use crate::flow::FlowDemand;
use crate::graph::Path;
use crate::link::LinkKey;
use crate::topology::DomainTopology;

/// A flow that was admitted along `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmittedFlow {
    pub flow: FlowDemand,
    pub path: Path,
}

/// Bandwidth admitted for one binding. Released through
/// [`DomainTopology::release`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reservation {
    pub(crate) flows: Vec<AdmittedFlow>,
}

impl Reservation {
    pub fn flows(&self) -> &[AdmittedFlow] {
        &self.flows
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Bandwidth this reservation holds on `link`.
    pub fn bandwidth_on(&self, link: &LinkKey) -> u64 {
        self.flows
            .iter()
            .filter(|f| f.path.hops.contains(link))
            .map(|f| f.flow.sla.bandwidth)
            .sum()
    }
}

/// An admission in progress. Dropping the guard without calling
/// [`commit`](ReservationGuard::commit) rolls every reservation back.
#[derive(Debug)]
pub struct ReservationGuard<'a> {
    topology: &'a DomainTopology,
    reservation: Option<Reservation>,
}

impl<'a> ReservationGuard<'a> {
    pub(crate) fn new(topology: &'a DomainTopology, reservation: Reservation) -> Self {
        Self {
            topology,
            reservation: Some(reservation),
        }
    }

    pub fn flows(&self) -> &[AdmittedFlow] {
        self.reservation
            .as_ref()
            .map(Reservation::flows)
            .unwrap_or(&[])
    }

    /// Keep the bandwidth reserved and hand ownership to the caller.
    pub fn commit(mut self) -> Reservation {
        self.reservation.take().unwrap_or_default()
    }

    /// Release everything now.
    pub fn rollback(self) {}
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if let Some(reservation) = self.reservation.take()
            && !reservation.is_empty()
        {
            debug!(flows = reservation.flows.len(), "rolling back uncommitted reservation");
            self.topology.release(&reservation);
        }
    }
}

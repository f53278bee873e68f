//! meshplace-topology: network domains, virtual links and SLA admission.
//!
//! Components:
//! - **graph**: directed domain graph, refresh merge, Dijkstra path search
//! - **topology**: `DomainTopology`, the lock-protected shared graph
//! - **reservation**: admitted flows and the rollback guard
//! - **flow**: flow demands derived from a placement
//! - **wire**: bincode topology-update messages

pub mod error;
pub mod flow;
pub mod graph;
pub mod link;
pub mod reservation;
pub mod topology;
pub mod wire;

pub use error::{AdmissionError, FlowFailure, PathFailure, TopologyError, TopologyResult, WireError};
pub use flow::{FlowDemand, flow_demands};
pub use graph::{Domain, Path, RefreshSummary, TopologyGraph};
pub use link::{LinkKey, LinkSla, VirtualLink};
pub use reservation::{AdmittedFlow, Reservation, ReservationGuard};
pub use topology::DomainTopology;
pub use wire::{TopologyUpdate, VirtualLinkUpdate};

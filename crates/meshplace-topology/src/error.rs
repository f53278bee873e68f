//! Topology error types.

use thiserror::Error;

use crate::flow::FlowDemand;

/// Errors raised while maintaining the topology graph.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("invalid topology update: {0}")]
    InvalidUpdate(String),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

pub type TopologyResult<T> = Result<T, TopologyError>;

/// Errors decoding or encoding topology-update messages.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("failed to encode topology update: {0}")]
    Encode(String),

    #[error("failed to decode topology update: {0}")]
    Decode(String),
}

/// Why no admissible path exists for a flow.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathFailure {
    #[error("source domain {0} is not in the topology")]
    UnknownSource(String),

    #[error("destination unreachable")]
    Unreachable,

    #[error("no path with {requested} available bandwidth")]
    InsufficientBandwidth { requested: u64 },

    #[error("every path exceeds the delay, loss or jitter bound")]
    SlaExceeded,
}

/// A flow that could not be admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowFailure {
    pub flow: FlowDemand,
    pub reason: PathFailure,
}

impl std::fmt::Display for FlowFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.flow, self.reason)
    }
}

/// An admission that failed. Nothing it reserved is left behind.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{} flow(s) not admissible: {}", .failures.len(), describe(.failures))]
pub struct AdmissionError {
    pub failures: Vec<FlowFailure>,
}

fn describe(failures: &[FlowFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

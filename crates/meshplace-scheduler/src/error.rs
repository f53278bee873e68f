//! Scheduler error types.

use meshplace_core::ResourceBinding;
use meshplace_placement::{PipelineError, Rejection, UnmetComponent};
use meshplace_topology::FlowFailure;
use thiserror::Error;

/// Errors that end a scheduling run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("invalid request: {0}")]
    RequestInvalid(String),

    #[error("no feasible cluster for component {component} ({} candidate(s) rejected)", .reasons.len())]
    NoFeasibleCluster {
        component: String,
        reasons: Vec<Rejection>,
    },

    #[error("insufficient capacity: {}", join(.unmet))]
    InsufficientCapacity {
        binding: ResourceBinding,
        unmet: Vec<UnmetComponent>,
    },

    #[error("SLA infeasible after {attempts} attempt(s): {}", join(.failures))]
    SlaInfeasible {
        attempts: u32,
        failures: Vec<FlowFailure>,
    },

    #[error("persistence conflict: {0}")]
    PersistenceConflict(String),

    #[error("transient infrastructure error: {0}")]
    TransientInfra(String),

    #[error("scheduling cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl SchedulerError {
    /// Whether the request should be requeued with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::NoFeasibleCluster { .. }
                | SchedulerError::InsufficientCapacity { .. }
                | SchedulerError::SlaInfeasible { .. }
                | SchedulerError::PersistenceConflict(_)
                | SchedulerError::TransientInfra(_)
        )
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulerError::RequestInvalid(_) => "request_invalid",
            SchedulerError::NoFeasibleCluster { .. } => "no_feasible_cluster",
            SchedulerError::InsufficientCapacity { .. } => "insufficient_capacity",
            SchedulerError::SlaInfeasible { .. } => "sla_infeasible",
            SchedulerError::PersistenceConflict(_) => "persistence_conflict",
            SchedulerError::TransientInfra(_) => "transient_infra",
            SchedulerError::Cancelled => "cancelled",
            SchedulerError::Internal(_) => "internal",
        }
    }
}

impl From<PipelineError> for SchedulerError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::RequestInvalid(reason) => SchedulerError::RequestInvalid(reason),
            PipelineError::NoFeasibleCluster { component, reasons } => {
                SchedulerError::NoFeasibleCluster { component, reasons }
            }
            PipelineError::Cancelled => SchedulerError::Cancelled,
        }
    }
}

//! Placement error types.

use meshplace_core::{ClusterId, ComponentName};
use serde::Serialize;
use thiserror::Error;

/// Raised by a plugin while evaluating a request or a candidate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PluginError {
    /// The whole request is unschedulable.
    #[error("request rejected: {0}")]
    RequestFatal(String),

    /// Evaluation failed for one candidate only.
    #[error("{0}")]
    Candidate(String),
}

/// Why a candidate cluster was dropped for a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub cluster: ClusterId,
    pub plugin: &'static str,
    pub reason: String,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.cluster, self.plugin, self.reason)
    }
}

/// Pipeline run failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    RequestInvalid(String),

    #[error("no feasible cluster for component {component}: {}", summarize(.reasons))]
    NoFeasibleCluster {
        component: ComponentName,
        reasons: Vec<Rejection>,
    },

    #[error("run cancelled")]
    Cancelled,
}

pub type PipelineResult<T> = Result<T, PipelineError>;

fn summarize(reasons: &[Rejection]) -> String {
    if reasons.is_empty() {
        return "no candidates".to_string();
    }
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Pipeline construction failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("plugin {plugin} cannot run at the {point} extension point")]
    MissingCapability { plugin: String, point: &'static str },
}

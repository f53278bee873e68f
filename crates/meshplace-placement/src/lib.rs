//! meshplace placement: plugin pipeline, filters, scorers and binding.
//!
//! This crate decides which clusters may host each component of a workload
//! and how many replicas go where. It does not touch link bandwidth; the
//! scheduler checks the resulting binding against the topology.
//!
//! # Components
//!
//! - **`framework`**: plugin capability traits, `CycleState`
//! - **`filters`** / **`scorers`**: built-in plugins
//! - **`registry`**: plugin names to constructors
//! - **`pipeline`**: the ordered PreFilter → Score run
//! - **`binder`**: replica allocation with largest-remainder splits

pub mod binder;
pub mod error;
pub mod filters;
pub mod framework;
pub mod pipeline;
pub mod registry;
pub mod scorers;

pub use binder::{BindingPlan, UnmetComponent, generate_binding, largest_remainder};
pub use error::{ConfigError, PipelineError, PipelineResult, PluginError, Rejection};
pub use framework::{
    CycleState, FilterPlugin, Plugin, PostFilterPlugin, PreFilterPlugin, PreScorePlugin,
    SchedulingContext, ScorePlugin, Verdict,
};
pub use pipeline::{ComponentPlan, Pipeline, RankedCandidate};
pub use registry::{PluginFactory, PluginRegistry};
pub use scorers::cpu_headroom;

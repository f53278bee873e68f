//! Plugin capability traits and per-run state.
//!
//! A plugin is one value implementing [`Plugin`] plus any subset of the five
//! capability traits. The `as_*` accessors expose which capabilities a
//! plugin has, so the pipeline can hold a single `Arc<dyn Plugin>` per
//! configured name.

use std::any::Any;
use std::collections::HashMap;

use meshplace_core::{Cluster, ClusterId, Component, NetworkRequirement, WorkloadDescriptor};
use meshplace_topology::TopologyGraph;

use crate::error::{PluginError, Rejection};

/// Read-only inputs shared by every plugin in a run.
#[derive(Debug, Clone, Copy)]
pub struct SchedulingContext<'a> {
    pub workload: &'a WorkloadDescriptor,
    pub requirement: Option<&'a NetworkRequirement>,
    pub topology: &'a TopologyGraph,
}

/// Outcome of a filter for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(String),
}

impl Verdict {
    pub fn reject(reason: impl Into<String>) -> Self {
        Verdict::Reject(reason.into())
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

/// Run-scoped scratch space for plugins. Created per run and dropped with it.
#[derive(Default)]
pub struct CycleState {
    entries: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl CycleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write<T: Any + Send + Sync>(&mut self, key: &'static str, value: T) {
        self.entries.insert(key, Box::new(value));
    }

    pub fn read<T: Any + Send + Sync>(&self, key: &'static str) -> Option<&T> {
        self.entries.get(key)?.downcast_ref()
    }

    /// Modify the value under `key` in place, starting from `T::default()`
    /// when absent or of another type.
    pub fn update<T, F>(&mut self, key: &'static str, f: F)
    where
        T: Any + Send + Sync + Default,
        F: FnOnce(&mut T),
    {
        let mut value = self
            .entries
            .remove(key)
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
            .unwrap_or_default();
        f(&mut value);
        self.entries.insert(key, Box::new(value));
    }
}

impl std::fmt::Debug for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort();
        f.debug_struct("CycleState").field("keys", &keys).finish()
    }
}

/// Identity of a plugin and its capabilities.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn as_pre_filter(&self) -> Option<&dyn PreFilterPlugin> {
        None
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        None
    }

    fn as_post_filter(&self) -> Option<&dyn PostFilterPlugin> {
        None
    }

    fn as_pre_score(&self) -> Option<&dyn PreScorePlugin> {
        None
    }

    fn as_score(&self) -> Option<&dyn ScorePlugin> {
        None
    }
}

/// Whole-request check before any candidate is examined. An error rejects
/// the request.
pub trait PreFilterPlugin: Send + Sync {
    fn pre_filter(&self, ctx: &SchedulingContext<'_>, state: &mut CycleState) -> Result<(), PluginError>;
}

/// Predicate over one (component, candidate) pair.
pub trait FilterPlugin: Send + Sync {
    fn filter(
        &self,
        ctx: &SchedulingContext<'_>,
        state: &CycleState,
        component: &Component,
        cluster: &Cluster,
    ) -> Result<Verdict, PluginError>;
}

/// Runs when a component has no candidates left. Returns the clusters to
/// re-admit, chosen among `rejected`.
pub trait PostFilterPlugin: Send + Sync {
    fn post_filter(
        &self,
        ctx: &SchedulingContext<'_>,
        state: &CycleState,
        component: &Component,
        rejected: &[Rejection],
    ) -> Result<Vec<ClusterId>, PluginError>;
}

/// Precomputes data for scoring over the surviving candidates.
pub trait PreScorePlugin: Send + Sync {
    fn pre_score(
        &self,
        ctx: &SchedulingContext<'_>,
        state: &mut CycleState,
        component: &Component,
        feasible: &[&Cluster],
    ) -> Result<(), PluginError>;
}

/// Scores one surviving candidate. Values above 100 are clamped.
pub trait ScorePlugin: Send + Sync {
    fn score(
        &self,
        ctx: &SchedulingContext<'_>,
        state: &CycleState,
        component: &Component,
        cluster: &Cluster,
    ) -> Result<u64, PluginError>;
}

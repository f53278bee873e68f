//! The ordered plugin pipeline.
//!
//! Stages run strictly in order over the whole request: validation,
//! PreFilter, Filter, PostFilter, PreScore, Score. Cancellation is checked
//! between stages.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use meshplace_core::{
    Cluster, ClusterId, Component, ComponentKind, ComponentName, DomainId, PluginsConfig,
    validate_request,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, PipelineError, PipelineResult, PluginError, Rejection};
use crate::framework::{CycleState, Plugin, SchedulingContext, Verdict};
use crate::registry::PluginRegistry;
use crate::scorers::MAX_SCORE;

/// A feasible cluster with its weighted score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedCandidate {
    pub cluster: ClusterId,
    pub domain: DomainId,
    /// Σ weight × plugin score.
    pub score: u64,
    /// Weighted contribution of each score plugin.
    pub breakdown: BTreeMap<&'static str, u64>,
}

/// Pipeline result for one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentPlan {
    pub component: ComponentName,
    pub kind: ComponentKind,
    /// Descending score, ties by cluster id ascending.
    pub ranked: Vec<RankedCandidate>,
    pub rejected: Vec<Rejection>,
}

impl ComponentPlan {
    pub fn best(&self) -> Option<&RankedCandidate> {
        self.ranked.first()
    }
}

#[derive(Clone)]
struct WeightedScore {
    plugin: Arc<dyn Plugin>,
    weight: u64,
}

/// Enabled plugins per extension point, in configured order.
#[derive(Clone)]
pub struct Pipeline {
    pre_filters: Vec<Arc<dyn Plugin>>,
    filters: Vec<Arc<dyn Plugin>>,
    post_filters: Vec<Arc<dyn Plugin>>,
    pre_scores: Vec<Arc<dyn Plugin>>,
    scores: Vec<WeightedScore>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |plugins: &[Arc<dyn Plugin>]| plugins.iter().map(|p| p.name()).collect::<Vec<_>>();
        f.debug_struct("Pipeline")
            .field("pre_filter", &names(&self.pre_filters))
            .field("filter", &names(&self.filters))
            .field("post_filter", &names(&self.post_filters))
            .field("pre_score", &names(&self.pre_scores))
            .field(
                "score",
                &self
                    .scores
                    .iter()
                    .map(|s| (s.plugin.name(), s.weight))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Pipeline {
    /// Build the pipeline from configured names. A name may appear at
    /// several extension points; it resolves to one shared instance.
    pub fn from_config(config: &PluginsConfig, registry: &PluginRegistry) -> Result<Self, ConfigError> {
        let mut instances: BTreeMap<String, Arc<dyn Plugin>> = BTreeMap::new();
        let mut resolve = |name: &str,
                           point: &'static str,
                           has: fn(&dyn Plugin) -> bool|
         -> Result<Arc<dyn Plugin>, ConfigError> {
            let plugin = match instances.get(name) {
                Some(existing) => Arc::clone(existing),
                None => {
                    let created = registry.create(name)?;
                    instances.insert(name.to_string(), Arc::clone(&created));
                    created
                }
            };
            if !has(plugin.as_ref()) {
                return Err(ConfigError::MissingCapability {
                    plugin: name.to_string(),
                    point,
                });
            }
            Ok(plugin)
        };

        let pre_filters = config
            .pre_filter
            .iter()
            .map(|n| resolve(n, "PreFilter", |p| p.as_pre_filter().is_some()))
            .collect::<Result<Vec<_>, _>>()?;
        let filters = config
            .filter
            .iter()
            .map(|n| resolve(n, "Filter", |p| p.as_filter().is_some()))
            .collect::<Result<Vec<_>, _>>()?;
        let post_filters = config
            .post_filter
            .iter()
            .map(|n| resolve(n, "PostFilter", |p| p.as_post_filter().is_some()))
            .collect::<Result<Vec<_>, _>>()?;
        let pre_scores = config
            .pre_score
            .iter()
            .map(|n| resolve(n, "PreScore", |p| p.as_pre_score().is_some()))
            .collect::<Result<Vec<_>, _>>()?;
        let scores = config
            .score
            .iter()
            .map(|s| {
                resolve(&s.name, "Score", |p| p.as_score().is_some()).map(|plugin| WeightedScore {
                    plugin,
                    weight: u64::from(s.weight),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            pre_filters,
            filters,
            post_filters,
            pre_scores,
            scores,
        })
    }

    /// Defaults from [`PluginsConfig::default`].
    pub fn with_defaults() -> Result<Self, ConfigError> {
        Self::from_config(&PluginsConfig::default(), &PluginRegistry::with_defaults())
    }

    /// Evaluate every component of the request against `candidates`.
    pub fn run(
        &self,
        ctx: &SchedulingContext<'_>,
        candidates: &[Cluster],
        cancel: &CancellationToken,
    ) -> PipelineResult<Vec<ComponentPlan>> {
        let workload_key = ctx.workload.key();
        validate_request(ctx.workload, ctx.requirement)
            .map_err(|e| PipelineError::RequestInvalid(e.to_string()))?;

        let mut state = CycleState::new();

        // ── PreFilter ─────────────────────────────────────────────
        for plugin in &self.pre_filters {
            if let Some(pre) = plugin.as_pre_filter() {
                pre.pre_filter(ctx, &mut state).map_err(|e| {
                    PipelineError::RequestInvalid(format!("{}: {e}", plugin.name()))
                })?;
            }
        }
        checkpoint(cancel)?;

        // ── Filter ────────────────────────────────────────────────
        let mut stages: Vec<(&Component, Vec<&Cluster>, Vec<Rejection>)> = Vec::new();
        for component in &ctx.workload.components {
            let mut feasible = Vec::new();
            let mut rejected = Vec::new();
            for cluster in candidates {
                match self.filter_one(ctx, &state, component, cluster)? {
                    None => feasible.push(cluster),
                    Some(rejection) => {
                        debug!(
                            workload = %workload_key,
                            component = %component.name,
                            cluster = %rejection.cluster,
                            plugin = rejection.plugin,
                            reason = %rejection.reason,
                            "candidate filtered"
                        );
                        rejected.push(rejection);
                    }
                }
            }
            stages.push((component, feasible, rejected));
        }
        checkpoint(cancel)?;

        // ── PostFilter ────────────────────────────────────────────
        for (component, feasible, rejected) in &mut stages {
            if !feasible.is_empty() {
                continue;
            }
            let readmit = self.post_filter(ctx, &state, component, rejected)?;
            feasible.extend(candidates.iter().filter(|c| readmit.contains(&c.id)));
            if feasible.is_empty() {
                return Err(PipelineError::NoFeasibleCluster {
                    component: component.name.clone(),
                    reasons: rejected.clone(),
                });
            }
            info!(
                workload = %workload_key,
                component = %component.name,
                readmitted = feasible.len(),
                "post-filter re-admitted candidates"
            );
        }
        checkpoint(cancel)?;

        // ── PreScore ──────────────────────────────────────────────
        for (component, feasible, _) in &stages {
            for plugin in &self.pre_scores {
                let Some(pre) = plugin.as_pre_score() else {
                    continue;
                };
                match pre.pre_score(ctx, &mut state, component, feasible) {
                    Ok(()) => {}
                    Err(PluginError::RequestFatal(reason)) => {
                        return Err(PipelineError::RequestInvalid(format!(
                            "{}: {reason}",
                            plugin.name()
                        )));
                    }
                    Err(PluginError::Candidate(reason)) => {
                        warn!(plugin = plugin.name(), %reason, "pre-score failed");
                    }
                }
            }
        }
        checkpoint(cancel)?;

        // ── Score ─────────────────────────────────────────────────
        let mut plans = Vec::with_capacity(stages.len());
        for (component, feasible, mut rejected) in stages {
            let mut ranked = Vec::with_capacity(feasible.len());
            for cluster in feasible {
                match self.score_one(ctx, &state, component, cluster)? {
                    Ok(candidate) => ranked.push(candidate),
                    Err(rejection) => rejected.push(rejection),
                }
            }
            if ranked.is_empty() {
                return Err(PipelineError::NoFeasibleCluster {
                    component: component.name.clone(),
                    reasons: rejected,
                });
            }
            ranked.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.cluster.cmp(&b.cluster)));
            debug!(
                workload = %workload_key,
                component = %component.name,
                feasible = ranked.len(),
                best = %ranked[0].cluster,
                score = ranked[0].score,
                "component ranked"
            );
            plans.push(ComponentPlan {
                component: component.name.clone(),
                kind: component.kind,
                ranked,
                rejected,
            });
        }
        checkpoint(cancel)?;

        Ok(plans)
    }

    /// First rejecting filter wins.
    fn filter_one(
        &self,
        ctx: &SchedulingContext<'_>,
        state: &CycleState,
        component: &Component,
        cluster: &Cluster,
    ) -> PipelineResult<Option<Rejection>> {
        for plugin in &self.filters {
            let Some(filter) = plugin.as_filter() else {
                continue;
            };
            let reason = match filter.filter(ctx, state, component, cluster) {
                Ok(Verdict::Accept) => continue,
                Ok(Verdict::Reject(reason)) => reason,
                Err(PluginError::Candidate(err)) => format!("plugin error: {err}"),
                Err(PluginError::RequestFatal(reason)) => {
                    return Err(PipelineError::RequestInvalid(format!(
                        "{}: {reason}",
                        plugin.name()
                    )));
                }
            };
            return Ok(Some(Rejection {
                cluster: cluster.id.clone(),
                plugin: plugin.name(),
                reason,
            }));
        }
        Ok(None)
    }

    fn post_filter(
        &self,
        ctx: &SchedulingContext<'_>,
        state: &CycleState,
        component: &Component,
        rejected: &[Rejection],
    ) -> PipelineResult<BTreeSet<ClusterId>> {
        let eligible: BTreeSet<&str> = rejected.iter().map(|r| r.cluster.as_str()).collect();
        let mut readmit = BTreeSet::new();
        for plugin in &self.post_filters {
            let Some(post) = plugin.as_post_filter() else {
                continue;
            };
            match post.post_filter(ctx, state, component, rejected) {
                Ok(ids) => readmit.extend(ids.into_iter().filter(|id| eligible.contains(id.as_str()))),
                Err(PluginError::RequestFatal(reason)) => {
                    return Err(PipelineError::RequestInvalid(format!(
                        "{}: {reason}",
                        plugin.name()
                    )));
                }
                Err(PluginError::Candidate(reason)) => {
                    warn!(plugin = plugin.name(), %reason, "post-filter failed");
                }
            }
        }
        Ok(readmit)
    }

    /// Weighted score of one candidate, or the rejection if a plugin failed
    /// on it.
    fn score_one(
        &self,
        ctx: &SchedulingContext<'_>,
        state: &CycleState,
        component: &Component,
        cluster: &Cluster,
    ) -> PipelineResult<Result<RankedCandidate, Rejection>> {
        let mut breakdown = BTreeMap::new();
        let mut total = 0u64;
        for weighted in &self.scores {
            let Some(scorer) = weighted.plugin.as_score() else {
                continue;
            };
            let raw = match scorer.score(ctx, state, component, cluster) {
                Ok(raw) => raw.min(MAX_SCORE),
                Err(PluginError::Candidate(reason)) => {
                    return Ok(Err(Rejection {
                        cluster: cluster.id.clone(),
                        plugin: weighted.plugin.name(),
                        reason: format!("plugin error: {reason}"),
                    }));
                }
                Err(PluginError::RequestFatal(reason)) => {
                    return Err(PipelineError::RequestInvalid(format!(
                        "{}: {reason}",
                        weighted.plugin.name()
                    )));
                }
            };
            let contribution = raw.saturating_mul(weighted.weight);
            *breakdown.entry(weighted.plugin.name()).or_insert(0) += contribution;
            total = total.saturating_add(contribution);
        }
        Ok(Ok(RankedCandidate {
            cluster: cluster.id.clone(),
            domain: cluster.network_domain.clone(),
            score: total,
            breakdown,
        }))
    }
}

fn checkpoint(cancel: &CancellationToken) -> PipelineResult<()> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}

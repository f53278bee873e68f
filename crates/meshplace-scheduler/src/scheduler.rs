//! Scheduler: one placement run from request to reserved binding.
//!
//! A run snapshots the topology, ranks candidates through the pipeline,
//! generates a binding and admits the flows that binding implies. When
//! admission fails, the offending cluster is excluded for the affected
//! component and the binding is regenerated, up to a fixed number of
//! attempts. Every failed attempt is rolled back before the next one.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use meshplace_core::{
    Cluster, ClusterId, ComponentName, DomainId, MeshplaceConfig, NetworkRequirement,
    ResourceBinding, WorkloadDescriptor,
};
use meshplace_placement::{
    ComponentPlan, ConfigError, Pipeline, PluginRegistry, SchedulingContext, generate_binding,
};
use meshplace_topology::{DomainTopology, FlowFailure, Reservation, flow_demands};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{SchedulerError, SchedulerResult};

/// A committed placement: the binding and the bandwidth held for it.
#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    pub binding: ResourceBinding,
    /// Bandwidth reserved for the binding's flows. The caller owns it and
    /// must release it through [`DomainTopology::release`] when the binding
    /// is abandoned or replaced.
    pub reservation: Reservation,
    pub plans: Vec<ComponentPlan>,
    /// Binding attempts used, 1-based.
    pub attempts: u32,
    /// The previous reservation passed to
    /// [`Scheduler::schedule_replacing`] was released during admission.
    pub replaced: bool,
}

pub struct Scheduler {
    pipeline: Pipeline,
    topology: Arc<DomainTopology>,
    max_binding_attempts: u32,
}

impl Scheduler {
    pub fn new(pipeline: Pipeline, topology: Arc<DomainTopology>) -> Self {
        Self {
            pipeline,
            topology,
            max_binding_attempts: 3,
        }
    }

    /// Build from configuration using the built-in plugins.
    pub fn from_config(config: &MeshplaceConfig, topology: Arc<DomainTopology>) -> Result<Self, ConfigError> {
        let pipeline = Pipeline::from_config(&config.plugins, &PluginRegistry::with_defaults())?;
        Ok(Self::new(pipeline, topology)
            .with_max_binding_attempts(config.scheduler.max_binding_attempts))
    }

    pub fn with_max_binding_attempts(mut self, attempts: u32) -> Self {
        self.max_binding_attempts = attempts.max(1);
        self
    }

    pub fn topology(&self) -> &Arc<DomainTopology> {
        &self.topology
    }

    /// Place `workload` on `candidates` and reserve bandwidth for its
    /// communication requirement.
    ///
    /// Runs synchronously and performs no I/O. `cancel` is checked between
    /// stages; a cancelled run leaves nothing reserved.
    pub fn schedule(
        &self,
        workload: &WorkloadDescriptor,
        requirement: Option<&NetworkRequirement>,
        candidates: &[Cluster],
        cancel: &CancellationToken,
    ) -> SchedulerResult<ScheduleOutcome> {
        self.run(workload, requirement, candidates, None, cancel)
    }

    /// Reschedule a workload that already holds `previous`. Filters and
    /// admission see that bandwidth as free, so a binding can be replaced
    /// by one that needs more than half a link. When admission succeeds
    /// `previous` is released in the same step and `replaced` is set; on
    /// any error it is still held.
    pub fn schedule_replacing(
        &self,
        workload: &WorkloadDescriptor,
        requirement: Option<&NetworkRequirement>,
        candidates: &[Cluster],
        previous: &Reservation,
        cancel: &CancellationToken,
    ) -> SchedulerResult<ScheduleOutcome> {
        self.run(workload, requirement, candidates, Some(previous), cancel)
    }

    fn run(
        &self,
        workload: &WorkloadDescriptor,
        requirement: Option<&NetworkRequirement>,
        candidates: &[Cluster],
        previous: Option<&Reservation>,
        cancel: &CancellationToken,
    ) -> SchedulerResult<ScheduleOutcome> {
        let key = workload.key();
        let snapshot = match previous {
            Some(held) => self.topology.snapshot_without(held),
            None => self.topology.snapshot(),
        };
        let ctx = SchedulingContext {
            workload,
            requirement,
            topology: &snapshot,
        };

        let plans = self.pipeline.run(&ctx, candidates, cancel)?;
        let domain_of: BTreeMap<&str, &str> = candidates
            .iter()
            .map(|c| (c.id.as_str(), c.network_domain.as_str()))
            .collect();

        let mut excluded: BTreeMap<ComponentName, BTreeSet<ClusterId>> = BTreeMap::new();
        let mut failures: Vec<FlowFailure> = Vec::new();
        let mut attempts = 0;

        while attempts < self.max_binding_attempts {
            attempts += 1;
            checkpoint(cancel)?;

            let narrowed = narrow(&plans, &excluded);
            let generated = generate_binding(workload, &narrowed, candidates);
            if !generated.is_complete() {
                if attempts == 1 {
                    return Err(SchedulerError::InsufficientCapacity {
                        binding: generated.binding,
                        unmet: generated.unmet,
                    });
                }
                debug!(workload = %key, attempts, "fallback binding ran out of capacity");
                break;
            }
            checkpoint(cancel)?;

            let Some(requirement) = requirement else {
                info!(workload = %key, clusters = generated.binding.entries.len(), "workload scheduled");
                return Ok(ScheduleOutcome {
                    binding: generated.binding,
                    reservation: Reservation::default(),
                    plans,
                    attempts,
                    replaced: false,
                });
            };

            let placement = component_domains(&generated.binding, &domain_of);
            let flows = flow_demands(requirement, &placement);

            let admitted = match previous {
                Some(held) => self.topology.admit_replacing(held, &flows).map(Some),
                None => self.topology.admit(&flows).map(|guard| {
                    if cancel.is_cancelled() {
                        guard.rollback();
                        None
                    } else {
                        Some(guard.commit())
                    }
                }),
            };

            match admitted {
                Ok(None) => return Err(SchedulerError::Cancelled),
                Ok(Some(reservation)) => {
                    info!(
                        workload = %key,
                        clusters = generated.binding.entries.len(),
                        flows = reservation.flows().len(),
                        attempts,
                        "workload scheduled"
                    );
                    return Ok(ScheduleOutcome {
                        binding: generated.binding,
                        reservation,
                        plans,
                        attempts,
                        replaced: previous.is_some(),
                    });
                }
                Err(err) => {
                    let Some(first) = err.failures.first() else {
                        return Err(SchedulerError::Internal(
                            "admission failed without a failing flow".to_string(),
                        ));
                    };
                    warn!(
                        workload = %key,
                        attempt = attempts,
                        failures = err.failures.len(),
                        %first,
                        "SLA admission failed"
                    );
                    let progressed = exclude_failing_cluster(
                        first,
                        &generated.binding,
                        &narrowed,
                        &domain_of,
                        &mut excluded,
                    );
                    failures = err.failures;
                    if !progressed {
                        break;
                    }
                }
            }
        }

        Err(SchedulerError::SlaInfeasible { attempts, failures })
    }
}

fn checkpoint(cancel: &CancellationToken) -> SchedulerResult<()> {
    if cancel.is_cancelled() {
        return Err(SchedulerError::Cancelled);
    }
    Ok(())
}

/// Plans with excluded clusters removed from each component's ranking.
fn narrow(
    plans: &[ComponentPlan],
    excluded: &BTreeMap<ComponentName, BTreeSet<ClusterId>>,
) -> Vec<ComponentPlan> {
    plans
        .iter()
        .map(|plan| {
            let mut plan = plan.clone();
            if let Some(skip) = excluded.get(&plan.component) {
                plan.ranked.retain(|c| !skip.contains(&c.cluster));
            }
            plan
        })
        .collect()
}

/// Component → domains hosting at least one of its replicas.
fn component_domains(
    binding: &ResourceBinding,
    domain_of: &BTreeMap<&str, &str>,
) -> BTreeMap<ComponentName, BTreeSet<DomainId>> {
    let mut placement: BTreeMap<ComponentName, BTreeSet<DomainId>> = BTreeMap::new();
    for entry in &binding.entries {
        let Some(domain) = domain_of.get(entry.cluster.as_str()) else {
            continue;
        };
        for (component, replicas) in &entry.replicas {
            if *replicas > 0 {
                placement
                    .entry(component.clone())
                    .or_default()
                    .insert(domain.to_string());
            }
        }
    }
    placement
}

/// Exclude the destination component's clusters in the failing domain, or
/// the source side's if the destination would be left without candidates.
/// Returns false when neither side can give anything up.
fn exclude_failing_cluster(
    failure: &FlowFailure,
    binding: &ResourceBinding,
    plans: &[ComponentPlan],
    domain_of: &BTreeMap<&str, &str>,
    excluded: &mut BTreeMap<ComponentName, BTreeSet<ClusterId>>,
) -> bool {
    let flow = &failure.flow;
    let sides = [
        (&flow.destination_component, &flow.destination_domain),
        (&flow.source_component, &flow.source_domain),
    ];

    for (component, domain) in sides {
        let offending: BTreeSet<ClusterId> = binding
            .clusters_of(component)
            .into_iter()
            .filter(|id| domain_of.get(id).is_some_and(|d| d == domain))
            .map(str::to_string)
            .collect();
        if offending.is_empty() {
            continue;
        }
        let remaining = plans
            .iter()
            .find(|p| &p.component == component)
            .map(|p| p.ranked.iter().filter(|c| !offending.contains(&c.cluster)).count())
            .unwrap_or(0);
        if remaining == 0 {
            continue;
        }
        debug!(
            component = %component,
            clusters = ?offending,
            "excluding clusters for next binding attempt"
        );
        excluded.entry(component.clone()).or_default().extend(offending);
        return true;
    }
    false
}

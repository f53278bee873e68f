//! Score plugins.

use std::collections::BTreeMap;

use meshplace_core::{Cluster, ClusterId, Component};

use crate::error::PluginError;
use crate::framework::{CycleState, Plugin, PreScorePlugin, SchedulingContext, ScorePlugin};

pub const MAX_SCORE: u64 = 100;

const HEADROOM_KEY: &str = "CorePriority/headroom";

/// Percentage of cpu capacity still allocatable. Zero capacity scores 0.
pub fn cpu_headroom(cluster: &Cluster) -> u64 {
    let capacity = cluster.capacity.cpu_millis;
    if capacity == 0 {
        return 0;
    }
    let pct = u128::from(cluster.allocatable.cpu_millis) * 100 / u128::from(capacity);
    u64::try_from(pct).unwrap_or(MAX_SCORE).min(MAX_SCORE)
}

/// Prefers clusters with more free cpu.
///
/// PreScore records the headroom of every surviving cluster in the cycle
/// state; Score reads it back and falls back to computing it directly.
#[derive(Debug, Default)]
pub struct CorePriority;

impl Plugin for CorePriority {
    fn name(&self) -> &'static str {
        "CorePriority"
    }

    fn as_pre_score(&self) -> Option<&dyn PreScorePlugin> {
        Some(self)
    }

    fn as_score(&self) -> Option<&dyn ScorePlugin> {
        Some(self)
    }
}

impl PreScorePlugin for CorePriority {
    fn pre_score(
        &self,
        _ctx: &SchedulingContext<'_>,
        state: &mut CycleState,
        _component: &Component,
        feasible: &[&Cluster],
    ) -> Result<(), PluginError> {
        state.update::<BTreeMap<ClusterId, u64>, _>(HEADROOM_KEY, |headroom| {
            for cluster in feasible {
                headroom.insert(cluster.id.clone(), cpu_headroom(cluster));
            }
        });
        Ok(())
    }
}

impl ScorePlugin for CorePriority {
    fn score(
        &self,
        _ctx: &SchedulingContext<'_>,
        state: &CycleState,
        _component: &Component,
        cluster: &Cluster,
    ) -> Result<u64, PluginError> {
        let cached = state
            .read::<BTreeMap<ClusterId, u64>>(HEADROOM_KEY)
            .and_then(|m| m.get(&cluster.id).copied());
        Ok(cached.unwrap_or_else(|| cpu_headroom(cluster)))
    }
}

/// Prefers clusters backed by physical nodes.
#[derive(Debug, Default)]
pub struct VirtualNode;

impl Plugin for VirtualNode {
    fn name(&self) -> &'static str {
        "VirtualNode"
    }

    fn as_score(&self) -> Option<&dyn ScorePlugin> {
        Some(self)
    }
}

impl ScorePlugin for VirtualNode {
    fn score(
        &self,
        _ctx: &SchedulingContext<'_>,
        _state: &CycleState,
        _component: &Component,
        cluster: &Cluster,
    ) -> Result<u64, PluginError> {
        Ok(if cluster.is_virtual() { 0 } else { MAX_SCORE })
    }
}

#[cfg(test)]
mod tests {
    use meshplace_core::{
        ComponentKind, NodeStatistics, PlacementConstraints, ResourceDemand, ResourceList,
        WorkloadDescriptor, labels,
    };
    use meshplace_topology::TopologyGraph;

    use super::*;

    fn make_cluster(id: &str, cap_cpu: u64, alloc_cpu: u64) -> Cluster {
        Cluster {
            id: id.to_string(),
            network_domain: "d1".to_string(),
            labels: BTreeMap::new(),
            taints: Vec::new(),
            capacity: ResourceList {
                cpu_millis: cap_cpu,
                memory_bytes: 1 << 30,
            },
            allocatable: ResourceList {
                cpu_millis: alloc_cpu,
                memory_bytes: 1 << 30,
            },
            nodes: NodeStatistics::default(),
            ready: true,
        }
    }

    fn component() -> Component {
        Component {
            name: "web".to_string(),
            replicas: 1,
            kind: ComponentKind::Workload,
            resources: ResourceDemand::default(),
            placement: PlacementConstraints::default(),
        }
    }

    fn score_with(plugin: &dyn ScorePlugin, state: &CycleState, cluster: &Cluster) -> u64 {
        let workload = WorkloadDescriptor {
            namespace: "default".to_string(),
            name: "app".to_string(),
            components: vec![component()],
        };
        let topology = TopologyGraph::new();
        let ctx = SchedulingContext {
            workload: &workload,
            requirement: None,
            topology: &topology,
        };
        plugin.score(&ctx, state, &component(), cluster).unwrap()
    }

    #[test]
    fn headroom_percentages() {
        assert_eq!(cpu_headroom(&make_cluster("c", 10_000, 8_000)), 80);
        assert_eq!(cpu_headroom(&make_cluster("c", 10_000, 4_000)), 40);
        assert_eq!(cpu_headroom(&make_cluster("c", 0, 4_000)), 0);
        assert_eq!(cpu_headroom(&make_cluster("c", 1_000, 4_000)), 100);
        // Ratios far past u64 clamp instead of wrapping.
        assert_eq!(cpu_headroom(&make_cluster("c", 1, u64::MAX)), 100);
    }

    #[test]
    fn core_priority_is_monotonic_in_free_cpu() {
        let state = CycleState::new();
        let mut last = 0;
        for alloc in (0..=10_000).step_by(500) {
            let score = score_with(&CorePriority, &state, &make_cluster("c", 10_000, alloc));
            assert!(score >= last);
            last = score;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn pre_score_snapshot_wins_over_live_values() {
        let before = make_cluster("c1", 10_000, 8_000);
        let workload = WorkloadDescriptor {
            namespace: "default".to_string(),
            name: "app".to_string(),
            components: vec![component()],
        };
        let topology = TopologyGraph::new();
        let ctx = SchedulingContext {
            workload: &workload,
            requirement: None,
            topology: &topology,
        };
        let mut state = CycleState::new();
        CorePriority
            .pre_score(&ctx, &mut state, &component(), &[&before])
            .unwrap();

        let after = make_cluster("c1", 10_000, 1_000);
        assert_eq!(score_with(&CorePriority, &state, &after), 80);
    }

    #[test]
    fn virtual_node_penalized() {
        let state = CycleState::new();
        let mut cluster = make_cluster("c1", 1, 1);
        assert_eq!(score_with(&VirtualNode, &state, &cluster), 100);
        cluster.labels.insert(labels::VIRTUAL_NODE.to_string(), "true".to_string());
        assert_eq!(score_with(&VirtualNode, &state, &cluster), 0);
    }
}

//! Property-based tests for filter and score behavior.
//!
//! Filters must give the same verdict for a candidate no matter which other
//! filters ran first, and raising one cluster's free CPU must never push it
//! further down the ranking.

use std::collections::BTreeMap;

use meshplace_core::{
    Cluster, Component, ComponentKind, NodeStatistics, PlacementConstraints, ResourceDemand,
    ResourceList, Taint, TaintEffect, Toleration, TolerationOperator, WorkloadDescriptor, labels,
};
use meshplace_placement::{
    CycleState, FilterPlugin, Pipeline, Plugin, PluginRegistry, SchedulingContext, Verdict,
};
use meshplace_topology::TopologyGraph;
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

const FILTERS: [&str; 7] = [
    "TaintToleration",
    "SpecificResource",
    "AffinityDaemon",
    "NetEnvironment",
    "Geolocation",
    "SupplierName",
    "RuntimeType",
];

const GEOS: [&str; 3] = ["eu-west", "eu-central", "us-east"];

fn cluster(index: usize, alloc_cpu: u64, geo: Option<usize>, tainted: bool) -> Cluster {
    let mut labels_map = BTreeMap::new();
    if let Some(geo) = geo {
        labels_map.insert(labels::GEO_LOCATION.to_string(), GEOS[geo].to_string());
    }
    labels_map.insert(labels::SUPPLIER_NAME.to_string(), format!("s{}", index % 2));
    let taints = if tainted {
        vec![Taint {
            key: "maintenance".to_string(),
            value: String::new(),
            effect: TaintEffect::NoSchedule,
        }]
    } else {
        Vec::new()
    };
    Cluster {
        id: format!("c{index:02}"),
        network_domain: format!("domain-{index}"),
        labels: labels_map,
        taints,
        capacity: ResourceList {
            cpu_millis: 10_000,
            memory_bytes: 64 << 30,
        },
        allocatable: ResourceList {
            cpu_millis: alloc_cpu,
            memory_bytes: 64 << 30,
        },
        nodes: NodeStatistics {
            ready_nodes: 1,
            ..Default::default()
        },
        ready: true,
    }
}

fn component(geo: Option<usize>, supplier: Option<usize>, tolerant: bool) -> Component {
    let mut placement = PlacementConstraints::default();
    if let Some(geo) = geo {
        placement.geolocations.push(GEOS[geo].to_string());
    }
    placement.supplier = supplier.map(|s| format!("s{s}"));
    if tolerant {
        placement.tolerations.push(Toleration {
            key: "maintenance".to_string(),
            operator: TolerationOperator::Exists,
            ..Default::default()
        });
    }
    Component {
        name: "web".to_string(),
        replicas: 2,
        kind: ComponentKind::Workload,
        resources: ResourceDemand {
            cpu_millis: 500,
            memory_bytes: 1 << 20,
        },
        placement,
    }
}

fn verdicts(
    registry: &PluginRegistry,
    order: &[&str],
    ctx: &SchedulingContext<'_>,
    component: &Component,
    cluster: &Cluster,
) -> BTreeMap<String, Verdict> {
    let state = CycleState::new();
    order
        .iter()
        .map(|name| {
            let plugin = registry.create(name).unwrap();
            let filter = plugin.as_filter().unwrap();
            let verdict = filter.filter(ctx, &state, component, cluster).unwrap();
            (name.to_string(), verdict)
        })
        .collect()
}

fn arb_cluster() -> impl Strategy<Value = (u64, Option<usize>, bool)> {
    (0u64..=10_000, proptest::option::of(0usize..3), any::<bool>())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn filter_verdicts_ignore_evaluation_order(
        fleet in proptest::collection::vec(arb_cluster(), 1..6),
        geo in proptest::option::of(0usize..3),
        supplier in proptest::option::of(0usize..2),
        tolerant in any::<bool>(),
    ) {
        let registry = PluginRegistry::with_defaults();
        let topology = TopologyGraph::new();
        let comp = component(geo, supplier, tolerant);
        let workload = WorkloadDescriptor {
            namespace: "default".to_string(),
            name: "app".to_string(),
            components: vec![comp.clone()],
        };
        let ctx = SchedulingContext { workload: &workload, requirement: None, topology: &topology };

        let mut reversed = FILTERS;
        reversed.reverse();
        for (i, (alloc, cluster_geo, tainted)) in fleet.into_iter().enumerate() {
            let c = cluster(i, alloc, cluster_geo, tainted);
            let forward = verdicts(&registry, &FILTERS, &ctx, &comp, &c);
            let backward = verdicts(&registry, &reversed, &ctx, &comp, &c);
            prop_assert_eq!(&forward, &backward);
            // Evaluating again changes nothing.
            prop_assert_eq!(forward, verdicts(&registry, &FILTERS, &ctx, &comp, &c));
        }
    }

    #[test]
    fn more_headroom_never_lowers_rank(
        allocs in proptest::collection::vec(500u64..=10_000, 2..8),
        pick in any::<proptest::sample::Index>(),
        extra in 1u64..=10_000,
    ) {
        let pipeline = Pipeline::with_defaults().unwrap();
        let topology = TopologyGraph::new();
        let workload = WorkloadDescriptor {
            namespace: "default".to_string(),
            name: "app".to_string(),
            components: vec![component(None, None, false)],
        };
        let ctx = SchedulingContext { workload: &workload, requirement: None, topology: &topology };

        let target = pick.index(allocs.len());
        let target_id = format!("c{target:02}");
        let rank_of = |fleet: &[Cluster]| {
            let plans = pipeline.run(&ctx, fleet, &CancellationToken::new()).unwrap();
            plans[0].ranked.iter().position(|c| c.cluster == target_id).unwrap()
        };

        let mut fleet: Vec<Cluster> = allocs
            .iter()
            .enumerate()
            .map(|(i, alloc)| cluster(i, *alloc, None, false))
            .collect();
        let before = rank_of(&fleet);

        let raised = (allocs[target] + extra).min(10_000);
        fleet[target].allocatable.cpu_millis = raised;
        let after = rank_of(&fleet);

        prop_assert!(after <= before, "rank went from {} to {}", before, after);
    }
}

//! Controller tests: event handling, persistence, the reservation ledger and
//! requeue behavior, against the in-memory store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use meshplace_controller::{
    BindingStore, ClusterRegistry, MemoryStore, ResourceVersion, StoreError, StoreResult,
    Versioned, WorkQueue, WorkloadController, WorkloadRecord, controller_rate_limiter,
};
use meshplace_core::config::{PluginsConfig, QueueConfig};
use meshplace_core::{
    Cluster, Component, ComponentKind, InterEndpointEdge, LabelSelector, MeshplaceConfig,
    NetworkCommunication, NetworkRequirement, NodeStatistics, PlacementConstraints,
    ResourceBinding, ResourceDemand, ResourceList, SlaDemand, WorkloadDescriptor,
};
use meshplace_placement::{
    CycleState, FilterPlugin, Pipeline, Plugin, PluginError, PluginRegistry, SchedulingContext,
    Verdict,
};
use meshplace_scheduler::{Scheduler, SchedulerError};
use meshplace_topology::{DomainTopology, LinkSla, TopologyUpdate, VirtualLinkUpdate};
use tokio::sync::watch;

const KEY: &str = "default/shop";

// ── Fixtures ──────────────────────────────────────────────────────

fn link(remote: u64) -> VirtualLinkUpdate {
    VirtualLinkUpdate {
        remote_domain_id: remote,
        remote_domain_name: format!("domain-{remote}"),
        local_node_sn: String::new(),
        remote_node_sn: String::new(),
        attach_domain_id: 0,
        attach_domain_name: String::new(),
        sla: LinkSla {
            delay: 1,
            loss: 0,
            jitter: 0,
            bandwidth: 10_000,
            free_bandwidth: 10_000,
        },
    }
}

fn topology() -> Arc<DomainTopology> {
    let topology = DomainTopology::new();
    for (id, remote) in [(1, 3), (3, 1)] {
        topology
            .apply_update(TopologyUpdate {
                domain_id: id,
                domain_name: format!("domain-{id}"),
                local_node_sn: String::new(),
                links: vec![link(remote)],
            })
            .unwrap();
    }
    Arc::new(topology)
}

fn make_cluster(id: &str, domain: u64) -> Cluster {
    Cluster {
        id: id.to_string(),
        network_domain: format!("domain-{domain}"),
        labels: BTreeMap::from([("site".to_string(), id.to_string())]),
        taints: Vec::new(),
        capacity: ResourceList {
            cpu_millis: 8_000,
            memory_bytes: 32 << 30,
        },
        allocatable: ResourceList {
            cpu_millis: 6_000,
            memory_bytes: 32 << 30,
        },
        nodes: NodeStatistics {
            ready_nodes: 3,
            ..Default::default()
        },
        ready: true,
    }
}

fn make_component(name: &str, replicas: u32, site: &str) -> Component {
    Component {
        name: name.to_string(),
        replicas,
        kind: ComponentKind::Workload,
        resources: ResourceDemand {
            cpu_millis: 250,
            memory_bytes: 256 << 20,
        },
        placement: PlacementConstraints {
            affinity: BTreeMap::from([("site".to_string(), site.to_string())]),
            ..Default::default()
        },
    }
}

fn requirement(bandwidth: u64) -> NetworkRequirement {
    NetworkRequirement {
        name: "shop-net".to_string(),
        communications: vec![
            NetworkCommunication {
                name: "front".to_string(),
                self_ids: vec!["fe".to_string()],
                edges: vec![InterEndpointEdge {
                    source: "fe".to_string(),
                    destination: "be".to_string(),
                    sla: SlaDemand {
                        delay: 10,
                        loss: 100,
                        jitter: 100,
                        bandwidth,
                    },
                }],
            },
            NetworkCommunication {
                name: "back".to_string(),
                self_ids: vec!["be".to_string()],
                edges: vec![],
            },
        ],
    }
}

fn record(bandwidth: u64) -> WorkloadRecord {
    WorkloadRecord::new(WorkloadDescriptor {
        namespace: "default".to_string(),
        name: "shop".to_string(),
        components: vec![make_component("front", 2, "c1"), make_component("back", 1, "c3")],
    })
    .with_requirement(requirement(bandwidth))
}

fn fast_queue() -> Arc<WorkQueue> {
    WorkQueue::new(Box::new(controller_rate_limiter(&QueueConfig {
        base_delay_ms: 1,
        max_delay_ms: 20,
        ..Default::default()
    })))
}

struct Harness {
    store: Arc<MemoryStore>,
    topology: Arc<DomainTopology>,
    controller: Arc<WorkloadController>,
}

fn harness_with(
    scheduler: Scheduler,
    topology: Arc<DomainTopology>,
    clusters: Arc<dyn ClusterRegistry>,
    bindings: Option<Arc<dyn BindingStore>>,
    store: Arc<MemoryStore>,
) -> Harness {
    let bindings: Arc<dyn BindingStore> = match bindings {
        Some(bindings) => bindings,
        None => store.clone(),
    };
    let controller = WorkloadController::new(
        Arc::new(scheduler),
        clusters,
        store.clone(),
        bindings,
        fast_queue(),
    );
    Harness {
        store,
        topology,
        controller: Arc::new(controller),
    }
}

fn harness() -> Harness {
    let topology = topology();
    let store = Arc::new(MemoryStore::new());
    store.put_cluster(make_cluster("c1", 1));
    store.put_cluster(make_cluster("c3", 3));
    let scheduler = Scheduler::from_config(&MeshplaceConfig::default(), Arc::clone(&topology)).unwrap();
    harness_with(scheduler, topology, store.clone(), None, store)
}

fn available(topology: &DomainTopology) -> u64 {
    topology.read(|g| g.find_link("domain-1", "domain-3").map(|l| l.available()).unwrap_or(0))
}

fn stored_binding(store: &MemoryStore) -> Option<Versioned<ResourceBinding>> {
    BindingStore::get(store, KEY).unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

// ── Store wrappers ────────────────────────────────────────────────

/// Rejects the first `remaining` creates with a conflict.
struct ConflictingBindings {
    inner: Arc<MemoryStore>,
    remaining: AtomicU32,
}

impl ConflictingBindings {
    fn conflict(&self, key: &str) -> StoreResult<()> {
        let left = self.remaining.load(Ordering::SeqCst);
        if left > 0 {
            self.remaining.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Conflict {
                key: key.to_string(),
                reason: "concurrent writer".to_string(),
            });
        }
        Ok(())
    }
}

impl BindingStore for ConflictingBindings {
    fn get(&self, key: &str) -> StoreResult<Option<Versioned<ResourceBinding>>> {
        BindingStore::get(self.inner.as_ref(), key)
    }

    fn create(&self, binding: ResourceBinding) -> StoreResult<Versioned<ResourceBinding>> {
        self.conflict(&binding.workload)?;
        self.inner.create(binding)
    }

    fn update(
        &self,
        binding: ResourceBinding,
        version: ResourceVersion,
    ) -> StoreResult<Versioned<ResourceBinding>> {
        self.conflict(&binding.workload)?;
        self.inner.update(binding, version)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        self.inner.delete(key)
    }
}

struct DownRegistry;

impl ClusterRegistry for DownRegistry {
    fn list(&self, _selector: &LabelSelector) -> StoreResult<Vec<Cluster>> {
        Err(StoreError::Unavailable("registry unreachable".to_string()))
    }

    fn get(&self, _id: &str) -> StoreResult<Option<Cluster>> {
        Err(StoreError::Unavailable("registry unreachable".to_string()))
    }
}

struct Panicking;

impl Plugin for Panicking {
    fn name(&self) -> &'static str {
        "Panicking"
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }
}

impl FilterPlugin for Panicking {
    fn filter(
        &self,
        _ctx: &SchedulingContext<'_>,
        _state: &CycleState,
        _component: &Component,
        _cluster: &Cluster,
    ) -> Result<Verdict, PluginError> {
        panic!("filter bug");
    }
}

// ── Tests ─────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn add_schedules_and_records_reservation() {
    let h = harness();
    let stored = h.store.put_workload(record(100));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(Arc::clone(&h.controller).run(2, shutdown_rx));

    h.controller.on_add(&stored.value);
    wait_until(|| stored_binding(&h.store).is_some()).await;

    let binding = stored_binding(&h.store).unwrap().value;
    assert_eq!(binding.replicas_of("front"), 2);
    assert_eq!(binding.clusters_of("back").into_iter().collect::<Vec<_>>(), vec!["c3"]);
    assert_eq!(h.controller.reservation_for(KEY).unwrap().flows().len(), 1);
    assert_eq!(available(&h.topology), 9_900);

    shutdown_tx.send(true).unwrap();
    run.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spec_change_replaces_reservation_and_delete_releases_it() {
    let h = harness();
    let first = h.store.put_workload(record(100));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(Arc::clone(&h.controller).run(2, shutdown_rx));

    h.controller.on_add(&first.value);
    wait_until(|| available(&h.topology) == 9_900).await;

    let second = h.store.put_workload(record(300));
    h.controller.on_update(&first.value, &second.value);
    wait_until(|| available(&h.topology) == 9_700).await;
    assert_eq!(h.topology.snapshot().total_reserved(), 300);

    let deleting = h.store.mark_deleting(KEY).unwrap();
    h.controller.on_update(&second.value, &deleting.value);
    wait_until(|| stored_binding(&h.store).is_none()).await;
    assert_eq!(available(&h.topology), 10_000);
    assert!(h.controller.reservation_for(KEY).is_none());

    shutdown_tx.send(true).unwrap();
    run.await.unwrap();
}

#[tokio::test]
async fn unchanged_update_is_skipped() {
    let h = harness();
    let stored = h.store.put_workload(record(100));
    let again = h.store.put_workload(record(100));

    h.controller.on_update(&stored.value, &again.value);
    assert!(h.controller.queue().is_empty());

    let mut deleting = again.value.clone();
    deleting.deleting = true;
    h.controller.on_update(&again.value, &deleting);
    assert_eq!(h.controller.queue().len(), 1);
}

#[tokio::test]
async fn removed_workload_cleans_up_binding() {
    let h = harness();
    let stored = h.store.put_workload(record(100));
    h.controller.reconcile(KEY).await.unwrap();
    assert_eq!(available(&h.topology), 9_900);

    h.store.remove_workload(KEY);
    h.controller.on_delete(&stored.value);
    assert!(h.controller.process_next().await);

    assert!(stored_binding(&h.store).is_none());
    assert_eq!(available(&h.topology), 10_000);
}

#[tokio::test]
async fn reconcile_is_idempotent() {
    let h = harness();
    h.store.put_workload(record(100));

    h.controller.reconcile(KEY).await.unwrap();
    let first = stored_binding(&h.store).unwrap();
    h.controller.reconcile(KEY).await.unwrap();
    let second = stored_binding(&h.store).unwrap();

    // Same binding, no rewrite; the old reservation was swapped out.
    assert_eq!(first, second);
    assert_eq!(h.topology.snapshot().total_reserved(), 100);
}

#[tokio::test]
async fn conflicts_are_retried_before_persisting() {
    let topology = topology();
    let store = Arc::new(MemoryStore::new());
    store.put_cluster(make_cluster("c1", 1));
    store.put_cluster(make_cluster("c3", 3));
    let bindings = Arc::new(ConflictingBindings {
        inner: store.clone(),
        remaining: AtomicU32::new(2),
    });
    let scheduler = Scheduler::from_config(&MeshplaceConfig::default(), Arc::clone(&topology)).unwrap();
    let bindings_store: Arc<dyn BindingStore> = bindings.clone();
    let h = harness_with(scheduler, topology, store.clone(), Some(bindings_store), store);
    h.store.put_workload(record(100));

    h.controller.reconcile(KEY).await.unwrap();
    assert!(stored_binding(&h.store).is_some());
    assert_eq!(bindings.remaining.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn exhausted_conflicts_release_bandwidth() {
    let topology = topology();
    let store = Arc::new(MemoryStore::new());
    store.put_cluster(make_cluster("c1", 1));
    store.put_cluster(make_cluster("c3", 3));
    let bindings = Arc::new(ConflictingBindings {
        inner: store.clone(),
        remaining: AtomicU32::new(u32::MAX),
    });
    let scheduler = Scheduler::from_config(&MeshplaceConfig::default(), Arc::clone(&topology)).unwrap();
    let bindings_store: Arc<dyn BindingStore> = bindings;
    let h = harness_with(scheduler, topology, store.clone(), Some(bindings_store), store);
    h.store.put_workload(record(100));

    let err = h.controller.reconcile(KEY).await.unwrap_err();
    assert!(matches!(err, SchedulerError::PersistenceConflict(_)));
    assert!(err.is_retryable());
    assert_eq!(h.topology.snapshot().total_reserved(), 0);
    assert!(h.controller.reservation_for(KEY).is_none());
}

#[tokio::test]
async fn reschedule_reuses_its_own_bandwidth() {
    let h = harness();
    h.store.put_workload(record(6_000));
    h.controller.reconcile(KEY).await.unwrap();
    assert_eq!(available(&h.topology), 4_000);

    // 6001 only fits once the binding's own 6000 counts as free.
    h.store.put_workload(record(6_001));
    h.controller.reconcile(KEY).await.unwrap();
    assert_eq!(available(&h.topology), 3_999);
    assert_eq!(h.topology.snapshot().total_reserved(), 6_001);

    let held = h.controller.reservation_for(KEY).unwrap();
    assert_eq!(held.flows()[0].flow.sla.bandwidth, 6_001);
}

#[tokio::test]
async fn failed_reschedule_keeps_old_reservation() {
    let h = harness();
    h.store.put_workload(record(6_000));
    h.controller.reconcile(KEY).await.unwrap();

    // Nothing fits 10001, so the binding and its bandwidth stay as they were.
    h.store.put_workload(record(10_001));
    let err = h.controller.reconcile(KEY).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(available(&h.topology), 4_000);
    let held = h.controller.reservation_for(KEY).unwrap();
    assert_eq!(held.flows()[0].flow.sla.bandwidth, 6_000);
}

#[tokio::test]
async fn conflicted_reschedule_keeps_bandwidth_accounted() {
    let topology = topology();
    let store = Arc::new(MemoryStore::new());
    store.put_cluster(make_cluster("c1", 1));
    store.put_cluster(make_cluster("c3", 3));
    let bindings = Arc::new(ConflictingBindings {
        inner: store.clone(),
        remaining: AtomicU32::new(0),
    });
    let scheduler = Scheduler::from_config(&MeshplaceConfig::default(), Arc::clone(&topology)).unwrap();
    let bindings_store: Arc<dyn BindingStore> = bindings.clone();
    let h = harness_with(scheduler, topology, store.clone(), Some(bindings_store), store);

    h.store.put_workload(record(100));
    h.controller.reconcile(KEY).await.unwrap();

    bindings.remaining.store(u32::MAX, Ordering::SeqCst);
    let mut grown = record(300);
    grown.descriptor.components[0].replicas = 3;
    h.store.put_workload(grown);
    let err = h.controller.reconcile(KEY).await.unwrap_err();
    assert!(matches!(err, SchedulerError::PersistenceConflict(_)));
    // The old 100 went back during admission; the new 300 is tracked instead.
    assert_eq!(h.topology.snapshot().total_reserved(), 300);
    assert!(h.controller.reservation_for(KEY).is_some());

    bindings.remaining.store(0, Ordering::SeqCst);
    h.controller.reconcile(KEY).await.unwrap();
    assert_eq!(h.topology.snapshot().total_reserved(), 300);
    assert_eq!(stored_binding(&h.store).unwrap().value.replicas_of("front"), 3);
}

#[tokio::test]
async fn registry_outage_is_requeued() {
    let topology = topology();
    let store = Arc::new(MemoryStore::new());
    let scheduler = Scheduler::from_config(&MeshplaceConfig::default(), Arc::clone(&topology)).unwrap();
    let h = harness_with(scheduler, topology, Arc::new(DownRegistry), None, store);
    let stored = h.store.put_workload(record(100));

    h.controller.on_add(&stored.value);
    assert!(h.controller.process_next().await);
    assert_eq!(h.controller.queue().num_requeues(KEY), 1);

    // The requeue lands after its backoff.
    let key = tokio::time::timeout(Duration::from_secs(1), h.controller.queue().get())
        .await
        .unwrap();
    assert_eq!(key.as_deref(), Some(KEY));
}

#[tokio::test]
async fn not_ready_clusters_are_not_candidates() {
    let h = harness();
    let mut down = make_cluster("c3", 3);
    down.ready = false;
    h.store.put_cluster(down);
    h.store.put_workload(record(100));

    let err = h.controller.reconcile(KEY).await.unwrap_err();
    match err {
        SchedulerError::NoFeasibleCluster { component, .. } => assert_eq!(component, "back"),
        other => panic!("expected NoFeasibleCluster, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_request_is_dropped() {
    let h = harness();
    let mut bad = record(100);
    bad.descriptor.components[0].replicas = 0;
    let stored = h.store.put_workload(bad);

    h.controller.on_add(&stored.value);
    assert!(h.controller.process_next().await);
    assert_eq!(h.controller.queue().num_requeues(KEY), 0);
    assert!(h.controller.queue().is_empty());
    assert!(stored_binding(&h.store).is_none());
}

#[tokio::test]
async fn panicking_run_drops_only_that_request() {
    let topology = topology();
    let store = Arc::new(MemoryStore::new());
    store.put_cluster(make_cluster("c1", 1));

    let mut registry = PluginRegistry::with_defaults();
    registry.register("Panicking", || Arc::new(Panicking));
    let plugins = PluginsConfig {
        filter: vec!["Panicking".to_string()],
        ..Default::default()
    };
    let pipeline = Pipeline::from_config(&plugins, &registry).unwrap();
    let h = harness_with(
        Scheduler::new(pipeline, Arc::clone(&topology)),
        topology,
        store.clone(),
        None,
        store,
    );
    h.store.put_workload(record(100));

    let err = h.controller.reconcile(KEY).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Internal(_)));
    assert!(!err.is_retryable());

    // The controller keeps serving other keys.
    h.controller.queue().add(KEY);
    assert!(h.controller.process_next().await);
    assert_eq!(h.controller.queue().num_requeues(KEY), 0);
}

#[tokio::test]
async fn shutdown_stops_workers() {
    let h = harness();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(Arc::clone(&h.controller).run(3, shutdown_rx));

    tokio::task::yield_now().await;
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), run)
        .await
        .unwrap()
        .unwrap();
    assert!(h.controller.queue().is_shutting_down());
    assert!(!h.controller.process_next().await);
}

//! Workload controller: turns workload events into scheduling runs.
//!
//! Event handlers enqueue workload keys. Workers pull keys, run the
//! scheduler on the blocking pool, persist the binding with conflict
//! retries and keep a ledger of the bandwidth each persisted binding holds.
//! A reschedule hands the ledger entry to the scheduler, which may reuse
//! that bandwidth for the new binding; a delete releases it.

use std::collections::HashMap;
use std::sync::Arc;

use meshplace_core::{Cluster, LabelSelector, ResourceBinding};
use meshplace_scheduler::{ScheduleOutcome, Scheduler, SchedulerError, SchedulerResult};
use meshplace_topology::Reservation;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::StoreResult;
use crate::queue::WorkQueue;
use crate::retry::{Backoff, retry_on_conflict};
use crate::store::{BindingStore, ClusterRegistry, WorkloadRecord, WorkloadStore};

pub struct WorkloadController {
    scheduler: Arc<Scheduler>,
    clusters: Arc<dyn ClusterRegistry>,
    workloads: Arc<dyn WorkloadStore>,
    bindings: Arc<dyn BindingStore>,
    queue: Arc<WorkQueue>,
    backoff: Backoff,
    selector: LabelSelector,
    /// Reservation held by each persisted binding, by workload key.
    ledger: Mutex<HashMap<String, Reservation>>,
    cancel: CancellationToken,
}

impl WorkloadController {
    pub fn new(
        scheduler: Arc<Scheduler>,
        clusters: Arc<dyn ClusterRegistry>,
        workloads: Arc<dyn WorkloadStore>,
        bindings: Arc<dyn BindingStore>,
        queue: Arc<WorkQueue>,
    ) -> Self {
        Self {
            scheduler,
            clusters,
            workloads,
            bindings,
            queue,
            backoff: Backoff::default(),
            selector: LabelSelector::everything(),
            ledger: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Set the backoff used when persisting hits a version conflict.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Restrict candidates to clusters matching `selector`.
    pub fn with_selector(mut self, selector: LabelSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Bandwidth currently held for `key`'s persisted binding.
    pub fn reservation_for(&self, key: &str) -> Option<Reservation> {
        self.ledger.lock().get(key).cloned()
    }

    // ── Event handlers ────────────────────────────────────────────

    pub fn on_add(&self, record: &WorkloadRecord) {
        self.queue.add(&record.key());
    }

    /// Updates that leave the spec unchanged are skipped unless the record
    /// is being deleted.
    pub fn on_update(&self, old: &WorkloadRecord, new: &WorkloadRecord) {
        if old.same_spec(new) && !new.deleting {
            debug!(workload = %new.key(), "spec unchanged, skipping update");
            return;
        }
        self.queue.add(&new.key());
    }

    pub fn on_delete(&self, record: &WorkloadRecord) {
        self.queue.add(&record.key());
    }

    // ── Reconciliation ───────────────────────────────────────────

    /// Bring the stored binding for `key` in line with its workload.
    pub async fn reconcile(&self, key: &str) -> SchedulerResult<()> {
        let record = match self.workloads.get(key)? {
            Some(stored) if !stored.value.deleting => stored.value,
            _ => return self.remove_binding(key),
        };

        let candidates: Vec<Cluster> = self
            .clusters
            .list(&self.selector)?
            .into_iter()
            .filter(|c| c.ready)
            .collect();
        debug!(workload = %key, candidates = candidates.len(), "scheduling");

        let previous = self.ledger.lock().get(key).cloned();
        let outcome = self.schedule_blocking(record, candidates, previous.clone()).await?;
        let replaced = outcome.replaced;

        if let Err(e) = self.persist(&outcome.binding).await {
            if replaced {
                // The old bandwidth is already gone, so the new reservation
                // stands in for it until the retry settles the binding.
                self.ledger.lock().insert(key.to_string(), outcome.reservation);
            } else {
                self.scheduler.topology().release(&outcome.reservation);
            }
            return Err(e.into());
        }

        let clusters = outcome.binding.entries.len();
        let flows = outcome.reservation.flows().len();
        self.ledger.lock().insert(key.to_string(), outcome.reservation);
        if let Some(previous) = previous.filter(|_| !replaced) {
            self.scheduler.topology().release(&previous);
        }
        info!(workload = %key, clusters, flows, attempts = outcome.attempts, "binding persisted");
        Ok(())
    }

    async fn schedule_blocking(
        &self,
        record: WorkloadRecord,
        candidates: Vec<Cluster>,
        previous: Option<Reservation>,
    ) -> SchedulerResult<ScheduleOutcome> {
        let scheduler = Arc::clone(&self.scheduler);
        let cancel = self.cancel.child_token();
        let run = tokio::task::spawn_blocking(move || {
            let requirement = record.requirement.as_ref();
            match &previous {
                Some(held) => scheduler.schedule_replacing(
                    &record.descriptor,
                    requirement,
                    &candidates,
                    held,
                    &cancel,
                ),
                None => scheduler.schedule(&record.descriptor, requirement, &candidates, &cancel),
            }
        });
        match run.await {
            Ok(result) => result,
            Err(e) => Err(SchedulerError::Internal(format!("scheduling run aborted: {e}"))),
        }
    }

    async fn persist(&self, binding: &ResourceBinding) -> StoreResult<()> {
        let store = self.bindings.as_ref();
        retry_on_conflict(&self.backoff, move || async move {
            match store.get(&binding.workload)? {
                Some(current) if current.value == *binding => Ok(()),
                Some(current) => store.update(binding.clone(), current.version).map(|_| ()),
                None => store.create(binding.clone()).map(|_| ()),
            }
        })
        .await
    }

    fn remove_binding(&self, key: &str) -> SchedulerResult<()> {
        let removed = self.bindings.delete(key)?;
        let reservation = self.ledger.lock().remove(key);
        if let Some(reservation) = &reservation {
            self.scheduler.topology().release(reservation);
        }
        if removed || reservation.is_some() {
            info!(workload = %key, "binding removed");
        }
        Ok(())
    }

    // ── Workers ──────────────────────────────────────────────────

    /// Process one key. Returns false once the queue has shut down.
    pub async fn process_next(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        match self.reconcile(&key).await {
            Ok(()) => self.queue.forget(&key),
            Err(SchedulerError::Cancelled) => {
                debug!(workload = %key, "scheduling cancelled");
                self.queue.forget(&key);
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    workload = %key,
                    kind = e.kind(),
                    requeues = self.queue.num_requeues(&key),
                    error = %e,
                    "scheduling failed, requeueing"
                );
                self.queue.add_rate_limited(&key);
            }
            Err(e) => {
                error!(workload = %key, kind = e.kind(), error = %e, "dropping workload");
                self.queue.forget(&key);
            }
        }

        self.queue.done(&key);
        true
    }

    /// Run `workers` workers until shutdown is signalled. In-flight runs
    /// are cancelled and the queue is drained of waiters before returning.
    pub async fn run(self: Arc<Self>, workers: usize, mut shutdown: watch::Receiver<bool>) {
        let workers = workers.max(1);
        info!(workers, "workload controller started");

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let controller = Arc::clone(&self);
                tokio::spawn(async move {
                    while controller.process_next().await {}
                    debug!(worker, "worker stopped");
                })
            })
            .collect();

        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        info!("workload controller shutting down");
        self.cancel.cancel();
        self.queue.shutdown();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task failed");
            }
        }
    }
}

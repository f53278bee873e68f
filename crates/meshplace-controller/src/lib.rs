//! meshplace-controller: the reconciliation loop around the scheduler.
//!
//! Components:
//! - **queue**: deduplicating work queue of workload keys
//! - **ratelimit**: per-key exponential and token-bucket requeue limiters
//! - **retry**: bounded retry of conflicting store writes
//! - **store**: cluster, workload and binding store interfaces, in-memory store
//! - **controller**: event handlers, worker pool and reservation ledger
//! - **topology_feed**: applies encoded topology updates from a channel

pub mod controller;
pub mod error;
pub mod queue;
pub mod ratelimit;
pub mod retry;
pub mod store;
pub mod topology_feed;

pub use controller::WorkloadController;
pub use error::{StoreError, StoreResult};
pub use queue::WorkQueue;
pub use ratelimit::{
    ItemExponentialLimiter, MaxOfLimiter, RateLimiter, TokenBucketLimiter, controller_rate_limiter,
};
pub use retry::{Backoff, DEFAULT_RETRY, retry_on_conflict};
pub use store::{
    BindingStore, ClusterRegistry, MemoryStore, ResourceVersion, Versioned, WorkloadRecord,
    WorkloadStore,
};
pub use topology_feed::{FeedStats, TopologyFeed};

//! meshplace-scheduler: one scheduling run end to end.
//!
//! Combines the placement pipeline (`meshplace-placement`) with bandwidth
//! admission on the shared topology (`meshplace-topology`):
//!
//! ```text
//! Scheduler::schedule
//!   ├── Pipeline::run        (validate, filter, score)
//!   ├── generate_binding     (replica split)
//!   └── DomainTopology::admit (SLA paths, reserve or roll back)
//!        └── on failure: exclude cluster, regenerate, retry
//! ```

pub mod error;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{ScheduleOutcome, Scheduler};

//! Store errors and their mapping onto scheduler errors.

use meshplace_scheduler::SchedulerError;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The supplied resource version is stale, or the object already exists.
    #[error("conflict on {key}: {reason}")]
    Conflict { key: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => SchedulerError::PersistenceConflict(err.to_string()),
            StoreError::NotFound(_) | StoreError::Unavailable(_) => {
                SchedulerError::TransientInfra(err.to_string())
            }
        }
    }
}

//! Registry error types.
//!
//! Every variant is a programming error in the caller: nothing here is
//! transient, so none of it should be retried.

use thiserror::Error;

use crate::types::WorkerPhase;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("worker already registered: {0}")]
    DuplicateId(String),

    #[error("worker not found: {0}")]
    NotFound(String),

    #[error("release on worker {0} with nothing in flight")]
    OverRelease(String),

    #[error("worker {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: String,
        from: WorkerPhase,
        to: WorkerPhase,
    },
}

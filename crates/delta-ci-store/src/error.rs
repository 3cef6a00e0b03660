//! Store-local error type, convertible into [`delta_ci_core::CoreError`] at
//! the crate boundary (spec §7).

use delta_ci_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// `GrantLease` called on a job that is not `pending` and not
    /// recovering from an `expired` lease (spec §4.1).
    #[error("job {0} is not leasable")]
    NotLeasable(String),

    /// A runner message's `lease_id`/`runner_id` did not match the job's
    /// active lease (spec §3 fencing invariant, §4.5).
    #[error("lease {0} is not the active fence for its job")]
    InvalidLease(String),

    /// Attempted state move disallowed by the state machine.
    #[error(transparent)]
    IllegalTransition(#[from] delta_ci_core::CoreError),

    /// Idempotency-key collision on `CreateRunWithTrigger`; the existing
    /// run id is returned alongside this in [`crate::model::CreateRunResult`],
    /// so this variant only fires for unexpected duplicate-key races on
    /// secondary keys (e.g. status report upsert).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backing storage unavailable or a driver-level error occurred.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Persisted data violates an invariant the Store should have enforced.
    #[error("fatal store error: {0}")]
    Fatal(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotLeasable(msg) => CoreError::Conflict(msg),
            StoreError::InvalidLease(msg) => CoreError::Unauthorized(msg),
            StoreError::IllegalTransition(inner) => inner,
            StoreError::Conflict(msg) => CoreError::Conflict(msg),
            StoreError::Unavailable(msg) => CoreError::Transient(msg),
            StoreError::Fatal(msg) => CoreError::Fatal(msg),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

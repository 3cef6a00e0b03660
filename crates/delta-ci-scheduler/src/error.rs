//! Scheduler-local error type (spec §4.4, §7).

use delta_ci_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

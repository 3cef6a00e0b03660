//! Error taxonomy for the Run Lifecycle Manager (spec §7).

use delta_ci_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("run {0} not found")]
    RunNotFound(String),

    #[error("job {0} not found")]
    JobNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

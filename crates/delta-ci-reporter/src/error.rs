//! Error taxonomy for the Status Reporter (spec §7).

use delta_ci_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("run {0} not found")]
    RunNotFound(String),

    #[error("provider call failed: {0}")]
    Provider(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ReporterResult<T> = Result<T, ReporterError>;

/// Raised by a [`crate::provider::StatusProvider`] implementation. `NotFound`
/// triggers the recreate-on-404 path in [`crate::report::publish_status`].
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("external resource not found")]
    NotFound,
    #[error("provider request failed: {0}")]
    Transient(String),
}

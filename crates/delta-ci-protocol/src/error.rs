//! Protocol-local error type (spec §4.5, §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use delta_ci_scheduler::SchedulerError;
use delta_ci_store::StoreError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed message or message type that doesn't match the endpoint.
    #[error("invalid request: {0}")]
    Validation(String),

    /// `lease_id`/`runner_id` did not match the active lease (spec §4.5).
    #[error("invalid lease: {0}")]
    InvalidLease(String),

    /// Store unavailable or the request deadline elapsed. Safe to retry.
    #[error("transient error: {0}")]
    Transient(String),
}

impl From<StoreError> for ProtocolError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidLease(msg) => Self::InvalidLease(msg),
            StoreError::IllegalTransition(inner) if inner.is_illegal_transition() => {
                Self::InvalidLease(inner.to_string())
            }
            StoreError::NotLeasable(msg) | StoreError::Conflict(msg) => Self::Transient(msg),
            StoreError::IllegalTransition(inner) => Self::Transient(inner.to_string()),
            StoreError::Unavailable(msg) => Self::Transient(msg),
            StoreError::Fatal(msg) => {
                tracing::error!(severity = "fatal", error = %msg, "protocol endpoint hit a fatal store error");
                Self::Transient(msg)
            }
        }
    }
}

impl From<SchedulerError> for ProtocolError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Store(inner) => inner.into(),
        }
    }
}

impl IntoResponse for ProtocolError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::InvalidLease(_) => StatusCode::CONFLICT,
            Self::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

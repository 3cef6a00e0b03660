//! Ingress-local error type (spec §4.2, §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngressError {
    /// HMAC signature missing, malformed, or mismatched.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed payload: missing ref/SHA, `deleted=true` push, or a
    /// non-positive PR number (spec §4.2).
    #[error("invalid payload: {0}")]
    Validation(String),

    /// The `TriggerSink` (Run Lifecycle Manager) could not accept the
    /// trigger, e.g. the Store was unavailable.
    #[error("trigger was not accepted: {0}")]
    SinkRejected(String),
}

pub type IngressResult<T> = Result<T, IngressError>;

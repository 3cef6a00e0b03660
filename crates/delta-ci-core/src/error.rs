//! Error taxonomy shared across the orchestration kernel.
//!
//! Every crate in the workspace maps its local errors into [`CoreError`] at
//! its public boundary so callers (the Reporter, the CLI) can match on a
//! single vocabulary instead of threading per-crate error types everywhere.

use thiserror::Error;

/// Canonical error taxonomy (spec §7). Variants are deliberately coarse —
/// callers branch on the kind, not on a message string.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed input, unsupported event, unknown fields. Never persisted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Signature or lease-fence mismatch. No state change occurs.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Attempted state move disallowed by the state machine.
    #[error("illegal transition for {entity} {id}: {from} -> {to}")]
    IllegalTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    /// Idempotency-key collision; resolved by returning the canonical entity.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Store unavailable, provider 5xx, deadline exceeded. Safe to retry.
    #[error("transient error: {0}")]
    Transient(String),

    /// Corrupted persisted data or invariant violation. Operation aborted.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl CoreError {
    pub fn illegal_transition(
        entity: &'static str,
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::IllegalTransition {
            entity,
            id: id.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    /// True for [`CoreError::IllegalTransition`]; reconciliation paths (the
    /// Reporter) swallow this variant idempotently per spec §4.1/§4.6.
    pub fn is_illegal_transition(&self) -> bool {
        matches!(self, Self::IllegalTransition { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

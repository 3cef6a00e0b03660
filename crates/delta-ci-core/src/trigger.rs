//! Trigger entity and deterministic idempotency key (spec §3, P3/R3).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::identity::{RunId, TriggerId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Push,
    PullRequest,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::PullRequest => "pull_request",
        }
    }
}

/// 1:1 with a [`crate::run::Run`] (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trigger {
    pub id: TriggerId,
    pub run_id: RunId,
    pub provider: String,
    pub event_type: EventType,
    pub repo_owner: String,
    pub repo_name: String,
    pub pr_number: Option<u64>,
    pub idempotency_key: String,
}

/// `idempotency_key = SHA-256(repo_id | commit_sha | event_type | pr_number)`
/// (spec §3). Deterministic and total: identical inputs always produce the
/// identical key (P3, R3).
pub fn compute_idempotency_key(
    repo_id: &str,
    commit_sha: &str,
    event_type: EventType,
    pr_number: Option<u64>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repo_id.as_bytes());
    hasher.update(b"|");
    hasher.update(commit_sha.as_bytes());
    hasher.update(b"|");
    hasher.update(event_type.as_str().as_bytes());
    hasher.update(b"|");
    match pr_number {
        Some(n) => hasher.update(n.to_string().as_bytes()),
        None => hasher.update(b""),
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic_for_identical_inputs() {
        let a = compute_idempotency_key("a/b", "c0ffee", EventType::Push, None);
        let b = compute_idempotency_key("a/b", "c0ffee", EventType::Push, None);
        assert_eq!(a, b);
    }

    #[test]
    fn key_depends_on_every_component() {
        let base = compute_idempotency_key("a/b", "c0ffee", EventType::Push, None);
        assert_ne!(base, compute_idempotency_key("a/c", "c0ffee", EventType::Push, None));
        assert_ne!(base, compute_idempotency_key("a/b", "deadbeef", EventType::Push, None));
        assert_ne!(
            base,
            compute_idempotency_key("a/b", "c0ffee", EventType::PullRequest, None)
        );
        assert_ne!(
            base,
            compute_idempotency_key("a/b", "c0ffee", EventType::Push, Some(7))
        );
    }

    #[test]
    fn key_distinguishes_pr_numbers() {
        let pr5 = compute_idempotency_key("a/b", "c0ffee", EventType::PullRequest, Some(5));
        let pr6 = compute_idempotency_key("a/b", "c0ffee", EventType::PullRequest, Some(6));
        assert_ne!(pr5, pr6);
    }

    #[test]
    fn key_is_hex_sha256_length() {
        let key = compute_idempotency_key("a/b", "c0ffee", EventType::Push, None);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

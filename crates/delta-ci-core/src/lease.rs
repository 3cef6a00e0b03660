//! Lease entity: a time-bounded, fenced grant of exclusive execution
//! (spec §3). The fencing invariant itself is enforced by the Durable
//! Store (at most one `Granted`/`Acknowledged` lease per job); this type
//! only models the shape of a lease row and its own small state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{JobId, LeaseId, RunnerId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseState {
    Granted,
    Acknowledged,
    Expired,
    Released,
}

impl LeaseState {
    /// States in which a lease is the single active fence for its job
    /// (spec §3 fencing invariant).
    pub fn is_active(self) -> bool {
        matches!(self, Self::Granted | Self::Acknowledged)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Acknowledged => "acknowledged",
            Self::Expired => "expired",
            Self::Released => "released",
        }
    }
}

impl std::fmt::Display for LeaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Lease {
    pub id: LeaseId,
    pub job_id: JobId,
    pub runner_id: RunnerId,
    pub state: LeaseState,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub cancel_requested: bool,
}

impl Lease {
    /// `lease_id` presented by a runner must match this lease exactly, or
    /// the message is rejected without side effect (spec §3, §4.5).
    pub fn fence_matches(&self, lease_id: &LeaseId, runner_id: &RunnerId) -> bool {
        &self.id == lease_id && &self.runner_id == runner_id && self.state.is_active()
    }

    /// Out-of-order heartbeats (older `ts`) must never shrink `expires_at`
    /// (spec §5 ordering guarantees). Returns `true` if the heartbeat was
    /// applied.
    pub fn apply_heartbeat(&mut self, ts: DateTime<Utc>, new_expires_at: DateTime<Utc>) -> bool {
        if ts < self.last_heartbeat_at {
            return false;
        }
        self.last_heartbeat_at = ts;
        if new_expires_at > self.expires_at {
            self.expires_at = new_expires_at;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn lease() -> Lease {
        let now = Utc::now();
        Lease {
            id: LeaseId::new("l1"),
            job_id: JobId::new("j1"),
            runner_id: RunnerId::new("runner-a"),
            state: LeaseState::Acknowledged,
            granted_at: now,
            expires_at: now + Duration::seconds(30),
            last_heartbeat_at: now,
            cancel_requested: false,
        }
    }

    #[test]
    fn fence_rejects_mismatched_lease_or_runner() {
        let lease = lease();
        assert!(lease.fence_matches(&LeaseId::new("l1"), &RunnerId::new("runner-a")));
        assert!(!lease.fence_matches(&LeaseId::new("l1"), &RunnerId::new("runner-b")));
        assert!(!lease.fence_matches(&LeaseId::new("other"), &RunnerId::new("runner-a")));
    }

    #[test]
    fn expired_lease_never_matches_fence() {
        let mut lease = lease();
        lease.state = LeaseState::Expired;
        assert!(!lease.fence_matches(&LeaseId::new("l1"), &RunnerId::new("runner-a")));
    }

    #[test]
    fn out_of_order_heartbeat_does_not_shrink_expiry() {
        let mut lease = lease();
        let original_expiry = lease.expires_at;
        let older_ts = lease.last_heartbeat_at - Duration::seconds(5);
        let applied = lease.apply_heartbeat(older_ts, older_ts + Duration::seconds(1));
        assert!(!applied);
        assert_eq!(lease.expires_at, original_expiry);
    }

    #[test]
    fn in_order_heartbeat_extends_expiry() {
        let mut lease = lease();
        let ts = lease.last_heartbeat_at + Duration::seconds(10);
        let new_expiry = ts + Duration::seconds(30);
        assert!(lease.apply_heartbeat(ts, new_expiry));
        assert_eq!(lease.expires_at, new_expiry);
        assert_eq!(lease.last_heartbeat_at, ts);
    }
}

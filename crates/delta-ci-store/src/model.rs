//! Request/response shapes for [`crate::DurableStore`] operations that
//! don't map one-to-one onto a single entity.

use chrono::{DateTime, Utc};
use delta_ci_core::{EventType, JobId, LeaseId, RunId};

/// Input to `CreateRunWithTrigger` (spec §4.1).
#[derive(Clone, Debug)]
pub struct NewRunWithTrigger {
    pub repo_id: String,
    pub git_ref: String,
    pub commit_sha: String,
    pub provider: String,
    pub event_type: EventType,
    pub repo_owner: String,
    pub repo_name: String,
    pub pr_number: Option<u64>,
}

/// Result of `CreateRunWithTrigger`: on idempotency-key conflict this
/// carries the pre-existing run id with `duplicate = true` and no other
/// side effect (spec §4.1, P3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateRunResult {
    pub run_id: RunId,
    pub duplicate: bool,
}

/// Returned by `Heartbeat` (spec §4.1): the runner learns whether a cancel
/// is pending on its lease.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    pub cancel_requested: bool,
}

/// Final outcome reported by `Complete` (spec §4.5).
#[derive(Clone, Debug)]
pub enum CompletionOutcome {
    Succeeded,
    Failed { exit_code: Option<i32>, summary: Option<String> },
}

/// Final outcome reported by `CancelAck` (spec §4.5): the runner's own
/// account of how the job actually ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelFinalStatus {
    Canceled,
    Succeeded,
    Failed,
}

/// Target of `RequestCancel` (spec §4.1): either an entire Run or a single
/// Job.
#[derive(Clone, Debug)]
pub enum CancelTarget {
    Run(RunId),
    Job(JobId),
}

/// Result of `ExpireLeases` (spec §4.1, §4.4): the ids affected, split by
/// whether the job was merely requeued or pushed to `failed` because
/// `max_attempts` was exhausted.
#[derive(Clone, Debug, Default)]
pub struct ExpireOutcome {
    pub requeued: Vec<LeaseId>,
    pub exhausted: Vec<LeaseId>,
}

impl ExpireOutcome {
    pub fn total(&self) -> usize {
        self.requeued.len() + self.exhausted.len()
    }
}

/// A job eligible for dispatch, as returned by `list_dispatchable_jobs`.
#[derive(Clone, Debug)]
pub struct DispatchCandidate {
    pub job_id: JobId,
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
}

//! The Durable Store contract (spec §4.1). Every public operation is
//! serializable at the row level (Run, Job, Lease) or by equivalent
//! optimistic concurrency control; the Store is the only synchronization
//! primitive the core relies on (spec §5).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use delta_ci_core::{
    Artifact, FailureExplanation, Job, JobId, JobState, Lease, LeaseId, NewJob, Run, RunId,
    RunState, RunnerId, StatusReport, Trigger,
};

use crate::error::StoreResult;
use crate::model::{
    CancelFinalStatus, CancelTarget, CompletionOutcome, CreateRunResult, DispatchCandidate,
    ExpireOutcome, HeartbeatOutcome, NewRunWithTrigger,
};

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Insert Run + Trigger atomically; on idempotency-key conflict, return
    /// the existing Run id with `duplicate = true` and no other side
    /// effect (spec §4.1, P3).
    async fn create_run_with_trigger(
        &self,
        trigger: NewRunWithTrigger,
        now: DateTime<Utc>,
    ) -> StoreResult<CreateRunResult>;

    async fn get_run(&self, run_id: &RunId) -> StoreResult<Option<Run>>;

    async fn get_trigger_for_run(&self, run_id: &RunId) -> StoreResult<Option<Trigger>>;

    /// Accept only if the transition is legal per the state machine; on an
    /// illegal transition, fail with [`crate::StoreError::IllegalTransition`]
    /// (spec §4.1).
    async fn transition_run_state(
        &self,
        run_id: &RunId,
        target: RunState,
        now: DateTime<Utc>,
    ) -> StoreResult<Run>;

    /// In one transaction: insert the planner's Job rows (all `pending`)
    /// and transition the Run `planning -> queued` (spec §4.3 "Planning").
    async fn materialize_plan(
        &self,
        run_id: &RunId,
        jobs: Vec<NewJob>,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Job>>;

    async fn get_job(&self, job_id: &JobId) -> StoreResult<Option<Job>>;

    async fn list_jobs_for_run(&self, run_id: &RunId) -> StoreResult<Vec<Job>>;

    async fn transition_job_state(
        &self,
        job_id: &JobId,
        target: JobState,
        now: DateTime<Utc>,
    ) -> StoreResult<Job>;

    /// Oldest `pending` jobs first, ties broken by `id` (spec §4.4).
    async fn list_dispatchable_jobs(
        &self,
        limit: usize,
    ) -> StoreResult<Vec<DispatchCandidate>>;

    /// Verify the job is `pending` (or recovering from an `expired`
    /// lease), mark it `leased`, and insert a new `granted` Lease,
    /// all in one transaction (spec §4.1).
    async fn grant_lease(
        &self,
        job_id: &JobId,
        runner_id: &RunnerId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Lease>;

    async fn get_lease(&self, lease_id: &LeaseId) -> StoreResult<Option<Lease>>;

    async fn get_active_lease_for_job(&self, job_id: &JobId) -> StoreResult<Option<Lease>>;

    /// `granted -> acknowledged`; rejects on lease/runner mismatch
    /// (spec §4.1, §4.5). Idempotent: acking an already-acknowledged
    /// lease for the same runner is a no-op, not an error.
    async fn ack_lease(&self, lease_id: &LeaseId, runner_id: &RunnerId) -> StoreResult<Lease>;

    /// Extend `expires_at`, update `last_heartbeat_at`, return the current
    /// `cancel_requested` flag; transitions the Job `leased -> running` on
    /// the first heartbeat (spec §4.1).
    async fn heartbeat(
        &self,
        lease_id: &LeaseId,
        runner_id: &RunnerId,
        ts: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreResult<HeartbeatOutcome>;

    /// Mark the lease `released` and the Job terminal per the outcome
    /// mapping (spec §4.1, §4.5).
    async fn complete_lease(
        &self,
        lease_id: &LeaseId,
        runner_id: &RunnerId,
        outcome: CompletionOutcome,
        now: DateTime<Utc>,
    ) -> StoreResult<Job>;

    /// Final response to a cancel request (spec §4.5). A `Canceled` final
    /// status on a Job that already reached a non-cancel terminal is a
    /// no-op; the original terminal wins.
    async fn cancel_ack(
        &self,
        lease_id: &LeaseId,
        runner_id: &RunnerId,
        final_status: CancelFinalStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Job>;

    /// Set `cancel_requested=true` on all active leases for the target;
    /// returns the affected lease ids (spec §4.1, §4.3).
    async fn request_cancel(&self, target: CancelTarget) -> StoreResult<Vec<LeaseId>>;

    /// Atomically find every active Lease with `expires_at < now`, mark it
    /// `expired`, and reset its Job to `pending` (incrementing `attempts`),
    /// or to `failed` with reason `exhausted` once `max_attempts` is
    /// reached (spec §4.1, §4.4).
    async fn expire_leases(
        &self,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> StoreResult<ExpireOutcome>;

    async fn add_artifact(&self, artifact: Artifact) -> StoreResult<()>;

    async fn list_artifacts_for_job(&self, job_id: &JobId) -> StoreResult<Vec<Artifact>>;

    async fn add_failure_explanation(&self, explanation: FailureExplanation) -> StoreResult<()>;

    async fn get_failure_explanation_for_job(
        &self,
        job_id: &JobId,
    ) -> StoreResult<Option<FailureExplanation>>;

    async fn get_status_report(
        &self,
        run_id: &RunId,
        provider: &str,
    ) -> StoreResult<Option<StatusReport>>;

    async fn upsert_status_report(&self, report: StatusReport) -> StoreResult<()>;

    /// Every Run not yet in `reported`, oldest first, ties broken by `id`
    /// (same ordering convention as `list_dispatchable_jobs`). Drives the
    /// Run Lifecycle Manager's reconciliation loop: each one is run through
    /// `evaluate_run`/`check_deadline` and then `publish_status`, both of
    /// which are no-ops if nothing has changed (spec §4.3, §4.6).
    async fn list_runs_needing_attention(&self, limit: usize) -> StoreResult<Vec<RunId>>;
}

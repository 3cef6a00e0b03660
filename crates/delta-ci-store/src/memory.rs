//! In-memory [`DurableStore`] backing used by unit and integration tests
//! across the workspace. It enforces the exact same state-machine guards
//! and fencing invariant as the real backends so tests assert behavior,
//! not a mock's leniency.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use delta_ci_core::{
    Artifact, FailureExplanation, FailureReason, Job, JobId, JobState, Lease, LeaseId,
    LeaseState, NewJob, Run, RunId, RunState, RunnerId, StatusReport, Trigger, TriggerId,
};
use tokio::sync::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::model::{
    CancelFinalStatus, CancelTarget, CompletionOutcome, CreateRunResult, DispatchCandidate,
    ExpireOutcome, HeartbeatOutcome, NewRunWithTrigger,
};
use crate::traits::DurableStore;

#[derive(Default)]
struct State {
    runs: HashMap<RunId, Run>,
    triggers_by_run: HashMap<RunId, Trigger>,
    trigger_by_key: HashMap<String, RunId>,
    jobs: HashMap<JobId, Job>,
    jobs_by_run: HashMap<RunId, Vec<JobId>>,
    leases: HashMap<LeaseId, Lease>,
    active_lease_by_job: HashMap<JobId, LeaseId>,
    artifacts_by_job: HashMap<JobId, Vec<Artifact>>,
    failure_explanation_by_job: HashMap<JobId, FailureExplanation>,
    status_reports: HashMap<(RunId, String), StatusReport>,
    next_id: u64,
}

impl State {
    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

/// In-memory, single-process [`DurableStore`]. Never use this across
/// process restarts; it has no persistence.
pub struct MemoryStore {
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn create_run_with_trigger(
        &self,
        new_trigger: NewRunWithTrigger,
        now: DateTime<Utc>,
    ) -> StoreResult<CreateRunResult> {
        let key = delta_ci_core::compute_idempotency_key(
            &new_trigger.repo_id,
            &new_trigger.commit_sha,
            new_trigger.event_type,
            new_trigger.pr_number,
        );
        let mut state = self.state.lock().await;
        if let Some(existing_run_id) = state.trigger_by_key.get(&key).cloned() {
            return Ok(CreateRunResult {
                run_id: existing_run_id,
                duplicate: true,
            });
        }

        let run_id = RunId::new(state.fresh_id("run"));
        let trigger_id = TriggerId::new(state.fresh_id("trigger"));
        let run = Run::new(
            run_id.clone(),
            new_trigger.repo_id,
            new_trigger.git_ref,
            new_trigger.commit_sha,
            now,
        );
        let trigger = Trigger {
            id: trigger_id,
            run_id: run_id.clone(),
            provider: new_trigger.provider,
            event_type: new_trigger.event_type,
            repo_owner: new_trigger.repo_owner,
            repo_name: new_trigger.repo_name,
            pr_number: new_trigger.pr_number,
            idempotency_key: key.clone(),
        };

        state.runs.insert(run_id.clone(), run);
        state.triggers_by_run.insert(run_id.clone(), trigger);
        state.trigger_by_key.insert(key, run_id.clone());
        state.jobs_by_run.insert(run_id.clone(), Vec::new());

        Ok(CreateRunResult {
            run_id,
            duplicate: false,
        })
    }

    async fn get_run(&self, run_id: &RunId) -> StoreResult<Option<Run>> {
        Ok(self.state.lock().await.runs.get(run_id).cloned())
    }

    async fn get_trigger_for_run(&self, run_id: &RunId) -> StoreResult<Option<Trigger>> {
        Ok(self.state.lock().await.triggers_by_run.get(run_id).cloned())
    }

    async fn transition_run_state(
        &self,
        run_id: &RunId,
        target: RunState,
        now: DateTime<Utc>,
    ) -> StoreResult<Run> {
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::Fatal(format!("unknown run {run_id}")))?;
        run.transition(target, now)?;
        Ok(run.clone())
    }

    async fn materialize_plan(
        &self,
        run_id: &RunId,
        jobs: Vec<NewJob>,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Job>> {
        let mut state = self.state.lock().await;
        {
            let run = state
                .runs
                .get_mut(run_id)
                .ok_or_else(|| StoreError::Fatal(format!("unknown run {run_id}")))?;
            run.transition(RunState::Queued, now)?;
        }

        let mut created = Vec::with_capacity(jobs.len());
        for new_job in jobs {
            let job_id = JobId::new(state.fresh_id("job"));
            let job = Job::new(
                job_id.clone(),
                run_id.clone(),
                new_job.name,
                new_job.required,
                new_job.spec,
                now,
            );
            state.jobs.insert(job_id.clone(), job.clone());
            state
                .jobs_by_run
                .entry(run_id.clone())
                .or_default()
                .push(job_id);
            created.push(job);
        }
        Ok(created)
    }

    async fn get_job(&self, job_id: &JobId) -> StoreResult<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(job_id).cloned())
    }

    async fn list_jobs_for_run(&self, run_id: &RunId) -> StoreResult<Vec<Job>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs_by_run
            .get(run_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.jobs.get(id).cloned())
            .collect())
    }

    async fn transition_job_state(
        &self,
        job_id: &JobId,
        target: JobState,
        now: DateTime<Utc>,
    ) -> StoreResult<Job> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::Fatal(format!("unknown job {job_id}")))?;
        job.transition(target, now)?;
        Ok(job.clone())
    }

    async fn list_dispatchable_jobs(&self, limit: usize) -> StoreResult<Vec<DispatchCandidate>> {
        let state = self.state.lock().await;
        let mut candidates: Vec<DispatchCandidate> = state
            .jobs
            .values()
            .filter(|job| job.state == JobState::Pending)
            .map(|job| DispatchCandidate {
                job_id: job.id.clone(),
                run_id: job.run_id.clone(),
                created_at: job.created_at,
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.as_str().cmp(b.job_id.as_str()))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn grant_lease(
        &self,
        job_id: &JobId,
        runner_id: &RunnerId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Lease> {
        let mut state = self.state.lock().await;
        {
            let job = state
                .jobs
                .get(job_id)
                .ok_or_else(|| StoreError::NotLeasable(job_id.to_string()))?;
            if job.state != JobState::Pending {
                return Err(StoreError::NotLeasable(job_id.to_string()));
            }
        }
        if state.active_lease_by_job.contains_key(job_id) {
            return Err(StoreError::NotLeasable(job_id.to_string()));
        }

        let lease_id = LeaseId::new(state.fresh_id("lease"));
        let lease = Lease {
            id: lease_id.clone(),
            job_id: job_id.clone(),
            runner_id: runner_id.clone(),
            state: LeaseState::Granted,
            granted_at: now,
            expires_at: now + ttl,
            last_heartbeat_at: now,
            cancel_requested: false,
        };
        state.leases.insert(lease_id.clone(), lease.clone());
        state
            .active_lease_by_job
            .insert(job_id.clone(), lease_id);

        let job = state.jobs.get_mut(job_id).expect("checked above");
        job.transition(JobState::Leased, now)?;

        Ok(lease)
    }

    async fn get_lease(&self, lease_id: &LeaseId) -> StoreResult<Option<Lease>> {
        Ok(self.state.lock().await.leases.get(lease_id).cloned())
    }

    async fn get_active_lease_for_job(&self, job_id: &JobId) -> StoreResult<Option<Lease>> {
        let state = self.state.lock().await;
        Ok(state
            .active_lease_by_job
            .get(job_id)
            .and_then(|lease_id| state.leases.get(lease_id))
            .cloned())
    }

    async fn ack_lease(&self, lease_id: &LeaseId, runner_id: &RunnerId) -> StoreResult<Lease> {
        let mut state = self.state.lock().await;
        let lease = state
            .leases
            .get_mut(lease_id)
            .ok_or_else(|| StoreError::InvalidLease(lease_id.to_string()))?;
        if &lease.runner_id != runner_id || !lease.state.is_active() {
            return Err(StoreError::InvalidLease(lease_id.to_string()));
        }
        // Retries after `acknowledged` are no-ops (spec §4.5).
        lease.state = LeaseState::Acknowledged;
        Ok(lease.clone())
    }

    async fn heartbeat(
        &self,
        lease_id: &LeaseId,
        runner_id: &RunnerId,
        ts: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreResult<HeartbeatOutcome> {
        let mut state = self.state.lock().await;
        let (job_id, cancel_requested) = {
            let lease = state
                .leases
                .get_mut(lease_id)
                .ok_or_else(|| StoreError::InvalidLease(lease_id.to_string()))?;
            if &lease.runner_id != runner_id || !lease.state.is_active() {
                return Err(StoreError::InvalidLease(lease_id.to_string()));
            }
            lease.apply_heartbeat(ts, ts + ttl);
            (lease.job_id.clone(), lease.cancel_requested)
        };
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::Fatal(format!("unknown job {job_id}")))?;
        if job.state == JobState::Leased {
            job.transition(JobState::Running, ts)?;
        }
        Ok(HeartbeatOutcome { cancel_requested })
    }

    async fn complete_lease(
        &self,
        lease_id: &LeaseId,
        runner_id: &RunnerId,
        outcome: CompletionOutcome,
        now: DateTime<Utc>,
    ) -> StoreResult<Job> {
        let mut state = self.state.lock().await;
        let job_id = {
            let lease = state
                .leases
                .get_mut(lease_id)
                .ok_or_else(|| StoreError::InvalidLease(lease_id.to_string()))?;
            if &lease.runner_id != runner_id || !lease.state.is_active() {
                return Err(StoreError::InvalidLease(lease_id.to_string()));
            }
            lease.state = LeaseState::Released;
            lease.job_id.clone()
        };
        state.active_lease_by_job.remove(&job_id);

        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::Fatal(format!("unknown job {job_id}")))?;

        // Complete is idempotent: a retry after the job already reached a
        // terminal state is a no-op (R1).
        if job.state.is_terminal() {
            return Ok(job.clone());
        }

        match outcome {
            CompletionOutcome::Succeeded => {
                job.transition(JobState::Succeeded, now)?;
            }
            CompletionOutcome::Failed { exit_code, summary } => {
                job.exit_code = exit_code;
                job.summary = summary;
                job.failure_reason = Some(FailureReason::RunnerFailed);
                job.transition(JobState::Failed, now)?;
            }
        }
        Ok(job.clone())
    }

    async fn cancel_ack(
        &self,
        lease_id: &LeaseId,
        runner_id: &RunnerId,
        final_status: CancelFinalStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Job> {
        let mut state = self.state.lock().await;
        let job_id = {
            let lease = state
                .leases
                .get_mut(lease_id)
                .ok_or_else(|| StoreError::InvalidLease(lease_id.to_string()))?;
            if &lease.runner_id != runner_id || !lease.state.is_active() {
                return Err(StoreError::InvalidLease(lease_id.to_string()));
            }
            lease.state = LeaseState::Released;
            lease.job_id.clone()
        };
        state.active_lease_by_job.remove(&job_id);

        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::Fatal(format!("unknown job {job_id}")))?;

        // The first-committed terminal is authoritative: a `canceled`
        // CancelAck arriving after a non-cancel terminal is a no-op
        // (spec §4.5, §9 Open Question "cancel wins").
        if job.state.is_terminal() {
            return Ok(job.clone());
        }

        let target = match final_status {
            CancelFinalStatus::Canceled => JobState::Canceled,
            CancelFinalStatus::Succeeded => JobState::Succeeded,
            CancelFinalStatus::Failed => JobState::Failed,
        };
        if target == JobState::Canceled {
            job.failure_reason = Some(FailureReason::Canceled);
        }
        job.transition(target, now)?;
        Ok(job.clone())
    }

    async fn request_cancel(&self, target: CancelTarget) -> StoreResult<Vec<LeaseId>> {
        let mut state = self.state.lock().await;
        let job_ids: Vec<JobId> = match target {
            CancelTarget::Job(job_id) => vec![job_id],
            CancelTarget::Run(run_id) => state
                .jobs_by_run
                .get(&run_id)
                .cloned()
                .unwrap_or_default(),
        };

        let mut affected = Vec::new();
        for job_id in job_ids {
            if let Some(lease_id) = state.active_lease_by_job.get(&job_id).cloned() {
                if let Some(lease) = state.leases.get_mut(&lease_id) {
                    if lease.state.is_active() {
                        lease.cancel_requested = true;
                        affected.push(lease_id);
                    }
                }
            }
        }
        Ok(affected)
    }

    async fn expire_leases(
        &self,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> StoreResult<ExpireOutcome> {
        let mut state = self.state.lock().await;
        let expired_lease_ids: Vec<LeaseId> = state
            .leases
            .values()
            .filter(|lease| lease.state.is_active() && lease.expires_at < now)
            .map(|lease| lease.id.clone())
            .collect();

        let mut outcome = ExpireOutcome::default();
        for lease_id in expired_lease_ids {
            let (job_id, cancel_requested) = {
                let lease = state.leases.get_mut(&lease_id).expect("just listed");
                lease.state = LeaseState::Expired;
                (lease.job_id.clone(), lease.cancel_requested)
            };
            state.active_lease_by_job.remove(&job_id);

            let job = match state.jobs.get_mut(&job_id) {
                Some(job) => job,
                None => continue,
            };
            if job.state.is_terminal() {
                continue;
            }

            if job.attempts + 1 >= max_attempts {
                job.failure_reason = Some(if cancel_requested {
                    FailureReason::Canceled
                } else {
                    FailureReason::Exhausted
                });
                let target = if cancel_requested {
                    JobState::Canceled
                } else {
                    JobState::Failed
                };
                job.transition(target, now)?;
                outcome.exhausted.push(lease_id);
            } else {
                job.transition(JobState::Pending, now)?;
                outcome.requeued.push(lease_id);
            }
        }
        Ok(outcome)
    }

    async fn add_artifact(&self, artifact: Artifact) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state
            .artifacts_by_job
            .entry(artifact.job_id.clone())
            .or_default()
            .push(artifact);
        Ok(())
    }

    async fn list_artifacts_for_job(&self, job_id: &JobId) -> StoreResult<Vec<Artifact>> {
        Ok(self
            .state
            .lock()
            .await
            .artifacts_by_job
            .get(job_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_failure_explanation(&self, explanation: FailureExplanation) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state
            .failure_explanation_by_job
            .insert(explanation.job_id.clone(), explanation);
        Ok(())
    }

    async fn get_failure_explanation_for_job(
        &self,
        job_id: &JobId,
    ) -> StoreResult<Option<FailureExplanation>> {
        Ok(self
            .state
            .lock()
            .await
            .failure_explanation_by_job
            .get(job_id)
            .cloned())
    }

    async fn get_status_report(
        &self,
        run_id: &RunId,
        provider: &str,
    ) -> StoreResult<Option<StatusReport>> {
        Ok(self
            .state
            .lock()
            .await
            .status_reports
            .get(&(run_id.clone(), provider.to_string()))
            .cloned())
    }

    async fn upsert_status_report(&self, report: StatusReport) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state
            .status_reports
            .insert((report.run_id.clone(), report.provider.clone()), report);
        Ok(())
    }

    async fn list_runs_needing_attention(&self, limit: usize) -> StoreResult<Vec<RunId>> {
        let state = self.state.lock().await;
        let mut runs: Vec<&Run> = state.runs.values().filter(|run| run.state != RunState::Reported).collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.as_str().cmp(b.id.as_str())));
        Ok(runs.into_iter().take(limit).map(|run| run.id.clone()).collect())
    }
}

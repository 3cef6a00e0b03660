//! Aggregation and cancellation propagation (spec §4.3).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use delta_ci_core::{Job, JobId, JobState, Run, RunId, RunState};
use delta_ci_store::{CancelTarget, DurableStore};

use crate::error::{OrchestratorError, OrchestratorResult};

/// Re-evaluates a Run against the current state of its Jobs and advances
/// it as far as the job states allow. Re-entrant: calling this twice with
/// no new terminal Job events performs no further Store writes
/// (spec §4.3, §8 R1/R2).
pub async fn evaluate_run(
    store: &Arc<dyn DurableStore>,
    run_id: &RunId,
    now: DateTime<Utc>,
) -> OrchestratorResult<Run> {
    let mut run = store
        .get_run(run_id)
        .await?
        .ok_or_else(|| OrchestratorError::RunNotFound(run_id.to_string()))?;

    if run.state.is_terminal() {
        return Ok(run);
    }

    let jobs = store.list_jobs_for_run(run_id).await?;

    if run.state == RunState::Queued && jobs.iter().any(|job| job.state != JobState::Pending) {
        run = transition(store, &run, RunState::Running, now).await?;
    }

    if run.state == RunState::Running {
        let required: Vec<&Job> = jobs.iter().filter(|job| job.required).collect();
        if !required.is_empty() && required.iter().all(|job| job.state == JobState::Succeeded) {
            run = transition(store, &run, RunState::Success, now).await?;
        } else if required
            .iter()
            .any(|job| matches!(job.state, JobState::Failed | JobState::TimedOut | JobState::Canceled))
        {
            run = transition(store, &run, RunState::Failed, now).await?;
        }
    }

    Ok(run)
}

/// Checks the Run-level deadline (spec §4.3 "timeout"); a no-op once the
/// Run has already converged to a terminal state.
pub async fn check_deadline(
    store: &Arc<dyn DurableStore>,
    run_id: &RunId,
    deadline: StdDuration,
    now: DateTime<Utc>,
) -> OrchestratorResult<Option<Run>> {
    let run = store
        .get_run(run_id)
        .await?
        .ok_or_else(|| OrchestratorError::RunNotFound(run_id.to_string()))?;

    if run.state.is_terminal() {
        return Ok(None);
    }

    let elapsed = now.signed_duration_since(run.created_at);
    if elapsed.to_std().unwrap_or_default() < deadline {
        return Ok(None);
    }

    let run = transition(store, &run, RunState::Timeout, now).await?;
    Ok(Some(run))
}

/// Propagates a Run-level cancel: flags every active Lease
/// `cancel_requested` and, if legal, transitions the Run straight to
/// `canceled`. Cancellation is cooperative — jobs are not forcibly
/// terminated (spec §4.3, §4.6).
pub async fn request_cancel_run(
    store: &Arc<dyn DurableStore>,
    run_id: &RunId,
    now: DateTime<Utc>,
) -> OrchestratorResult<Run> {
    let run = store
        .get_run(run_id)
        .await?
        .ok_or_else(|| OrchestratorError::RunNotFound(run_id.to_string()))?;

    store.request_cancel(CancelTarget::Run(run_id.clone())).await?;

    if run.state.is_terminal() || !run.state.can_transition_to(RunState::Canceled) {
        return Ok(run);
    }

    transition(store, &run, RunState::Canceled, now).await
}

/// Propagates a Job-level cancel: flags the Job's active Lease
/// `cancel_requested`, transitions the Job straight to `canceled` if legal,
/// and re-evaluates the parent Run so a required Job's cancellation fails
/// the Run the same way any other required-job failure would
/// (spec §4.1 `RequestCancel(target)`, §4.3).
pub async fn request_cancel_job(
    store: &Arc<dyn DurableStore>,
    job_id: &JobId,
    now: DateTime<Utc>,
) -> OrchestratorResult<Job> {
    let job = store
        .get_job(job_id)
        .await?
        .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;

    store.request_cancel(CancelTarget::Job(job_id.clone())).await?;

    let job = if job.state.is_terminal() || !job.state.can_transition_to(JobState::Canceled) {
        job
    } else {
        let job = store.transition_job_state(job_id, JobState::Canceled, now).await?;
        tracing::info!(job_id = %job.id, run_id = %job.run_id, "job transitioned to canceled");
        job
    };

    evaluate_run(store, &job.run_id, now).await?;
    Ok(job)
}

async fn transition(
    store: &Arc<dyn DurableStore>,
    run: &Run,
    target: RunState,
    now: DateTime<Utc>,
) -> OrchestratorResult<Run> {
    let from = run.state;
    let run = store.transition_run_state(&run.id, target, now).await?;
    tracing::info!(run_id = %run.id, from = %from, to = %target, "run transitioned");
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use delta_ci_core::{EventType, NewJob};
    use delta_ci_store::{MemoryStore, NewRunWithTrigger};

    async fn queued_run_with_jobs(jobs: Vec<NewJob>) -> (Arc<dyn DurableStore>, RunId) {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let created = store
            .create_run_with_trigger(
                NewRunWithTrigger {
                    repo_id: "a/b".to_string(),
                    git_ref: "refs/heads/main".to_string(),
                    commit_sha: "c0ffee".to_string(),
                    provider: "github".to_string(),
                    event_type: EventType::Push,
                    repo_owner: "a".to_string(),
                    repo_name: "b".to_string(),
                    pr_number: None,
                },
                now,
            )
            .await
            .unwrap();
        store.transition_run_state(&created.run_id, RunState::Planning, now).await.unwrap();
        store.materialize_plan(&created.run_id, jobs, now).await.unwrap();
        (store, created.run_id)
    }

    fn job(name: &str, required: bool) -> NewJob {
        NewJob { name: name.to_string(), required, spec: serde_json::json!({}) }
    }

    #[tokio::test]
    async fn run_succeeds_once_all_required_jobs_succeed() {
        let (store, run_id) = queued_run_with_jobs(vec![job("build", true), job("lint", false)]).await;
        let now = Utc::now();
        let jobs = store.list_jobs_for_run(&run_id).await.unwrap();
        let build = jobs.iter().find(|j| j.name == "build").unwrap();
        let lint = jobs.iter().find(|j| j.name == "lint").unwrap();

        store.transition_job_state(&build.id, JobState::Leased, now).await.unwrap();
        store.transition_job_state(&build.id, JobState::Running, now).await.unwrap();
        store.transition_job_state(&build.id, JobState::Succeeded, now).await.unwrap();
        store.transition_job_state(&lint.id, JobState::Leased, now).await.unwrap();
        store.transition_job_state(&lint.id, JobState::Running, now).await.unwrap();
        store.transition_job_state(&lint.id, JobState::Failed, now).await.unwrap();

        let run = evaluate_run(&store, &run_id, now).await.unwrap();
        assert_eq!(run.state, RunState::Success);
    }

    #[tokio::test]
    async fn run_fails_when_a_required_job_fails() {
        let (store, run_id) = queued_run_with_jobs(vec![job("build", true)]).await;
        let now = Utc::now();
        let jobs = store.list_jobs_for_run(&run_id).await.unwrap();
        let build = &jobs[0];
        store.transition_job_state(&build.id, JobState::Leased, now).await.unwrap();
        store.transition_job_state(&build.id, JobState::Running, now).await.unwrap();
        store.transition_job_state(&build.id, JobState::Failed, now).await.unwrap();

        let run = evaluate_run(&store, &run_id, now).await.unwrap();
        assert_eq!(run.state, RunState::Failed);
    }

    #[tokio::test]
    async fn evaluate_run_is_idempotent_once_terminal() {
        let (store, run_id) = queued_run_with_jobs(vec![job("build", true)]).await;
        let now = Utc::now();
        let jobs = store.list_jobs_for_run(&run_id).await.unwrap();
        store.transition_job_state(&jobs[0].id, JobState::Leased, now).await.unwrap();
        store.transition_job_state(&jobs[0].id, JobState::Running, now).await.unwrap();
        store.transition_job_state(&jobs[0].id, JobState::Succeeded, now).await.unwrap();

        let first = evaluate_run(&store, &run_id, now).await.unwrap();
        let second = evaluate_run(&store, &run_id, now).await.unwrap();
        assert_eq!(first.state, RunState::Success);
        assert_eq!(second.state, RunState::Success);
    }

    #[tokio::test]
    async fn cancel_propagates_to_leases_and_run() {
        let (store, run_id) = queued_run_with_jobs(vec![job("build", true)]).await;
        let now = Utc::now();
        let run = request_cancel_run(&store, &run_id, now).await.unwrap();
        assert_eq!(run.state, RunState::Canceled);
    }

    #[tokio::test]
    async fn canceling_a_required_job_fails_the_run() {
        let (store, run_id) = queued_run_with_jobs(vec![job("build", true), job("lint", false)]).await;
        let now = Utc::now();
        let jobs = store.list_jobs_for_run(&run_id).await.unwrap();
        let build = jobs.iter().find(|j| j.name == "build").unwrap();

        let job = request_cancel_job(&store, &build.id, now).await.unwrap();
        assert_eq!(job.state, JobState::Canceled);

        let run = store.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Failed);
    }

    #[tokio::test]
    async fn canceling_a_job_twice_is_idempotent() {
        let (store, run_id) = queued_run_with_jobs(vec![job("build", true)]).await;
        let now = Utc::now();
        let jobs = store.list_jobs_for_run(&run_id).await.unwrap();

        let first = request_cancel_job(&store, &jobs[0].id, now).await.unwrap();
        let second = request_cancel_job(&store, &jobs[0].id, now).await.unwrap();
        assert_eq!(first.state, JobState::Canceled);
        assert_eq!(second.state, JobState::Canceled);

        let run = store.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Failed);
    }
}

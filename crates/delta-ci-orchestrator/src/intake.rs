//! Run creation and planning (spec §4.3 "Planning").

use std::sync::Arc;

use chrono::{DateTime, Utc};
use delta_ci_core::{PlanRequest, Planner, Run, RunState};
use delta_ci_ingress::NormalizedTrigger;
use delta_ci_store::{DurableStore, NewRunWithTrigger};

use crate::error::OrchestratorResult;

/// Outcome of intaking one normalized trigger.
#[derive(Clone, Debug)]
pub enum IntakeOutcome {
    /// A fresh Run was created and materialized into `queued`.
    Created(Run),
    /// The idempotency key matched an existing Run; no new work was done.
    Duplicate(Run),
    /// Planning failed; the Run was moved to `plan_failed`.
    PlanFailed(Run),
}

/// Creates the Run + Trigger, invokes `planner`, and materializes the
/// plan, or records `plan_failed` (spec §4.3). Duplicate triggers
/// (matching idempotency key) are recognized and left untouched.
pub async fn intake_trigger(
    store: &Arc<dyn DurableStore>,
    planner: &dyn Planner,
    trigger: NormalizedTrigger,
    now: DateTime<Utc>,
) -> OrchestratorResult<IntakeOutcome> {
    let created = store
        .create_run_with_trigger(
            NewRunWithTrigger {
                repo_id: trigger.repo_id.clone(),
                git_ref: trigger.git_ref.clone(),
                commit_sha: trigger.commit_sha.clone(),
                provider: trigger.provider.clone(),
                event_type: trigger.event_type,
                repo_owner: trigger.repo_owner.clone(),
                repo_name: trigger.repo_name.clone(),
                pr_number: trigger.pr_number,
            },
            now,
        )
        .await?;

    if created.duplicate {
        let run = store
            .get_run(&created.run_id)
            .await?
            .ok_or_else(|| crate::error::OrchestratorError::RunNotFound(created.run_id.to_string()))?;
        tracing::info!(run_id = %run.id, "duplicate trigger ignored");
        return Ok(IntakeOutcome::Duplicate(run));
    }

    let run = store
        .transition_run_state(&created.run_id, RunState::Planning, now)
        .await?;
    tracing::info!(run_id = %run.id, from = "created", to = "planning", "run transitioned");

    let plan_request = PlanRequest {
        run_id: run.id.clone(),
        repo_id: trigger.repo_id,
        git_ref: trigger.git_ref,
        commit_sha: trigger.commit_sha,
    };

    match planner.plan(&plan_request) {
        Ok(jobs) => {
            store.materialize_plan(&run.id, jobs, now).await?;
            let run = store.transition_run_state(&run.id, RunState::Queued, now).await?;
            tracing::info!(run_id = %run.id, from = "planning", to = "queued", "run transitioned");
            Ok(IntakeOutcome::Created(run))
        }
        Err(err) => {
            tracing::info!(run_id = %run.id, from = "planning", to = "plan_failed", error = %err, "planning failed");
            let run = store.transition_run_state(&run.id, RunState::PlanFailed, now).await?;
            Ok(IntakeOutcome::PlanFailed(run))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delta_ci_core::{EventType, NewJob, PlanError, StaticPlanner};
    use delta_ci_store::MemoryStore;

    fn trigger() -> NormalizedTrigger {
        NormalizedTrigger {
            repo_id: "a/b".to_string(),
            git_ref: "refs/heads/main".to_string(),
            commit_sha: "c0ffee".to_string(),
            provider: "github".to_string(),
            event_type: EventType::Push,
            repo_owner: "a".to_string(),
            repo_name: "b".to_string(),
            pr_number: None,
        }
    }

    struct FailingPlanner;
    impl Planner for FailingPlanner {
        fn plan(&self, _request: &PlanRequest) -> Result<Vec<NewJob>, PlanError> {
            Err(PlanError("no diff-aware plan available".to_string()))
        }
    }

    #[tokio::test]
    async fn intake_materializes_plan_and_reaches_queued() {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let outcome = intake_trigger(&store, &StaticPlanner, trigger(), Utc::now()).await.unwrap();
        match outcome {
            IntakeOutcome::Created(run) => {
                assert_eq!(run.state, RunState::Queued);
                let jobs = store.list_jobs_for_run(&run.id).await.unwrap();
                assert_eq!(jobs.len(), 2);
            }
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_trigger_is_recognized() {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        intake_trigger(&store, &StaticPlanner, trigger(), Utc::now()).await.unwrap();
        let outcome = intake_trigger(&store, &StaticPlanner, trigger(), Utc::now()).await.unwrap();
        assert!(matches!(outcome, IntakeOutcome::Duplicate(_)));
    }

    #[tokio::test]
    async fn planner_failure_moves_run_to_plan_failed() {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let outcome = intake_trigger(&store, &FailingPlanner, trigger(), Utc::now()).await.unwrap();
        match outcome {
            IntakeOutcome::PlanFailed(run) => assert_eq!(run.state, RunState::PlanFailed),
            other => panic!("expected PlanFailed, got {other:?}"),
        }
    }
}

//! `AcquireLease` selection (spec §4.4): the oldest `pending` job whose
//! required capabilities match the polling runner.

use std::sync::Arc;

use chrono::Duration;
use delta_ci_core::{JobId, LeaseId, RunId, RunnerId};
use delta_ci_store::DurableStore;
use serde_json::Value;

use crate::clock::Clock;
use crate::error::SchedulerResult;

/// How many oldest candidates to scan for a capability match before giving
/// up and returning `NoWork`. Keeps one busy/incompatible head-of-line job
/// from starving the scan if there's a compatible job slightly behind it.
const SCAN_WINDOW: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseGranted {
    pub lease_id: LeaseId,
    pub job_id: JobId,
    pub run_id: RunId,
    pub job_spec: Value,
    pub heartbeat_interval: Duration,
    pub ttl: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted(LeaseGranted),
    NoWork,
}

/// Grants job capability requirements live under `spec.capabilities` as a
/// JSON array of strings; a job with no such array matches every runner.
fn capabilities_match(spec: &Value, runner_capabilities: &[String]) -> bool {
    let Some(required) = spec.get("capabilities").and_then(Value::as_array) else {
        return true;
    };
    required.iter().all(|cap| match cap.as_str() {
        Some(cap) => runner_capabilities.iter().any(|have| have == cap),
        None => false,
    })
}

pub struct LeaseDispatcher {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    lease_ttl: Duration,
}

impl LeaseDispatcher {
    pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>, lease_ttl: Duration) -> Self {
        Self { store, clock, lease_ttl }
    }

    /// Scans the oldest dispatchable jobs for one whose capabilities the
    /// runner satisfies and grants it a lease. At most one grant per call
    /// (spec §4.4).
    pub async fn acquire_lease(
        &self,
        runner_id: &RunnerId,
        runner_capabilities: &[String],
    ) -> SchedulerResult<AcquireOutcome> {
        let candidates = self.store.list_dispatchable_jobs(SCAN_WINDOW).await?;

        for candidate in candidates {
            let Some(job) = self.store.get_job(&candidate.job_id).await? else {
                continue;
            };
            if !capabilities_match(&job.spec, runner_capabilities) {
                continue;
            }

            let now = self.clock.now();
            let lease = self
                .store
                .grant_lease(&candidate.job_id, runner_id, self.lease_ttl, now)
                .await?;

            tracing::info!(
                lease_id = %lease.id,
                job_id = %candidate.job_id,
                run_id = %candidate.run_id,
                runner_id = %runner_id,
                "lease granted"
            );

            return Ok(AcquireOutcome::Granted(LeaseGranted {
                lease_id: lease.id,
                job_id: candidate.job_id,
                run_id: candidate.run_id,
                job_spec: job.spec,
                heartbeat_interval: self.lease_ttl / 3,
                ttl: self.lease_ttl,
            }));
        }

        Ok(AcquireOutcome::NoWork)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FixedClock;
    use delta_ci_core::{EventType, RunState};
    use delta_ci_store::{MemoryStore, NewRunWithTrigger};

    async fn store_with_job() -> (Arc<dyn DurableStore>, RunId) {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let now = chrono::Utc::now();
        let result = store
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
        store.transition_run_state(&result.run_id, RunState::Planning, now).await.unwrap();
        store
            .materialize_plan(
                &result.run_id,
                vec![delta_ci_core::NewJob {
                    name: "build".to_string(),
                    required: true,
                    spec: serde_json::json!({"capabilities": ["linux"]}),
                }],
                now,
            )
            .await
            .unwrap();
        (store, result.run_id)
    }

    #[tokio::test]
    async fn grants_lease_to_a_runner_with_matching_capability() {
        let (store, _run_id) = store_with_job().await;
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(chrono::Utc::now()));
        let dispatcher = LeaseDispatcher::new(store, clock, Duration::seconds(60));

        let outcome = dispatcher
            .acquire_lease(&RunnerId::new("runner-1"), &["linux".to_string()])
            .await
            .unwrap();

        match outcome {
            AcquireOutcome::Granted(granted) => {
                assert_eq!(granted.heartbeat_interval, Duration::seconds(20));
            }
            AcquireOutcome::NoWork => panic!("expected a grant"),
        }
    }

    #[tokio::test]
    async fn returns_no_work_when_no_runner_satisfies_capabilities() {
        let (store, _run_id) = store_with_job().await;
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(chrono::Utc::now()));
        let dispatcher = LeaseDispatcher::new(store, clock, Duration::seconds(60));

        let outcome = dispatcher
            .acquire_lease(&RunnerId::new("runner-1"), &["windows".to_string()])
            .await
            .unwrap();

        assert_eq!(outcome, AcquireOutcome::NoWork);
    }

    #[tokio::test]
    async fn returns_no_work_when_store_is_empty() {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(chrono::Utc::now()));
        let dispatcher = LeaseDispatcher::new(store, clock, Duration::seconds(60));

        let outcome = dispatcher
            .acquire_lease(&RunnerId::new("runner-1"), &[])
            .await
            .unwrap();

        assert_eq!(outcome, AcquireOutcome::NoWork);
    }
}

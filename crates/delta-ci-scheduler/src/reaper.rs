//! Lease reaper (spec §4.4): periodically expires leases whose `expires_at`
//! has passed and requeues or fails their jobs. Mirrors the teacher's
//! tick-based `LeaseManager`, but driven by a background `tokio` task
//! instead of being invoked by hand.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use delta_ci_store::{DurableStore, ExpireOutcome};
use tokio::sync::watch;

use crate::clock::Clock;
use crate::error::SchedulerResult;

#[derive(Clone, Debug)]
pub struct ReaperConfig {
    pub interval: StdDuration,
    pub max_attempts: u32,
}

pub struct Reaper {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    config: ReaperConfig,
}

impl Reaper {
    pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>, config: ReaperConfig) -> Self {
        Self { store, clock, config }
    }

    /// One reaper pass. Exposed standalone so callers can drive it from a
    /// test without sleeping in real time.
    pub async fn tick(&self) -> SchedulerResult<ExpireOutcome> {
        let outcome = self
            .store
            .expire_leases(self.clock.now(), self.config.max_attempts)
            .await?;
        if outcome.total() > 0 {
            tracing::info!(
                requeued = outcome.requeued.len(),
                exhausted = outcome.exhausted.len(),
                "reaper expired leases"
            );
        }
        Ok(outcome)
    }

    /// Spawns the reaper loop, ticking on `config.interval` until `shutdown`
    /// is set to `true`. Returns the `JoinHandle` so the CLI can await it on
    /// graceful shutdown.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick().await {
                            tracing::error!(error = %e, "reaper tick failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            tracing::info!("reaper shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FixedClock;
    use delta_ci_core::{EventType, JobState, RunState};
    use delta_ci_store::{MemoryStore, NewRunWithTrigger};

    #[tokio::test]
    async fn tick_requeues_an_expired_lease() {
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
        let jobs = store
            .materialize_plan(
                &result.run_id,
                vec![delta_ci_core::NewJob {
                    name: "build".to_string(),
                    required: true,
                    spec: serde_json::json!({}),
                }],
                now,
            )
            .await
            .unwrap();
        let job_id = jobs[0].id.clone();

        store
            .grant_lease(&job_id, &delta_ci_core::RunnerId::new("runner-1"), chrono::Duration::seconds(1), now)
            .await
            .unwrap();

        let clock = Arc::new(FixedClock::new(now + chrono::Duration::seconds(5)));
        let reaper = Reaper::new(
            store.clone(),
            clock,
            ReaperConfig { interval: StdDuration::from_secs(1), max_attempts: 3 },
        );

        let outcome = reaper.tick().await.unwrap();
        assert_eq!(outcome.requeued.len(), 1);

        let job = store.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 1);
    }
}

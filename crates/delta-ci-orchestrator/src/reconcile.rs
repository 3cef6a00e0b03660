//! Reconciliation loop (spec §4.3, §4.6): advances every non-terminal Run
//! and publishes status on every Run not yet `reported`. Mirrors the
//! Reaper's tick-based background task; `evaluate_run`/`check_deadline`/
//! `publish_status` are all no-ops once nothing has changed, so a tick
//! over a Run with no new events costs one Store round trip, not a write.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use delta_ci_reporter::{publish_status, StatusProvider};
use delta_ci_store::DurableStore;
use tokio::sync::watch;

use crate::error::OrchestratorResult;
use crate::lifecycle::{check_deadline, evaluate_run};

#[derive(Clone)]
pub struct ReconcilerConfig {
    pub interval: StdDuration,
    pub run_deadline: Option<StdDuration>,
    pub provider_name: String,
}

pub struct Reconciler {
    store: Arc<dyn DurableStore>,
    provider: Arc<dyn StatusProvider>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(store: Arc<dyn DurableStore>, provider: Arc<dyn StatusProvider>, config: ReconcilerConfig) -> Self {
        Self { store, provider, config }
    }

    /// One reconciliation pass. Exposed standalone so callers can drive it
    /// from a test without sleeping in real time.
    pub async fn tick(&self) -> OrchestratorResult<usize> {
        let now = Utc::now();
        let run_ids = self.store.list_runs_needing_attention(256).await?;
        for run_id in &run_ids {
            evaluate_run(&self.store, run_id, now).await?;
            if let Some(deadline) = self.config.run_deadline {
                check_deadline(&self.store, run_id, deadline, now).await?;
            }
            if let Err(err) =
                publish_status(&self.store, self.provider.as_ref(), run_id, &self.config.provider_name).await
            {
                tracing::error!(run_id = %run_id, error = %err, "status publish failed");
            }
        }
        Ok(run_ids.len())
    }

    /// Spawns the reconciler loop, ticking on `config.interval` until
    /// `shutdown` is set to `true`. Returns the `JoinHandle` so the CLI can
    /// await it on graceful shutdown.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick().await {
                            tracing::error!(error = %e, "reconciler tick failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            tracing::info!("reconciler shutting down");
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
    use delta_ci_core::{EventType, NewJob, RunState};
    use delta_ci_reporter::RecordingProvider;
    use delta_ci_store::{MemoryStore, NewRunWithTrigger};

    async fn queued_run() -> (Arc<dyn DurableStore>, delta_ci_core::RunId) {
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
        let jobs = store
            .materialize_plan(
                &created.run_id,
                vec![NewJob { name: "build".to_string(), required: true, spec: serde_json::json!({}) }],
                now,
            )
            .await
            .unwrap();
        store.transition_run_state(&created.run_id, RunState::Running, now).await.unwrap();
        store.transition_job_state(&jobs[0].id, delta_ci_core::JobState::Leased, now).await.unwrap();
        store.transition_job_state(&jobs[0].id, delta_ci_core::JobState::Running, now).await.unwrap();
        store.transition_job_state(&jobs[0].id, delta_ci_core::JobState::Succeeded, now).await.unwrap();
        (store, created.run_id)
    }

    #[tokio::test]
    async fn tick_advances_a_completed_run_and_reports_it() {
        let (store, run_id) = queued_run().await;
        let provider = Arc::new(RecordingProvider::new());
        let reconciler = Reconciler::new(
            store.clone(),
            provider.clone(),
            ReconcilerConfig { interval: StdDuration::from_secs(1), run_deadline: None, provider_name: "github".to_string() },
        );

        let touched = reconciler.tick().await.unwrap();
        assert_eq!(touched, 1);

        let run = store.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Reported);
        assert_eq!(provider.checks.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn a_run_already_reported_is_excluded_from_the_next_pass() {
        let (store, _run_id) = queued_run().await;
        let provider = Arc::new(RecordingProvider::new());
        let reconciler = Reconciler::new(
            store.clone(),
            provider.clone(),
            ReconcilerConfig { interval: StdDuration::from_secs(1), run_deadline: None, provider_name: "github".to_string() },
        );

        reconciler.tick().await.unwrap();
        let touched = reconciler.tick().await.unwrap();
        assert_eq!(touched, 0);
        assert_eq!(provider.checks.lock().unwrap().len(), 1);
    }
}

//! Publishes Run state to an external provider (spec §4.6): idempotent,
//! convergent, and skip-on-unchanged.

use std::sync::Arc;

use chrono::Utc;
use delta_ci_core::{map_run_state_to_check, RunId, StatusReport};
use delta_ci_store::{DurableStore, StoreError};

use crate::error::{ProviderError, ReporterError, ReporterResult};
use crate::provider::{CheckUpdate, CommentUpdate, StatusProvider};
use crate::sanitize::sanitize_line;

const MAX_SUMMARY_LINE_BYTES: usize = 2_000;

/// Publishes the current state of `run_id` for `provider`. A no-op if
/// `StatusReport.last_state` already matches the Run's current state
/// (spec §4.6 "Skipping").
pub async fn publish_status(
    store: &Arc<dyn DurableStore>,
    provider: &dyn StatusProvider,
    run_id: &RunId,
    provider_name: &str,
) -> ReporterResult<()> {
    let run = store
        .get_run(run_id)
        .await?
        .ok_or_else(|| ReporterError::RunNotFound(run_id.to_string()))?;

    if run.state == delta_ci_core::RunState::Reported {
        return Ok(());
    }

    let mut report = store
        .get_status_report(run_id, provider_name)
        .await?
        .unwrap_or_else(|| StatusReport::new(run_id.clone(), provider_name));

    if !report.is_stale_for(run.state) {
        return Ok(());
    }

    let trigger = store.get_trigger_for_run(run_id).await?;
    let (title, summary) = build_summary(store, run_id, &run).await?;
    let mapping = map_run_state_to_check(run.state);

    let check_run_id = create_or_update_check_with_recreate(
        provider,
        &run,
        trigger.as_ref().map(|t| t.repo_owner.as_str()).unwrap_or_default(),
        trigger.as_ref().map(|t| t.repo_name.as_str()).unwrap_or_default(),
        report.check_run_id.clone(),
        &title,
        &summary,
        mapping.status,
        mapping.conclusion,
    )
    .await?;
    report.check_run_id = Some(check_run_id);

    if run.state.is_reportable_terminal() {
        if let Some(trigger) = trigger.as_ref() {
            if let Some(pr_number) = trigger.pr_number {
                let comment_id = create_or_update_comment_with_recreate(
                    provider,
                    &trigger.repo_owner,
                    &trigger.repo_name,
                    pr_number,
                    report.pr_comment_id.clone(),
                    &summary,
                )
                .await?;
                report.pr_comment_id = Some(comment_id);
            }
        }
    }

    report.last_state = run.state.as_str().to_string();
    store.upsert_status_report(report).await?;

    if run.state.is_reportable_terminal() {
        match store.transition_run_state(run_id, delta_ci_core::RunState::Reported, Utc::now()).await {
            Ok(_) => {}
            Err(StoreError::IllegalTransition(inner)) if inner.is_illegal_transition() => {
                tracing::info!(run_id = %run_id, "reported transition raced with a concurrent update, ignoring");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn create_or_update_check_with_recreate(
    provider: &dyn StatusProvider,
    run: &delta_ci_core::Run,
    repo_owner: &str,
    repo_name: &str,
    existing_check_run_id: Option<String>,
    title: &str,
    summary: &str,
    status: &'static str,
    conclusion: Option<&'static str>,
) -> ReporterResult<String> {
    let update = CheckUpdate {
        repo_owner: repo_owner.to_string(),
        repo_name: repo_name.to_string(),
        commit_sha: run.commit_sha.clone(),
        existing_check_run_id: existing_check_run_id.clone(),
        title: title.to_string(),
        summary: summary.to_string(),
        status,
        conclusion,
    };
    match provider.create_or_update_check(update.clone()).await {
        Ok(id) => Ok(id),
        Err(ProviderError::NotFound) if existing_check_run_id.is_some() => {
            let mut retry = update;
            retry.existing_check_run_id = None;
            provider.create_or_update_check(retry).await.map_err(|e| ReporterError::Provider(e.to_string()))
        }
        Err(err) => Err(ReporterError::Provider(err.to_string())),
    }
}

async fn create_or_update_comment_with_recreate(
    provider: &dyn StatusProvider,
    repo_owner: &str,
    repo_name: &str,
    pr_number: u64,
    existing_comment_id: Option<String>,
    body: &str,
) -> ReporterResult<String> {
    let update = CommentUpdate {
        repo_owner: repo_owner.to_string(),
        repo_name: repo_name.to_string(),
        pr_number,
        existing_comment_id: existing_comment_id.clone(),
        body: body.to_string(),
    };
    match provider.create_or_update_comment(update.clone()).await {
        Ok(id) => Ok(id),
        Err(ProviderError::NotFound) if existing_comment_id.is_some() => {
            let mut retry = update;
            retry.existing_comment_id = None;
            provider.create_or_update_comment(retry).await.map_err(|e| ReporterError::Provider(e.to_string()))
        }
        Err(err) => Err(ReporterError::Provider(err.to_string())),
    }
}

async fn build_summary(
    store: &Arc<dyn DurableStore>,
    run_id: &RunId,
    run: &delta_ci_core::Run,
) -> ReporterResult<(String, String)> {
    let title = format!("delta-ci: {} ({})", run.state, &run.commit_sha[..run.commit_sha.len().min(7)]);

    let jobs = store.list_jobs_for_run(run_id).await?;
    let mut lines = Vec::with_capacity(jobs.len());
    for job in &jobs {
        let mut line = format!("- {}: {}", job.name, job.state);
        if job.state.is_non_success_terminal() {
            if let Some(explanation) = store.get_failure_explanation_for_job(&job.id).await? {
                line.push_str(&format!(" — {}", sanitize_line(&explanation.summary, MAX_SUMMARY_LINE_BYTES)));
            } else if let Some(summary) = &job.summary {
                line.push_str(&format!(" — {}", sanitize_line(summary, MAX_SUMMARY_LINE_BYTES)));
            }
        }
        lines.push(line);
    }

    Ok((title, lines.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use delta_ci_core::{EventType, NewJob};
    use delta_ci_store::{MemoryStore, NewRunWithTrigger};

    use crate::provider::test_support::RecordingProvider;

    async fn run_through_to_success(pr_triggered: bool) -> (Arc<dyn DurableStore>, RunId) {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let created = store
            .create_run_with_trigger(
                NewRunWithTrigger {
                    repo_id: "a/b".to_string(),
                    git_ref: "refs/heads/main".to_string(),
                    commit_sha: "c0ffeefeed".to_string(),
                    provider: "github".to_string(),
                    event_type: if pr_triggered { EventType::PullRequest } else { EventType::Push },
                    repo_owner: "a".to_string(),
                    repo_name: "b".to_string(),
                    pr_number: if pr_triggered { Some(7) } else { None },
                },
                now,
            )
            .await
            .unwrap();
        store.transition_run_state(&created.run_id, delta_ci_core::RunState::Planning, now).await.unwrap();
        let jobs = store
            .materialize_plan(
                &created.run_id,
                vec![NewJob { name: "build".to_string(), required: true, spec: serde_json::json!({}) }],
                now,
            )
            .await
            .unwrap();
        store.transition_run_state(&created.run_id, delta_ci_core::RunState::Running, now).await.unwrap();
        store.transition_job_state(&jobs[0].id, delta_ci_core::JobState::Leased, now).await.unwrap();
        store.transition_job_state(&jobs[0].id, delta_ci_core::JobState::Running, now).await.unwrap();
        store.transition_job_state(&jobs[0].id, delta_ci_core::JobState::Succeeded, now).await.unwrap();
        store.transition_run_state(&created.run_id, delta_ci_core::RunState::Success, now).await.unwrap();
        (store, created.run_id)
    }

    #[tokio::test]
    async fn publish_creates_check_and_transitions_to_reported() {
        let (store, run_id) = run_through_to_success(false).await;
        let provider = RecordingProvider::new();
        publish_status(&store, &provider, &run_id, "github").await.unwrap();

        assert_eq!(provider.checks.lock().unwrap().len(), 1);
        assert!(provider.comments.lock().unwrap().is_empty());
        let run = store.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.state, delta_ci_core::RunState::Reported);
    }

    #[tokio::test]
    async fn publish_emits_pr_comment_only_for_pr_triggered_runs() {
        let (store, run_id) = run_through_to_success(true).await;
        let provider = RecordingProvider::new();
        publish_status(&store, &provider, &run_id, "github").await.unwrap();
        assert_eq!(provider.comments.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn publish_is_a_no_op_once_last_state_matches() {
        let (store, run_id) = run_through_to_success(false).await;
        let provider = RecordingProvider::new();
        publish_status(&store, &provider, &run_id, "github").await.unwrap();
        // Run is now `reported`; a second publish sees last_state == "reported" == run.state, so it's a no-op.
        publish_status(&store, &provider, &run_id, "github").await.unwrap();
        assert_eq!(provider.checks.lock().unwrap().len(), 1);
    }
}

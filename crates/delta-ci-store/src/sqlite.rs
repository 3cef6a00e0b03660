//! SQLite-backed [`DurableStore`] (spec §4.1, §9 "storage backends").
//!
//! Default backend: single-file or in-memory, good enough for a single
//! kernel instance and for tests that want real SQL semantics instead of
//! [`crate::memory::MemoryStore`]'s hand-rolled guards.

#![cfg(feature = "sqlite")]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use delta_ci_core::{
    Artifact, ArtifactId, EventType, FailureCategory, FailureExplanation, FailureReason, Job,
    JobId, JobState, Lease, LeaseId, LeaseState, NewJob, Run, RunId, RunState, RunnerId,
    StatusReport, Trigger, TriggerId,
};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::model::{
    CancelFinalStatus, CancelTarget, CompletionOutcome, CreateRunResult, DispatchCandidate,
    ExpireOutcome, HeartbeatOutcome, NewRunWithTrigger,
};
use crate::traits::DurableStore;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("2067") || db_err.code().as_deref() == Some("1555"))
}

fn map_driver_err(prefix: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(format!("{prefix}: {e}"))
}

fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn parse_run_state(value: &str) -> StoreResult<RunState> {
    Ok(match value {
        "created" => RunState::Created,
        "planning" => RunState::Planning,
        "queued" => RunState::Queued,
        "running" => RunState::Running,
        "success" => RunState::Success,
        "failed" => RunState::Failed,
        "plan_failed" => RunState::PlanFailed,
        "canceled" => RunState::Canceled,
        "timeout" => RunState::Timeout,
        "reported" => RunState::Reported,
        other => return Err(StoreError::Fatal(format!("unknown run state: {other}"))),
    })
}

fn parse_job_state(value: &str) -> StoreResult<JobState> {
    Ok(match value {
        "pending" => JobState::Pending,
        "leased" => JobState::Leased,
        "running" => JobState::Running,
        "succeeded" => JobState::Succeeded,
        "failed" => JobState::Failed,
        "timed_out" => JobState::TimedOut,
        "canceled" => JobState::Canceled,
        other => return Err(StoreError::Fatal(format!("unknown job state: {other}"))),
    })
}

fn parse_lease_state(value: &str) -> StoreResult<LeaseState> {
    Ok(match value {
        "granted" => LeaseState::Granted,
        "acknowledged" => LeaseState::Acknowledged,
        "expired" => LeaseState::Expired,
        "released" => LeaseState::Released,
        other => return Err(StoreError::Fatal(format!("unknown lease state: {other}"))),
    })
}

fn parse_failure_reason(value: Option<&str>) -> Option<FailureReason> {
    match value {
        Some("runner_failed") => Some(FailureReason::RunnerFailed),
        Some("exhausted") => Some(FailureReason::Exhausted),
        Some("canceled") => Some(FailureReason::Canceled),
        Some("timed_out") => Some(FailureReason::TimedOut),
        _ => None,
    }
}

fn failure_reason_str(reason: FailureReason) -> &'static str {
    match reason {
        FailureReason::RunnerFailed => "runner_failed",
        FailureReason::Exhausted => "exhausted",
        FailureReason::Canceled => "canceled",
        FailureReason::TimedOut => "timed_out",
    }
}

fn parse_event_type(value: &str) -> StoreResult<EventType> {
    Ok(match value {
        "push" => EventType::Push,
        "pull_request" => EventType::PullRequest,
        other => return Err(StoreError::Fatal(format!("unknown event type: {other}"))),
    })
}

fn parse_failure_category(value: &str) -> StoreResult<FailureCategory> {
    Ok(match value {
        "user" => FailureCategory::User,
        "infra" => FailureCategory::Infra,
        "tooling" => FailureCategory::Tooling,
        "flaky" => FailureCategory::Flaky,
        other => return Err(StoreError::Fatal(format!("unknown failure category: {other}"))),
    })
}

fn parse_confidence(value: &str) -> StoreResult<delta_ci_core::Confidence> {
    use delta_ci_core::Confidence::*;
    Ok(match value {
        "low" => Low,
        "medium" => Medium,
        "high" => High,
        other => return Err(StoreError::Fatal(format!("unknown confidence: {other}"))),
    })
}

/// SQLite-backed Durable Store. `":memory:"` for tests, a file path for a
/// single-node deployment.
pub struct SqliteStore {
    pool: SqlitePool,
    schema_ready: OnceCell<()>,
}

impl SqliteStore {
    pub fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_lazy(database_url)
            .map_err(|e| map_driver_err("connect lazy", e))?;
        Ok(Self::with_pool(pool))
    }

    pub fn with_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            schema_ready: OnceCell::new(),
        }
    }

    async fn ensure_schema(&self) -> StoreResult<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query("PRAGMA foreign_keys = ON")
                    .execute(&self.pool)
                    .await
                    .map_err(|e| map_driver_err("enable foreign keys", e))?;
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS runs (
                        id TEXT PRIMARY KEY,
                        repo_id TEXT NOT NULL,
                        git_ref TEXT NOT NULL,
                        commit_sha TEXT NOT NULL,
                        state TEXT NOT NULL,
                        created_at_ms INTEGER NOT NULL,
                        updated_at_ms INTEGER NOT NULL
                    )",
                )
                .execute(&self.pool)
                .await
                .map_err(|e| map_driver_err("create runs", e))?;
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS triggers (
                        id TEXT PRIMARY KEY,
                        run_id TEXT NOT NULL UNIQUE,
                        provider TEXT NOT NULL,
                        event_type TEXT NOT NULL,
                        repo_owner TEXT NOT NULL,
                        repo_name TEXT NOT NULL,
                        pr_number INTEGER NULL,
                        idempotency_key TEXT NOT NULL UNIQUE
                    )",
                )
                .execute(&self.pool)
                .await
                .map_err(|e| map_driver_err("create triggers", e))?;
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS jobs (
                        id TEXT PRIMARY KEY,
                        run_id TEXT NOT NULL,
                        name TEXT NOT NULL,
                        required INTEGER NOT NULL,
                        spec_json TEXT NOT NULL,
                        state TEXT NOT NULL,
                        created_at_ms INTEGER NOT NULL,
                        updated_at_ms INTEGER NOT NULL,
                        attempts INTEGER NOT NULL,
                        exit_code INTEGER NULL,
                        summary TEXT NULL,
                        failure_reason TEXT NULL
                    )",
                )
                .execute(&self.pool)
                .await
                .map_err(|e| map_driver_err("create jobs", e))?;
                sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_run ON jobs(run_id)")
                    .execute(&self.pool)
                    .await
                    .map_err(|e| map_driver_err("create jobs index", e))?;
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS leases (
                        id TEXT PRIMARY KEY,
                        job_id TEXT NOT NULL UNIQUE,
                        runner_id TEXT NOT NULL,
                        state TEXT NOT NULL,
                        granted_at_ms INTEGER NOT NULL,
                        expires_at_ms INTEGER NOT NULL,
                        last_heartbeat_at_ms INTEGER NOT NULL,
                        cancel_requested INTEGER NOT NULL
                    )",
                )
                .execute(&self.pool)
                .await
                .map_err(|e| map_driver_err("create leases", e))?;
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS artifacts (
                        id TEXT PRIMARY KEY,
                        job_id TEXT NOT NULL,
                        kind TEXT NOT NULL,
                        uri TEXT NOT NULL
                    )",
                )
                .execute(&self.pool)
                .await
                .map_err(|e| map_driver_err("create artifacts", e))?;
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS failure_explanations (
                        id TEXT PRIMARY KEY,
                        job_id TEXT NOT NULL UNIQUE,
                        category TEXT NOT NULL,
                        confidence TEXT NOT NULL,
                        summary TEXT NOT NULL
                    )",
                )
                .execute(&self.pool)
                .await
                .map_err(|e| map_driver_err("create failure_explanations", e))?;
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS status_reports (
                        run_id TEXT NOT NULL,
                        provider TEXT NOT NULL,
                        check_run_id TEXT NULL,
                        pr_comment_id TEXT NULL,
                        last_state TEXT NOT NULL,
                        PRIMARY KEY (run_id, provider)
                    )",
                )
                .execute(&self.pool)
                .await
                .map_err(|e| map_driver_err("create status_reports", e))?;
                Ok::<(), StoreError>(())
            })
            .await?;
        Ok(())
    }

    fn row_to_run(&self, row: &sqlx::sqlite::SqliteRow) -> StoreResult<Run> {
        Ok(Run {
            id: RunId::new(row.get::<String, _>("id")),
            repo_id: row.get("repo_id"),
            git_ref: row.get("git_ref"),
            commit_sha: row.get("commit_sha"),
            state: parse_run_state(row.get::<String, _>("state").as_str())?,
            created_at: ms_to_dt(row.get("created_at_ms")),
            updated_at: ms_to_dt(row.get("updated_at_ms")),
        })
    }

    fn row_to_job(&self, row: &sqlx::sqlite::SqliteRow) -> StoreResult<Job> {
        Ok(Job {
            id: JobId::new(row.get::<String, _>("id")),
            run_id: RunId::new(row.get::<String, _>("run_id")),
            name: row.get("name"),
            required: row.get::<i64, _>("required") != 0,
            spec: serde_json::from_str(row.get::<String, _>("spec_json").as_str())
                .map_err(|e| StoreError::Fatal(format!("corrupt job spec: {e}")))?,
            state: parse_job_state(row.get::<String, _>("state").as_str())?,
            created_at: ms_to_dt(row.get("created_at_ms")),
            updated_at: ms_to_dt(row.get("updated_at_ms")),
            attempts: row.get::<i64, _>("attempts") as u32,
            exit_code: row.get::<Option<i64>, _>("exit_code").map(|v| v as i32),
            summary: row.get("summary"),
            failure_reason: parse_failure_reason(row.get::<Option<String>, _>("failure_reason").as_deref()),
        })
    }

    fn row_to_lease(&self, row: &sqlx::sqlite::SqliteRow) -> StoreResult<Lease> {
        Ok(Lease {
            id: LeaseId::new(row.get::<String, _>("id")),
            job_id: JobId::new(row.get::<String, _>("job_id")),
            runner_id: RunnerId::new(row.get::<String, _>("runner_id")),
            state: parse_lease_state(row.get::<String, _>("state").as_str())?,
            granted_at: ms_to_dt(row.get("granted_at_ms")),
            expires_at: ms_to_dt(row.get("expires_at_ms")),
            last_heartbeat_at: ms_to_dt(row.get("last_heartbeat_at_ms")),
            cancel_requested: row.get::<i64, _>("cancel_requested") != 0,
        })
    }

    async fn fetch_lease_for_update(&self, lease_id: &LeaseId) -> StoreResult<Lease> {
        let row = sqlx::query("SELECT * FROM leases WHERE id = ?1")
            .bind(lease_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_driver_err("fetch lease", e))?
            .ok_or_else(|| StoreError::InvalidLease(lease_id.to_string()))?;
        self.row_to_lease(&row)
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn create_run_with_trigger(
        &self,
        new_trigger: NewRunWithTrigger,
        now: DateTime<Utc>,
    ) -> StoreResult<CreateRunResult> {
        self.ensure_schema().await?;
        let key = delta_ci_core::compute_idempotency_key(
            &new_trigger.repo_id,
            &new_trigger.commit_sha,
            new_trigger.event_type,
            new_trigger.pr_number,
        );

        if let Some(row) = sqlx::query("SELECT run_id FROM triggers WHERE idempotency_key = ?1")
            .bind(&key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_driver_err("lookup idempotency key", e))?
        {
            return Ok(CreateRunResult {
                run_id: RunId::new(row.get::<String, _>("run_id")),
                duplicate: true,
            });
        }

        let run_id = RunId::new(format!("run-{}", Uuid::new_v4()));
        let trigger_id = TriggerId::new(format!("trigger-{}", Uuid::new_v4()));
        let now_ms = dt_to_ms(now);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_driver_err("begin create run tx", e))?;

        sqlx::query(
            "INSERT INTO runs (id, repo_id, git_ref, commit_sha, state, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, 'created', ?5, ?5)",
        )
        .bind(run_id.as_str())
        .bind(&new_trigger.repo_id)
        .bind(&new_trigger.git_ref)
        .bind(&new_trigger.commit_sha)
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_driver_err("insert run", e))?;

        let insert_trigger = sqlx::query(
            "INSERT INTO triggers (id, run_id, provider, event_type, repo_owner, repo_name, pr_number, idempotency_key)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(trigger_id.as_str())
        .bind(run_id.as_str())
        .bind(&new_trigger.provider)
        .bind(new_trigger.event_type.as_str())
        .bind(&new_trigger.repo_owner)
        .bind(&new_trigger.repo_name)
        .bind(new_trigger.pr_number.map(|n| n as i64))
        .bind(&key)
        .execute(&mut *tx)
        .await;

        match insert_trigger {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                let row = sqlx::query("SELECT run_id FROM triggers WHERE idempotency_key = ?1")
                    .bind(&key)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| map_driver_err("reread idempotency key", e))?;
                return Ok(CreateRunResult {
                    run_id: RunId::new(row.get::<String, _>("run_id")),
                    duplicate: true,
                });
            }
            Err(e) => return Err(map_driver_err("insert trigger", e)),
        }

        tx.commit()
            .await
            .map_err(|e| map_driver_err("commit create run tx", e))?;

        Ok(CreateRunResult {
            run_id,
            duplicate: false,
        })
    }

    async fn get_run(&self, run_id: &RunId) -> StoreResult<Option<Run>> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?1")
            .bind(run_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_driver_err("get run", e))?;
        row.as_ref().map(|r| self.row_to_run(r)).transpose()
    }

    async fn get_trigger_for_run(&self, run_id: &RunId) -> StoreResult<Option<Trigger>> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT * FROM triggers WHERE run_id = ?1")
            .bind(run_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_driver_err("get trigger", e))?;
        row.map(|row| -> StoreResult<Trigger> {
            Ok(Trigger {
                id: TriggerId::new(row.get::<String, _>("id")),
                run_id: run_id.clone(),
                provider: row.get("provider"),
                event_type: parse_event_type(row.get::<String, _>("event_type").as_str())?,
                repo_owner: row.get("repo_owner"),
                repo_name: row.get("repo_name"),
                pr_number: row.get::<Option<i64>, _>("pr_number").map(|n| n as u64),
                idempotency_key: row.get("idempotency_key"),
            })
        })
        .transpose()
    }

    async fn transition_run_state(
        &self,
        run_id: &RunId,
        target: RunState,
        now: DateTime<Utc>,
    ) -> StoreResult<Run> {
        self.ensure_schema().await?;
        let mut run = self
            .get_run(run_id)
            .await?
            .ok_or_else(|| StoreError::Fatal(format!("unknown run {run_id}")))?;
        run.transition(target, now)?;
        sqlx::query("UPDATE runs SET state = ?2, updated_at_ms = ?3 WHERE id = ?1")
            .bind(run_id.as_str())
            .bind(target.as_str())
            .bind(dt_to_ms(now))
            .execute(&self.pool)
            .await
            .map_err(|e| map_driver_err("update run state", e))?;
        Ok(run)
    }

    async fn materialize_plan(
        &self,
        run_id: &RunId,
        jobs: Vec<NewJob>,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Job>> {
        self.ensure_schema().await?;
        let mut run = self
            .get_run(run_id)
            .await?
            .ok_or_else(|| StoreError::Fatal(format!("unknown run {run_id}")))?;
        run.transition(RunState::Queued, now)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_driver_err("begin materialize plan tx", e))?;

        sqlx::query("UPDATE runs SET state = 'queued', updated_at_ms = ?2 WHERE id = ?1")
            .bind(run_id.as_str())
            .bind(dt_to_ms(now))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_driver_err("mark run queued", e))?;

        let mut created = Vec::with_capacity(jobs.len());
        for new_job in jobs {
            let job_id = JobId::new(format!("job-{}", Uuid::new_v4()));
            let job = Job::new(job_id, run_id.clone(), new_job.name, new_job.required, new_job.spec, now);
            sqlx::query(
                "INSERT INTO jobs (id, run_id, name, required, spec_json, state, created_at_ms, updated_at_ms, attempts, exit_code, summary, failure_reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, 0, NULL, NULL, NULL)",
            )
            .bind(job.id.as_str())
            .bind(run_id.as_str())
            .bind(&job.name)
            .bind(job.required)
            .bind(serde_json::to_string(&job.spec).unwrap_or_default())
            .bind(job.state.as_str())
            .bind(dt_to_ms(now))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_driver_err("insert job", e))?;
            created.push(job);
        }

        tx.commit()
            .await
            .map_err(|e| map_driver_err("commit materialize plan tx", e))?;
        Ok(created)
    }

    async fn get_job(&self, job_id: &JobId) -> StoreResult<Option<Job>> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?1")
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_driver_err("get job", e))?;
        row.as_ref().map(|r| self.row_to_job(r)).transpose()
    }

    async fn list_jobs_for_run(&self, run_id: &RunId) -> StoreResult<Vec<Job>> {
        self.ensure_schema().await?;
        let rows = sqlx::query("SELECT * FROM jobs WHERE run_id = ?1 ORDER BY created_at_ms ASC, id ASC")
            .bind(run_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_driver_err("list jobs for run", e))?;
        rows.iter().map(|r| self.row_to_job(r)).collect()
    }

    async fn transition_job_state(
        &self,
        job_id: &JobId,
        target: JobState,
        now: DateTime<Utc>,
    ) -> StoreResult<Job> {
        self.ensure_schema().await?;
        let mut job = self
            .get_job(job_id)
            .await?
            .ok_or_else(|| StoreError::Fatal(format!("unknown job {job_id}")))?;
        job.transition(target, now)?;
        sqlx::query("UPDATE jobs SET state = ?2, updated_at_ms = ?3, attempts = ?4 WHERE id = ?1")
            .bind(job_id.as_str())
            .bind(target.as_str())
            .bind(dt_to_ms(now))
            .bind(job.attempts as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| map_driver_err("update job state", e))?;
        Ok(job)
    }

    async fn list_dispatchable_jobs(&self, limit: usize) -> StoreResult<Vec<DispatchCandidate>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            "SELECT id, run_id, created_at_ms FROM jobs
             WHERE state = 'pending'
             ORDER BY created_at_ms ASC, id ASC
             LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_driver_err("list dispatchable jobs", e))?;
        Ok(rows
            .into_iter()
            .map(|row| DispatchCandidate {
                job_id: JobId::new(row.get::<String, _>("id")),
                run_id: RunId::new(row.get::<String, _>("run_id")),
                created_at: ms_to_dt(row.get("created_at_ms")),
            })
            .collect())
    }

    async fn grant_lease(
        &self,
        job_id: &JobId,
        runner_id: &RunnerId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Lease> {
        self.ensure_schema().await?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_driver_err("begin grant lease tx", e))?;

        let updated = sqlx::query("UPDATE jobs SET state = 'leased', updated_at_ms = ?2 WHERE id = ?1 AND state = 'pending'")
            .bind(job_id.as_str())
            .bind(dt_to_ms(now))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_driver_err("mark job leased", e))?
            .rows_affected();
        if updated == 0 {
            return Err(StoreError::NotLeasable(job_id.to_string()));
        }

        let lease_id = LeaseId::new(format!("lease-{}", Uuid::new_v4()));
        let expires_at = now + ttl;
        let insert = sqlx::query(
            "INSERT INTO leases (id, job_id, runner_id, state, granted_at_ms, expires_at_ms, last_heartbeat_at_ms, cancel_requested)
             VALUES (?1, ?2, ?3, 'granted', ?4, ?5, ?4, 0)",
        )
        .bind(lease_id.as_str())
        .bind(job_id.as_str())
        .bind(runner_id.as_str())
        .bind(dt_to_ms(now))
        .bind(dt_to_ms(expires_at))
        .execute(&mut *tx)
        .await;

        match insert {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(StoreError::NotLeasable(job_id.to_string()));
            }
            Err(e) => return Err(map_driver_err("insert lease", e)),
        }

        tx.commit()
            .await
            .map_err(|e| map_driver_err("commit grant lease tx", e))?;

        Ok(Lease {
            id: lease_id,
            job_id: job_id.clone(),
            runner_id: runner_id.clone(),
            state: LeaseState::Granted,
            granted_at: now,
            expires_at,
            last_heartbeat_at: now,
            cancel_requested: false,
        })
    }

    async fn get_lease(&self, lease_id: &LeaseId) -> StoreResult<Option<Lease>> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT * FROM leases WHERE id = ?1")
            .bind(lease_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_driver_err("get lease", e))?;
        row.as_ref().map(|r| self.row_to_lease(r)).transpose()
    }

    async fn get_active_lease_for_job(&self, job_id: &JobId) -> StoreResult<Option<Lease>> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT * FROM leases WHERE job_id = ?1 AND state IN ('granted', 'acknowledged')")
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_driver_err("get active lease for job", e))?;
        row.as_ref().map(|r| self.row_to_lease(r)).transpose()
    }

    async fn ack_lease(&self, lease_id: &LeaseId, runner_id: &RunnerId) -> StoreResult<Lease> {
        self.ensure_schema().await?;
        let mut lease = self.fetch_lease_for_update(lease_id).await?;
        if !lease.fence_matches(lease_id, runner_id) {
            return Err(StoreError::InvalidLease(lease_id.to_string()));
        }
        lease.state = LeaseState::Acknowledged;
        sqlx::query("UPDATE leases SET state = 'acknowledged' WHERE id = ?1")
            .bind(lease_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_driver_err("ack lease", e))?;
        Ok(lease)
    }

    async fn heartbeat(
        &self,
        lease_id: &LeaseId,
        runner_id: &RunnerId,
        ts: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreResult<HeartbeatOutcome> {
        self.ensure_schema().await?;
        let mut lease = self.fetch_lease_for_update(lease_id).await?;
        if !lease.fence_matches(lease_id, runner_id) {
            return Err(StoreError::InvalidLease(lease_id.to_string()));
        }
        lease.apply_heartbeat(ts, ts + ttl);
        sqlx::query("UPDATE leases SET last_heartbeat_at_ms = ?2, expires_at_ms = ?3 WHERE id = ?1")
            .bind(lease_id.as_str())
            .bind(dt_to_ms(lease.last_heartbeat_at))
            .bind(dt_to_ms(lease.expires_at))
            .execute(&self.pool)
            .await
            .map_err(|e| map_driver_err("heartbeat lease", e))?;

        let job = self
            .get_job(&lease.job_id)
            .await?
            .ok_or_else(|| StoreError::Fatal(format!("unknown job {}", lease.job_id)))?;
        if job.state == JobState::Leased {
            self.transition_job_state(&lease.job_id, JobState::Running, ts).await?;
        }
        Ok(HeartbeatOutcome {
            cancel_requested: lease.cancel_requested,
        })
    }

    async fn complete_lease(
        &self,
        lease_id: &LeaseId,
        runner_id: &RunnerId,
        outcome: CompletionOutcome,
        now: DateTime<Utc>,
    ) -> StoreResult<Job> {
        self.ensure_schema().await?;
        let lease = self.fetch_lease_for_update(lease_id).await?;
        if !lease.fence_matches(lease_id, runner_id) {
            return Err(StoreError::InvalidLease(lease_id.to_string()));
        }
        sqlx::query("UPDATE leases SET state = 'released' WHERE id = ?1")
            .bind(lease_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_driver_err("release lease", e))?;

        let job = self
            .get_job(&lease.job_id)
            .await?
            .ok_or_else(|| StoreError::Fatal(format!("unknown job {}", lease.job_id)))?;
        if job.state.is_terminal() {
            return Ok(job);
        }

        match outcome {
            CompletionOutcome::Succeeded => self.transition_job_state(&lease.job_id, JobState::Succeeded, now).await,
            CompletionOutcome::Failed { exit_code, summary } => {
                sqlx::query("UPDATE jobs SET exit_code = ?2, summary = ?3, failure_reason = ?4 WHERE id = ?1")
                    .bind(lease.job_id.as_str())
                    .bind(exit_code)
                    .bind(&summary)
                    .bind(failure_reason_str(FailureReason::RunnerFailed))
                    .execute(&self.pool)
                    .await
                    .map_err(|e| map_driver_err("record job failure", e))?;
                self.transition_job_state(&lease.job_id, JobState::Failed, now).await
            }
        }
    }

    async fn cancel_ack(
        &self,
        lease_id: &LeaseId,
        runner_id: &RunnerId,
        final_status: CancelFinalStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Job> {
        self.ensure_schema().await?;
        let lease = self.fetch_lease_for_update(lease_id).await?;
        if !lease.fence_matches(lease_id, runner_id) {
            return Err(StoreError::InvalidLease(lease_id.to_string()));
        }
        sqlx::query("UPDATE leases SET state = 'released' WHERE id = ?1")
            .bind(lease_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_driver_err("release lease", e))?;

        let job = self
            .get_job(&lease.job_id)
            .await?
            .ok_or_else(|| StoreError::Fatal(format!("unknown job {}", lease.job_id)))?;
        if job.state.is_terminal() {
            return Ok(job);
        }

        let target = match final_status {
            CancelFinalStatus::Canceled => JobState::Canceled,
            CancelFinalStatus::Succeeded => JobState::Succeeded,
            CancelFinalStatus::Failed => JobState::Failed,
        };
        if target == JobState::Canceled {
            sqlx::query("UPDATE jobs SET failure_reason = ?2 WHERE id = ?1")
                .bind(lease.job_id.as_str())
                .bind(failure_reason_str(FailureReason::Canceled))
                .execute(&self.pool)
                .await
                .map_err(|e| map_driver_err("record cancel reason", e))?;
        }
        self.transition_job_state(&lease.job_id, target, now).await
    }

    async fn request_cancel(&self, target: CancelTarget) -> StoreResult<Vec<LeaseId>> {
        self.ensure_schema().await?;
        let rows = match &target {
            CancelTarget::Job(job_id) => sqlx::query(
                "UPDATE leases SET cancel_requested = 1
                 WHERE job_id = ?1 AND state IN ('granted', 'acknowledged')
                 RETURNING id",
            )
            .bind(job_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_driver_err("request cancel", e))?,
            CancelTarget::Run(run_id) => sqlx::query(
                "UPDATE leases SET cancel_requested = 1
                 WHERE state IN ('granted', 'acknowledged')
                   AND job_id IN (SELECT id FROM jobs WHERE run_id = ?1)
                 RETURNING id",
            )
            .bind(run_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_driver_err("request cancel", e))?,
        };
        Ok(rows
            .into_iter()
            .map(|row| LeaseId::new(row.get::<String, _>("id")))
            .collect())
    }

    async fn expire_leases(&self, now: DateTime<Utc>, max_attempts: u32) -> StoreResult<ExpireOutcome> {
        self.ensure_schema().await?;
        let rows = sqlx::query("SELECT id FROM leases WHERE state IN ('granted', 'acknowledged') AND expires_at_ms < ?1")
            .bind(dt_to_ms(now))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_driver_err("list expired leases", e))?;

        let mut outcome = ExpireOutcome::default();
        for row in rows {
            let lease_id = LeaseId::new(row.get::<String, _>("id"));
            let lease = self.get_lease(&lease_id).await?.expect("just listed");
            sqlx::query("UPDATE leases SET state = 'expired' WHERE id = ?1")
                .bind(lease_id.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| map_driver_err("mark lease expired", e))?;

            let Some(job) = self.get_job(&lease.job_id).await? else {
                continue;
            };
            if job.state.is_terminal() {
                continue;
            }

            if job.attempts + 1 >= max_attempts {
                let reason = if lease.cancel_requested {
                    FailureReason::Canceled
                } else {
                    FailureReason::Exhausted
                };
                let target = if lease.cancel_requested {
                    JobState::Canceled
                } else {
                    JobState::Failed
                };
                sqlx::query("UPDATE jobs SET failure_reason = ?2 WHERE id = ?1")
                    .bind(job.id.as_str())
                    .bind(failure_reason_str(reason))
                    .execute(&self.pool)
                    .await
                    .map_err(|e| map_driver_err("record expiry reason", e))?;
                self.transition_job_state(&job.id, target, now).await?;
                outcome.exhausted.push(lease_id);
            } else {
                self.transition_job_state(&job.id, JobState::Pending, now).await?;
                outcome.requeued.push(lease_id);
            }
        }
        Ok(outcome)
    }

    async fn add_artifact(&self, artifact: Artifact) -> StoreResult<()> {
        self.ensure_schema().await?;
        sqlx::query("INSERT INTO artifacts (id, job_id, kind, uri) VALUES (?1, ?2, ?3, ?4)")
            .bind(artifact.id.as_str())
            .bind(artifact.job_id.as_str())
            .bind(&artifact.kind)
            .bind(&artifact.uri)
            .execute(&self.pool)
            .await
            .map_err(|e| map_driver_err("insert artifact", e))?;
        Ok(())
    }

    async fn list_artifacts_for_job(&self, job_id: &JobId) -> StoreResult<Vec<Artifact>> {
        self.ensure_schema().await?;
        let rows = sqlx::query("SELECT * FROM artifacts WHERE job_id = ?1")
            .bind(job_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_driver_err("list artifacts", e))?;
        Ok(rows
            .into_iter()
            .map(|row| Artifact {
                id: ArtifactId::new(row.get::<String, _>("id")),
                job_id: job_id.clone(),
                kind: row.get("kind"),
                uri: row.get("uri"),
            })
            .collect())
    }

    async fn add_failure_explanation(&self, explanation: FailureExplanation) -> StoreResult<()> {
        self.ensure_schema().await?;
        sqlx::query(
            "INSERT INTO failure_explanations (id, job_id, category, confidence, summary)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(job_id) DO UPDATE SET category = ?3, confidence = ?4, summary = ?5",
        )
        .bind(&explanation.id)
        .bind(explanation.job_id.as_str())
        .bind(match explanation.category {
            FailureCategory::User => "user",
            FailureCategory::Infra => "infra",
            FailureCategory::Tooling => "tooling",
            FailureCategory::Flaky => "flaky",
        })
        .bind(match explanation.confidence {
            delta_ci_core::Confidence::Low => "low",
            delta_ci_core::Confidence::Medium => "medium",
            delta_ci_core::Confidence::High => "high",
        })
        .bind(&explanation.summary)
        .execute(&self.pool)
        .await
        .map_err(|e| map_driver_err("upsert failure explanation", e))?;
        Ok(())
    }

    async fn get_failure_explanation_for_job(
        &self,
        job_id: &JobId,
    ) -> StoreResult<Option<FailureExplanation>> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT * FROM failure_explanations WHERE job_id = ?1")
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_driver_err("get failure explanation", e))?;
        row.map(|row| -> StoreResult<FailureExplanation> {
            Ok(FailureExplanation {
                id: row.get("id"),
                job_id: job_id.clone(),
                category: parse_failure_category(row.get::<String, _>("category").as_str())?,
                confidence: parse_confidence(row.get::<String, _>("confidence").as_str())?,
                summary: row.get("summary"),
            })
        })
        .transpose()
    }

    async fn get_status_report(&self, run_id: &RunId, provider: &str) -> StoreResult<Option<StatusReport>> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT * FROM status_reports WHERE run_id = ?1 AND provider = ?2")
            .bind(run_id.as_str())
            .bind(provider)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_driver_err("get status report", e))?;
        Ok(row.map(|row| StatusReport {
            run_id: run_id.clone(),
            provider: provider.to_string(),
            check_run_id: row.get("check_run_id"),
            pr_comment_id: row.get("pr_comment_id"),
            last_state: row.get("last_state"),
        }))
    }

    async fn upsert_status_report(&self, report: StatusReport) -> StoreResult<()> {
        self.ensure_schema().await?;
        sqlx::query(
            "INSERT INTO status_reports (run_id, provider, check_run_id, pr_comment_id, last_state)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(run_id, provider) DO UPDATE
               SET check_run_id = ?3, pr_comment_id = ?4, last_state = ?5",
        )
        .bind(report.run_id.as_str())
        .bind(&report.provider)
        .bind(&report.check_run_id)
        .bind(&report.pr_comment_id)
        .bind(&report.last_state)
        .execute(&self.pool)
        .await
        .map_err(|e| map_driver_err("upsert status report", e))?;
        Ok(())
    }

    async fn list_runs_needing_attention(&self, limit: usize) -> StoreResult<Vec<RunId>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            "SELECT id FROM runs
             WHERE state != 'reported'
             ORDER BY created_at_ms ASC, id ASC
             LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_driver_err("list runs needing attention", e))?;
        Ok(rows.into_iter().map(|row| RunId::new(row.get::<String, _>("id"))).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delta_ci_core::EventType;

    async fn store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").expect("in-memory sqlite store")
    }

    fn trigger() -> NewRunWithTrigger {
        NewRunWithTrigger {
            repo_id: "acme/widgets".to_string(),
            git_ref: "refs/heads/main".to_string(),
            commit_sha: "c0ffee".to_string(),
            provider: "github".to_string(),
            event_type: EventType::Push,
            repo_owner: "acme".to_string(),
            repo_name: "widgets".to_string(),
            pr_number: None,
        }
    }

    #[tokio::test]
    async fn create_run_persists_and_is_idempotent() {
        let store = store().await;
        let now = Utc::now();
        let first = store.create_run_with_trigger(trigger(), now).await.unwrap();
        assert!(!first.duplicate);
        let fetched = store.get_run(&first.run_id).await.unwrap();
        assert!(fetched.is_some());

        let second = store.create_run_with_trigger(trigger(), now).await.unwrap();
        assert!(second.duplicate);
        assert_eq!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn dispatch_lease_complete_round_trip() {
        let store = store().await;
        let now = Utc::now();
        let created = store.create_run_with_trigger(trigger(), now).await.unwrap();
        let jobs = store
            .materialize_plan(
                &created.run_id,
                vec![NewJob {
                    name: "build".to_string(),
                    required: true,
                    spec: serde_json::json!({}),
                }],
                now,
            )
            .await
            .unwrap();
        let job_id = jobs[0].id.clone();

        let runner = RunnerId::new("runner-1");
        let lease = store
            .grant_lease(&job_id, &runner, Duration::seconds(30), now)
            .await
            .unwrap();
        store.ack_lease(&lease.id, &runner).await.unwrap();
        let job = store
            .complete_lease(&lease.id, &runner, CompletionOutcome::Succeeded, now)
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Succeeded);
    }
}

//! Job entity and its state machine (spec §3, §4.3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::identity::{JobId, RunId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Leased,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Canceled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Canceled
        )
    }

    /// True for outcomes that are not a plain success; used by the
    /// aggregation routine (spec §4.3) to decide Run-level failure.
    pub fn is_non_success_terminal(self) -> bool {
        self.is_terminal() && self != Self::Succeeded
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Leased => "leased",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Canceled => "canceled",
        }
    }

    /// Checks the directed graph from spec §4.3 verbatim. `Leased ->
    /// Pending` models reaper-driven lease expiry (spec §4.1 `ExpireLeases`).
    pub fn can_transition_to(self, target: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, target),
            (Pending, Leased)
                | (Pending, Canceled)
                | (Leased, Running)
                | (Leased, Pending)
                | (Leased, Canceled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, TimedOut)
                | (Running, Canceled)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason recorded alongside a non-success terminal, surfaced by the
/// Reporter in its summary text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Job runner reported a non-zero exit.
    RunnerFailed,
    /// `max_attempts` exhausted after repeated lease expiry (spec §4.4).
    Exhausted,
    /// Run-level or job-level cancel was requested and honored.
    Canceled,
    /// Lease was never acknowledged/heartbeated before its TTL elapsed and
    /// no retry budget remained.
    TimedOut,
}

/// One schedulable unit under a Run (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub run_id: RunId,
    pub name: String,
    pub required: bool,
    /// Opaque blob: workdir, steps, cache directives (spec §3). The kernel
    /// never interprets this; it is handed verbatim to the runner.
    pub spec: serde_json::Value,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub attempts: u32,
    pub exit_code: Option<i32>,
    pub summary: Option<String>,
    pub failure_reason: Option<FailureReason>,
}

impl Job {
    pub fn new(
        id: JobId,
        run_id: RunId,
        name: impl Into<String>,
        required: bool,
        spec: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            run_id,
            name: name.into(),
            required,
            spec,
            state: JobState::Pending,
            created_at: now,
            updated_at: now,
            attempts: 0,
            exit_code: None,
            summary: None,
            failure_reason: None,
        }
    }

    pub fn transition(&mut self, target: JobState, now: DateTime<Utc>) -> Result<(), CoreError> {
        if !self.state.can_transition_to(target) {
            return Err(CoreError::illegal_transition(
                "Job",
                self.id.to_string(),
                self.state.as_str(),
                target.as_str(),
            ));
        }
        if target == JobState::Pending {
            self.attempts += 1;
        }
        self.state = target;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            JobId::new("j1"),
            RunId::new("r1"),
            "build",
            true,
            serde_json::json!({}),
            Utc::now(),
        )
    }

    #[test]
    fn lease_expiry_requeues_and_increments_attempts() {
        let mut job = job();
        job.transition(JobState::Leased, Utc::now()).unwrap();
        assert_eq!(job.attempts, 0);
        job.transition(JobState::Pending, Utc::now()).unwrap();
        assert_eq!(job.attempts, 1);
        assert_eq!(job.state, JobState::Pending);
    }

    #[test]
    fn terminal_states_are_sinks() {
        let mut job = job();
        job.transition(JobState::Leased, Utc::now()).unwrap();
        job.transition(JobState::Running, Utc::now()).unwrap();
        job.transition(JobState::Succeeded, Utc::now()).unwrap();
        assert!(job.state.is_terminal());
        let err = job
            .transition(JobState::Running, Utc::now())
            .expect_err("terminal state must reject further transitions");
        assert!(err.is_illegal_transition());
    }

    #[test]
    fn optional_job_failure_is_non_success_terminal_but_not_required_for_aggregation() {
        let mut optional = job();
        optional.required = false;
        optional.transition(JobState::Leased, Utc::now()).unwrap();
        optional.transition(JobState::Running, Utc::now()).unwrap();
        optional.transition(JobState::Failed, Utc::now()).unwrap();
        assert!(optional.state.is_non_success_terminal());
    }
}

//! Run entity and its state machine (spec §3, §4.3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::identity::RunId;

/// State of a [`Run`]. Ordering here is not meaningful; legality of a move
/// is decided by [`RunState::can_transition_to`], not by variant order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Created,
    Planning,
    Queued,
    Running,
    Success,
    Failed,
    PlanFailed,
    Canceled,
    Timeout,
    Reported,
}

impl RunState {
    /// Run states that may be published externally (spec §4.6, §3 invariant:
    /// "a run reaches `reported` only from a reportable terminal").
    pub fn is_reportable_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Canceled | Self::Timeout
        )
    }

    /// Sink states: no further transitions are legal.
    pub fn is_terminal(self) -> bool {
        self.is_reportable_terminal() || matches!(self, Self::PlanFailed | Self::Reported)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Planning => "planning",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::PlanFailed => "plan_failed",
            Self::Canceled => "canceled",
            Self::Timeout => "timeout",
            Self::Reported => "reported",
        }
    }

    /// Checks the directed graph from spec §4.3 verbatim.
    pub fn can_transition_to(self, target: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, target),
            (Created, Planning)
                | (Created, PlanFailed)
                | (Created, Canceled)
                | (Planning, Queued)
                | (Planning, PlanFailed)
                | (Planning, Canceled)
                | (Queued, Running)
                | (Queued, Canceled)
                | (Running, Success)
                | (Running, Failed)
                | (Running, Canceled)
                | (Running, Timeout)
                | (Success, Reported)
                | (Failed, Reported)
                | (Canceled, Reported)
                | (Timeout, Reported)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of CI for a commit (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub repo_id: String,
    pub git_ref: String,
    pub commit_sha: String,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(
        id: RunId,
        repo_id: impl Into<String>,
        git_ref: impl Into<String>,
        commit_sha: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            repo_id: repo_id.into(),
            git_ref: git_ref.into(),
            commit_sha: commit_sha.into(),
            state: RunState::Created,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validates and applies a transition in memory. The Store is the
    /// source of truth; this mirrors its guard so callers can fail fast
    /// before a round trip and so the Store implementation and in-process
    /// checks never disagree about legality.
    pub fn transition(&mut self, target: RunState, now: DateTime<Utc>) -> Result<(), CoreError> {
        if !self.state.can_transition_to(target) {
            return Err(CoreError::illegal_transition(
                "Run",
                self.id.to_string(),
                self.state.as_str(),
                target.as_str(),
            ));
        }
        self.state = target;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_push_sequence_is_legal() {
        let mut run = Run::new(RunId::new("r1"), "a/b", "refs/heads/main", "c0ffee", Utc::now());
        for target in [
            RunState::Planning,
            RunState::Queued,
            RunState::Running,
            RunState::Success,
            RunState::Reported,
        ] {
            run.transition(target, Utc::now()).expect("legal transition");
        }
        assert_eq!(run.state, RunState::Reported);
    }

    #[test]
    fn plan_failed_is_terminal_but_not_reportable() {
        assert!(RunState::PlanFailed.is_terminal());
        assert!(!RunState::PlanFailed.is_reportable_terminal());
        assert!(!RunState::PlanFailed.can_transition_to(RunState::Reported));
    }

    #[test]
    fn illegal_transition_is_rejected_and_state_unchanged() {
        let mut run = Run::new(RunId::new("r2"), "a/b", "refs/heads/main", "c0ffee", Utc::now());
        let err = run
            .transition(RunState::Running, Utc::now())
            .expect_err("created -> running must be illegal");
        assert!(err.is_illegal_transition());
        assert_eq!(run.state, RunState::Created);
    }

    #[test]
    fn reported_and_plan_failed_have_no_outgoing_edges() {
        for terminal in [RunState::Reported, RunState::PlanFailed] {
            for target in [
                RunState::Created,
                RunState::Planning,
                RunState::Queued,
                RunState::Running,
                RunState::Success,
                RunState::Failed,
                RunState::Canceled,
                RunState::Timeout,
            ] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }
}

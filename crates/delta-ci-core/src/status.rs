//! StatusReport entity (spec §3, §4.6): one per (run, provider), mutable,
//! upsert-only, and the record of external identifiers the Reporter must
//! preserve across retries.

use serde::{Deserialize, Serialize};

use crate::identity::RunId;
use crate::run::RunState;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusReport {
    pub run_id: RunId,
    pub provider: String,
    pub check_run_id: Option<String>,
    pub pr_comment_id: Option<String>,
    pub last_state: String,
}

impl StatusReport {
    pub fn new(run_id: RunId, provider: impl Into<String>) -> Self {
        Self {
            run_id,
            provider: provider.into(),
            check_run_id: None,
            pr_comment_id: None,
            last_state: String::new(),
        }
    }

    /// Spec §4.6 skip rule: a publish whose target state matches the last
    /// recorded state is a no-op.
    pub fn is_stale_for(&self, state: RunState) -> bool {
        self.last_state != state.as_str()
    }
}

/// External check status/conclusion pair (spec §4.6 mapping table).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckMapping {
    pub status: &'static str,
    pub conclusion: Option<&'static str>,
}

/// Maps a [`RunState`] to the external check status/conclusion per spec
/// §4.6's table, verbatim.
pub fn map_run_state_to_check(state: RunState) -> CheckMapping {
    use RunState::*;
    match state {
        Created | Planning | Queued => CheckMapping {
            status: "queued",
            conclusion: None,
        },
        Running => CheckMapping {
            status: "in_progress",
            conclusion: None,
        },
        Success => CheckMapping {
            status: "completed",
            conclusion: Some("success"),
        },
        Failed | PlanFailed => CheckMapping {
            status: "completed",
            conclusion: Some("failure"),
        },
        Canceled => CheckMapping {
            status: "completed",
            conclusion: Some("cancelled"),
        },
        Timeout => CheckMapping {
            status: "completed",
            conclusion: Some("timed_out"),
        },
        // `Reported` is the state a Run is in *after* a successful publish
        // (spec §4.6); the Reporter always maps from the Run's terminal
        // state, never from `Reported` itself. Kept exhaustive for totality.
        Reported => CheckMapping {
            status: "completed",
            conclusion: Some("success"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_matches_spec_table() {
        assert_eq!(map_run_state_to_check(RunState::Created).status, "queued");
        assert_eq!(map_run_state_to_check(RunState::Running).status, "in_progress");
        assert_eq!(
            map_run_state_to_check(RunState::Success),
            CheckMapping { status: "completed", conclusion: Some("success") }
        );
        assert_eq!(
            map_run_state_to_check(RunState::Failed),
            CheckMapping { status: "completed", conclusion: Some("failure") }
        );
        assert_eq!(
            map_run_state_to_check(RunState::PlanFailed),
            CheckMapping { status: "completed", conclusion: Some("failure") }
        );
        assert_eq!(
            map_run_state_to_check(RunState::Canceled),
            CheckMapping { status: "completed", conclusion: Some("cancelled") }
        );
        assert_eq!(
            map_run_state_to_check(RunState::Timeout),
            CheckMapping { status: "completed", conclusion: Some("timed_out") }
        );
    }

    #[test]
    fn skip_rule_is_no_op_when_state_unchanged() {
        let mut report = StatusReport::new(RunId::new("r1"), "github");
        report.last_state = RunState::Running.as_str().to_string();
        assert!(!report.is_stale_for(RunState::Running));
        assert!(report.is_stale_for(RunState::Success));
    }
}

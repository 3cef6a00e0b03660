//! The diff-aware planner's heuristics are out of scope (spec §1); this
//! module only defines the pure total interface the Run Lifecycle Manager
//! calls, `Plan(run) -> Vec<Job>`, plus a static default used in tests and
//! demos (spec §9 Open Question: "planner plurality" — keep it pure, leave
//! caching to callers).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::RunId;

/// Input the planner sees: identity of the commit under test, nothing else.
/// The planner never touches the Store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanRequest {
    pub run_id: RunId,
    pub repo_id: String,
    pub git_ref: String,
    pub commit_sha: String,
}

/// One job the planner wants materialized; the orchestrator assigns the
/// real [`crate::identity::JobId`] when it inserts the row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub required: bool,
    pub spec: serde_json::Value,
}

#[derive(Debug, Error)]
#[error("planning failed: {0}")]
pub struct PlanError(pub String);

/// Pure, total function from a plan request to a job list. Implementations
/// must not perform I/O; caching, if any, lives outside the trait (spec §9).
pub trait Planner: Send + Sync {
    fn plan(&self, request: &PlanRequest) -> Result<Vec<NewJob>, PlanError>;
}

/// Fixed build+test plan, useful for tests and as a starting default; real
/// deployments inject their own diff-aware planner.
pub struct StaticPlanner;

impl Planner for StaticPlanner {
    fn plan(&self, _request: &PlanRequest) -> Result<Vec<NewJob>, PlanError> {
        Ok(vec![
            NewJob {
                name: "build".to_string(),
                required: true,
                spec: serde_json::json!({"workdir": ".", "steps": ["build"], "caches": []}),
            },
            NewJob {
                name: "test".to_string(),
                required: true,
                spec: serde_json::json!({"workdir": ".", "steps": ["test"], "caches": []}),
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_planner_is_pure_and_total() {
        let planner = StaticPlanner;
        let request = PlanRequest {
            run_id: RunId::new("r1"),
            repo_id: "a/b".to_string(),
            git_ref: "refs/heads/main".to_string(),
            commit_sha: "c0ffee".to_string(),
        };
        let jobs = planner.plan(&request).expect("static planner never fails");
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.required));
    }
}

//! Domain types, state machines, and error taxonomy for the Delta CI
//! orchestration kernel.
//!
//! This crate has no I/O of its own: every other crate in the workspace
//! (`delta-ci-store`, `delta-ci-ingress`, `delta-ci-scheduler`,
//! `delta-ci-protocol`, `delta-ci-orchestrator`, `delta-ci-reporter`)
//! depends on it for a shared, stable vocabulary of entities and errors.

pub mod artifact;
pub mod error;
pub mod identity;
pub mod job;
pub mod lease;
pub mod planner;
pub mod run;
pub mod status;
pub mod trigger;

pub use artifact::{Artifact, Confidence, FailureCategory, FailureExplanation};
pub use error::{CoreError, CoreResult};
pub use identity::{ArtifactId, JobId, LeaseId, RunId, RunnerId, TriggerId};
pub use job::{FailureReason, Job, JobState};
pub use lease::{Lease, LeaseState};
pub use planner::{NewJob, PlanError, PlanRequest, Planner, StaticPlanner};
pub use run::{Run, RunState};
pub use status::{map_run_state_to_check, CheckMapping, StatusReport};
pub use trigger::{compute_idempotency_key, EventType, Trigger};

//! Run Lifecycle Manager (spec §4.3): advances Runs and Jobs through
//! their state machines — planning, aggregation, cancellation, timeout.

mod error;
mod intake;
mod lifecycle;
mod reconcile;

pub use error::{OrchestratorError, OrchestratorResult};
pub use intake::{intake_trigger, IntakeOutcome};
pub use lifecycle::{check_deadline, evaluate_run, request_cancel_job, request_cancel_run};
pub use reconcile::{Reconciler, ReconcilerConfig};

//! Glues the webhook ingress to the Run Lifecycle Manager.

use std::sync::Arc;

use async_trait::async_trait;
use delta_ci_core::{Planner, RunId};
use delta_ci_ingress::{IngressError, NormalizedTrigger, TriggerSink};
use delta_ci_orchestrator::IntakeOutcome;
use delta_ci_store::DurableStore;

pub struct OrchestratorSink {
    store: Arc<dyn DurableStore>,
    planner: Arc<dyn Planner>,
}

impl OrchestratorSink {
    pub fn new(store: Arc<dyn DurableStore>, planner: Arc<dyn Planner>) -> Self {
        Self { store, planner }
    }
}

#[async_trait]
impl TriggerSink for OrchestratorSink {
    async fn accept(&self, trigger: NormalizedTrigger) -> Result<RunId, IngressError> {
        let repo_id = trigger.repo_id.clone();
        match delta_ci_orchestrator::intake_trigger(&self.store, self.planner.as_ref(), trigger, chrono::Utc::now())
            .await
        {
            Ok(outcome) => {
                let run_id = match &outcome {
                    IntakeOutcome::Created(run) => run.id.clone(),
                    IntakeOutcome::Duplicate(run) => run.id.clone(),
                    IntakeOutcome::PlanFailed(run) => run.id.clone(),
                };
                tracing::info!(?outcome, %repo_id, "trigger intake completed");
                Ok(run_id)
            }
            Err(err) => {
                tracing::error!(error = %err, %repo_id, "trigger intake failed");
                Err(IngressError::SinkRejected(err.to_string()))
            }
        }
    }
}

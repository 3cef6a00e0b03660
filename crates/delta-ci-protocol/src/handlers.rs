//! The five runner protocol handlers (spec §4.5, §6).

use axum::extract::State;
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use delta_ci_core::{JobId, LeaseId, RunnerId};
use delta_ci_store::{CancelFinalStatus, CompletionOutcome};
use serde_json::{json, Value};

use crate::error::{ProtocolError, ProtocolResult};
use crate::state::ProtocolState;
use crate::wire::{
    AcquireLeaseResponse, ArtifactPayload, CompletionStatusWire, FinalStatusWire, HeartbeatAck,
    RunnerMessage,
};

fn wrong_endpoint(expected: &str, got: &RunnerMessage) -> ProtocolError {
    ProtocolError::Validation(format!(
        "expected a {expected} message, got {}",
        got.kind()
    ))
}

async fn with_deadline<T>(
    state: &ProtocolState,
    fut: impl std::future::Future<Output = ProtocolResult<T>>,
) -> ProtocolResult<T> {
    match tokio::time::timeout(state.request_timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Transient("request deadline exceeded".to_string())),
    }
}

/// Builds the wire-visible `job_spec` by layering the Job's name over
/// whatever `workdir`/`steps`/`caches` fields the planner's opaque spec
/// blob carries (spec §6 `LeaseGranted.job_spec`).
fn job_spec_for_wire(name: &str, spec: &Value) -> Value {
    json!({
        "name": name,
        "workdir": spec.get("workdir").cloned().unwrap_or(Value::String(".".to_string())),
        "steps": spec.get("steps").cloned().unwrap_or(Value::Array(vec![])),
        "caches": spec.get("caches").cloned().unwrap_or(Value::Array(vec![])),
    })
}

async fn acquire_lease(
    State(state): State<ProtocolState>,
    Json(message): Json<RunnerMessage>,
) -> ProtocolResult<Json<AcquireLeaseResponse>> {
    let RunnerMessage::AcquireLease { runner_id, capabilities } = message else {
        return Err(wrong_endpoint("acquire_lease", &message));
    };
    let runner_id = RunnerId::new(runner_id);

    let response = with_deadline(&state, async {
        match state.dispatcher.acquire_lease(&runner_id, &capabilities).await? {
            delta_ci_scheduler::AcquireOutcome::Granted(granted) => {
                Ok(AcquireLeaseResponse::LeaseGranted {
                    lease_id: granted.lease_id.into_inner(),
                    job_id: granted.job_id.into_inner(),
                    run_id: granted.run_id.into_inner(),
                    job_spec: job_spec_for_wire(
                        granted.job_spec.get("name").and_then(Value::as_str).unwrap_or(""),
                        &granted.job_spec,
                    ),
                    heartbeat_interval_seconds: granted.heartbeat_interval.num_seconds(),
                    ttl_seconds: granted.ttl.num_seconds(),
                })
            }
            delta_ci_scheduler::AcquireOutcome::NoWork => Ok(AcquireLeaseResponse::NoWork),
        }
    })
    .await?;

    Ok(Json(response))
}

async fn ack_lease(
    State(state): State<ProtocolState>,
    Json(message): Json<RunnerMessage>,
) -> ProtocolResult<Json<Value>> {
    let RunnerMessage::AckLease { lease_id, runner_id, .. } = message else {
        return Err(wrong_endpoint("ack_lease", &message));
    };
    let lease_id = LeaseId::new(lease_id);
    let runner_id = RunnerId::new(runner_id);

    with_deadline(&state, async {
        state.store.ack_lease(&lease_id, &runner_id).await?;
        Ok(())
    })
    .await?;

    Ok(Json(json!({"status": "ok"})))
}

async fn heartbeat(
    State(state): State<ProtocolState>,
    Json(message): Json<RunnerMessage>,
) -> ProtocolResult<Json<HeartbeatAck>> {
    let RunnerMessage::Heartbeat { lease_id, runner_id, ts } = message else {
        return Err(wrong_endpoint("heartbeat", &message));
    };
    let lease_id = LeaseId::new(lease_id);
    let runner_id = RunnerId::new(runner_id);
    let ttl = state.lease_ttl;

    let outcome = with_deadline(&state, async {
        Ok(state.store.heartbeat(&lease_id, &runner_id, ts, ttl).await?)
    })
    .await?;

    Ok(Json(HeartbeatAck { cancel_requested: outcome.cancel_requested }))
}

async fn complete(
    State(state): State<ProtocolState>,
    Json(message): Json<RunnerMessage>,
) -> ProtocolResult<Json<Value>> {
    let RunnerMessage::Complete { lease_id, runner_id, status, exit_code, summary, artifacts, .. } = message
    else {
        return Err(wrong_endpoint("complete", &message));
    };
    let lease_id = LeaseId::new(lease_id);
    let runner_id = RunnerId::new(runner_id);
    let outcome = match status {
        CompletionStatusWire::Succeeded => CompletionOutcome::Succeeded,
        CompletionStatusWire::Failed => CompletionOutcome::Failed { exit_code, summary },
    };

    let job = with_deadline(&state, async {
        Ok(state.store.complete_lease(&lease_id, &runner_id, outcome, Utc::now()).await?)
    })
    .await?;

    persist_artifacts(&state, &job.id, artifacts).await?;

    Ok(Json(json!({"status": "ok"})))
}

async fn cancel_ack(
    State(state): State<ProtocolState>,
    Json(message): Json<RunnerMessage>,
) -> ProtocolResult<Json<Value>> {
    let RunnerMessage::CancelAck { lease_id, runner_id, final_status, artifacts, .. } = message else {
        return Err(wrong_endpoint("cancel_ack", &message));
    };
    let lease_id = LeaseId::new(lease_id);
    let runner_id = RunnerId::new(runner_id);
    let final_status = match final_status {
        FinalStatusWire::Canceled => CancelFinalStatus::Canceled,
        FinalStatusWire::Succeeded => CancelFinalStatus::Succeeded,
        FinalStatusWire::Failed => CancelFinalStatus::Failed,
    };

    let job = with_deadline(&state, async {
        Ok(state.store.cancel_ack(&lease_id, &runner_id, final_status, Utc::now()).await?)
    })
    .await?;

    persist_artifacts(&state, &job.id, artifacts).await?;

    Ok(Json(json!({"status": "ok"})))
}

async fn persist_artifacts(
    state: &ProtocolState,
    job_id: &JobId,
    artifacts: Vec<ArtifactPayload>,
) -> ProtocolResult<()> {
    for artifact in artifacts {
        state
            .store
            .add_artifact(delta_ci_core::Artifact {
                id: delta_ci_core::ArtifactId::new(uuid::Uuid::new_v4().to_string()),
                job_id: job_id.clone(),
                kind: artifact.kind,
                uri: artifact.uri,
            })
            .await?;
    }
    Ok(())
}

pub fn build_router(state: ProtocolState) -> Router {
    Router::new()
        .route("/api/v1/internal/acquire-lease", post(acquire_lease))
        .route("/api/v1/internal/ack-lease", post(ack_lease))
        .route("/api/v1/internal/heartbeat", post(heartbeat))
        .route("/api/v1/internal/complete", post(complete))
        .route("/api/v1/internal/cancel-ack", post(cancel_ack))
        .with_state(state)
}

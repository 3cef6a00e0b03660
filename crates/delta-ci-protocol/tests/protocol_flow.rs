//! End-to-end exercise of the runner protocol over a `MemoryStore`
//! (spec §8 scenarios): acquire, ack, heartbeat, complete.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use delta_ci_core::{EventType, NewJob, RunState};
use delta_ci_protocol::{build_router, ProtocolState};
use delta_ci_scheduler::{LeaseDispatcher, SystemClock};
use delta_ci_store::{DurableStore, MemoryStore, NewRunWithTrigger};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn seed_one_job() -> (Arc<dyn DurableStore>, String) {
    let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
    let now = Utc::now();
    let created = store
        .create_run_with_trigger(
            NewRunWithTrigger {
                repo_id: "a/b".to_string(),
                git_ref: "refs/heads/main".to_string(),
                commit_sha: "c0ffee".to_string(),
                provider: "github".to_string(),
                event_type: EventType::Push,
                repo_owner: "a".to_string(),
                repo_name: "b".to_string(),
                pr_number: None,
            },
            now,
        )
        .await
        .unwrap();
    store.transition_run_state(&created.run_id, RunState::Planning, now).await.unwrap();
    store
        .materialize_plan(
            &created.run_id,
            vec![NewJob {
                name: "build".to_string(),
                required: true,
                spec: json!({"workdir": ".", "steps": ["build"], "caches": []}),
            }],
            now,
        )
        .await
        .unwrap();
    (store, created.run_id.into_inner())
}

async fn post(app: &axum::Router, path: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn acquire_ack_heartbeat_complete_round_trip() {
    let (store, _run_id) = seed_one_job().await;
    let dispatcher = Arc::new(LeaseDispatcher::new(
        store.clone(),
        Arc::new(SystemClock),
        chrono::Duration::seconds(60),
    ));
    let state = ProtocolState::new(store, dispatcher, chrono::Duration::seconds(60), Duration::from_secs(5));
    let app = build_router(state);

    let (status, body) = post(
        &app,
        "/api/v1/internal/acquire-lease",
        json!({"type": "acquire_lease", "runner_id": "runner-1", "capabilities": []}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "lease_granted");
    let lease_id = body["lease_id"].as_str().unwrap().to_string();

    let (status, _) = post(
        &app,
        "/api/v1/internal/ack-lease",
        json!({
            "type": "ack_lease",
            "job_id": body["job_id"],
            "lease_id": lease_id,
            "runner_id": "runner-1",
            "accepted_at": Utc::now(),
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post(
        &app,
        "/api/v1/internal/heartbeat",
        json!({
            "type": "heartbeat",
            "lease_id": lease_id,
            "runner_id": "runner-1",
            "ts": Utc::now(),
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancel_requested"], false);

    let (status, _) = post(
        &app,
        "/api/v1/internal/complete",
        json!({
            "type": "complete",
            "lease_id": lease_id,
            "runner_id": "runner-1",
            "status": "succeeded",
            "exit_code": 0,
            "finished_at": Utc::now(),
            "summary": "ok",
            "artifacts": [],
            "caches": [],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn acquire_lease_returns_no_work_when_store_is_empty() {
    let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
    let dispatcher = Arc::new(LeaseDispatcher::new(
        store.clone(),
        Arc::new(SystemClock),
        chrono::Duration::seconds(60),
    ));
    let state = ProtocolState::new(store, dispatcher, chrono::Duration::seconds(60), Duration::from_secs(5));
    let app = build_router(state);

    let (status, body) = post(
        &app,
        "/api/v1/internal/acquire-lease",
        json!({"type": "acquire_lease", "runner_id": "runner-1", "capabilities": []}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "no_work");
}

#[tokio::test]
async fn heartbeat_with_unmatched_lease_is_rejected() {
    let (store, _run_id) = seed_one_job().await;
    let dispatcher = Arc::new(LeaseDispatcher::new(
        store.clone(),
        Arc::new(SystemClock),
        chrono::Duration::seconds(60),
    ));
    let state = ProtocolState::new(store, dispatcher, chrono::Duration::seconds(60), Duration::from_secs(5));
    let app = build_router(state);

    let (status, _) = post(
        &app,
        "/api/v1/internal/heartbeat",
        json!({
            "type": "heartbeat",
            "lease_id": "does-not-exist",
            "runner_id": "runner-1",
            "ts": Utc::now(),
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

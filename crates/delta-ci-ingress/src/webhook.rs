//! axum extractor glue for mounting ingress as an HTTP endpoint.
//!
//! Kept behind the `webhook` feature so callers that only need the pure
//! [`crate::verify_signature`]/[`crate::normalize_event`] functions (e.g.
//! a CLI replaying recorded payloads) don't pull in axum.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use delta_ci_core::RunId;
use tracing::warn;

use crate::error::IngressError;
use crate::normalize::{normalize_event, NormalizedTrigger, TriggerEvent};
use crate::signature::verify_signature;

/// Receives normalized triggers accepted off the wire. The Run Lifecycle
/// Manager implements this to turn a trigger into `CreateRunWithTrigger`,
/// returning the id of the Run the trigger resolved to (fresh or
/// duplicate) so the webhook caller gets `{run_id}` back (spec §4.2, §6).
#[async_trait]
pub trait TriggerSink: Send + Sync + 'static {
    async fn accept(&self, trigger: NormalizedTrigger) -> Result<RunId, IngressError>;
}

#[derive(Clone)]
pub struct WebhookConfig {
    pub secret: Arc<Vec<u8>>,
    pub signature_header: String,
    pub event_header: String,
}

#[derive(Clone)]
struct WebhookState<S> {
    config: WebhookConfig,
    sink: Arc<S>,
}

/// Builds a router exposing `POST /webhooks/:provider`. The `provider`
/// path segment becomes the `provider` field on every normalized trigger.
pub fn build_router<S: TriggerSink>(config: WebhookConfig, sink: Arc<S>) -> Router {
    let state = WebhookState { config, sink };
    Router::new()
        .route("/webhooks/:provider", post(handle_webhook::<S>))
        .with_state(state)
}

async fn handle_webhook<S: TriggerSink>(
    State(state): State<WebhookState<S>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let Some(signature) = headers
        .get(&state.config.signature_header)
        .and_then(|v| v.to_str().ok())
    else {
        return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"error": "missing signature header"})))
            .into_response();
    };

    if let Err(e) = verify_signature(&state.config.secret, &body, signature) {
        warn!(error = %e, %provider, "webhook signature rejected");
        return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"error": e.to_string()}))).into_response();
    }

    let event_type = headers
        .get(&state.config.event_header)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    match normalize_event(&provider, event_type, &body) {
        Ok(TriggerEvent::Ignored) => (StatusCode::OK, Json(serde_json::json!({"status": "ignored"}))).into_response(),
        Ok(TriggerEvent::Trigger(trigger)) => match state.sink.accept(trigger).await {
            Ok(run_id) => {
                (StatusCode::OK, Json(serde_json::json!({"run_id": run_id.as_str()}))).into_response()
            }
            Err(e) => {
                warn!(error = %e, %provider, "trigger sink rejected webhook");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": e.to_string()})))
                    .into_response()
            }
        },
        Err(e) => {
            warn!(error = %e, %provider, %event_type, "malformed webhook payload");
            (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": e.to_string()}))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use std::sync::Mutex;
    use tower::ServiceExt;

    struct RecordingSink {
        seen: Mutex<Vec<NormalizedTrigger>>,
    }

    #[async_trait]
    impl TriggerSink for RecordingSink {
        async fn accept(&self, trigger: NormalizedTrigger) -> Result<RunId, IngressError> {
            self.seen.lock().unwrap().push(trigger);
            Ok(RunId::new("run-1"))
        }
    }

    fn sign(secret: &[u8], body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[tokio::test]
    async fn valid_push_is_accepted_and_forwarded() {
        let secret = b"wh-secret".to_vec();
        let sink = Arc::new(RecordingSink { seen: Mutex::new(Vec::new()) });
        let config = WebhookConfig {
            secret: Arc::new(secret.clone()),
            signature_header: "x-hub-signature-256".to_string(),
            event_header: "x-github-event".to_string(),
        };
        let app = build_router(config, sink.clone());

        let body = serde_json::json!({
            "ref": "refs/heads/main",
            "after": "c0ffee",
            "repository": {"owner": {"name": "acme"}, "name": "widgets"},
        })
        .to_string();
        let signature = sign(&secret, body.as_bytes());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/github")
                    .header("x-hub-signature-256", signature)
                    .header("x-github-event", "push")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(sink.seen.lock().unwrap().len(), 1);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["run_id"], "run-1");
    }

    #[tokio::test]
    async fn bad_signature_is_rejected() {
        let sink = Arc::new(RecordingSink { seen: Mutex::new(Vec::new()) });
        let config = WebhookConfig {
            secret: Arc::new(b"wh-secret".to_vec()),
            signature_header: "x-hub-signature-256".to_string(),
            event_header: "x-github-event".to_string(),
        };
        let app = build_router(config, sink.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/github")
                    .header("x-hub-signature-256", "sha256=deadbeef")
                    .header("x-github-event", "push")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(sink.seen.lock().unwrap().is_empty());
    }
}

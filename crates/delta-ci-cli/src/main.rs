//! Delta CI orchestration kernel binary: composes the webhook ingress,
//! the runner protocol endpoint, and the lease reaper into one server,
//! mirroring the teacher's `execution_server` example composition.

mod sink;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use delta_ci_core::{JobId, RunId, StaticPlanner};
use delta_ci_orchestrator::{Reconciler, ReconcilerConfig};
use delta_ci_protocol::ProtocolState;
use delta_ci_reporter::LoggingStatusProvider;
use delta_ci_scheduler::{LeaseDispatcher, Reaper, ReaperConfig, SystemClock};
use delta_ci_store::DurableStore;
use tokio::sync::watch;

use sink::OrchestratorSink;

#[derive(Parser, Debug)]
#[command(name = "delta-ci", about = "Diff-aware CI orchestration kernel")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "delta-ci.toml")]
    config: String,
}

fn build_store(database_url: &str) -> anyhow::Result<Arc<dyn DurableStore>> {
    if database_url.starts_with("sqlite://") || database_url.starts_with("sqlite:") {
        Ok(Arc::new(delta_ci_store::SqliteStore::new(database_url)?))
    } else if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        Ok(Arc::new(delta_ci_store::PostgresStore::new(database_url)?))
    } else {
        anyhow::bail!("unsupported database_url scheme: {database_url}")
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

async fn request_cancel(
    axum::extract::State(store): axum::extract::State<Arc<dyn DurableStore>>,
    Json(run_id): Json<String>,
) -> impl IntoResponse {
    match delta_ci_orchestrator::request_cancel_run(&store, &RunId::new(run_id), chrono::Utc::now()).await {
        Ok(run) => (StatusCode::OK, Json(serde_json::json!({"state": run.state.as_str()}))),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": err.to_string()})),
        ),
    }
}

async fn request_cancel_job(
    axum::extract::State(store): axum::extract::State<Arc<dyn DurableStore>>,
    Json(job_id): Json<String>,
) -> impl IntoResponse {
    match delta_ci_orchestrator::request_cancel_job(&store, &JobId::new(job_id), chrono::Utc::now()).await {
        Ok(job) => (StatusCode::OK, Json(serde_json::json!({"state": job.state.as_str()}))),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": err.to_string()})),
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = delta_ci_config::load(&cli.config)?;
    tracing::info!(config_path = %cli.config, "loaded configuration");

    let store = build_store(&config.database_url)?;

    let sink = Arc::new(OrchestratorSink::new(store.clone(), Arc::new(StaticPlanner)));
    let webhook_config = delta_ci_ingress::WebhookConfig {
        secret: Arc::new(config.webhook_secret.clone().into_bytes()),
        signature_header: "x-hub-signature-256".to_string(),
        event_header: "x-github-event".to_string(),
    };
    let ingress_router = delta_ci_ingress::build_router(webhook_config, sink);

    let dispatcher = Arc::new(LeaseDispatcher::new(
        store.clone(),
        Arc::new(SystemClock),
        chrono::Duration::seconds(config.lease_ttl_seconds as i64),
    ));
    let protocol_state = ProtocolState::new(
        store.clone(),
        dispatcher,
        chrono::Duration::seconds(config.lease_ttl_seconds as i64),
        Duration::from_secs(10),
    );
    let protocol_router = delta_ci_protocol::build_router(protocol_state);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = Arc::new(Reaper::new(
        store.clone(),
        Arc::new(SystemClock),
        ReaperConfig {
            interval: Duration::from_secs(config.heartbeat_interval_seconds().max(1)),
            max_attempts: config.max_attempts,
        },
    ));
    let reaper_handle = reaper.spawn(shutdown_rx.clone());

    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        Arc::new(LoggingStatusProvider::new()),
        ReconcilerConfig {
            interval: Duration::from_secs(config.heartbeat_interval_seconds().max(1)),
            run_deadline: config.run_deadline_seconds.map(Duration::from_secs),
            provider_name: "github".to_string(),
        },
    ));
    let reconciler_handle = reconciler.spawn(shutdown_rx);

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/cancel", post(request_cancel))
        .route("/api/v1/jobs/cancel", post(request_cancel_job))
        .with_state(store)
        .merge(ingress_router)
        .merge(protocol_router);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "delta-ci listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    let _ = shutdown_tx.send(true);
    reaper_handle.await.ok();
    reconciler_handle.await.ok();
    serve_result.map_err(anyhow::Error::from)
}

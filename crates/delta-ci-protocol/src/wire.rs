//! Wire schema for the runner protocol (spec §6). Every inbound message
//! carries `type`; dispatch is primarily by HTTP path, with `type` checked
//! against the expected variant for each endpoint so a mismatched body is a
//! `Validation` error rather than silently accepted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerMessage {
    AcquireLease {
        runner_id: String,
        #[serde(default)]
        capabilities: Vec<String>,
    },
    AckLease {
        job_id: String,
        lease_id: String,
        runner_id: String,
        accepted_at: DateTime<Utc>,
    },
    Heartbeat {
        lease_id: String,
        runner_id: String,
        ts: DateTime<Utc>,
    },
    Complete {
        lease_id: String,
        runner_id: String,
        status: CompletionStatusWire,
        exit_code: Option<i32>,
        finished_at: DateTime<Utc>,
        summary: Option<String>,
        #[serde(default)]
        artifacts: Vec<ArtifactPayload>,
        #[serde(default)]
        caches: Vec<Value>,
    },
    CancelAck {
        lease_id: String,
        runner_id: String,
        final_status: FinalStatusWire,
        ts: DateTime<Utc>,
        summary: Option<String>,
        #[serde(default)]
        artifacts: Vec<ArtifactPayload>,
    },
}

impl RunnerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AcquireLease { .. } => "acquire_lease",
            Self::AckLease { .. } => "ack_lease",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Complete { .. } => "complete",
            Self::CancelAck { .. } => "cancel_ack",
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatusWire {
    Succeeded,
    Failed,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatusWire {
    Canceled,
    Succeeded,
    Failed,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ArtifactPayload {
    pub kind: String,
    pub uri: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AcquireLeaseResponse {
    LeaseGranted {
        lease_id: String,
        job_id: String,
        run_id: String,
        job_spec: Value,
        heartbeat_interval_seconds: i64,
        ttl_seconds: i64,
    },
    NoWork,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct HeartbeatAck {
    pub cancel_requested: bool,
}

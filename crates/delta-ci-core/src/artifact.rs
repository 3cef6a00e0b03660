//! Artifact and FailureExplanation entities (spec §3). Both are simple,
//! append-only/upsert-only records the kernel stores and surfaces but never
//! interprets.

use serde::{Deserialize, Serialize};

use crate::identity::{ArtifactId, JobId};

/// Append-only; URIs reference external storage and are opaque to the core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub job_id: JobId,
    pub kind: String,
    pub uri: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    User,
    Infra,
    Tooling,
    Flaky,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Produced by an out-of-scope analyzer (spec §3); the core only stores and
/// surfaces it in the Reporter's summary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailureExplanation {
    pub id: String,
    pub job_id: JobId,
    pub category: FailureCategory,
    pub confidence: Confidence,
    pub summary: String,
}

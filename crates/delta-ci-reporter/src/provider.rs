//! The out-of-scope VCS client, modeled as a trait so the real
//! implementation is injected (spec §4.6).

use async_trait::async_trait;

use crate::error::ProviderError;

#[derive(Clone, Debug)]
pub struct CheckUpdate {
    pub repo_owner: String,
    pub repo_name: String,
    pub commit_sha: String,
    pub existing_check_run_id: Option<String>,
    pub title: String,
    pub summary: String,
    pub status: &'static str,
    pub conclusion: Option<&'static str>,
}

#[derive(Clone, Debug)]
pub struct CommentUpdate {
    pub repo_owner: String,
    pub repo_name: String,
    pub pr_number: u64,
    pub existing_comment_id: Option<String>,
    pub body: String,
}

/// Creates or updates an external check run / PR comment. Implementations
/// should return [`ProviderError::NotFound`] when `existing_*_id` no longer
/// resolves, so callers can recreate (spec §4.6).
#[async_trait]
pub trait StatusProvider: Send + Sync {
    async fn create_or_update_check(&self, update: CheckUpdate) -> Result<String, ProviderError>;

    async fn create_or_update_comment(&self, update: CommentUpdate) -> Result<String, ProviderError>;
}

/// Default `StatusProvider` for deployments that have not wired a real VCS
/// client: logs the update that would have been sent and synthesizes an id
/// so `publish_status` can still converge the Run to `reported`. The actual
/// HTTP transport to the provider is out of scope (spec §1) and is injected
/// by swapping this out for a real `StatusProvider` implementation.
#[derive(Default)]
pub struct LoggingStatusProvider;

impl LoggingStatusProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StatusProvider for LoggingStatusProvider {
    async fn create_or_update_check(&self, update: CheckUpdate) -> Result<String, ProviderError> {
        let id = update.existing_check_run_id.clone().unwrap_or_else(|| format!("{}-{}", update.commit_sha, update.status));
        tracing::info!(
            repo = %format!("{}/{}", update.repo_owner, update.repo_name),
            commit_sha = %update.commit_sha,
            status = update.status,
            conclusion = ?update.conclusion,
            check_id = %id,
            "check status published"
        );
        Ok(id)
    }

    async fn create_or_update_comment(&self, update: CommentUpdate) -> Result<String, ProviderError> {
        let id = update.existing_comment_id.clone().unwrap_or_else(|| format!("{}-{}-comment", update.repo_name, update.pr_number));
        tracing::info!(
            repo = %format!("{}/{}", update.repo_owner, update.repo_name),
            pr_number = update.pr_number,
            comment_id = %id,
            "pr comment published"
        );
        Ok(id)
    }
}

#[cfg(feature = "test-support")]
pub mod test_support {
    use std::sync::Mutex;

    use super::*;

    /// Records every call for assertion without network I/O.
    #[derive(Default)]
    pub struct RecordingProvider {
        pub checks: Mutex<Vec<CheckUpdate>>,
        pub comments: Mutex<Vec<CommentUpdate>>,
        pub next_check_id: Mutex<u64>,
        pub next_comment_id: Mutex<u64>,
    }

    impl RecordingProvider {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl StatusProvider for RecordingProvider {
        async fn create_or_update_check(&self, update: CheckUpdate) -> Result<String, ProviderError> {
            let id = update.existing_check_run_id.clone().unwrap_or_else(|| {
                let mut next = self.next_check_id.lock().unwrap();
                *next += 1;
                format!("check-{next}")
            });
            self.checks.lock().unwrap().push(update);
            Ok(id)
        }

        async fn create_or_update_comment(&self, update: CommentUpdate) -> Result<String, ProviderError> {
            let id = update.existing_comment_id.clone().unwrap_or_else(|| {
                let mut next = self.next_comment_id.lock().unwrap();
                *next += 1;
                format!("comment-{next}")
            });
            self.comments.lock().unwrap().push(update);
            Ok(id)
        }
    }
}

//! Status Reporter (spec §4.6): publishes Run state to an external
//! provider, idempotently and convergently.

mod error;
mod explain;
mod provider;
mod report;
mod sanitize;
mod token_cache;

pub use error::{ProviderError, ReporterError, ReporterResult};
pub use explain::{sanitize_summary, truncate_prompt, ExplanationClient, Summary};
pub use provider::{CheckUpdate, CommentUpdate, LoggingStatusProvider, StatusProvider};
#[cfg(feature = "test-support")]
pub use provider::test_support::RecordingProvider;
pub use report::publish_status;
pub use sanitize::sanitize_line;
pub use token_cache::{CachedToken, InstallationId, TokenCache};

//! The out-of-scope AI explanation proxy (spec §6 "AI explanation
//! collaborator contract"), modeled as a trait so it is never a hard
//! dependency of the core.

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::sanitize::sanitize_line;

const MAX_PROMPT_BYTES: usize = 12_000;
const MAX_SUMMARY_BYTES: usize = 512;

/// A sanitized, single-line, length-capped summary ready for a report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Summary(pub String);

#[async_trait]
pub trait ExplanationClient: Send + Sync {
    async fn explain(&self, prompt: &str) -> Result<Summary, ProviderError>;
}

/// Truncates `prompt` to the wire contract's byte budget before handing it
/// to an [`ExplanationClient`] implementation.
pub fn truncate_prompt(prompt: &str) -> String {
    if prompt.len() <= MAX_PROMPT_BYTES {
        return prompt.to_string();
    }
    let mut end = MAX_PROMPT_BYTES;
    while end > 0 && !prompt.is_char_boundary(end) {
        end -= 1;
    }
    prompt[..end].to_string()
}

/// Sanitizes a raw response from the proxy into report-ready form.
pub fn sanitize_summary(raw: &str) -> Summary {
    Summary(sanitize_line(raw, MAX_SUMMARY_BYTES))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_over_budget_is_truncated() {
        let prompt = "x".repeat(13_000);
        assert_eq!(truncate_prompt(&prompt).len(), MAX_PROMPT_BYTES);
    }

    #[test]
    fn summary_is_single_line_and_capped() {
        let raw = format!("{}\nmore", "y".repeat(600));
        let summary = sanitize_summary(&raw);
        assert!(!summary.0.contains('\n'));
        assert!(summary.0.len() <= MAX_SUMMARY_BYTES);
    }
}

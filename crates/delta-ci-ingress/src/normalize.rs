//! Turns a provider webhook body into a normalized trigger (spec §4.2).

use delta_ci_core::EventType;
use serde_json::Value;

use crate::error::{IngressError, IngressResult};

/// A push or pull-request trigger ready for `CreateRunWithTrigger`
/// (spec §4.1). Ingress never talks to the Store directly; the Run
/// Lifecycle Manager owns that call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedTrigger {
    pub repo_id: String,
    pub git_ref: String,
    pub commit_sha: String,
    pub provider: String,
    pub event_type: EventType,
    pub repo_owner: String,
    pub repo_name: String,
    pub pr_number: Option<u64>,
}

/// Outcome of normalizing one webhook delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerEvent {
    /// `ping` events and any event type outside `{push, pull_request}`
    /// are dropped silently; the caller should still answer 200 OK.
    Ignored,
    Trigger(NormalizedTrigger),
}

fn str_field<'a>(body: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut cur = body;
    for key in path {
        cur = cur.get(key)?;
    }
    cur.as_str()
}

fn repo_owner_and_name(body: &Value) -> IngressResult<(String, String)> {
    let owner = str_field(body, &["repository", "owner", "login"])
        .or_else(|| str_field(body, &["repository", "owner", "name"]))
        .ok_or_else(|| IngressError::Validation("missing repository owner".to_string()))?;
    let name = str_field(body, &["repository", "name"])
        .ok_or_else(|| IngressError::Validation("missing repository name".to_string()))?;
    Ok((owner.to_string(), name.to_string()))
}

fn normalize_push(provider: &str, body: &Value) -> IngressResult<TriggerEvent> {
    let git_ref = str_field(body, &["ref"])
        .filter(|r| !r.is_empty())
        .ok_or_else(|| IngressError::Validation("push event missing non-empty ref".to_string()))?;
    let commit_sha = str_field(body, &["after"])
        .filter(|sha| !sha.is_empty())
        .ok_or_else(|| IngressError::Validation("push event missing non-empty after SHA".to_string()))?;
    if body.get("deleted").and_then(Value::as_bool).unwrap_or(false) {
        return Err(IngressError::Validation("push event is a branch deletion".to_string()));
    }
    let (owner, name) = repo_owner_and_name(body)?;

    Ok(TriggerEvent::Trigger(NormalizedTrigger {
        repo_id: format!("{owner}/{name}"),
        git_ref: git_ref.to_string(),
        commit_sha: commit_sha.to_string(),
        provider: provider.to_string(),
        event_type: EventType::Push,
        repo_owner: owner,
        repo_name: name,
        pr_number: None,
    }))
}

fn normalize_pull_request(provider: &str, body: &Value) -> IngressResult<TriggerEvent> {
    let action = str_field(body, &["action"])
        .ok_or_else(|| IngressError::Validation("pull_request event missing action".to_string()))?;
    if !matches!(action, "opened" | "synchronize" | "reopened") {
        return Ok(TriggerEvent::Ignored);
    }

    let number = body
        .get("number")
        .and_then(Value::as_u64)
        .filter(|n| *n > 0)
        .ok_or_else(|| IngressError::Validation("pull_request event missing a positive number".to_string()))?;
    let head_sha = str_field(body, &["pull_request", "head", "sha"])
        .filter(|sha| !sha.is_empty())
        .ok_or_else(|| IngressError::Validation("pull_request event missing head SHA".to_string()))?;
    let (owner, name) = repo_owner_and_name(body)?;

    Ok(TriggerEvent::Trigger(NormalizedTrigger {
        repo_id: format!("{owner}/{name}"),
        git_ref: format!("refs/pull/{number}/head"),
        commit_sha: head_sha.to_string(),
        provider: provider.to_string(),
        event_type: EventType::PullRequest,
        repo_owner: owner,
        repo_name: name,
        pr_number: Some(number),
    }))
}

/// Dispatches on `event_type` (the provider's declared event name, e.g.
/// GitHub's `X-GitHub-Event` header) and parses `body` accordingly.
/// `ping` and any type outside `{push, pull_request}` return
/// [`TriggerEvent::Ignored`], never an error (spec §4.2).
pub fn normalize_event(provider: &str, event_type: &str, body: &[u8]) -> IngressResult<TriggerEvent> {
    if event_type == "ping" {
        return Ok(TriggerEvent::Ignored);
    }
    if !matches!(event_type, "push" | "pull_request") {
        return Ok(TriggerEvent::Ignored);
    }

    let parsed: Value = serde_json::from_slice(body)
        .map_err(|e| IngressError::Validation(format!("malformed JSON body: {e}")))?;

    match event_type {
        "push" => normalize_push(provider, &parsed),
        "pull_request" => normalize_pull_request(provider, &parsed),
        _ => unreachable!("checked above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ping_is_ignored() {
        let event = normalize_event("github", "ping", b"{}").unwrap();
        assert_eq!(event, TriggerEvent::Ignored);
    }

    #[test]
    fn unrelated_event_type_is_ignored() {
        let event = normalize_event("github", "issues", b"{}").unwrap();
        assert_eq!(event, TriggerEvent::Ignored);
    }

    #[test]
    fn push_event_produces_trigger() {
        let body = json!({
            "ref": "refs/heads/main",
            "after": "c0ffee",
            "deleted": false,
            "repository": {"owner": {"name": "acme"}, "name": "widgets"},
        });
        let event = normalize_event("github", "push", body.to_string().as_bytes()).unwrap();
        match event {
            TriggerEvent::Trigger(t) => {
                assert_eq!(t.repo_id, "acme/widgets");
                assert_eq!(t.git_ref, "refs/heads/main");
                assert_eq!(t.commit_sha, "c0ffee");
                assert_eq!(t.event_type, EventType::Push);
                assert_eq!(t.pr_number, None);
            }
            TriggerEvent::Ignored => panic!("push event should not be ignored"),
        }
    }

    #[test]
    fn deleted_branch_push_is_rejected() {
        let body = json!({
            "ref": "refs/heads/main",
            "after": "c0ffee",
            "deleted": true,
            "repository": {"owner": {"name": "acme"}, "name": "widgets"},
        });
        let err = normalize_event("github", "push", body.to_string().as_bytes())
            .expect_err("deleted branch push must be rejected");
        assert!(matches!(err, IngressError::Validation(_)));
    }

    #[test]
    fn pull_request_opened_produces_trigger_with_synthetic_ref() {
        let body = json!({
            "action": "opened",
            "number": 42,
            "pull_request": {"head": {"sha": "deadbeef"}},
            "repository": {"owner": {"login": "acme"}, "name": "widgets"},
        });
        let event = normalize_event("github", "pull_request", body.to_string().as_bytes()).unwrap();
        match event {
            TriggerEvent::Trigger(t) => {
                assert_eq!(t.git_ref, "refs/pull/42/head");
                assert_eq!(t.pr_number, Some(42));
                assert_eq!(t.event_type, EventType::PullRequest);
            }
            TriggerEvent::Ignored => panic!("opened PR should not be ignored"),
        }
    }

    #[test]
    fn pull_request_non_actionable_action_is_ignored() {
        let body = json!({
            "action": "closed",
            "number": 42,
            "pull_request": {"head": {"sha": "deadbeef"}},
            "repository": {"owner": {"login": "acme"}, "name": "widgets"},
        });
        let event = normalize_event("github", "pull_request", body.to_string().as_bytes()).unwrap();
        assert_eq!(event, TriggerEvent::Ignored);
    }

    #[test]
    fn pull_request_non_positive_number_is_rejected() {
        let body = json!({
            "action": "opened",
            "number": 0,
            "pull_request": {"head": {"sha": "deadbeef"}},
            "repository": {"owner": {"login": "acme"}, "name": "widgets"},
        });
        let err = normalize_event("github", "pull_request", body.to_string().as_bytes())
            .expect_err("non-positive PR number must be rejected");
        assert!(matches!(err, IngressError::Validation(_)));
    }
}

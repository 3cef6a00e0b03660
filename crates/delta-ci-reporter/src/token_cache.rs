//! Installation-token cache (spec §5 "Shared resource policy"): the one
//! shared mutable resource in the Reporter besides the Store itself.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

/// Eager-refresh window: a token within this TTL of expiry is treated as
/// already expired (spec §5).
const REFRESH_MARGIN: Duration = Duration::minutes(2);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InstallationId(pub String);

impl fmt::Display for InstallationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug)]
pub struct CachedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now <= REFRESH_MARGIN
    }
}

/// `tokio::sync::RwLock<HashMap<...>>` guarding per-installation tokens;
/// reads are lock-shared, a refresh takes the write half.
#[derive(Default)]
pub struct TokenCache {
    tokens: RwLock<HashMap<InstallationId, CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self { tokens: RwLock::new(HashMap::new()) }
    }

    /// Returns a live token, calling `mint` to fetch a fresh one if absent
    /// or within the eager-refresh margin of expiry.
    pub async fn get_or_refresh<F, Fut>(
        &self,
        installation: &InstallationId,
        now: DateTime<Utc>,
        mint: F,
    ) -> CachedToken
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = CachedToken>,
    {
        if let Some(cached) = self.tokens.read().await.get(installation) {
            if !cached.needs_refresh(now) {
                return cached.clone();
            }
        }
        let fresh = mint().await;
        self.tokens.write().await.insert(installation.clone(), fresh.clone());
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mints_once_and_reuses_a_live_token() {
        let cache = TokenCache::new();
        let installation = InstallationId("inst-1".to_string());
        let now = Utc::now();
        let calls = std::sync::atomic::AtomicUsize::new(0);

        let mint = || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { CachedToken { token: "t1".to_string(), expires_at: Utc::now() + Duration::minutes(30) } }
        };
        let first = cache.get_or_refresh(&installation, now, mint).await;
        let second = cache.get_or_refresh(&installation, now, mint).await;
        assert_eq!(first.token, second.token);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refreshes_eagerly_within_the_margin() {
        let cache = TokenCache::new();
        let installation = InstallationId("inst-1".to_string());
        let now = Utc::now();
        cache
            .get_or_refresh(&installation, now, || async {
                CachedToken { token: "stale".to_string(), expires_at: now + Duration::minutes(1) }
            })
            .await;

        let refreshed = cache
            .get_or_refresh(&installation, now, || async {
                CachedToken { token: "fresh".to_string(), expires_at: now + Duration::minutes(30) }
            })
            .await;
        assert_eq!(refreshed.token, "fresh");
    }
}

//! Service credential cache guarding against concurrent refresh storms.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use permita_core::AppResult;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::CredentialProvider;

/// Lifetime policy for cached service credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenCacheSettings {
    /// Lifetime assigned to a freshly acquired credential.
    pub lifetime: Duration,
    /// Credentials expiring within this window are refreshed.
    pub refresh_threshold: Duration,
}

impl Default for TokenCacheSettings {
    fn default() -> Self {
        Self {
            lifetime: Duration::from_secs(8 * 60 * 60),
            refresh_threshold: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedCredential {
    token: String,
    refresh_at: Instant,
}

/// Caches this service's own credentials keyed by service-account name.
pub struct ServiceTokenCache {
    provider: Arc<dyn CredentialProvider>,
    settings: TokenCacheSettings,
    entries: RwLock<HashMap<String, CachedCredential>>,
    refresh_lock: Mutex<()>,
    short_lifetime_reported: AtomicBool,
}

impl ServiceTokenCache {
    /// Creates an empty cache backed by a credential provider.
    #[must_use]
    pub fn new(provider: Arc<dyn CredentialProvider>, settings: TokenCacheSettings) -> Self {
        Self {
            provider,
            settings,
            entries: RwLock::new(HashMap::new()),
            refresh_lock: Mutex::new(()),
            short_lifetime_reported: AtomicBool::new(false),
        }
    }

    /// Returns a credential that stays valid beyond the refresh threshold.
    ///
    /// Only one caller acquires a new credential at a time; callers that observed a stale
    /// entry re-check after taking the lock and reuse the refreshed value.
    pub async fn get_token(&self, service_account: &str) -> AppResult<String> {
        if let Some(token) = self.fresh_token(service_account).await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        if let Some(token) = self.fresh_token(service_account).await {
            debug!(service_account, "credential refreshed by a concurrent caller");
            return Ok(token);
        }

        let credential = self.provider.acquire_credential(service_account).await?;
        let lifetime = credential
            .expires_in
            .map_or(self.settings.lifetime, |expires_in| {
                expires_in.min(self.settings.lifetime)
            });
        let now = Instant::now();
        let refresh_at = now
            .checked_add(lifetime.saturating_sub(self.refresh_threshold_for(lifetime)))
            .unwrap_or(now);

        self.entries.write().await.insert(
            service_account.to_owned(),
            CachedCredential {
                token: credential.token.clone(),
                refresh_at,
            },
        );

        info!(
            service_account,
            lifetime_seconds = lifetime.as_secs(),
            "acquired service credential"
        );

        Ok(credential.token)
    }

    /// Drops a cached credential, forcing the next caller to acquire a new one.
    pub async fn invalidate(&self, service_account: &str) {
        self.entries.write().await.remove(service_account);
    }

    /// Halves the lifetime when the issuer grants less than the configured threshold.
    fn refresh_threshold_for(&self, lifetime: Duration) -> Duration {
        if self.settings.refresh_threshold < lifetime {
            return self.settings.refresh_threshold;
        }

        if !self.short_lifetime_reported.swap(true, Ordering::Relaxed) {
            warn!(
                lifetime_seconds = lifetime.as_secs(),
                refresh_threshold_seconds = self.settings.refresh_threshold.as_secs(),
                "issuer lifetime is shorter than the refresh threshold, refreshing at half lifetime"
            );
        }
        lifetime / 2
    }

    async fn fresh_token(&self, service_account: &str) -> Option<String> {
        let entries = self.entries.read().await;
        let entry = entries.get(service_account)?;

        (Instant::now() < entry.refresh_at).then(|| entry.token.clone())
    }
}

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use permita_application::{PolicyCacheKey, PolicyCacheSettings, PolicyDataCache};
use permita_core::AppResult;
use permita_domain::{ActivityGroup, Grant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
enum CachedValue {
    Grants(Vec<Grant>),
    ActivityGroups(Vec<ActivityGroup>),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedValue,
    expires_at: Instant,
}

/// Process-local policy data cache with sliding expiration.
pub struct InMemoryPolicyDataCache {
    settings: PolicyCacheSettings,
    entries: RwLock<HashMap<PolicyCacheKey, CacheEntry>>,
}

impl InMemoryPolicyDataCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(settings: PolicyCacheSettings) -> Self {
        Self {
            settings,
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn get(&self, key: &PolicyCacheKey) -> Option<CachedValue> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.expires_at = now + self.settings.ttl_for(key);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: PolicyCacheKey, value: CachedValue) {
        let expires_at = Instant::now() + self.settings.ttl_for(&key);
        self.entries
            .write()
            .await
            .insert(key, CacheEntry { value, expires_at });
    }
}

impl Default for InMemoryPolicyDataCache {
    fn default() -> Self {
        Self::new(PolicyCacheSettings::default())
    }
}

#[async_trait]
impl PolicyDataCache for InMemoryPolicyDataCache {
    async fn get_user_grants(&self, user_id: &str) -> AppResult<Option<Vec<Grant>>> {
        let value = self
            .get(&PolicyCacheKey::UserGrants(user_id.to_owned()))
            .await;
        Ok(match value {
            Some(CachedValue::Grants(grants)) => Some(grants),
            _ => None,
        })
    }

    async fn set_user_grants(&self, user_id: &str, grants: &[Grant]) -> AppResult<()> {
        self.set(
            PolicyCacheKey::UserGrants(user_id.to_owned()),
            CachedValue::Grants(grants.to_vec()),
        )
        .await;
        Ok(())
    }

    async fn get_activity_groups(&self) -> AppResult<Option<Vec<ActivityGroup>>> {
        Ok(match self.get(&PolicyCacheKey::ActivityGroups).await {
            Some(CachedValue::ActivityGroups(groups)) => Some(groups),
            _ => None,
        })
    }

    async fn set_activity_groups(&self, groups: &[ActivityGroup]) -> AppResult<()> {
        self.set(
            PolicyCacheKey::ActivityGroups,
            CachedValue::ActivityGroups(groups.to_vec()),
        )
        .await;
        Ok(())
    }

    async fn remove(&self, key: &PolicyCacheKey) -> AppResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

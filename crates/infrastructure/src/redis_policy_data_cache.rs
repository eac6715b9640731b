//! Redis-backed policy data cache.

use async_trait::async_trait;
use permita_application::{PolicyCacheKey, PolicyCacheSettings, PolicyDataCache};
use permita_core::{AppError, AppResult};
use permita_domain::{ActivityGroup, Grant};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

/// Redis implementation of the policy data cache port.
///
/// Reads use `GETEX` so each hit slides the entry's expiration forward.
#[derive(Clone)]
pub struct RedisPolicyDataCache {
    client: redis::Client,
    key_prefix: String,
    settings: PolicyCacheSettings,
}

impl RedisPolicyDataCache {
    /// Creates a cache adapter with a configured Redis client, key prefix and expirations.
    #[must_use]
    pub fn new(
        client: redis::Client,
        key_prefix: impl Into<String>,
        settings: PolicyCacheSettings,
    ) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            settings,
        }
    }

    fn redis_key(&self, key: &PolicyCacheKey) -> String {
        match key {
            PolicyCacheKey::UserGrants(user_id) => {
                let digest = Sha256::digest(user_id.as_bytes());
                format!("{}:grants:{}", self.key_prefix, hex::encode(digest))
            }
            PolicyCacheKey::ActivityGroups => format!("{}:activity-groups", self.key_prefix),
        }
    }

    async fn connection(&self) -> AppResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::operation_failed("policy_cache", "connect", error))
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &PolicyCacheKey) -> AppResult<Option<T>> {
        let ttl_seconds = self.settings.ttl_for(key).as_secs().max(1);
        let mut connection = self.connection().await?;

        let encoded: Option<String> = redis::cmd("GETEX")
            .arg(self.redis_key(key))
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut connection)
            .await
            .map_err(|error| AppError::operation_failed("policy_cache", "get", error))?;

        encoded
            .map(|encoded| {
                serde_json::from_str(encoded.as_str())
                    .map_err(|error| AppError::operation_failed("policy_cache", "decode", error))
            })
            .transpose()
    }

    async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &PolicyCacheKey,
        value: &T,
    ) -> AppResult<()> {
        let ttl_seconds = self.settings.ttl_for(key).as_secs().max(1);
        let encoded = serde_json::to_string(value)
            .map_err(|error| AppError::operation_failed("policy_cache", "encode", error))?;
        let mut connection = self.connection().await?;

        connection
            .set_ex::<_, _, ()>(self.redis_key(key), encoded, ttl_seconds)
            .await
            .map_err(|error| AppError::operation_failed("policy_cache", "set", error))
    }
}

#[async_trait]
impl PolicyDataCache for RedisPolicyDataCache {
    async fn get_user_grants(&self, user_id: &str) -> AppResult<Option<Vec<Grant>>> {
        self.get_json(&PolicyCacheKey::UserGrants(user_id.to_owned()))
            .await
    }

    async fn set_user_grants(&self, user_id: &str, grants: &[Grant]) -> AppResult<()> {
        self.set_json(&PolicyCacheKey::UserGrants(user_id.to_owned()), grants)
            .await
    }

    async fn get_activity_groups(&self) -> AppResult<Option<Vec<ActivityGroup>>> {
        self.get_json(&PolicyCacheKey::ActivityGroups).await
    }

    async fn set_activity_groups(&self, groups: &[ActivityGroup]) -> AppResult<()> {
        self.set_json(&PolicyCacheKey::ActivityGroups, groups).await
    }

    async fn remove(&self, key: &PolicyCacheKey) -> AppResult<()> {
        let mut connection = self.connection().await?;

        connection
            .del::<_, ()>(self.redis_key(key))
            .await
            .map_err(|error| AppError::operation_failed("policy_cache", "remove", error))
    }
}

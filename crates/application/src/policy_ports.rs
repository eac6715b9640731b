use std::fmt::{Display, Formatter};
use std::time::Duration;

use async_trait::async_trait;
use permita_core::AppResult;
use permita_domain::{ActivityGroup, Grant, PolicyData, PolicyDecision, PolicyInput};

/// Cache entry identity for policy data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PolicyCacheKey {
    /// Grants of one user.
    UserGrants(String),
    /// The single shared activity group snapshot.
    ActivityGroups,
}

impl PolicyCacheKey {
    /// Returns the region-local, deterministic key text.
    #[must_use]
    pub fn as_key(&self) -> String {
        match self {
            Self::UserGrants(user_id) => format!("grants:{user_id}"),
            Self::ActivityGroups => "activity-groups".to_owned(),
        }
    }
}

impl Display for PolicyCacheKey {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_key().as_str())
    }
}

/// Sliding expiration applied per cache region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyCacheSettings {
    /// Sliding expiration of per-user grant entries.
    pub user_grants_ttl: Duration,
    /// Sliding expiration of the activity group entry.
    pub activity_groups_ttl: Duration,
}

impl PolicyCacheSettings {
    /// Returns the sliding expiration for the key's region.
    #[must_use]
    pub fn ttl_for(&self, key: &PolicyCacheKey) -> Duration {
        match key {
            PolicyCacheKey::UserGrants(_) => self.user_grants_ttl,
            PolicyCacheKey::ActivityGroups => self.activity_groups_ttl,
        }
    }
}

impl Default for PolicyCacheSettings {
    fn default() -> Self {
        Self {
            user_grants_ttl: Duration::from_secs(5 * 60),
            activity_groups_ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// Distributed cache port for policy data.
///
/// Reads refresh the entry's sliding expiration. Sync only removes entries; the provider
/// repopulates them on the next miss.
#[async_trait]
pub trait PolicyDataCache: Send + Sync {
    /// Returns cached grants of one user.
    async fn get_user_grants(&self, user_id: &str) -> AppResult<Option<Vec<Grant>>>;

    /// Stores grants of one user.
    async fn set_user_grants(&self, user_id: &str, grants: &[Grant]) -> AppResult<()>;

    /// Returns the cached activity group snapshot.
    async fn get_activity_groups(&self) -> AppResult<Option<Vec<ActivityGroup>>>;

    /// Stores the activity group snapshot.
    async fn set_activity_groups(&self, groups: &[ActivityGroup]) -> AppResult<()>;

    /// Removes one entry.
    async fn remove(&self, key: &PolicyCacheKey) -> AppResult<()>;
}

/// Versioned decision module evaluated against assembled policy data.
pub trait PolicyEvaluator: Send + Sync {
    /// Returns the version of the loaded decision module.
    fn version(&self) -> &str;

    /// Evaluates one input against a data snapshot.
    fn evaluate(&self, data: &PolicyData, input: &PolicyInput) -> AppResult<PolicyDecision>;
}

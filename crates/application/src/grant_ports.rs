use std::collections::BTreeSet;

use async_trait::async_trait;
use permita_core::AppResult;
use permita_domain::{ActivityGroup, Grant, GrantKey, GrantScope};

use crate::TransactionOptions;

/// Result of a transactional delete-then-insert of grant rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantReplacement {
    /// Rows removed before inserting.
    pub removed: u64,
    /// Rows inserted.
    pub inserted: u64,
    /// Users that held a replaced grant before the replacement.
    pub previous_user_ids: BTreeSet<String>,
}

/// Result of a transactional replacement of every activity group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityGroupReplacement {
    /// Groups removed before inserting.
    pub removed: u64,
    /// Groups inserted.
    pub inserted: u64,
}

/// Repository port for live grants and grant history.
#[async_trait]
pub trait GrantRepository: Send + Sync {
    /// Inserts a grant, returning `Conflict` when the key already exists.
    async fn save(&self, grant: Grant) -> AppResult<()>;

    /// Moves a revoked or expired grant to history and removes the live row.
    async fn delete(&self, grant: &Grant) -> AppResult<()>;

    /// Returns whether an active grant exists for the key.
    async fn exists(&self, key: &GrantKey) -> AppResult<bool>;

    /// Reads one live grant regardless of its state.
    async fn read(&self, key: &GrantKey) -> AppResult<Option<Grant>>;

    /// Reads every live grant of one user.
    async fn read_all(&self, user_id: &str) -> AppResult<Vec<Grant>>;

    /// Lists live grants whose scope covers the requested scope.
    async fn matching(&self, scope: &GrantScope, user_id: Option<&str>) -> AppResult<Vec<Grant>>;

    /// Replaces one user's activity group grants in a single transaction.
    async fn replace_activity_group_grants_for_user(
        &self,
        user_id: &str,
        grants: Vec<Grant>,
        options: &TransactionOptions,
    ) -> AppResult<GrantReplacement>;

    /// Replaces every user's activity group grants in a single transaction.
    async fn replace_all_activity_group_grants(
        &self,
        grants: Vec<Grant>,
        options: &TransactionOptions,
    ) -> AppResult<GrantReplacement>;
}

/// Repository port for the local activity group replica.
#[async_trait]
pub trait ActivityGroupRepository: Send + Sync {
    /// Lists every activity group with its member activities.
    async fn list_activity_groups(&self) -> AppResult<Vec<ActivityGroup>>;

    /// Replaces every activity group in a single transaction.
    async fn replace_activity_groups(
        &self,
        groups: Vec<ActivityGroup>,
        options: &TransactionOptions,
    ) -> AppResult<ActivityGroupReplacement>;

    /// Returns whether any tenant holds a group with the name.
    async fn activity_group_exists(&self, name: &str) -> AppResult<bool>;
}

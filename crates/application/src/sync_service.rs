use std::collections::BTreeSet;
use std::sync::Arc;

use permita_core::AppResult;
use permita_domain::{Grant, GrantType};
use tracing::{info, warn};

use crate::cache_invalidation::invalidate;
use crate::{
    ActivityGroupRepository, AuthorityClient, GrantRepository, PolicyCacheKey, PolicyDataCache,
    RequestContext, TransactionOptions,
};


/// Row counts and invalidated cache entries of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Local rows removed.
    pub removed: u64,
    /// Local rows inserted.
    pub inserted: u64,
    /// Cache entries removed after commit.
    pub invalidated_keys: Vec<PolicyCacheKey>,
}

impl SyncSummary {
    /// Returns whether the sync changed any local row.
    #[must_use]
    pub fn performed_work(&self) -> bool {
        self.removed > 0 || self.inserted > 0
    }
}

/// Replaces the local activity group replica with the remote authority's state.
///
/// This service is the only writer of activity group rows and `ActivityGroup` grants. Inside a
/// request's unit of work the replacement joins that transaction and invalidation waits for its
/// commit; otherwise each replacement commits on its own before the cache is touched.
#[derive(Clone)]
pub struct AuthorizationSyncService {
    authority: Arc<dyn AuthorityClient>,
    grants: Arc<dyn GrantRepository>,
    activity_groups: Arc<dyn ActivityGroupRepository>,
    cache: Arc<dyn PolicyDataCache>,
    transaction_options: TransactionOptions,
}

impl AuthorizationSyncService {
    /// Creates a sync service.
    #[must_use]
    pub fn new(
        authority: Arc<dyn AuthorityClient>,
        grants: Arc<dyn GrantRepository>,
        activity_groups: Arc<dyn ActivityGroupRepository>,
        cache: Arc<dyn PolicyDataCache>,
        transaction_options: TransactionOptions,
    ) -> Self {
        Self {
            authority,
            grants,
            activity_groups,
            cache,
            transaction_options,
        }
    }

    /// Replaces every local activity group and invalidates the shared group entry.
    pub async fn sync_activity_groups(&self, context: &RequestContext) -> AppResult<SyncSummary> {
        let correlation_id = context.correlation_id();
        let groups = self.authority.fetch_activity_groups(correlation_id).await?;
        let replacement = context
            .activity_group_store(&self.activity_groups)
            .replace_activity_groups(groups, &self.transaction_options)
            .await?;

        let invalidated_keys = vec![PolicyCacheKey::ActivityGroups];
        invalidate(context, self.cache.as_ref(), &invalidated_keys).await?;

        info!(
            correlation_id,
            removed = replacement.removed,
            inserted = replacement.inserted,
            "synchronized activity groups"
        );

        Ok(SyncSummary {
            removed: replacement.removed,
            inserted: replacement.inserted,
            invalidated_keys,
        })
    }

    /// Replaces one user's activity group grants and invalidates that user's entry.
    pub async fn sync_activity_group_grants(
        &self,
        context: &RequestContext,
        user_id: &str,
    ) -> AppResult<SyncSummary> {
        let correlation_id = context.correlation_id();
        let fetched = self
            .authority
            .fetch_user_activity_group_grants(user_id, correlation_id)
            .await?;
        let grants = retain_activity_group_grants(fetched, Some(user_id));

        let replacement = context
            .grant_store(&self.grants)
            .replace_activity_group_grants_for_user(user_id, grants, &self.transaction_options)
            .await?;

        let invalidated_keys = vec![PolicyCacheKey::UserGrants(user_id.to_owned())];
        invalidate(context, self.cache.as_ref(), &invalidated_keys).await?;

        info!(
            correlation_id,
            user_id,
            removed = replacement.removed,
            inserted = replacement.inserted,
            "synchronized user activity group grants"
        );

        Ok(SyncSummary {
            removed: replacement.removed,
            inserted: replacement.inserted,
            invalidated_keys,
        })
    }

    /// Replaces every user's activity group grants and invalidates each affected user entry.
    pub async fn sync_all_activity_group_grants(
        &self,
        context: &RequestContext,
    ) -> AppResult<SyncSummary> {
        let correlation_id = context.correlation_id();
        let fetched = self
            .authority
            .fetch_all_activity_group_grants(correlation_id)
            .await?;
        let grants = retain_activity_group_grants(fetched, None);
        let mut affected_users = grants
            .iter()
            .map(|grant| grant.user_id.clone())
            .collect::<BTreeSet<_>>();

        let replacement = context
            .grant_store(&self.grants)
            .replace_all_activity_group_grants(grants, &self.transaction_options)
            .await?;
        affected_users.extend(replacement.previous_user_ids);

        let invalidated_keys = affected_users
            .into_iter()
            .map(PolicyCacheKey::UserGrants)
            .collect::<Vec<_>>();
        invalidate(context, self.cache.as_ref(), &invalidated_keys).await?;

        info!(
            correlation_id,
            removed = replacement.removed,
            inserted = replacement.inserted,
            invalidated = invalidated_keys.len(),
            "synchronized all activity group grants"
        );

        Ok(SyncSummary {
            removed: replacement.removed,
            inserted: replacement.inserted,
            invalidated_keys,
        })
    }

    /// Returns whether an activity group with the name exists locally.
    pub async fn exists(
        &self,
        context: &RequestContext,
        activity_group_name: &str,
    ) -> AppResult<bool> {
        context
            .activity_group_store(&self.activity_groups)
            .activity_group_exists(activity_group_name)
            .await
    }
}

fn retain_activity_group_grants(grants: Vec<Grant>, user_id: Option<&str>) -> Vec<Grant> {
    grants
        .into_iter()
        .filter(|grant| {
            let retained = grant.grant_type == GrantType::ActivityGroup
                && user_id.is_none_or(|user_id| grant.user_id == user_id);
            if !retained {
                warn!(
                    grant = %grant.key(),
                    "ignoring grant outside the synchronized scope"
                );
            }
            retained
        })
        .collect()
}

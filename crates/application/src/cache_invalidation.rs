use permita_core::{AppError, AppResult};
use tracing::warn;

use crate::{PolicyCacheKey, PolicyDataCache, RequestContext};

/// Removes every key, attempting all of them before reporting failures together.
pub(crate) async fn remove_all(
    cache: &dyn PolicyDataCache,
    keys: &[PolicyCacheKey],
) -> AppResult<()> {
    let mut failures = Vec::new();
    for key in keys {
        if let Err(error) = cache.remove(key).await {
            warn!(key = %key, error = %error, "failed to invalidate policy cache entry");
            failures.push(error);
        }
    }

    let failed = failures.len();
    match failures.into_iter().next() {
        None => Ok(()),
        Some(first) => Err(AppError::operation_failed(
            "policy_cache",
            format!("invalidate ({failed} of {} entries)", keys.len()),
            first,
        )),
    }
}

/// Removes entries now, or queues them until commit when the request runs in a unit of work.
pub(crate) async fn invalidate(
    context: &RequestContext,
    cache: &dyn PolicyDataCache,
    keys: &[PolicyCacheKey],
) -> AppResult<()> {
    if context.unit_of_work().is_some() {
        context.defer_invalidation(keys.iter().cloned());
        return Ok(());
    }

    remove_all(cache, keys).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use permita_core::AppError;

    use crate::test_fakes::{EventLog, FakePolicyDataCache, grant};
    use crate::{PolicyCacheKey, PolicyDataCache, RequestContext};

    use super::{invalidate, remove_all};

    fn user(user_id: &str) -> PolicyCacheKey {
        PolicyCacheKey::UserGrants(user_id.to_owned())
    }

    #[tokio::test]
    async fn one_failing_key_does_not_stop_the_rest() {
        let cache = FakePolicyDataCache::failing_on(user("alice"));
        for user_id in ["alice", "bob", "carol"] {
            assert!(
                cache
                    .set_user_grants(user_id, &[grant(user_id, "T1", "Activity", "Foo")])
                    .await
                    .is_ok()
            );
        }

        let result = remove_all(&cache, &[user("alice"), user("bob"), user("carol")]).await;

        assert!(matches!(result, Err(AppError::OperationFailed { .. })));
        assert!(cache.get_user_grants("bob").await.is_ok_and(|cached| cached.is_none()));
        assert!(cache.get_user_grants("carol").await.is_ok_and(|cached| cached.is_none()));
        assert!(cache.get_user_grants("alice").await.is_ok_and(|cached| cached.is_some()));
    }

    #[tokio::test]
    async fn outside_a_unit_of_work_entries_are_removed_immediately() {
        let log = EventLog::default();
        let cache = Arc::new(FakePolicyDataCache::with_log(log.clone()));
        let context = RequestContext::system("corr-1");

        let result = invalidate(&context, cache.as_ref(), &[user("alice")]).await;

        assert!(result.is_ok());
        assert_eq!(log.entries().await, vec!["invalidate grants:alice".to_owned()]);
    }
}

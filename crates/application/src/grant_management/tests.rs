use std::sync::Arc;

use chrono::{Duration, Utc};
use permita_core::{AppError, AppResult};
use permita_domain::{Grant, GrantKey, GrantType};

use crate::test_fakes::{
    EventLog, FakeActivityGroupRepository, FakeGrantRepository, FakeMessageBus,
    FakeMetricsRecorder, FakeOutboxRepository, FakePolicyDataCache, FakeTransactionManager,
    grant, principal, tenant,
};
use crate::{
    BuiltinPolicyEvaluator, PipelineBuilder, PolicyDataProvider, RequestContext,
    TransactionOptions,
};

use super::{
    CheckAccess, CheckAccessHandler, DeleteGrant, DeleteGrantHandler, GrantAccess,
    GrantAccessHandler, GrantAccessValidator, GrantKeyValidator, ListUserGrants,
    ListUserGrantsHandler, RevokeGrant, RevokeGrantHandler, activity_catalog,
};

struct Harness {
    builder: PipelineBuilder,
    provider: PolicyDataProvider,
    grants: Arc<FakeGrantRepository>,
    cache_log: EventLog,
    bus: Arc<FakeMessageBus>,
}

fn harness() -> Harness {
    let grants = Arc::new(FakeGrantRepository::with_grants(vec![grant(
        "root", "T1", "*", "*",
    )]));
    let cache_log = EventLog::default();
    let cache = Arc::new(FakePolicyDataCache::with_log(cache_log.clone()));
    let bus = Arc::new(FakeMessageBus::default());
    let activity_groups = Arc::new(FakeActivityGroupRepository::default());
    let provider = PolicyDataProvider::new(
        grants.clone(),
        activity_groups.clone(),
        cache,
        Arc::new(BuiltinPolicyEvaluator),
        Arc::new(activity_catalog("permita")),
    );
    let builder = PipelineBuilder::new(
        Arc::new(FakeMetricsRecorder::default()),
        bus.clone(),
        Arc::new(FakeOutboxRepository::default()),
        Arc::new(FakeTransactionManager::new(
            EventLog::default(),
            grants.clone(),
            activity_groups,
        )),
        TransactionOptions::default(),
        provider.clone(),
    );

    Harness {
        builder,
        provider,
        grants,
        cache_log,
        bus,
    }
}

fn grant_access(user_id: &str, grant_type: GrantType, qualifier: &str) -> GrantAccess {
    GrantAccess {
        user_id: user_id.to_owned(),
        full_name: format!("{user_id} name"),
        tenant_id: tenant("T1"),
        grant_type,
        qualifier: qualifier.to_owned(),
        expires_on: Some(Utc::now() + Duration::days(30)),
    }
}

fn key(user_id: &str, qualifier: &str) -> GrantKey {
    key_in(user_id, "T1", qualifier)
}

fn key_in(user_id: &str, tenant_id: &str, qualifier: &str) -> GrantKey {
    GrantKey {
        user_id: user_id.to_owned(),
        tenant_id: tenant(tenant_id),
        grant_type: GrantType::Activity,
        qualifier: qualifier.to_owned(),
    }
}

impl Harness {
    async fn grant(&self, caller: &str, activity: GrantAccess) -> AppResult<Grant> {
        let Ok(pipeline) = self.builder.build::<GrantAccess>(
            GrantAccessHandler::new(self.grants.clone(), self.provider.clone()),
            vec![Arc::new(GrantAccessValidator)],
        ) else {
            panic!("pipeline should compose");
        };
        let mut context = RequestContext::new("corr-grant", Some(principal(caller, "T1")));
        pipeline.send(&mut context, activity).await
    }

    async fn revoke(&self, key: GrantKey) -> AppResult<Grant> {
        let Ok(pipeline) = self.builder.build::<RevokeGrant>(
            RevokeGrantHandler::new(self.grants.clone(), self.provider.clone()),
            vec![Arc::new(GrantKeyValidator)],
        ) else {
            panic!("pipeline should compose");
        };
        let mut context = RequestContext::new("corr-revoke", Some(principal("root", "T1")));
        pipeline.send(&mut context, RevokeGrant { key }).await
    }

    async fn delete(&self, key: GrantKey) -> AppResult<()> {
        let Ok(pipeline) = self.builder.build::<DeleteGrant>(
            DeleteGrantHandler::new(self.grants.clone(), self.provider.clone()),
            vec![Arc::new(GrantKeyValidator)],
        ) else {
            panic!("pipeline should compose");
        };
        let mut context = RequestContext::new("corr-delete", Some(principal("root", "T1")));
        pipeline.send(&mut context, DeleteGrant { key }).await
    }
}

#[tokio::test]
async fn granting_access_saves_invalidates_and_audits() {
    let harness = harness();

    let result = harness
        .grant("root", grant_access("bob", GrantType::Activity, "Foo"))
        .await;

    assert!(result.is_ok_and(|grant| grant.granted_by == "root" && grant.user_id == "bob"));
    assert_eq!(harness.grants.grants.lock().await.len(), 2);
    assert_eq!(
        harness.cache_log.entries().await,
        vec!["invalidate grants:bob".to_owned()]
    );
    assert_eq!(harness.bus.published.lock().await.len(), 1);
}

#[tokio::test]
async fn duplicate_grant_is_a_conflict() {
    let harness = harness();

    let first = harness
        .grant("root", grant_access("bob", GrantType::Activity, "Foo"))
        .await;
    let second = harness
        .grant("root", grant_access("bob", GrantType::Activity, "Foo"))
        .await;

    assert!(first.is_ok());
    assert!(second.is_err_and(|error| {
        matches!(error, AppError::Conflict(_)) && error.status_code().as_u16() == 412
    }));
}

#[tokio::test]
async fn activity_group_grants_cannot_be_issued_directly() {
    let harness = harness();

    let result = harness
        .grant("root", grant_access("bob", GrantType::ActivityGroup, "G1"))
        .await;

    let Err(AppError::InvalidCommandOrQuery(failures)) = result else {
        panic!("expected validation failure");
    };
    assert!(
        failures
            .iter()
            .any(|failure| failure.contains("managed by synchronization"))
    );
    assert_eq!(harness.grants.grants.lock().await.len(), 1);
}

#[tokio::test]
async fn callers_without_a_grant_are_rejected() {
    let harness = harness();

    let result = harness
        .grant("bob", grant_access("bob", GrantType::Activity, "Foo"))
        .await;

    assert!(matches!(result, Err(AppError::NotAuthorized(_))));
    assert!(harness.bus.published.lock().await.is_empty());
}

#[tokio::test]
async fn revoking_moves_the_grant_to_history() {
    let harness = harness();
    assert!(
        harness
            .grant("root", grant_access("bob", GrantType::Activity, "Foo"))
            .await
            .is_ok()
    );

    let revoked = harness.revoke(key("bob", "Foo")).await;

    assert!(revoked.is_ok_and(|grant| grant.revoked_by.as_deref() == Some("root")));
    assert!(
        harness
            .grants
            .grants
            .lock()
            .await
            .iter()
            .all(|grant| grant.user_id != "bob")
    );
    assert_eq!(harness.grants.history.lock().await.len(), 1);
}

#[tokio::test]
async fn revoking_a_missing_grant_is_not_found() {
    let harness = harness();

    let result = harness.revoke(key("bob", "Missing")).await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn deleting_an_active_grant_is_rejected_without_mutation() {
    let harness = harness();
    assert!(
        harness
            .grant("root", grant_access("bob", GrantType::Activity, "Foo"))
            .await
            .is_ok()
    );

    let result = harness.delete(key("bob", "Foo")).await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    assert_eq!(harness.grants.grants.lock().await.len(), 2);
    assert!(harness.grants.history.lock().await.is_empty());
}

#[tokio::test]
async fn deleting_an_expired_grant_moves_it_to_history() {
    let harness = harness();
    let mut expired = grant("bob", "T1", "Activity", "Foo");
    expired.expires_on = Some(Utc::now() - Duration::days(1));
    harness.grants.grants.lock().await.push(expired);

    let result = harness.delete(key("bob", "Foo")).await;

    assert!(result.is_ok());
    assert_eq!(harness.grants.grants.lock().await.len(), 1);
    assert_eq!(harness.grants.history.lock().await.len(), 1);
}

#[tokio::test]
async fn listing_grants_is_limited_to_the_callers_tenant() {
    let harness = harness();
    harness.grants.grants.lock().await.extend([
        grant("bob", "T1", "Activity", "Foo"),
        grant("bob", "T2", "Activity", "Foo"),
        grant("bob", "*", "Activity", "Bar"),
    ]);
    let Ok(pipeline) = harness
        .builder
        .build::<ListUserGrants>(ListUserGrantsHandler::new(harness.grants.clone()), Vec::new())
    else {
        panic!("pipeline should compose");
    };
    let mut context = RequestContext::new("corr-list", Some(principal("root", "T1")));

    let result = pipeline
        .send(
            &mut context,
            ListUserGrants {
                user_id: "bob".to_owned(),
            },
        )
        .await;

    assert!(result.is_ok_and(|grants| grants.len() == 2));
}

#[tokio::test]
async fn check_access_reports_the_decision_for_another_user() {
    let harness = harness();
    harness
        .grants
        .grants
        .lock()
        .await
        .push(grant("bob", "T1", "Activity", "ListUserGrants"));
    let Ok(pipeline) = harness
        .builder
        .build::<CheckAccess>(CheckAccessHandler::new(harness.provider.clone()), Vec::new())
    else {
        panic!("pipeline should compose");
    };
    let mut context = RequestContext::new("corr-check", Some(principal("root", "T1")));

    let result = pipeline
        .send(
            &mut context,
            CheckAccess {
                user_id: "bob".to_owned(),
                activity: "ListUserGrants".to_owned(),
                resource: Some("bob".to_owned()),
            },
        )
        .await;

    let Ok(decision) = result else {
        panic!("check should succeed");
    };
    assert!(decision.has_activity_grant);
    assert!(!decision.has_resource_grant);
    assert!(!decision.is_authorized);
}

#[tokio::test]
async fn granting_outside_the_callers_tenant_is_rejected() {
    let harness = harness();

    for target in ["T2", "*"] {
        let result = harness
            .grant(
                "root",
                GrantAccess {
                    tenant_id: tenant(target),
                    ..grant_access("bob", GrantType::Activity, "Foo")
                },
            )
            .await;

        assert!(matches!(result, Err(AppError::NotAuthorized(_))));
    }
    assert_eq!(harness.grants.grants.lock().await.len(), 1);
    assert!(harness.bus.published.lock().await.is_empty());
}

#[tokio::test]
async fn wildcard_tenant_grant_holder_may_issue_cross_tenant_grants() {
    let harness = harness();
    harness
        .grants
        .grants
        .lock()
        .await
        .push(grant("global", "*", "Activity", "GrantAccess"));

    let result = harness
        .grant(
            "global",
            GrantAccess {
                tenant_id: tenant("*"),
                ..grant_access("bob", GrantType::Activity, "Foo")
            },
        )
        .await;

    assert!(result.is_ok_and(|grant| grant.tenant_id.is_wildcard()));
}

#[tokio::test]
async fn revoking_in_another_tenant_is_rejected() {
    let harness = harness();
    harness
        .grants
        .grants
        .lock()
        .await
        .push(grant("bob", "T2", "Activity", "Foo"));

    let result = harness.revoke(key_in("bob", "T2", "Foo")).await;

    assert!(matches!(result, Err(AppError::NotAuthorized(_))));
    assert_eq!(harness.grants.grants.lock().await.len(), 2);
    assert!(harness.grants.history.lock().await.is_empty());
}

#[tokio::test]
async fn deleting_in_another_tenant_is_rejected() {
    let harness = harness();
    let mut expired = grant("bob", "T2", "Activity", "Foo");
    expired.expires_on = Some(Utc::now() - Duration::days(1));
    harness.grants.grants.lock().await.push(expired);

    let result = harness.delete(key_in("bob", "T2", "Foo")).await;

    assert!(matches!(result, Err(AppError::NotAuthorized(_))));
    assert_eq!(harness.grants.grants.lock().await.len(), 2);
    assert!(harness.grants.history.lock().await.is_empty());
}

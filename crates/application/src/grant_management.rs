//! Grant administration activities.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use permita_core::{AppError, AppResult, TenantId, UserIdentity};
use permita_domain::{
    ActivityCapabilities, ActivityCatalog, ActivityDescriptor, ActivityKind, Grant, GrantKey,
    GrantType, PolicyDecision,
};
use serde_json::{Value, json};

use crate::cache_invalidation::invalidate;
use crate::{
    Activity, ActivityHandler, GrantRepository, HandleIntegrationEvent, PolicyCacheKey,
    PolicyDataProvider, RequestContext, SyncActivityGroupsJob, SyncAllActivityGroupGrantsJob,
    Validator,
};

#[cfg(test)]
mod tests;

/// Returns the catalog of every activity this service exposes.
#[must_use]
pub fn activity_catalog(application_name: impl Into<String>) -> ActivityCatalog {
    ActivityCatalog::from_descriptors(
        application_name,
        &[
            GrantAccess::DESCRIPTOR,
            RevokeGrant::DESCRIPTOR,
            DeleteGrant::DESCRIPTOR,
            ListUserGrants::DESCRIPTOR,
            CheckAccess::DESCRIPTOR,
            SyncActivityGroupsJob::DESCRIPTOR,
            SyncAllActivityGroupGrantsJob::DESCRIPTOR,
            HandleIntegrationEvent::DESCRIPTOR,
        ],
    )
}

/// Issues a new grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantAccess {
    /// Grantee user id.
    pub user_id: String,
    /// Grantee display name.
    pub full_name: String,
    /// Tenant the grant applies to.
    pub tenant_id: TenantId,
    /// Grant type.
    pub grant_type: GrantType,
    /// Grant object.
    pub qualifier: String,
    /// Optional expiry.
    pub expires_on: Option<DateTime<Utc>>,
}

impl Activity for GrantAccess {
    type Output = Grant;

    const DESCRIPTOR: ActivityDescriptor = ActivityDescriptor {
        name: "GrantAccess",
        kind: ActivityKind::Command,
        capabilities: ActivityCapabilities::ALL,
        resource_types: &[],
    };

    fn audit_state(&self) -> Value {
        json!({
            "user_id": self.user_id,
            "tenant_id": self.tenant_id,
            "grant_type": self.grant_type,
            "qualifier": self.qualifier,
            "expires_on": self.expires_on,
        })
    }
}

/// Revokes a grant and moves it to history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokeGrant {
    /// Grant to revoke.
    pub key: GrantKey,
}

impl Activity for RevokeGrant {
    type Output = Grant;

    const DESCRIPTOR: ActivityDescriptor = ActivityDescriptor {
        name: "RevokeGrant",
        kind: ActivityKind::Command,
        capabilities: ActivityCapabilities::ALL,
        resource_types: &[],
    };

    fn audit_state(&self) -> Value {
        Value::String(self.key.to_string())
    }
}

/// Deletes a revoked or expired grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteGrant {
    /// Grant to delete.
    pub key: GrantKey,
}

impl Activity for DeleteGrant {
    type Output = ();

    const DESCRIPTOR: ActivityDescriptor = ActivityDescriptor {
        name: "DeleteGrant",
        kind: ActivityKind::Command,
        capabilities: ActivityCapabilities::ALL,
        resource_types: &[],
    };

    fn audit_state(&self) -> Value {
        Value::String(self.key.to_string())
    }
}

/// Lists one user's grants visible in the caller's tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListUserGrants {
    /// User whose grants are listed.
    pub user_id: String,
}

impl Activity for ListUserGrants {
    type Output = Vec<Grant>;

    const DESCRIPTOR: ActivityDescriptor = ActivityDescriptor {
        name: "ListUserGrants",
        kind: ActivityKind::Query,
        capabilities: ActivityCapabilities {
            auditable: false,
            authorizable: true,
            transactional: false,
            multi_tenant: true,
        },
        resource_types: &["User"],
    };

    fn resource_id(&self) -> Option<String> {
        Some(self.user_id.clone())
    }
}

/// Evaluates a decision for a user in the caller's tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckAccess {
    /// User the decision is made for.
    pub user_id: String,
    /// Requested activity.
    pub activity: String,
    /// Requested resource.
    pub resource: Option<String>,
}

impl Activity for CheckAccess {
    type Output = PolicyDecision;

    const DESCRIPTOR: ActivityDescriptor = ActivityDescriptor {
        name: "CheckAccess",
        kind: ActivityKind::Query,
        capabilities: ActivityCapabilities {
            auditable: false,
            authorizable: true,
            transactional: false,
            multi_tenant: true,
        },
        resource_types: &[],
    };
}

/// Rejects malformed grants and grant types owned by synchronization.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantAccessValidator;

impl Validator<GrantAccess> for GrantAccessValidator {
    fn validate(&self, activity: &GrantAccess) -> Vec<String> {
        let mut failures = Vec::new();
        if activity.user_id.trim().is_empty() {
            failures.push("user id must not be empty".to_owned());
        }
        if activity.full_name.trim().is_empty() {
            failures.push("full name must not be empty".to_owned());
        }
        if activity.qualifier.trim().is_empty() {
            failures.push("qualifier must not be empty".to_owned());
        }
        failures.extend(synchronized_type_failure(&activity.grant_type));
        if activity
            .expires_on
            .is_some_and(|expires_on| expires_on <= Utc::now())
        {
            failures.push("expiry must be in the future".to_owned());
        }
        failures
    }
}

/// Rejects keys addressing grants owned by synchronization.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantKeyValidator;

impl Validator<RevokeGrant> for GrantKeyValidator {
    fn validate(&self, activity: &RevokeGrant) -> Vec<String> {
        synchronized_type_failure(&activity.key.grant_type)
            .into_iter()
            .collect()
    }
}

impl Validator<DeleteGrant> for GrantKeyValidator {
    fn validate(&self, activity: &DeleteGrant) -> Vec<String> {
        synchronized_type_failure(&activity.key.grant_type)
            .into_iter()
            .collect()
    }
}

fn synchronized_type_failure(grant_type: &GrantType) -> Option<String> {
    (grant_type == &GrantType::ActivityGroup)
        .then(|| "activity group grants are managed by synchronization".to_owned())
}

/// Rejects grant administration outside the principal's tenant.
///
/// Grants in the wildcard tenant reach every tenant, so managing them requires the principal
/// to hold a wildcard-tenant grant for the activity itself.
async fn ensure_within_reach(
    context: &RequestContext,
    provider: &PolicyDataProvider,
    tenant_id: &TenantId,
    activity: &str,
) -> AppResult<()> {
    let principal = context.require_principal()?;
    if tenant_id == principal.tenant_id() {
        return Ok(());
    }

    if tenant_id.is_wildcard()
        && provider
            .within(context)
            .get_policy(principal)
            .await?
            .has_cross_tenant_grant(activity)
    {
        return Ok(());
    }

    Err(AppError::NotAuthorized(format!(
        "subject '{}' may not manage grants in tenant '{tenant_id}'",
        principal.subject()
    )))
}

async fn invalidate_user_grants(
    context: &RequestContext,
    provider: &PolicyDataProvider,
    user_id: &str,
) -> AppResult<()> {
    let keys = [PolicyCacheKey::UserGrants(user_id.to_owned())];
    invalidate(context, provider.cache().as_ref(), &keys).await
}

async fn read_existing(grants: &dyn GrantRepository, key: &GrantKey) -> AppResult<Grant> {
    grants
        .read(key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("grant '{key}' does not exist")))
}

/// Handles [`GrantAccess`].
#[derive(Clone)]
pub struct GrantAccessHandler {
    grants: Arc<dyn GrantRepository>,
    provider: PolicyDataProvider,
}

impl GrantAccessHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(grants: Arc<dyn GrantRepository>, provider: PolicyDataProvider) -> Self {
        Self { grants, provider }
    }
}

#[async_trait]
impl ActivityHandler<GrantAccess> for GrantAccessHandler {
    async fn handle(&self, context: &RequestContext, activity: GrantAccess) -> AppResult<Grant> {
        let principal = context.require_principal()?;
        ensure_within_reach(
            context,
            &self.provider,
            &activity.tenant_id,
            GrantAccess::DESCRIPTOR.name,
        )
        .await?;

        let grant = Grant {
            user_id: activity.user_id,
            full_name: activity.full_name,
            tenant_id: activity.tenant_id,
            grant_type: activity.grant_type,
            qualifier: activity.qualifier,
            expires_on: activity.expires_on,
            granted_by: principal.subject().to_owned(),
            granted_on: Utc::now(),
            revoked_by: None,
            revoked_on: None,
        };
        grant.validate()?;

        context.grant_store(&self.grants).save(grant.clone()).await?;
        invalidate_user_grants(context, &self.provider, grant.user_id.as_str()).await?;

        Ok(grant)
    }
}

/// Handles [`RevokeGrant`].
#[derive(Clone)]
pub struct RevokeGrantHandler {
    grants: Arc<dyn GrantRepository>,
    provider: PolicyDataProvider,
}

impl RevokeGrantHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(grants: Arc<dyn GrantRepository>, provider: PolicyDataProvider) -> Self {
        Self { grants, provider }
    }
}

#[async_trait]
impl ActivityHandler<RevokeGrant> for RevokeGrantHandler {
    async fn handle(&self, context: &RequestContext, activity: RevokeGrant) -> AppResult<Grant> {
        let principal = context.require_principal()?;
        ensure_within_reach(
            context,
            &self.provider,
            &activity.key.tenant_id,
            RevokeGrant::DESCRIPTOR.name,
        )
        .await?;

        let grants = context.grant_store(&self.grants);
        let grant = read_existing(grants.as_ref(), &activity.key).await?;
        let revoked = grant.revoke(principal.subject(), Utc::now())?;

        grants.delete(&revoked).await?;
        invalidate_user_grants(context, &self.provider, revoked.user_id.as_str()).await?;

        Ok(revoked)
    }
}

/// Handles [`DeleteGrant`].
#[derive(Clone)]
pub struct DeleteGrantHandler {
    grants: Arc<dyn GrantRepository>,
    provider: PolicyDataProvider,
}

impl DeleteGrantHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(grants: Arc<dyn GrantRepository>, provider: PolicyDataProvider) -> Self {
        Self { grants, provider }
    }
}

#[async_trait]
impl ActivityHandler<DeleteGrant> for DeleteGrantHandler {
    async fn handle(&self, context: &RequestContext, activity: DeleteGrant) -> AppResult<()> {
        ensure_within_reach(
            context,
            &self.provider,
            &activity.key.tenant_id,
            DeleteGrant::DESCRIPTOR.name,
        )
        .await?;

        let grants = context.grant_store(&self.grants);
        let grant = read_existing(grants.as_ref(), &activity.key).await?;

        grants.delete(&grant).await?;
        invalidate_user_grants(context, &self.provider, grant.user_id.as_str()).await?;

        Ok(())
    }
}

/// Handles [`ListUserGrants`].
#[derive(Clone)]
pub struct ListUserGrantsHandler {
    grants: Arc<dyn GrantRepository>,
}

impl ListUserGrantsHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(grants: Arc<dyn GrantRepository>) -> Self {
        Self { grants }
    }
}

#[async_trait]
impl ActivityHandler<ListUserGrants> for ListUserGrantsHandler {
    async fn handle(
        &self,
        context: &RequestContext,
        activity: ListUserGrants,
    ) -> AppResult<Vec<Grant>> {
        let tenant_id = context.require_principal()?.tenant_id().clone();
        let grants = context
            .grant_store(&self.grants)
            .read_all(activity.user_id.as_str())
            .await?;

        Ok(grants
            .into_iter()
            .filter(|grant| grant.tenant_id.is_wildcard() || grant.tenant_id == tenant_id)
            .collect())
    }
}

/// Handles [`CheckAccess`].
#[derive(Clone)]
pub struct CheckAccessHandler {
    provider: PolicyDataProvider,
}

impl CheckAccessHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(provider: PolicyDataProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ActivityHandler<CheckAccess> for CheckAccessHandler {
    async fn handle(
        &self,
        context: &RequestContext,
        activity: CheckAccess,
    ) -> AppResult<PolicyDecision> {
        let caller = context.require_principal()?;
        let subject = UserIdentity::new(
            activity.user_id.as_str(),
            activity.user_id.as_str(),
            caller.tenant_id().clone(),
        )?;

        self.provider
            .within(context)
            .get_policy(&subject)
            .await?
            .decide(activity.activity.as_str(), activity.resource.as_deref())
    }
}

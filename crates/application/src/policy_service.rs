use std::sync::Arc;

use chrono::Utc;
use permita_core::{AppResult, TenantId, UserIdentity};
use permita_domain::{
    ActivityCatalog, ActivityGroup, Grant, PolicyData, PolicyDecision, PolicyInput,
    evaluate_policy,
};
use tracing::warn;

use crate::{
    ActivityGroupRepository, GrantRepository, PolicyDataCache, PolicyEvaluator, RequestContext,
};


/// Evaluator running the built-in grant-matching rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinPolicyEvaluator;

impl BuiltinPolicyEvaluator {
    const VERSION: &'static str = "grant-matching/1";
}

impl PolicyEvaluator for BuiltinPolicyEvaluator {
    fn version(&self) -> &str {
        Self::VERSION
    }

    fn evaluate(&self, data: &PolicyData, input: &PolicyInput) -> AppResult<PolicyDecision> {
        Ok(evaluate_policy(data, input))
    }
}

/// Assembles policy data for a principal, reading through the policy cache.
#[derive(Clone)]
pub struct PolicyDataProvider {
    grants: Arc<dyn GrantRepository>,
    activity_groups: Arc<dyn ActivityGroupRepository>,
    cache: Arc<dyn PolicyDataCache>,
    evaluator: Arc<dyn PolicyEvaluator>,
    catalog: Arc<ActivityCatalog>,
}

impl PolicyDataProvider {
    /// Creates a provider.
    #[must_use]
    pub fn new(
        grants: Arc<dyn GrantRepository>,
        activity_groups: Arc<dyn ActivityGroupRepository>,
        cache: Arc<dyn PolicyDataCache>,
        evaluator: Arc<dyn PolicyEvaluator>,
        catalog: Arc<ActivityCatalog>,
    ) -> Self {
        Self {
            grants,
            activity_groups,
            cache,
            evaluator,
            catalog,
        }
    }

    /// Returns a provider whose store reads run in the request's unit of work, if one is open.
    #[must_use]
    pub fn within(&self, context: &RequestContext) -> Self {
        Self {
            grants: context.grant_store(&self.grants),
            activity_groups: context.activity_group_store(&self.activity_groups),
            ..self.clone()
        }
    }

    /// Returns the policy cache the provider reads through.
    #[must_use]
    pub fn cache(&self) -> Arc<dyn PolicyDataCache> {
        self.cache.clone()
    }

    /// Returns a policy bound to the principal's tenant over a fresh data snapshot.
    pub async fn get_policy(&self, principal: &UserIdentity) -> AppResult<Policy> {
        let grants = self.get_grants(principal.subject()).await?;
        let activity_groups = self.get_activity_groups().await?;

        Ok(Policy {
            tenant_id: principal.tenant_id().clone(),
            user_id: principal.subject().to_owned(),
            data: PolicyData {
                grants,
                activity_groups,
                activities: self.catalog.as_ref().clone(),
            },
            evaluator: self.evaluator.clone(),
        })
    }

    /// Returns a user's grants, cache first.
    pub async fn get_grants(&self, user_id: &str) -> AppResult<Vec<Grant>> {
        match self.cache.get_user_grants(user_id).await {
            Ok(Some(grants)) => return Ok(grants),
            Ok(None) => {}
            Err(error) => {
                warn!(user_id, error = %error, "policy cache read failed, using grant store");
            }
        }

        let grants = self.grants.read_all(user_id).await?;
        if let Err(error) = self.cache.set_user_grants(user_id, &grants).await {
            warn!(user_id, error = %error, "failed to populate policy cache");
        }

        Ok(grants)
    }

    /// Returns every activity group, cache first.
    pub async fn get_activity_groups(&self) -> AppResult<Vec<ActivityGroup>> {
        match self.cache.get_activity_groups().await {
            Ok(Some(groups)) => return Ok(groups),
            Ok(None) => {}
            Err(error) => {
                warn!(error = %error, "policy cache read failed, using activity group store");
            }
        }

        let groups = self.activity_groups.list_activity_groups().await?;
        if let Err(error) = self.cache.set_activity_groups(&groups).await {
            warn!(error = %error, "failed to populate policy cache");
        }

        Ok(groups)
    }
}

/// Per-request policy over one data snapshot.
#[derive(Clone)]
pub struct Policy {
    tenant_id: TenantId,
    user_id: String,
    data: PolicyData,
    evaluator: Arc<dyn PolicyEvaluator>,
}

impl Policy {
    /// Returns the tenant decisions are made for.
    #[must_use]
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Returns the user the snapshot belongs to.
    #[must_use]
    pub fn user_id(&self) -> &str {
        self.user_id.as_str()
    }

    /// Returns the assembled data snapshot.
    #[must_use]
    pub fn data(&self) -> &PolicyData {
        &self.data
    }

    /// Returns the version of the decision module in use.
    #[must_use]
    pub fn evaluator_version(&self) -> &str {
        self.evaluator.version()
    }

    /// Returns whether the activity, and the resource when given, are authorized.
    pub fn is_authorized(&self, activity: &str, resource: Option<&str>) -> AppResult<bool> {
        Ok(self.decide(activity, resource)?.is_authorized)
    }

    /// Returns whether a grant held in the wildcard tenant covers the activity everywhere.
    #[must_use]
    pub fn has_cross_tenant_grant(&self, activity: &str) -> bool {
        self.data.has_cross_tenant_activity_grant(activity, Utc::now())
    }

    /// Returns whether any active grant covers the activity.
    pub fn has_activity_grant(&self, activity: &str) -> AppResult<bool> {
        Ok(self.decide(activity, None)?.has_activity_grant)
    }

    /// Returns whether any active grant covers the resource of the given type.
    pub fn has_resource_grant(&self, resource_type: &str, resource: &str) -> AppResult<bool> {
        let input = PolicyInput {
            tenant_id: self.tenant_id.clone(),
            activity: None,
            resource: Some(resource.to_owned()),
            resource_type: Some(resource_type.to_owned()),
            now: Utc::now(),
        };

        Ok(self.evaluator.evaluate(&self.data, &input)?.has_resource_grant)
    }

    /// Evaluates the full decision for an activity and optional resource.
    pub fn decide(&self, activity: &str, resource: Option<&str>) -> AppResult<PolicyDecision> {
        let input = PolicyInput {
            tenant_id: self.tenant_id.clone(),
            activity: Some(activity.to_owned()),
            resource: resource.map(str::to_owned),
            resource_type: None,
            now: Utc::now(),
        };

        self.evaluator.evaluate(&self.data, &input)
    }
}

use chrono::{DateTime, Utc};
use permita_core::TenantId;
use serde::{Deserialize, Serialize};

use crate::{ActivityCatalog, ActivityGroup, Grant, GrantScope, GrantType, qualifier_matches};

/// Per-call input evaluated against the assembled policy data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyInput {
    /// Tenant the principal is acting in.
    pub tenant_id: TenantId,
    /// Requested activity.
    pub activity: Option<String>,
    /// Requested resource identifier.
    pub resource: Option<String>,
    /// Resource type of `resource`; when absent the activity's declared types are tried.
    pub resource_type: Option<String>,
    /// Instant grant expiry is evaluated against.
    pub now: DateTime<Utc>,
}

/// Outcome of one policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// Whether the principal may perform the requested activity.
    pub is_authorized: bool,
    /// Whether an activity, activity group or admin grant covers the activity.
    pub has_activity_grant: bool,
    /// Whether a resource grant covers the requested resource.
    pub has_resource_grant: bool,
}

/// Data snapshot the decision rules evaluate against.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicyData {
    /// Grants of the current principal.
    pub grants: Vec<Grant>,
    /// Every known activity group.
    pub activity_groups: Vec<ActivityGroup>,
    /// Static activity catalog.
    pub activities: ActivityCatalog,
}

impl PolicyData {
    /// Returns whether an active grant covers the activity in the tenant.
    #[must_use]
    pub fn has_activity_grant(
        &self,
        tenant_id: &TenantId,
        activity: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let requested = GrantScope::new(tenant_id.clone(), GrantType::Activity, activity);

        self.active_grants(now).any(|grant| {
            grant.scope().matches_concrete(&requested)
                || self.group_grant_covers(grant, tenant_id, activity)
        })
    }

    /// Returns whether an active grant held in the wildcard tenant covers the activity, which
    /// makes the holder's reach span every tenant.
    #[must_use]
    pub fn has_cross_tenant_activity_grant(&self, activity: &str, now: DateTime<Utc>) -> bool {
        let every_tenant = TenantId::wildcard();
        let requested = GrantScope::new(every_tenant.clone(), GrantType::Activity, activity);

        self.active_grants(now)
            .filter(|grant| grant.tenant_id.is_wildcard())
            .any(|grant| {
                grant.scope().matches_concrete(&requested)
                    || self.group_grant_covers(grant, &every_tenant, activity)
            })
    }

    /// Returns whether an active grant covers the resource of the given type in the tenant.
    #[must_use]
    pub fn has_resource_grant(
        &self,
        tenant_id: &TenantId,
        resource_type: &str,
        resource: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let requested = GrantScope::new(
            tenant_id.clone(),
            GrantType::Resource(resource_type.to_owned()),
            resource,
        );

        self.active_grants(now)
            .any(|grant| grant.scope().matches_concrete(&requested))
    }

    fn active_grants(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Grant> {
        self.grants.iter().filter(move |grant| grant.is_active(now))
    }

    fn group_grant_covers(&self, grant: &Grant, tenant_id: &TenantId, activity: &str) -> bool {
        if grant.grant_type != GrantType::ActivityGroup {
            return false;
        }
        if !grant.tenant_id.is_wildcard() && &grant.tenant_id != tenant_id {
            return false;
        }

        self.activity_groups.iter().any(|group| {
            qualifier_matches(grant.qualifier.as_str(), group.name.as_str())
                && group.contains(
                    tenant_id,
                    self.activities.application_name.as_str(),
                    activity,
                )
        })
    }
}

/// Evaluates the grant-matching rules for one input.
///
/// Any single active qualifying grant is sufficient; wildcard and exact grants carry no
/// precedence over each other. Input values are concrete: an input in the wildcard tenant is
/// denied outright and a requested `*` only matches grants that store `*` themselves.
#[must_use]
pub fn evaluate_policy(data: &PolicyData, input: &PolicyInput) -> PolicyDecision {
    if input.tenant_id.is_wildcard() {
        return PolicyDecision::default();
    }

    let Some(activity) = input.activity.as_deref() else {
        let has_resource_grant = match (input.resource_type.as_deref(), input.resource.as_deref()) {
            (Some(resource_type), Some(resource)) => {
                data.has_resource_grant(&input.tenant_id, resource_type, resource, input.now)
            }
            _ => false,
        };

        return PolicyDecision {
            is_authorized: false,
            has_activity_grant: false,
            has_resource_grant,
        };
    };

    let has_activity_grant = data.has_activity_grant(&input.tenant_id, activity, input.now);
    let declared = data.activities.resource_types(activity);

    let has_resource_grant = match input.resource.as_deref() {
        Some(resource) => match input.resource_type.as_deref() {
            Some(resource_type)
                if declared.is_empty()
                    || declared.iter().any(|declared| declared == resource_type) =>
            {
                data.has_resource_grant(&input.tenant_id, resource_type, resource, input.now)
            }
            Some(_) => false,
            None => declared.iter().any(|resource_type| {
                data.has_resource_grant(&input.tenant_id, resource_type, resource, input.now)
            }),
        },
        None => false,
    };

    let is_authorized = if declared.is_empty() {
        has_activity_grant
    } else {
        has_activity_grant && has_resource_grant
    };

    PolicyDecision {
        is_authorized,
        has_activity_grant,
        has_resource_grant,
    }
}

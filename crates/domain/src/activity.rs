use permita_core::TenantId;
use serde::{Deserialize, Serialize};

/// One activity of one application, as referenced by group membership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityRef {
    /// Application that owns the activity.
    pub application_name: String,
    /// Activity name.
    pub activity_name: String,
}

/// Named, tenant-scoped bag of activities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityGroup {
    /// Tenant the group belongs to, `*` for every tenant.
    pub tenant_id: TenantId,
    /// Group name.
    pub name: String,
    /// Member activities.
    pub activities: Vec<ActivityRef>,
}

impl ActivityGroup {
    /// Returns whether the group applies to the tenant and contains the activity.
    #[must_use]
    pub fn contains(&self, tenant_id: &TenantId, application_name: &str, activity_name: &str) -> bool {
        (self.tenant_id.is_wildcard() || &self.tenant_id == tenant_id)
            && self.activities.iter().any(|activity| {
                activity.activity_name == activity_name
                    && activity.application_name.eq_ignore_ascii_case(application_name)
            })
    }
}

/// Category of an inbound activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// State-changing request.
    Command,
    /// Read-only request.
    Query,
    /// Fire-and-forget notification.
    Notification,
    /// Background job.
    Job,
}

impl ActivityKind {
    /// Returns a stable label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Query => "query",
            Self::Notification => "notification",
            Self::Job => "job",
        }
    }
}

/// Cross-cutting behaviors an activity opts into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActivityCapabilities {
    /// Publishes an audit event on completion.
    pub auditable: bool,
    /// Requires an authorization decision before running.
    pub authorizable: bool,
    /// Runs inside a unit of work.
    pub transactional: bool,
    /// Executes within the principal's tenant.
    pub multi_tenant: bool,
}

impl ActivityCapabilities {
    /// No cross-cutting behavior.
    pub const NONE: Self = Self {
        auditable: false,
        authorizable: false,
        transactional: false,
        multi_tenant: false,
    };

    /// Every cross-cutting behavior.
    pub const ALL: Self = Self {
        auditable: true,
        authorizable: true,
        transactional: true,
        multi_tenant: true,
    };
}

/// Static description of an activity type, inspected when a pipeline is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityDescriptor {
    /// Activity name used for authorization and telemetry.
    pub name: &'static str,
    /// Activity category.
    pub kind: ActivityKind,
    /// Opted-in behaviors.
    pub capabilities: ActivityCapabilities,
    /// Resource types whose grants the activity additionally requires.
    pub resource_types: &'static [&'static str],
}

impl ActivityDescriptor {
    /// Returns the catalog entry for this activity.
    #[must_use]
    pub fn definition(&self) -> ActivityDefinition {
        ActivityDefinition {
            name: self.name.to_owned(),
            resource_types: self
                .resource_types
                .iter()
                .map(|resource_type| (*resource_type).to_owned())
                .collect(),
        }
    }
}

/// Catalog entry describing one activity's resource requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityDefinition {
    /// Activity name.
    pub name: String,
    /// Declared resource types.
    pub resource_types: Vec<String>,
}

/// Static catalog of the activities one application exposes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivityCatalog {
    /// Application that owns every activity in the catalog.
    pub application_name: String,
    /// Known activities.
    pub activities: Vec<ActivityDefinition>,
}

impl ActivityCatalog {
    /// Creates a catalog from activity descriptors.
    #[must_use]
    pub fn from_descriptors(
        application_name: impl Into<String>,
        descriptors: &[ActivityDescriptor],
    ) -> Self {
        Self {
            application_name: application_name.into(),
            activities: descriptors.iter().map(ActivityDescriptor::definition).collect(),
        }
    }

    /// Returns the resource types declared by an activity, empty when unknown.
    #[must_use]
    pub fn resource_types(&self, activity_name: &str) -> &[String] {
        self.activities
            .iter()
            .find(|activity| activity.name == activity_name)
            .map(|activity| activity.resource_types.as_slice())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use permita_core::TenantId;

    use super::{ActivityGroup, ActivityRef};

    #[test]
    fn group_membership_respects_tenant() {
        let group = ActivityGroup {
            tenant_id: TenantId::new("T1").unwrap_or_else(|_| TenantId::wildcard()),
            name: "G1".to_owned(),
            activities: vec![ActivityRef {
                application_name: "Permita".to_owned(),
                activity_name: "Foo".to_owned(),
            }],
        };
        let t1 = TenantId::new("T1").unwrap_or_else(|_| TenantId::wildcard());
        let t2 = TenantId::new("T2").unwrap_or_else(|_| TenantId::wildcard());

        assert!(group.contains(&t1, "permita", "Foo"));
        assert!(!group.contains(&t2, "permita", "Foo"));
        assert!(!group.contains(&t1, "permita", "Bar"));
        assert!(!group.contains(&t1, "other", "Foo"));
    }
}

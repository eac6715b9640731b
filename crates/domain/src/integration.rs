use permita_core::TenantId;
use serde::{Deserialize, Serialize};

/// Events published by the remote authorization authority that trigger a local sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntegrationEvent {
    /// An activity joined an activity group.
    ActivityAddedToGroup {
        /// Tenant of the group.
        tenant_id: TenantId,
        /// Group name.
        activity_group_name: String,
        /// Activity name.
        activity_name: String,
    },
    /// An activity left an activity group.
    ActivityRemovedFromGroup {
        /// Tenant of the group.
        tenant_id: TenantId,
        /// Group name.
        activity_group_name: String,
        /// Activity name.
        activity_name: String,
    },
    /// An activity group was deleted.
    ActivityGroupDeleted {
        /// Tenant of the group.
        tenant_id: TenantId,
        /// Group name.
        activity_group_name: String,
    },
    /// A user was granted an activity group.
    ActivityGroupGrantGranted {
        /// Tenant of the grant.
        tenant_id: TenantId,
        /// Grantee.
        user_id: String,
        /// Group name.
        activity_group_name: String,
    },
    /// A user's activity group grant was revoked.
    ActivityGroupGrantRevoked {
        /// Tenant of the grant.
        tenant_id: TenantId,
        /// Grantee.
        user_id: String,
        /// Group name.
        activity_group_name: String,
    },
}

impl IntegrationEvent {
    /// Returns a stable event name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ActivityAddedToGroup { .. } => "activity_added_to_group",
            Self::ActivityRemovedFromGroup { .. } => "activity_removed_from_group",
            Self::ActivityGroupDeleted { .. } => "activity_group_deleted",
            Self::ActivityGroupGrantGranted { .. } => "activity_group_grant_granted",
            Self::ActivityGroupGrantRevoked { .. } => "activity_group_grant_revoked",
        }
    }
}

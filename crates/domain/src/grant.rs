use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use permita_core::{AppError, AppResult, TenantId, WILDCARD};
use serde::{Deserialize, Serialize};

use crate::GrantScope;

/// Kind of object a grant authorizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GrantType {
    /// The qualifier names one activity.
    Activity,
    /// The qualifier names an activity group, expanded through group membership.
    ActivityGroup,
    /// The qualifier identifies a resource of the named resource type.
    Resource(String),
    /// Matches every grant type.
    Wildcard,
}

impl GrantType {
    /// Returns a stable storage value for this grant type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Activity => "Activity",
            Self::ActivityGroup => "ActivityGroup",
            Self::Resource(resource_type) => resource_type.as_str(),
            Self::Wildcard => WILDCARD,
        }
    }

    /// Returns whether this is the wildcard grant type.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }
}

impl FromStr for GrantType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Activity" => Ok(Self::Activity),
            "ActivityGroup" => Ok(Self::ActivityGroup),
            WILDCARD => Ok(Self::Wildcard),
            other if other.trim().is_empty() => Err(AppError::Validation(
                "grant type must not be empty".to_owned(),
            )),
            other => Ok(Self::Resource(other.to_owned())),
        }
    }
}

impl TryFrom<String> for GrantType {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(value.as_str())
    }
}

impl From<GrantType> for String {
    fn from(value: GrantType) -> Self {
        value.as_str().to_owned()
    }
}

impl Display for GrantType {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Unique identity of a grant: `UserId:TenantId:GrantType:Qualifier`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrantKey {
    /// Grantee user id.
    pub user_id: String,
    /// Tenant the grant applies to.
    pub tenant_id: TenantId,
    /// Grant type.
    pub grant_type: GrantType,
    /// Grant object.
    pub qualifier: String,
}

impl Display for GrantKey {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}:{}:{}:{}",
            self.user_id, self.tenant_id, self.grant_type, self.qualifier
        )
    }
}

/// Grant aggregate authorizing one user within one tenant scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Grantee user id.
    pub user_id: String,
    /// Grantee display name.
    pub full_name: String,
    /// Tenant the grant applies to, `*` for every tenant.
    pub tenant_id: TenantId,
    /// Grant type.
    pub grant_type: GrantType,
    /// Activity name, activity group name or resource identifier.
    pub qualifier: String,
    /// Optional expiry instant.
    pub expires_on: Option<DateTime<Utc>>,
    /// Subject that issued the grant.
    pub granted_by: String,
    /// Issue instant.
    pub granted_on: DateTime<Utc>,
    /// Subject that revoked the grant.
    pub revoked_by: Option<String>,
    /// Revocation instant.
    pub revoked_on: Option<DateTime<Utc>>,
}

impl Grant {
    /// Returns the grant identity.
    #[must_use]
    pub fn key(&self) -> GrantKey {
        GrantKey {
            user_id: self.user_id.clone(),
            tenant_id: self.tenant_id.clone(),
            grant_type: self.grant_type.clone(),
            qualifier: self.qualifier.clone(),
        }
    }

    /// Returns the grantee-independent matching scope.
    #[must_use]
    pub fn scope(&self) -> GrantScope {
        GrantScope::new(
            self.tenant_id.clone(),
            self.grant_type.clone(),
            self.qualifier.clone(),
        )
    }

    /// Returns whether the grant is neither revoked nor expired at `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_on.is_none() && self.expires_on.is_none_or(|expires_on| expires_on > now)
    }

    /// Validates required fields before persistence.
    pub fn validate(&self) -> AppResult<()> {
        let mut failures = Vec::new();
        if self.user_id.trim().is_empty() {
            failures.push("grant user id must not be empty".to_owned());
        }
        if self.qualifier.trim().is_empty() {
            failures.push("grant qualifier must not be empty".to_owned());
        }
        if self.granted_by.trim().is_empty() {
            failures.push("grant issuer must not be empty".to_owned());
        }
        if self
            .expires_on
            .is_some_and(|expires_on| expires_on <= self.granted_on)
        {
            failures.push("grant must expire after it was granted".to_owned());
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AppError::InvalidCommandOrQuery(failures))
        }
    }

    /// Returns a revoked copy of this grant.
    pub fn revoke(&self, revoked_by: impl Into<String>, revoked_on: DateTime<Utc>) -> AppResult<Self> {
        if self.revoked_on.is_some() {
            return Err(AppError::Validation(format!(
                "grant '{}' is already revoked",
                self.key()
            )));
        }

        Ok(Self {
            revoked_by: Some(revoked_by.into()),
            revoked_on: Some(revoked_on),
            ..self.clone()
        })
    }

    /// Ensures the grant may be removed from the live store.
    pub fn ensure_deletable(&self, now: DateTime<Utc>) -> AppResult<()> {
        if self.is_active(now) {
            return Err(AppError::Validation(format!(
                "grant '{}' is still active and must be revoked or expired before deletion",
                self.key()
            )));
        }

        Ok(())
    }
}

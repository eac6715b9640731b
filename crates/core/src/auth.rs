use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult, TenantId};

/// Authenticated principal acting within one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IdentityFields")]
pub struct UserIdentity {
    subject: String,
    display_name: String,
    tenant_id: TenantId,
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct IdentityFields {
    subject: String,
    display_name: String,
    tenant_id: TenantId,
    access_token: Option<String>,
}

impl TryFrom<IdentityFields> for UserIdentity {
    type Error = AppError;

    fn try_from(fields: IdentityFields) -> AppResult<Self> {
        let identity = Self::new(fields.subject, fields.display_name, fields.tenant_id)?;
        Ok(match fields.access_token {
            Some(access_token) => identity.with_access_token(access_token),
            None => identity,
        })
    }
}

impl UserIdentity {
    /// Creates a user identity from authentication and tenancy data.
    ///
    /// A principal always acts in one concrete tenant, so the wildcard tenant is rejected.
    pub fn new(
        subject: impl Into<String>,
        display_name: impl Into<String>,
        tenant_id: TenantId,
    ) -> AppResult<Self> {
        if tenant_id.is_wildcard() {
            return Err(AppError::Validation(
                "a principal cannot act in the wildcard tenant".to_owned(),
            ));
        }

        Ok(Self {
            subject: subject.into(),
            display_name: display_name.into(),
            tenant_id,
            access_token: None,
        })
    }

    /// Attaches the bearer token the principal authenticated with.
    #[must_use]
    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    /// Returns the stable subject claim, used as the user id for grants.
    #[must_use]
    pub fn subject(&self) -> &str {
        self.subject.as_str()
    }

    /// Returns the display name for the current user.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.display_name.as_str()
    }

    /// Returns the tenant the principal is acting in.
    #[must_use]
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Returns the bearer token, if the principal carried one.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }
}

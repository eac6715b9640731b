use std::time::Duration;

use async_trait::async_trait;
use permita_core::AppResult;
use permita_domain::{ActivityGroup, Grant};

/// Port to the remote authorization authority.
#[async_trait]
pub trait AuthorityClient: Send + Sync {
    /// Fetches every activity group of this application across tenants.
    async fn fetch_activity_groups(&self, correlation_id: &str) -> AppResult<Vec<ActivityGroup>>;

    /// Fetches one user's activity group grants across tenants.
    async fn fetch_user_activity_group_grants(
        &self,
        user_id: &str,
        correlation_id: &str,
    ) -> AppResult<Vec<Grant>>;

    /// Fetches every user's activity group grants across tenants.
    async fn fetch_all_activity_group_grants(&self, correlation_id: &str)
    -> AppResult<Vec<Grant>>;
}

/// Credential issued to this service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCredential {
    /// Bearer token value.
    pub token: String,
    /// Lifetime reported by the issuer, when it reports one.
    pub expires_in: Option<Duration>,
}

/// Port acquiring fresh credentials for a service account.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Requests a new credential for the service account.
    async fn acquire_credential(&self, service_account: &str) -> AppResult<AccessCredential>;
}

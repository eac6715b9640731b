use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use permita_application::{AuthorityClient, ServiceTokenCache};
use permita_core::{AppError, AppResult, TenantId, WILDCARD};
use permita_domain::{ActivityGroup, ActivityRef, Grant, GrantType};
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

const CORRELATION_ID_HEADER: &str = "X-Correlation-Id";
const TENANT_ID_HEADER: &str = "X-Tenant-Id";

/// Settings for [`HttpAuthorityClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityClientSettings {
    /// Base URL of the authority API.
    pub base_url: Url,
    /// Application whose activity groups are replicated.
    pub application_name: String,
    /// Service account the bearer credential is issued to.
    pub service_account: String,
}

/// reqwest-based client for the remote authorization authority.
pub struct HttpAuthorityClient {
    http_client: reqwest::Client,
    tokens: Arc<ServiceTokenCache>,
    settings: AuthorityClientSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityGroupDto {
    tenant_id: String,
    name: String,
    #[serde(default)]
    activities: Vec<ActivityDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityDto {
    application_name: String,
    activity_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityGroupGrantDto {
    user_id: String,
    #[serde(default)]
    full_name: String,
    tenant_id: String,
    activity_group_name: String,
    expires_on: Option<DateTime<Utc>>,
    granted_by: String,
    granted_on: DateTime<Utc>,
}

impl TryFrom<ActivityGroupDto> for ActivityGroup {
    type Error = AppError;

    fn try_from(dto: ActivityGroupDto) -> Result<Self, Self::Error> {
        Ok(Self {
            tenant_id: TenantId::new(dto.tenant_id)?,
            name: dto.name,
            activities: dto
                .activities
                .into_iter()
                .map(|activity| ActivityRef {
                    application_name: activity.application_name,
                    activity_name: activity.activity_name,
                })
                .collect(),
        })
    }
}

impl TryFrom<ActivityGroupGrantDto> for Grant {
    type Error = AppError;

    fn try_from(dto: ActivityGroupGrantDto) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: dto.user_id,
            full_name: dto.full_name,
            tenant_id: TenantId::new(dto.tenant_id)?,
            grant_type: GrantType::ActivityGroup,
            qualifier: dto.activity_group_name,
            expires_on: dto.expires_on,
            granted_by: dto.granted_by,
            granted_on: dto.granted_on,
            revoked_by: None,
            revoked_on: None,
        })
    }
}

impl HttpAuthorityClient {
    /// Creates a client sharing the service token cache.
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        tokens: Arc<ServiceTokenCache>,
        settings: AuthorityClientSettings,
    ) -> Self {
        Self {
            http_client,
            tokens,
            settings,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> AppResult<Url> {
        let mut url = self.settings.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                AppError::Validation("authority base url cannot carry a path".to_owned())
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        url: Url,
        correlation_id: &str,
    ) -> AppResult<T> {
        let token = self
            .tokens
            .get_token(self.settings.service_account.as_str())
            .await?;

        debug!(operation, correlation_id, url = %url, "calling authority");
        let response = self
            .http_client
            .get(url)
            .bearer_auth(token)
            .header(CORRELATION_ID_HEADER, correlation_id)
            .header(TENANT_ID_HEADER, WILDCARD)
            .send()
            .await
            .map_err(|error| AppError::operation_failed("authority", operation, error))?;

        let status = response.status();
        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                warn!(operation, "authority rejected the service credential");
                self.tokens
                    .invalidate(self.settings.service_account.as_str())
                    .await;
            }
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<response body unavailable>".to_owned());
            return Err(AppError::remote_failure(
                "authority",
                operation,
                status,
                error_reason(body.as_str()),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|error| AppError::operation_failed("authority", operation, error))
    }
}

/// Unwraps the JSON-encoded reason string the authority sends on failure.
fn error_reason(body: &str) -> String {
    serde_json::from_str::<String>(body).unwrap_or_else(|_| body.to_owned())
}

#[async_trait]
impl AuthorityClient for HttpAuthorityClient {
    async fn fetch_activity_groups(&self, correlation_id: &str) -> AppResult<Vec<ActivityGroup>> {
        let mut url = self.endpoint(&["activity-groups"])?;
        url.query_pairs_mut()
            .append_pair("applicationName", self.settings.application_name.as_str());

        let groups: Vec<ActivityGroupDto> = self
            .get_json("fetch_activity_groups", url, correlation_id)
            .await?;
        groups.into_iter().map(ActivityGroup::try_from).collect()
    }

    async fn fetch_user_activity_group_grants(
        &self,
        user_id: &str,
        correlation_id: &str,
    ) -> AppResult<Vec<Grant>> {
        let url = self.endpoint(&[user_id, "grants", "activity-groups"])?;

        let grants: Vec<ActivityGroupGrantDto> = self
            .get_json("fetch_user_activity_group_grants", url, correlation_id)
            .await?;
        grants.into_iter().map(Grant::try_from).collect()
    }

    async fn fetch_all_activity_group_grants(
        &self,
        correlation_id: &str,
    ) -> AppResult<Vec<Grant>> {
        let url = self.endpoint(&["grants", "activity-groups"])?;

        let grants: Vec<ActivityGroupGrantDto> = self
            .get_json("fetch_all_activity_group_grants", url, correlation_id)
            .await?;
        grants.into_iter().map(Grant::try_from).collect()
    }
}

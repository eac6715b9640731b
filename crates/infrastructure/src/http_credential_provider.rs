use std::time::Duration;

use async_trait::async_trait;
use permita_application::{AccessCredential, CredentialProvider};
use permita_core::{AppError, AppResult};
use serde::Deserialize;
use tracing::info;
use url::Url;

/// OAuth2 client registration used for the client-credentials grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentialsSettings {
    /// Token endpoint of the identity provider.
    pub token_endpoint: Url,
    /// Client id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
    /// Requested scope, if any.
    pub scope: Option<String>,
}

/// Acquires service credentials through the OAuth2 client-credentials grant.
pub struct HttpCredentialProvider {
    http_client: reqwest::Client,
    settings: ClientCredentialsSettings,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

impl HttpCredentialProvider {
    /// Creates a provider for one client registration.
    #[must_use]
    pub fn new(http_client: reqwest::Client, settings: ClientCredentialsSettings) -> Self {
        Self {
            http_client,
            settings,
        }
    }

    fn form_body(&self, service_account: &str) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        serializer
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", self.settings.client_id.as_str())
            .append_pair("client_secret", self.settings.client_secret.as_str());
        if let Some(scope) = &self.settings.scope {
            serializer.append_pair("scope", scope.as_str());
        }
        if !service_account.is_empty() {
            serializer.append_pair("service_account", service_account);
        }
        serializer.finish()
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn acquire_credential(&self, service_account: &str) -> AppResult<AccessCredential> {
        let response = self
            .http_client
            .post(self.settings.token_endpoint.clone())
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(self.form_body(service_account))
            .send()
            .await
            .map_err(|error| AppError::operation_failed("credential", "acquire", error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<response body unavailable>".to_owned());
            return Err(AppError::remote_failure(
                "credential",
                "acquire",
                status,
                body,
            ));
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|error| AppError::operation_failed("credential", "decode", error))?;

        info!(service_account, expires_in = ?token.expires_in, "acquired service credential");
        Ok(AccessCredential {
            token: token.access_token,
            expires_in: token.expires_in.map(Duration::from_secs),
        })
    }
}

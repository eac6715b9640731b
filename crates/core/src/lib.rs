//! Shared primitives for all Rust crates in Permita.

#![forbid(unsafe_code)]

/// Authentication primitives shared across services.
pub mod auth;
/// Configuration value expansion.
pub mod config;

use std::fmt::{Display, Formatter};

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use auth::UserIdentity;

/// Result type used across Permita crates.
pub type AppResult<T> = Result<T, AppError>;

/// Wildcard token accepted in tenant, grant type and qualifier positions.
pub const WILDCARD: &str = "*";

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

impl Display for NonEmptyString {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Tenant identifier used as the partition key for grants and activity groups.
///
/// The value `*` denotes every tenant and is only meaningful inside grant scopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Creates a tenant identifier from a non-empty value.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "tenant id must not be empty".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the wildcard tenant that matches every tenant.
    #[must_use]
    pub fn wildcard() -> Self {
        Self(WILDCARD.to_owned())
    }

    /// Returns whether this is the wildcard tenant.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for TenantId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

impl Display for TenantId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

type ErrorCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Common application error categories.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// One or more validators rejected a command or query.
    #[error("invalid command or query: {}", .0.join("; "))]
    InvalidCommandOrQuery(Vec<String>),

    /// Caller has no authenticated principal.
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    /// Principal is authenticated but lacks a qualifying grant.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A store or remote call failed unexpectedly.
    #[error("operation '{operation}' on '{resource}' failed: {message}")]
    OperationFailed {
        /// Logical resource the operation targeted.
        resource: String,
        /// Operation name.
        operation: String,
        /// Diagnostic message safe to surface to callers.
        message: String,
        /// Original failure, when one exists.
        #[source]
        cause: Option<ErrorCause>,
    },

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Wraps a non-domain failure with the resource and operation it came from.
    pub fn operation_failed<E>(
        resource: impl Into<String>,
        operation: impl Into<String>,
        cause: E,
    ) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let message = cause.to_string();
        Self::OperationFailed {
            resource: resource.into(),
            operation: operation.into(),
            message,
            cause: Some(Box::new(cause)),
        }
    }

    /// Describes a non-success response returned by a remote collaborator.
    pub fn remote_failure(
        resource: impl Into<String>,
        operation: impl Into<String>,
        status: StatusCode,
        reason: impl Display,
    ) -> Self {
        Self::OperationFailed {
            resource: resource.into(),
            operation: operation.into(),
            message: format!("remote responded with status {status}: {reason}"),
            cause: None,
        }
    }

    /// Returns whether this error belongs to the domain taxonomy and should pass through unchanged.
    #[must_use]
    pub fn is_domain(&self) -> bool {
        !matches!(self, Self::OperationFailed { .. } | Self::Internal(_))
    }

    /// Returns the status code class associated with this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidCommandOrQuery(_) => StatusCode::BAD_REQUEST,
            Self::NotAuthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::NotAuthorized(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::PRECONDITION_FAILED,
            Self::OperationFailed { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Rewraps non-domain errors as an operation failure of the given component.
    #[must_use]
    pub fn within(self, resource: &str, operation: &str) -> Self {
        match self {
            Self::Internal(message) => Self::OperationFailed {
                resource: resource.to_owned(),
                operation: operation.to_owned(),
                message,
                cause: None,
            },
            other => other,
        }
    }
}

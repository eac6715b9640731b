use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::postgres_scope::{PgScope, SharedTransaction};

use permita_application::{GrantReplacement, GrantRepository, TransactionOptions};
use permita_core::{AppError, AppResult, TenantId};
use permita_domain::{Grant, GrantKey, GrantScope};

mod reads;
mod replace;
mod writes;


const RESOURCE: &str = "grant";

/// PostgreSQL-backed repository for live grants and grant history.
#[derive(Clone)]
pub struct PostgresGrantRepository {
    scope: PgScope,
}

impl PostgresGrantRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            scope: PgScope::Pool(pool),
        }
    }

    /// Creates a repository whose statements run in an open unit of work.
    pub(crate) fn joined(transaction: SharedTransaction) -> Self {
        Self {
            scope: PgScope::UnitOfWork(transaction),
        }
    }
}

#[derive(Debug, FromRow)]
struct GrantRow {
    user_id: String,
    full_name: String,
    tenant_id: String,
    grant_type: String,
    qualifier: String,
    expires_on: Option<DateTime<Utc>>,
    granted_by: String,
    granted_on: DateTime<Utc>,
    revoked_by: Option<String>,
    revoked_on: Option<DateTime<Utc>>,
}

impl TryFrom<GrantRow> for Grant {
    type Error = AppError;

    fn try_from(row: GrantRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: row.user_id,
            full_name: row.full_name,
            tenant_id: TenantId::new(row.tenant_id)?,
            grant_type: row.grant_type.parse()?,
            qualifier: row.qualifier,
            expires_on: row.expires_on,
            granted_by: row.granted_by,
            granted_on: row.granted_on,
            revoked_by: row.revoked_by,
            revoked_on: row.revoked_on,
        })
    }
}

fn into_grants(rows: Vec<GrantRow>) -> AppResult<Vec<Grant>> {
    rows.into_iter().map(Grant::try_from).collect()
}

fn failed(operation: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |error| AppError::operation_failed(RESOURCE, operation, error)
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(database_error)
        if database_error.code().as_deref() == Some("23505"))
}

#[async_trait]
impl GrantRepository for PostgresGrantRepository {
    async fn save(&self, grant: Grant) -> AppResult<()> {
        self.save_impl(grant).await
    }

    async fn delete(&self, grant: &Grant) -> AppResult<()> {
        self.delete_impl(grant).await
    }

    async fn exists(&self, key: &GrantKey) -> AppResult<bool> {
        self.exists_impl(key).await
    }

    async fn read(&self, key: &GrantKey) -> AppResult<Option<Grant>> {
        self.read_impl(key).await
    }

    async fn read_all(&self, user_id: &str) -> AppResult<Vec<Grant>> {
        self.read_all_impl(user_id).await
    }

    async fn matching(&self, scope: &GrantScope, user_id: Option<&str>) -> AppResult<Vec<Grant>> {
        self.matching_impl(scope, user_id).await
    }

    async fn replace_activity_group_grants_for_user(
        &self,
        user_id: &str,
        grants: Vec<Grant>,
        options: &TransactionOptions,
    ) -> AppResult<GrantReplacement> {
        self.replace_for_user_impl(user_id, grants, options).await
    }

    async fn replace_all_activity_group_grants(
        &self,
        grants: Vec<Grant>,
        options: &TransactionOptions,
    ) -> AppResult<GrantReplacement> {
        self.replace_all_impl(grants, options).await
    }
}

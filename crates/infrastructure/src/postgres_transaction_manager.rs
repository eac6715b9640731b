use std::sync::Arc;

use async_trait::async_trait;
use permita_application::{
    ActivityGroupRepository, GrantRepository, TransactionManager, TransactionOptions, UnitOfWork,
};
use permita_core::{AppError, AppResult};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio::sync::Mutex;

use crate::postgres_scope::SharedTransaction;
use crate::{PostgresActivityGroupRepository, PostgresGrantRepository};

/// Applies isolation and statement timeout to a freshly opened transaction.
pub(crate) async fn apply_transaction_options(
    connection: &mut PgConnection,
    options: &TransactionOptions,
    resource: &str,
) -> AppResult<()> {
    let isolation = format!(
        "SET TRANSACTION ISOLATION LEVEL {}",
        options.isolation.as_sql()
    );
    sqlx::query(isolation.as_str())
        .execute(&mut *connection)
        .await
        .map_err(|error| AppError::operation_failed(resource, "set_isolation", error))?;

    let timeout_ms = options.timeout.as_millis().max(1).to_string();
    sqlx::query("SELECT set_config('statement_timeout', $1, true)")
        .bind(timeout_ms)
        .execute(&mut *connection)
        .await
        .map_err(|error| AppError::operation_failed(resource, "set_timeout", error))?;

    Ok(())
}

/// PostgreSQL-backed unit of work provider.
#[derive(Clone)]
pub struct PostgresTransactionManager {
    pool: PgPool,
}

impl PostgresTransactionManager {
    /// Creates a manager with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct PostgresUnitOfWork {
    transaction: SharedTransaction,
}

impl PostgresUnitOfWork {
    async fn take(&self) -> AppResult<Transaction<'static, Postgres>> {
        self.transaction.lock().await.take().ok_or_else(|| {
            AppError::Internal("unit of work has already been completed".to_owned())
        })
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    fn grants(&self) -> Arc<dyn GrantRepository> {
        Arc::new(PostgresGrantRepository::joined(Arc::clone(&self.transaction)))
    }

    fn activity_groups(&self) -> Arc<dyn ActivityGroupRepository> {
        Arc::new(PostgresActivityGroupRepository::joined(Arc::clone(
            &self.transaction,
        )))
    }

    async fn commit(&self) -> AppResult<()> {
        self.take()
            .await?
            .commit()
            .await
            .map_err(|error| AppError::operation_failed("unit_of_work", "commit", error))
    }

    async fn rollback(&self) -> AppResult<()> {
        self.take()
            .await?
            .rollback()
            .await
            .map_err(|error| AppError::operation_failed("unit_of_work", "rollback", error))
    }
}

#[async_trait]
impl TransactionManager for PostgresTransactionManager {
    async fn begin(&self, options: &TransactionOptions) -> AppResult<Arc<dyn UnitOfWork>> {
        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(|error| AppError::operation_failed("unit_of_work", "begin", error))?;
        apply_transaction_options(&mut transaction, options, "unit_of_work").await?;

        Ok(Arc::new(PostgresUnitOfWork {
            transaction: Arc::new(Mutex::new(Some(transaction))),
        }))
    }
}

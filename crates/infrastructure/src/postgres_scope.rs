use std::sync::Arc;

use permita_application::TransactionOptions;
use permita_core::{AppError, AppResult};
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::postgres_transaction_manager::apply_transaction_options;

/// Transaction shared by a unit of work and every repository bound to it.
pub(crate) type SharedTransaction = Arc<Mutex<Option<Transaction<'static, Postgres>>>>;

/// Where a repository runs its statements.
#[derive(Clone)]
pub(crate) enum PgScope {
    /// A fresh pooled connection per operation.
    Pool(PgPool),
    /// The open transaction of the current unit of work.
    UnitOfWork(SharedTransaction),
}

impl PgScope {
    pub(crate) async fn acquire(&self, resource: &'static str) -> AppResult<ScopedConnection> {
        match self {
            Self::Pool(pool) => pool
                .acquire()
                .await
                .map(ScopedConnection::Pooled)
                .map_err(|error| AppError::operation_failed(resource, "acquire", error)),
            Self::UnitOfWork(transaction) => Ok(ScopedConnection::Joined(
                Arc::clone(transaction).lock_owned().await,
            )),
        }
    }
}

/// A connection held for the length of one repository operation.
pub(crate) enum ScopedConnection {
    Pooled(PoolConnection<Postgres>),
    Joined(OwnedMutexGuard<Option<Transaction<'static, Postgres>>>),
}

impl ScopedConnection {
    pub(crate) fn connection(&mut self) -> AppResult<&mut PgConnection> {
        match self {
            Self::Pooled(connection) => Ok(&mut **connection),
            Self::Joined(guard) => guard
                .as_mut()
                .map(|transaction| &mut **transaction)
                .ok_or_else(|| {
                    AppError::Internal("unit of work has already been completed".to_owned())
                }),
        }
    }

    /// Opens a transaction, or a savepoint when the connection already belongs to a unit of work.
    ///
    /// Options only apply at the top level; a savepoint inherits the outer isolation and timeout.
    pub(crate) async fn begin(
        &mut self,
        options: Option<&TransactionOptions>,
        resource: &'static str,
    ) -> AppResult<Transaction<'_, Postgres>> {
        let top_level = matches!(self, Self::Pooled(_));
        let connection = self.connection()?;
        let mut transaction = sqlx::Connection::begin(connection)
            .await
            .map_err(|error| AppError::operation_failed(resource, "begin", error))?;
        if let Some(options) = options.filter(|_| top_level) {
            apply_transaction_options(&mut transaction, options, resource).await?;
        }
        Ok(transaction)
    }
}

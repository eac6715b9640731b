use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use permita_core::AppResult;

use crate::{ActivityGroupRepository, GrantRepository};

/// Isolation level requested for a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Statements see rows committed before they started.
    #[default]
    ReadCommitted,
    /// The transaction sees one snapshot.
    RepeatableRead,
    /// Full serializability.
    Serializable,
}

impl IsolationLevel {
    /// Returns the SQL keyword sequence for this level.
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// Bounds applied to one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Maximum time statements in the transaction may run.
    pub timeout: Duration,
    /// Isolation level.
    pub isolation: IsolationLevel,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            isolation: IsolationLevel::ReadCommitted,
        }
    }
}

/// Scoped transaction opened by the pipeline.
///
/// Stores handed out by a unit of work run every statement on its connection, so their
/// reads and writes commit or roll back with it.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Returns the grant store bound to this transaction.
    fn grants(&self) -> Arc<dyn GrantRepository>;

    /// Returns the activity group store bound to this transaction.
    fn activity_groups(&self) -> Arc<dyn ActivityGroupRepository>;

    /// Commits the transaction.
    async fn commit(&self) -> AppResult<()>;

    /// Rolls the transaction back.
    async fn rollback(&self) -> AppResult<()>;
}

/// Port opening units of work.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    /// Opens a transaction on a dedicated connection.
    async fn begin(&self, options: &TransactionOptions) -> AppResult<Arc<dyn UnitOfWork>>;
}

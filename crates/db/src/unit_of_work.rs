//! Explicit transaction scope shared by services.

use std::sync::Arc;

use movieclub_common::{AppError, AppResult};
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};

/// Opens transactions that are handed to repository methods explicitly.
///
/// A transaction that is dropped without [`UnitOfWork::commit`] is rolled back.
#[derive(Clone)]
pub struct UnitOfWork {
    db: Arc<DatabaseConnection>,
}

impl UnitOfWork {
    /// Create a new unit of work over a connection pool.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// The underlying pool, for reads that need no transaction.
    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }

    /// Begin a new transaction.
    pub async fn begin(&self) -> AppResult<DatabaseTransaction> {
        self.db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Commit a transaction opened by [`UnitOfWork::begin`].
    pub async fn commit(txn: DatabaseTransaction) -> AppResult<()> {
        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

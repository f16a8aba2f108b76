//! Transaction Store: persistence for transactions keyed by payment reference.

mod memory;
mod postgres;

pub use memory::InMemoryTransactionStore;
pub use postgres::PgTransactionStore;

use crate::models::{NewTransaction, Transaction, TransactionFilter, TransactionPatch, UpsertOutcome};
use async_trait::async_trait;
use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transaction '{0}' already exists")]
    Conflict(String),

    #[error("transaction store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(reference) => AppError::Conflict(anyhow::anyhow!(
                "Transaction {} already exists",
                reference
            )),
            StoreError::Unavailable(_) => AppError::ServiceUnavailable,
            StoreError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
        }
    }
}

/// CRUD over transactions. Absence is `Ok(None)`, never an error.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Strict insert. A duplicate payment reference is [`StoreError::Conflict`].
    async fn create(&self, record: &NewTransaction) -> Result<Transaction, StoreError>;

    /// Sets only the supplied fields. `None` when the patch is empty, no row
    /// matches, or the status policy refuses the status change.
    async fn update(
        &self,
        payment_reference: &str,
        patch: &TransactionPatch,
    ) -> Result<Option<Transaction>, StoreError>;

    async fn get(&self, payment_reference: &str) -> Result<Option<Transaction>, StoreError>;

    /// Newest first.
    async fn list(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, StoreError>;

    /// Total matching `filter`, ignoring limit and offset.
    async fn count(&self, filter: &TransactionFilter) -> Result<i64, StoreError>;

    /// Atomic insert-or-update on the payment reference.
    ///
    /// The settlement amount and creation time of an existing row are kept.
    /// Missing customer fields do not erase stored ones; metadata is merged.
    async fn upsert(&self, record: &NewTransaction) -> Result<UpsertOutcome, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

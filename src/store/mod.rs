//! Persistence capability
//!
//! Repository abstraction over transactions, mobile-money accounts and
//! failed-transaction records, plus unit-of-work control used by the
//! message middleware. Two implementations: `PgStore` for production and
//! `MemoryStore` for tests and local development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{MobileMoneyAccount, Transaction};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Record of a terminal failure, at most one per transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTransaction {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

impl FailedTransaction {
    pub fn new(transaction_id: Uuid, reason: impl Into<String>, failed_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            reason: reason.into(),
            failed_at,
        }
    }
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("A store transaction is already active")]
    TransactionActive,

    #[error("No store transaction is active")]
    NoActiveTransaction,
}

/// Repository and unit-of-work capability.
///
/// `begin`/`commit`/`rollback` scope an ambient transaction: while one is
/// active, every read and write on this store runs inside it. The message
/// middleware owns that scope; nothing else starts transactions.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<(), StoreError>;
    async fn commit(&self) -> Result<(), StoreError>;
    async fn rollback(&self) -> Result<(), StoreError>;
    fn in_transaction(&self) -> bool;

    async fn find_transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError>;
    async fn save_transaction(&self, transaction: &Transaction) -> Result<(), StoreError>;

    /// Sum of COMPLETED transaction amounts for a user since a point in
    /// time. Authoritative source for the rolling-limit totals.
    async fn completed_total_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Decimal, StoreError>;

    /// PENDING transactions that already hold a gateway reference and are
    /// older than the cutoff; fed to the verification sweep.
    async fn find_pending_with_reference(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError>;

    async fn record_failed_transaction(
        &self,
        failure: &FailedTransaction,
    ) -> Result<(), StoreError>;

    async fn failed_transactions_for(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<FailedTransaction>, StoreError>;

    async fn find_account(&self, id: Uuid) -> Result<Option<MobileMoneyAccount>, StoreError>;
    async fn save_account(&self, account: &MobileMoneyAccount) -> Result<(), StoreError>;
}

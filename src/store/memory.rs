//! In-memory store
//!
//! Map-backed implementation used by the test suite and local development.
//! The unit-of-work is implemented with a snapshot: `begin` clones the
//! tables, `rollback` restores the clone, `commit` discards it. Audit
//! entries are kept outside the snapshot, so they survive a rollback the
//! same way a production audit write outside the database transaction
//! would.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditStore};
use crate::domain::{MobileMoneyAccount, Transaction, TransactionStatus};

use super::{FailedTransaction, Store, StoreError};

#[derive(Debug, Clone, Default)]
struct Tables {
    transactions: HashMap<Uuid, Transaction>,
    accounts: HashMap<Uuid, MobileMoneyAccount>,
    failed_transactions: Vec<FailedTransaction>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    snapshot: Mutex<Option<Tables>>,
    tx_active: AtomicBool,
    audit_entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<(), StoreError> {
        let mut snapshot = self.snapshot.lock().await;
        if snapshot.is_some() {
            return Err(StoreError::TransactionActive);
        }
        *snapshot = Some(self.tables.read().await.clone());
        self.tx_active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let mut snapshot = self.snapshot.lock().await;
        if snapshot.take().is_none() {
            return Err(StoreError::NoActiveTransaction);
        }
        self.tx_active.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        let mut snapshot = self.snapshot.lock().await;
        let restored = snapshot.take().ok_or(StoreError::NoActiveTransaction)?;
        *self.tables.write().await = restored;
        self.tx_active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.tx_active.load(Ordering::SeqCst)
    }

    async fn find_transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        Ok(self.tables.read().await.transactions.get(&id).cloned())
    }

    async fn save_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .transactions
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn completed_total_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Decimal, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .values()
            .filter(|t| {
                t.user_id == user_id
                    && t.status == TransactionStatus::Completed
                    && t.created_at >= since
            })
            .map(|t| t.amount)
            .sum())
    }

    async fn find_pending_with_reference(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let tables = self.tables.read().await;
        let mut pending: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|t| {
                t.status == TransactionStatus::Pending
                    && t.reference.is_some()
                    && t.created_at < older_than
            })
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn record_failed_transaction(
        &self,
        failure: &FailedTransaction,
    ) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .failed_transactions
            .push(failure.clone());
        Ok(())
    }

    async fn failed_transactions_for(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<FailedTransaction>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .failed_transactions
            .iter()
            .filter(|f| f.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn find_account(&self, id: Uuid) -> Result<Option<MobileMoneyAccount>, StoreError> {
        Ok(self.tables.read().await.accounts.get(&id).cloned())
    }

    async fn save_account(&self, account: &MobileMoneyAccount) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .accounts
            .insert(account.id, account.clone());
        Ok(())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.audit_entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn find_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let mut entries: Vec<AuditEntry> = self
            .audit_entries
            .read()
            .await
            .iter()
            .filter(|e| e.created_at >= start && e.created_at <= end)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    async fn find_by_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<AuditEntry>, StoreError> {
        let mut entries: Vec<AuditEntry> = self
            .audit_entries
            .read()
            .await
            .iter()
            .filter(|e| e.user_id == Some(user_id))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }

    async fn find_by_message_class(
        &self,
        message_class: &str,
        limit: i64,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let mut entries: Vec<AuditEntry> = self
            .audit_entries
            .read()
            .await
            .iter()
            .filter(|e| e.message_class == message_class)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }

    async fn find_errors(
        &self,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let mut entries: Vec<AuditEntry> = self
            .audit_entries
            .read()
            .await
            .iter()
            .filter(|e| !e.success && since.map_or(true, |s| e.created_at >= s))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }

    async fn delete_older_than(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut entries = self.audit_entries.write().await;
        let initial = entries.len();
        entries.retain(|e| e.created_at >= before);
        Ok((initial - entries.len()) as u64)
    }
}

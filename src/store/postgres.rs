//! Postgres store
//!
//! Production `Store`/`AuditStore` implementation over sqlx. The ambient
//! unit-of-work holds an open `sqlx::Transaction`; while one is active,
//! every entity read and write routes through it, so the middleware's
//! begin/commit/rollback brackets the whole handler. Audit writes always go
//! straight to the pool: the audit trail sits outside the transaction
//! boundary and survives a rollback.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction as DbTransaction};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditStore};
use crate::domain::{
    MobileMoneyAccount, Operator, Provider, StatusChange, Transaction, TransactionStatus,
    TransactionType,
};

use super::{FailedTransaction, Store, StoreError};

pub struct PgStore {
    pool: PgPool,
    active: Mutex<Option<DbTransaction<'static, Postgres>>>,
    tx_active: AtomicBool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            active: Mutex::new(None),
            tx_active: AtomicBool::new(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

type TransactionRow = (
    Uuid,                  // id
    Uuid,                  // user_id
    String,                // kind
    Decimal,               // amount
    Option<Decimal>,       // fees
    String,                // status
    Option<Uuid>,          // source_account_id
    String,                // recipient_number
    Option<String>,        // operator
    Option<String>,        // reference
    Option<String>,        // operator_reference
    DateTime<Utc>,         // created_at
    Option<DateTime<Utc>>, // completed_at
    serde_json::Value,     // status_history
);

type AccountRow = (
    Uuid,                  // id
    Uuid,                  // user_id
    String,                // number
    Option<String>,        // provider
    bool,                  // is_default
    bool,                  // is_verified
    Option<Decimal>,       // balance
    Option<DateTime<Utc>>, // last_sync
    DateTime<Utc>,         // created_at
    DateTime<Utc>,         // updated_at
);

type AuditRow = (
    Uuid,
    String,
    serde_json::Value,
    Option<Uuid>,
    bool,
    f64,
    Option<String>,
    DateTime<Utc>,
    Option<serde_json::Value>,
);

fn row_to_transaction(row: TransactionRow) -> Result<Transaction, StoreError> {
    let (
        id,
        user_id,
        kind,
        amount,
        fees,
        status,
        source_account_id,
        recipient_number,
        operator,
        reference,
        operator_reference,
        created_at,
        completed_at,
        status_history,
    ) = row;

    let kind = TransactionType::from_str(&kind).map_err(StoreError::Corrupt)?;
    let status = TransactionStatus::from_str(&status).map_err(StoreError::Corrupt)?;
    let operator = operator
        .map(|o| Operator::from_str(&o).map_err(StoreError::Corrupt))
        .transpose()?;
    let status_history: Vec<StatusChange> = serde_json::from_value(status_history)?;

    Ok(Transaction {
        id,
        user_id,
        kind,
        amount,
        fees,
        status,
        source_account_id,
        recipient_number,
        operator,
        reference,
        operator_reference,
        created_at,
        completed_at,
        status_history,
    })
}

fn row_to_account(row: AccountRow) -> Result<MobileMoneyAccount, StoreError> {
    let (
        id,
        user_id,
        number,
        provider,
        is_default,
        is_verified,
        balance,
        last_sync,
        created_at,
        updated_at,
    ) = row;

    let provider = provider
        .map(|p| Provider::from_str(&p).map_err(StoreError::Corrupt))
        .transpose()?;

    Ok(MobileMoneyAccount {
        id,
        user_id,
        number,
        provider,
        is_default,
        is_verified,
        balance,
        last_sync,
        created_at,
        updated_at,
    })
}

fn row_to_audit_entry(row: AuditRow) -> AuditEntry {
    let (id, message_class, message_data, user_id, success, duration_ms, error, created_at, metadata) =
        row;
    AuditEntry {
        id,
        message_class,
        message_data,
        user_id,
        success,
        duration_ms,
        error,
        created_at,
        metadata,
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

const FIND_TRANSACTION: &str = r#"
    SELECT id, user_id, kind, amount, fees, status, source_account_id,
           recipient_number, operator, reference, operator_reference,
           created_at, completed_at, status_history
    FROM transactions
    WHERE id = $1
"#;

const SAVE_TRANSACTION: &str = r#"
    INSERT INTO transactions (
        id, user_id, kind, amount, fees, status, source_account_id,
        recipient_number, operator, reference, operator_reference,
        created_at, completed_at, status_history
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
    ON CONFLICT (id) DO UPDATE SET
        fees = EXCLUDED.fees,
        status = EXCLUDED.status,
        operator = EXCLUDED.operator,
        reference = EXCLUDED.reference,
        operator_reference = EXCLUDED.operator_reference,
        completed_at = EXCLUDED.completed_at,
        status_history = EXCLUDED.status_history
"#;

const COMPLETED_TOTAL_SINCE: &str = r#"
    SELECT COALESCE(SUM(amount), 0)
    FROM transactions
    WHERE user_id = $1 AND status = 'COMPLETED' AND created_at >= $2
"#;

const FIND_PENDING_WITH_REFERENCE: &str = r#"
    SELECT id, user_id, kind, amount, fees, status, source_account_id,
           recipient_number, operator, reference, operator_reference,
           created_at, completed_at, status_history
    FROM transactions
    WHERE status = 'PENDING' AND reference IS NOT NULL AND created_at < $1
    ORDER BY created_at ASC
    LIMIT $2
"#;

const RECORD_FAILED_TRANSACTION: &str = r#"
    INSERT INTO failed_transactions (id, transaction_id, reason, failed_at)
    VALUES ($1, $2, $3, $4)
"#;

const FAILED_TRANSACTIONS_FOR: &str = r#"
    SELECT id, transaction_id, reason, failed_at
    FROM failed_transactions
    WHERE transaction_id = $1
    ORDER BY failed_at ASC
"#;

const FIND_ACCOUNT: &str = r#"
    SELECT id, user_id, number, provider, is_default, is_verified,
           balance, last_sync, created_at, updated_at
    FROM mobile_money_accounts
    WHERE id = $1
"#;

const SAVE_ACCOUNT: &str = r#"
    INSERT INTO mobile_money_accounts (
        id, user_id, number, provider, is_default, is_verified,
        balance, last_sync, created_at, updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
    ON CONFLICT (id) DO UPDATE SET
        number = EXCLUDED.number,
        provider = EXCLUDED.provider,
        is_default = EXCLUDED.is_default,
        is_verified = EXCLUDED.is_verified,
        balance = EXCLUDED.balance,
        last_sync = EXCLUDED.last_sync,
        updated_at = EXCLUDED.updated_at
"#;

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<(), StoreError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(StoreError::TransactionActive);
        }
        *active = Some(self.pool.begin().await?);
        self.tx_active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let mut active = self.active.lock().await;
        let tx = active.take().ok_or(StoreError::NoActiveTransaction)?;
        self.tx_active.store(false, Ordering::SeqCst);
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        let mut active = self.active.lock().await;
        let tx = active.take().ok_or(StoreError::NoActiveTransaction)?;
        self.tx_active.store(false, Ordering::SeqCst);
        tx.rollback().await?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.tx_active.load(Ordering::SeqCst)
    }

    async fn find_transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        let mut active = self.active.lock().await;
        let row: Option<TransactionRow> = if let Some(tx) = active.as_mut() {
            sqlx::query_as(FIND_TRANSACTION)
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?
        } else {
            drop(active);
            sqlx::query_as(FIND_TRANSACTION)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
        };
        row.map(row_to_transaction).transpose()
    }

    async fn save_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        let status_history = serde_json::to_value(&transaction.status_history)?;
        let operator = transaction.operator.map(|o| o.as_str().to_string());

        let query = sqlx::query(SAVE_TRANSACTION)
            .bind(transaction.id)
            .bind(transaction.user_id)
            .bind(transaction.kind.as_str())
            .bind(transaction.amount)
            .bind(transaction.fees)
            .bind(transaction.status.as_str())
            .bind(transaction.source_account_id)
            .bind(&transaction.recipient_number)
            .bind(operator)
            .bind(&transaction.reference)
            .bind(&transaction.operator_reference)
            .bind(transaction.created_at)
            .bind(transaction.completed_at)
            .bind(status_history);

        let mut active = self.active.lock().await;
        if let Some(tx) = active.as_mut() {
            query.execute(&mut **tx).await?;
        } else {
            drop(active);
            query.execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn completed_total_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Decimal, StoreError> {
        let mut active = self.active.lock().await;
        let total: Decimal = if let Some(tx) = active.as_mut() {
            sqlx::query_scalar(COMPLETED_TOTAL_SINCE)
                .bind(user_id)
                .bind(since)
                .fetch_one(&mut **tx)
                .await?
        } else {
            drop(active);
            sqlx::query_scalar(COMPLETED_TOTAL_SINCE)
                .bind(user_id)
                .bind(since)
                .fetch_one(&self.pool)
                .await?
        };
        Ok(total)
    }

    async fn find_pending_with_reference(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let mut active = self.active.lock().await;
        let rows: Vec<TransactionRow> = if let Some(tx) = active.as_mut() {
            sqlx::query_as(FIND_PENDING_WITH_REFERENCE)
                .bind(older_than)
                .bind(limit)
                .fetch_all(&mut **tx)
                .await?
        } else {
            drop(active);
            sqlx::query_as(FIND_PENDING_WITH_REFERENCE)
                .bind(older_than)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
        };
        rows.into_iter().map(row_to_transaction).collect()
    }

    async fn record_failed_transaction(
        &self,
        failure: &FailedTransaction,
    ) -> Result<(), StoreError> {
        let query = sqlx::query(RECORD_FAILED_TRANSACTION)
            .bind(failure.id)
            .bind(failure.transaction_id)
            .bind(&failure.reason)
            .bind(failure.failed_at);

        let mut active = self.active.lock().await;
        if let Some(tx) = active.as_mut() {
            query.execute(&mut **tx).await?;
        } else {
            drop(active);
            query.execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn failed_transactions_for(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<FailedTransaction>, StoreError> {
        let mut active = self.active.lock().await;
        let rows: Vec<(Uuid, Uuid, String, DateTime<Utc>)> = if let Some(tx) = active.as_mut() {
            sqlx::query_as(FAILED_TRANSACTIONS_FOR)
                .bind(transaction_id)
                .fetch_all(&mut **tx)
                .await?
        } else {
            drop(active);
            sqlx::query_as(FAILED_TRANSACTIONS_FOR)
                .bind(transaction_id)
                .fetch_all(&self.pool)
                .await?
        };
        Ok(rows
            .into_iter()
            .map(|(id, transaction_id, reason, failed_at)| FailedTransaction {
                id,
                transaction_id,
                reason,
                failed_at,
            })
            .collect())
    }

    async fn find_account(&self, id: Uuid) -> Result<Option<MobileMoneyAccount>, StoreError> {
        let mut active = self.active.lock().await;
        let row: Option<AccountRow> = if let Some(tx) = active.as_mut() {
            sqlx::query_as(FIND_ACCOUNT)
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?
        } else {
            drop(active);
            sqlx::query_as(FIND_ACCOUNT)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
        };
        row.map(row_to_account).transpose()
    }

    async fn save_account(&self, account: &MobileMoneyAccount) -> Result<(), StoreError> {
        let provider = account.provider.map(|p| p.as_str().to_string());

        let query = sqlx::query(SAVE_ACCOUNT)
            .bind(account.id)
            .bind(account.user_id)
            .bind(&account.number)
            .bind(provider)
            .bind(account.is_default)
            .bind(account.is_verified)
            .bind(account.balance)
            .bind(account.last_sync)
            .bind(account.created_at)
            .bind(account.updated_at);

        let mut active = self.active.lock().await;
        if let Some(tx) = active.as_mut() {
            query.execute(&mut **tx).await?;
        } else {
            drop(active);
            query.execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        // Always through the pool, never the ambient transaction
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, message_class, message_data, user_id, success,
                duration_ms, error, created_at, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.message_class)
        .bind(&entry.message_data)
        .bind(entry.user_id)
        .bind(entry.success)
        .bind(entry.duration_ms)
        .bind(&entry.error)
        .bind(entry.created_at)
        .bind(&entry.metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, message_class, message_data, user_id, success,
                   duration_ms, error, created_at, metadata
            FROM audit_logs
            WHERE created_at BETWEEN $1 AND $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_audit_entry).collect())
    }

    async fn find_by_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<AuditEntry>, StoreError> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, message_class, message_data, user_id, success,
                   duration_ms, error, created_at, metadata
            FROM audit_logs
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_audit_entry).collect())
    }

    async fn find_by_message_class(
        &self,
        message_class: &str,
        limit: i64,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, message_class, message_data, user_id, success,
                   duration_ms, error, created_at, metadata
            FROM audit_logs
            WHERE message_class = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(message_class)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_audit_entry).collect())
    }

    async fn find_errors(
        &self,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, message_class, message_data, user_id, success,
                   duration_ms, error, created_at, metadata
            FROM audit_logs
            WHERE success = false AND ($1::timestamptz IS NULL OR created_at >= $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_audit_entry).collect())
    }

    async fn delete_older_than(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM audit_logs WHERE created_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

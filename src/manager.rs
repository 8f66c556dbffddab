//! Transaction manager
//!
//! Orchestrates the transaction lifecycle: fee attachment, the boolean
//! validation gate, the PENDING -> COMPLETED settlement (debit + persist +
//! limit-cache invalidation) and the PENDING -> FAILED path with its
//! FailedTransaction record. Side effects here are externally visible;
//! rolling them back on error is the transaction middleware's job.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::domain::{DomainError, Transaction, TransactionStatus};
use crate::limits::LimitTracker;
use crate::store::{FailedTransaction, Store, StoreError};
use crate::validation::TransactionValidator;

/// Failures surfaced by the manager.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// Business-rule or state-machine violation; retrying cannot succeed
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Infrastructure fault; the attempt may be retried
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct TransactionManager {
    store: Arc<dyn Store>,
    limits: LimitTracker,
    validator: TransactionValidator,
}

impl TransactionManager {
    pub fn new(store: Arc<dyn Store>, limits: LimitTracker, validator: TransactionValidator) -> Self {
        Self {
            store,
            limits,
            validator,
        }
    }

    /// Attach the fee to the transaction (once) and return it.
    pub fn calculate_fees(&self, transaction: &mut Transaction) -> Decimal {
        transaction.attach_fees()
    }

    /// Boolean validation gate over the shared rule set. Logs the first
    /// violation and returns `false`; infrastructure faults propagate.
    pub async fn validate_transaction(
        &self,
        transaction: &Transaction,
    ) -> Result<bool, StoreError> {
        let violations = self.validator.validate(transaction).await?;

        if let Some(first) = violations.first() {
            tracing::warn!(
                transaction_id = %transaction.id,
                code = first.code(),
                violations = violations.len(),
                "transaction failed validation: {}",
                first
            );
            return Ok(false);
        }

        Ok(true)
    }

    /// Settle a validated transaction: COMPLETED status, balance debit,
    /// persistence and limit-cache invalidation.
    ///
    /// The caller must have validated the transaction; persistence failures
    /// propagate untouched.
    pub async fn process_transaction(
        &self,
        transaction: &mut Transaction,
    ) -> Result<(), ManagerError> {
        let now = Utc::now();
        transaction.attach_fees();
        let total = transaction.total_amount();
        transaction.transition(TransactionStatus::Completed, now)?;

        let account_id = transaction
            .source_account_id
            .ok_or(DomainError::MissingSourceAccount)?;
        let mut account = self
            .store
            .find_account(account_id)
            .await?
            .ok_or(DomainError::AccountNotFound(account_id))?;

        account.debit(total)?;

        self.store.save_transaction(transaction).await?;
        self.store.save_account(&account).await?;

        self.limits.invalidate(transaction.user_id).await;

        tracing::info!(
            transaction_id = %transaction.id,
            amount = %transaction.amount,
            kind = %transaction.kind,
            "transaction processed"
        );

        Ok(())
    }

    /// Move a transaction to FAILED and record the reason.
    ///
    /// Idempotent: a transaction that is already FAILED is left untouched
    /// and no second FailedTransaction row is created.
    pub async fn handle_failure(
        &self,
        transaction: &mut Transaction,
        reason: &str,
    ) -> Result<(), ManagerError> {
        if transaction.status == TransactionStatus::Failed {
            tracing::warn!(
                transaction_id = %transaction.id,
                "transaction already failed, skipping duplicate failure record"
            );
            return Ok(());
        }

        let now = Utc::now();
        transaction.transition(TransactionStatus::Failed, now)?;

        self.store.save_transaction(transaction).await?;
        self.store
            .record_failed_transaction(&FailedTransaction::new(transaction.id, reason, now))
            .await?;

        tracing::error!(
            transaction_id = %transaction.id,
            reason,
            "transaction failed"
        );

        Ok(())
    }

    /// Generic status transition used by verification flows, where the
    /// terminal outcome arrives asynchronously from the gateway.
    pub async fn update_status(
        &self,
        transaction: &mut Transaction,
        status: TransactionStatus,
    ) -> Result<(), ManagerError> {
        let old_status = transaction.status;
        transaction.transition(status, Utc::now())?;
        self.store.save_transaction(transaction).await?;

        tracing::info!(
            transaction_id = %transaction.id,
            old_status = %old_status,
            new_status = %status,
            "transaction status updated"
        );

        Ok(())
    }
}

//! Domain error types
//!
//! Business-rule and invariant failures, independent of the
//! web/infrastructure layer.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::transaction::TransactionStatus;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Amount is zero, negative or otherwise malformed
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Attempt to move a transaction out of a terminal state
    #[error("Illegal status transition: {from} -> {to}")]
    IllegalStatusTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Transaction carries no source account
    #[error("Transaction has no source account")]
    MissingSourceAccount,

    /// Source account row could not be loaded
    #[error("Mobile money account not found: {0}")]
    AccountNotFound(Uuid),

    /// Account balance has never been synced from the operator
    #[error("Account balance has not been synced yet")]
    BalanceNotSynced,

    /// Balance would not cover the requested debit
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    /// Operator reported a negative balance
    #[error("Negative balance reported by operator: {0}")]
    NegativeBalance(Decimal),
}

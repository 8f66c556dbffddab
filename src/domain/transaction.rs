//! Transaction entity
//!
//! A money transfer or airtime purchase moving through the processing
//! pipeline. The status state machine is enforced here: a transaction is
//! created PENDING and moves to exactly one of COMPLETED or FAILED, never
//! back.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::DomainError;
use super::fees;
use super::operator::Operator;

/// Kind of money movement requested by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    MoneyTransfer,
    CreditPurchase,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::MoneyTransfer => "MONEY_TRANSFER",
            TransactionType::CreditPurchase => "CREDIT_PURCHASE",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MONEY_TRANSFER" => Ok(TransactionType::MoneyTransfer),
            "CREDIT_PURCHASE" => Ok(TransactionType::CreditPurchase),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

/// Processing state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "COMPLETED" => Ok(TransactionStatus::Completed),
            "FAILED" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// One entry of the append-only status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
    pub previous_status: TransactionStatus,
}

/// A wallet transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: TransactionType,
    pub amount: Decimal,
    /// Attached exactly once, before any fee-inclusive balance check
    pub fees: Option<Decimal>,
    pub status: TransactionStatus,
    pub source_account_id: Option<Uuid>,
    pub recipient_number: String,
    pub operator: Option<Operator>,
    /// Gateway-assigned reference, set once the payment is initiated
    pub reference: Option<String>,
    pub operator_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status_history: Vec<StatusChange>,
}

impl Transaction {
    /// Create a new PENDING transaction.
    ///
    /// # Errors
    /// `DomainError::InvalidAmount` if the amount is not strictly positive.
    pub fn new(
        user_id: Uuid,
        kind: TransactionType,
        amount: Decimal,
        recipient_number: impl Into<String>,
    ) -> Result<Self, DomainError> {
        if amount <= Decimal::ZERO {
            return Err(DomainError::InvalidAmount(amount));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            amount,
            fees: None,
            status: TransactionStatus::Pending,
            source_account_id: None,
            recipient_number: recipient_number.into(),
            operator: None,
            reference: None,
            operator_reference: None,
            created_at: Utc::now(),
            completed_at: None,
            status_history: Vec::new(),
        })
    }

    pub fn with_operator(mut self, operator: Operator) -> Self {
        self.operator = Some(operator);
        self
    }

    pub fn with_source_account(mut self, account_id: Uuid) -> Self {
        self.source_account_id = Some(account_id);
        self
    }

    /// Attach the fee once; subsequent calls keep the original value.
    /// Returns the effective fee.
    pub fn attach_fees(&mut self) -> Decimal {
        let amount = self.amount;
        *self.fees.get_or_insert_with(|| fees::calculate(amount))
    }

    /// Fee used for balance checks: the attached value, or the schedule
    /// applied to the amount when nothing is attached yet.
    pub fn effective_fees(&self) -> Decimal {
        self.fees.unwrap_or_else(|| fees::calculate(self.amount))
    }

    /// Amount plus fees, the figure debited from the source account.
    pub fn total_amount(&self) -> Decimal {
        self.amount + self.effective_fees()
    }

    /// Move to a new status, appending to the status history.
    ///
    /// Only PENDING -> {COMPLETED, FAILED} is legal; terminal states are
    /// final. Completing the transaction stamps `completed_at`.
    pub fn transition(
        &mut self,
        new_status: TransactionStatus,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.status.is_terminal() || new_status == TransactionStatus::Pending {
            return Err(DomainError::IllegalStatusTransition {
                from: self.status,
                to: new_status,
            });
        }

        self.status_history.push(StatusChange {
            status: new_status,
            timestamp: at,
            previous_status: self.status,
        });
        self.status = new_status;

        if new_status == TransactionStatus::Completed {
            self.completed_at = Some(at);
        }

        Ok(())
    }
}

//! Transaction validation
//!
//! Composes amount bounds, phone/operator consistency, rolling limits and
//! source-account checks into a structured violation list. Business-rule
//! failures never surface as errors; the `Err` channel carries
//! infrastructure faults only. All four check groups run with no
//! short-circuit between them, so a caller sees every violation at once.

use rust_decimal::Decimal;
use std::sync::Arc;

use crate::domain::{is_valid_recipient_number, Operator, Transaction, Violation};
use crate::limits::{LimitTracker, DAILY_LIMIT, MONTHLY_LIMIT};
use crate::store::{Store, StoreError};

/// Minimum transaction amount, in FCFA.
pub const MIN_AMOUNT: i64 = 500;

/// Maximum transaction amount, in FCFA.
pub const MAX_AMOUNT: i64 = 500_000;

#[derive(Clone)]
pub struct TransactionValidator {
    store: Arc<dyn Store>,
    limits: LimitTracker,
}

impl TransactionValidator {
    pub fn new(store: Arc<dyn Store>, limits: LimitTracker) -> Self {
        Self { store, limits }
    }

    /// Run every check and collect the violations. Empty list = valid.
    pub async fn validate(&self, transaction: &Transaction) -> Result<Vec<Violation>, StoreError> {
        let mut violations = Vec::new();

        violations.extend(check_amount(transaction));
        violations.extend(check_recipient_number(transaction));
        violations.extend(self.check_limits(transaction).await?);
        violations.extend(self.check_source_account(transaction).await?);

        Ok(violations)
    }

    async fn check_limits(&self, transaction: &Transaction) -> Result<Vec<Violation>, StoreError> {
        let mut violations = Vec::new();
        let user_id = transaction.user_id;
        let amount = transaction.amount;

        let daily_limit = Decimal::from(DAILY_LIMIT);
        let daily_total = self.limits.daily_total(user_id).await?;
        if daily_total + amount > daily_limit {
            violations.push(Violation::DailyLimitExceeded {
                limit: daily_limit,
                current: daily_total,
                requested: amount,
            });
        }

        let monthly_limit = Decimal::from(MONTHLY_LIMIT);
        let monthly_total = self.limits.monthly_total(user_id).await?;
        if monthly_total + amount > monthly_limit {
            violations.push(Violation::MonthlyLimitExceeded {
                limit: monthly_limit,
                current: monthly_total,
                requested: amount,
            });
        }

        Ok(violations)
    }

    async fn check_source_account(
        &self,
        transaction: &Transaction,
    ) -> Result<Vec<Violation>, StoreError> {
        let account = match transaction.source_account_id {
            Some(id) => self.store.find_account(id).await?,
            None => None,
        };

        let account = match account {
            Some(account) => account,
            None => return Ok(vec![Violation::MissingSourceAccount]),
        };

        let mut violations = Vec::new();

        if !account.is_verified {
            violations.push(Violation::UnverifiedAccount);
        }

        let required = transaction.total_amount();
        let available = account.balance.unwrap_or(Decimal::ZERO);
        if available < required {
            violations.push(Violation::InsufficientBalance {
                required,
                available,
            });
        }

        Ok(violations)
    }
}

fn check_amount(transaction: &Transaction) -> Vec<Violation> {
    let mut violations = Vec::new();
    let amount = transaction.amount;

    if amount < Decimal::from(MIN_AMOUNT) {
        violations.push(Violation::AmountTooLow {
            min: Decimal::from(MIN_AMOUNT),
        });
    }

    if amount > Decimal::from(MAX_AMOUNT) {
        violations.push(Violation::AmountTooHigh {
            max: Decimal::from(MAX_AMOUNT),
        });
    }

    violations
}

fn check_recipient_number(transaction: &Transaction) -> Vec<Violation> {
    let number = &transaction.recipient_number;

    if !is_valid_recipient_number(number) {
        // the operator comparison is meaningless on a malformed number
        return vec![Violation::InvalidPhoneFormat {
            number: number.clone(),
        }];
    }

    match (Operator::for_number(number), transaction.operator) {
        (Some(expected), Some(declared)) if expected == declared => Vec::new(),
        _ => vec![Violation::InvalidOperator {
            number: number.clone(),
            operator: transaction.operator,
        }],
    }
}

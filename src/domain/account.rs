//! Mobile-money account entity
//!
//! An external wallet held at a telecom operator, linked to a local user.
//! The provider is derived from the number prefix; the balance is a local
//! mirror of the operator-side balance, refreshed by the sync pipeline.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::DomainError;
use super::operator::Provider;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobileMoneyAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub number: String,
    /// Derived from the number prefix; `None` when the prefix maps to no
    /// mobile-money service
    pub provider: Option<Provider>,
    pub is_default: bool,
    /// Unverified accounts cannot initiate outgoing payments
    pub is_verified: bool,
    /// Local mirror of the operator-side balance; `None` until first sync
    pub balance: Option<Decimal>,
    pub last_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MobileMoneyAccount {
    pub fn new(user_id: Uuid, number: impl Into<String>) -> Self {
        let number = number.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            provider: Provider::for_number(&number),
            number,
            is_default: false,
            is_verified: false,
            balance: None,
            last_sync: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Explicit override of the derived provider.
    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Replace the number and re-derive the provider from its prefix.
    pub fn set_number(&mut self, number: impl Into<String>) {
        let number = number.into();
        self.provider = Provider::for_number(&number);
        self.number = number;
        self.updated_at = Utc::now();
    }

    pub fn mark_verified(&mut self) {
        self.is_verified = true;
        self.updated_at = Utc::now();
    }

    /// Record a balance reported by the operator.
    ///
    /// # Errors
    /// `DomainError::NegativeBalance` if the reported balance is below zero.
    pub fn record_sync(&mut self, balance: Decimal, at: DateTime<Utc>) -> Result<(), DomainError> {
        if balance < Decimal::ZERO {
            return Err(DomainError::NegativeBalance(balance));
        }
        self.balance = Some(balance);
        self.last_sync = Some(at);
        self.updated_at = at;
        Ok(())
    }

    /// Debit the mirrored balance.
    ///
    /// # Errors
    /// - `DomainError::BalanceNotSynced` if no balance was ever synced
    /// - `DomainError::InsufficientBalance` if the debit would overdraw
    pub fn debit(&mut self, total: Decimal) -> Result<(), DomainError> {
        let available = self.balance.ok_or(DomainError::BalanceNotSynced)?;
        if available < total {
            return Err(DomainError::InsufficientBalance {
                required: total,
                available,
            });
        }
        self.balance = Some(available - total);
        self.updated_at = Utc::now();
        Ok(())
    }
}

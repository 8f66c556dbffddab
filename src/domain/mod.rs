//! Domain model
//!
//! Entities and pure business rules: operators, fee schedule, transaction
//! state machine, accounts and validation violations.

pub mod account;
pub mod error;
pub mod fees;
pub mod operator;
pub mod transaction;
pub mod violation;

pub use account::MobileMoneyAccount;
pub use error::DomainError;
pub use operator::{is_valid_recipient_number, Operator, Provider};
pub use transaction::{StatusChange, Transaction, TransactionStatus, TransactionType};
pub use violation::Violation;

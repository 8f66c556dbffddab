//! Validation violations
//!
//! Structured business-rule violations produced by the transaction
//! validator. Each variant carries its typed parameters and a stable code
//! used by API responses and logs.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use super::operator::Operator;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", content = "parameters")]
pub enum Violation {
    #[serde(rename = "AMOUNT_TOO_LOW")]
    AmountTooLow { min: Decimal },

    #[serde(rename = "AMOUNT_TOO_HIGH")]
    AmountTooHigh { max: Decimal },

    #[serde(rename = "INVALID_PHONE_FORMAT")]
    InvalidPhoneFormat { number: String },

    #[serde(rename = "INVALID_OPERATOR")]
    InvalidOperator {
        number: String,
        operator: Option<Operator>,
    },

    #[serde(rename = "DAILY_LIMIT_EXCEEDED")]
    DailyLimitExceeded {
        limit: Decimal,
        current: Decimal,
        requested: Decimal,
    },

    #[serde(rename = "MONTHLY_LIMIT_EXCEEDED")]
    MonthlyLimitExceeded {
        limit: Decimal,
        current: Decimal,
        requested: Decimal,
    },

    #[serde(rename = "MISSING_SOURCE_ACCOUNT")]
    MissingSourceAccount,

    #[serde(rename = "UNVERIFIED_ACCOUNT")]
    UnverifiedAccount,

    #[serde(rename = "INSUFFICIENT_BALANCE")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },
}

impl Violation {
    pub fn code(&self) -> &'static str {
        match self {
            Violation::AmountTooLow { .. } => "AMOUNT_TOO_LOW",
            Violation::AmountTooHigh { .. } => "AMOUNT_TOO_HIGH",
            Violation::InvalidPhoneFormat { .. } => "INVALID_PHONE_FORMAT",
            Violation::InvalidOperator { .. } => "INVALID_OPERATOR",
            Violation::DailyLimitExceeded { .. } => "DAILY_LIMIT_EXCEEDED",
            Violation::MonthlyLimitExceeded { .. } => "MONTHLY_LIMIT_EXCEEDED",
            Violation::MissingSourceAccount => "MISSING_SOURCE_ACCOUNT",
            Violation::UnverifiedAccount => "UNVERIFIED_ACCOUNT",
            Violation::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::AmountTooLow { min } => {
                write!(f, "The minimum amount is {} FCFA", min)
            }
            Violation::AmountTooHigh { max } => {
                write!(f, "The maximum amount is {} FCFA", max)
            }
            Violation::InvalidPhoneFormat { number } => {
                write!(
                    f,
                    "The number {} must start with 6 and contain 9 digits",
                    number
                )
            }
            Violation::InvalidOperator { number, operator } => match operator {
                Some(op) => write!(f, "Operator {} does not match the number {}", op, number),
                None => write!(f, "No operator declared for the number {}", number),
            },
            Violation::DailyLimitExceeded { limit, .. } => {
                write!(f, "Daily limit of {} FCFA exceeded", limit)
            }
            Violation::MonthlyLimitExceeded { limit, .. } => {
                write!(f, "Monthly limit of {} FCFA exceeded", limit)
            }
            Violation::MissingSourceAccount => write!(f, "No source account specified"),
            Violation::UnverifiedAccount => write!(f, "The source account is not verified"),
            Violation::InsufficientBalance { required, available } => {
                write!(
                    f,
                    "Insufficient balance: required {}, available {}",
                    required, available
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            Violation::AmountTooLow { min: dec!(500) }.code(),
            "AMOUNT_TOO_LOW"
        );
        assert_eq!(Violation::MissingSourceAccount.code(), "MISSING_SOURCE_ACCOUNT");
        assert_eq!(
            Violation::InsufficientBalance {
                required: dec!(600),
                available: dec!(599),
            }
            .code(),
            "INSUFFICIENT_BALANCE"
        );
    }

    #[test]
    fn test_serializes_with_code_tag() {
        let violation = Violation::DailyLimitExceeded {
            limit: dec!(2000000),
            current: dec!(1999900),
            requested: dec!(101),
        };
        let json = serde_json::to_value(&violation).unwrap();
        assert_eq!(json["code"], "DAILY_LIMIT_EXCEEDED");
        assert_eq!(json["parameters"]["limit"], "2000000");
    }
}

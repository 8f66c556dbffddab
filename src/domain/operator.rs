//! Operator resolution
//!
//! Maps phone-number prefixes to telecom operators and mobile-money
//! providers. This table is the single source of truth for every call site
//! (account creation, transaction validation, gateway selection).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Telecom operator owning a phone-number range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Mtn,
    Orange,
    Camtel,
}

impl Operator {
    /// Resolve the operator from the second digit of a phone number.
    ///
    /// Returns `None` for prefixes outside the known ranges; validation must
    /// then reject the number.
    pub fn for_number(number: &str) -> Option<Operator> {
        match number.as_bytes().get(1)? {
            b'5' | b'7' | b'8' => Some(Operator::Mtn),
            b'9' | b'6' => Some(Operator::Orange),
            b'2' => Some(Operator::Camtel),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Mtn => "MTN",
            Operator::Orange => "ORANGE",
            Operator::Camtel => "CAMTEL",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MTN" => Ok(Operator::Mtn),
            "ORANGE" => Ok(Operator::Orange),
            "CAMTEL" => Ok(Operator::Camtel),
            other => Err(format!("unknown operator: {}", other)),
        }
    }
}

/// Mobile-money provider attached to an account.
///
/// Camtel numbers have no mobile-money service, so they carry an operator
/// tag but never a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provider {
    OrangeMoney,
    MtnMomo,
}

impl Provider {
    /// Derive the provider from a phone-number prefix.
    pub fn for_number(number: &str) -> Option<Provider> {
        match Operator::for_number(number)? {
            Operator::Mtn => Some(Provider::MtnMomo),
            Operator::Orange => Some(Provider::OrangeMoney),
            Operator::Camtel => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OrangeMoney => "ORANGE_MONEY",
            Provider::MtnMomo => "MTN_MOMO",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ORANGE_MONEY" => Ok(Provider::OrangeMoney),
            "MTN_MOMO" => Ok(Provider::MtnMomo),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Check that a recipient number is a valid operator-format phone string:
/// 9 digits, leading '6', second digit in {2, 5, 6, 7, 8, 9}.
pub fn is_valid_recipient_number(number: &str) -> bool {
    let bytes = number.as_bytes();
    bytes.len() == 9
        && bytes[0] == b'6'
        && matches!(bytes[1], b'2' | b'5'..=b'9')
        && bytes.iter().all(u8::is_ascii_digit)
}

//! Core type definitions for PlayToEarn
//!
//! Participants are identified by the host's opaque player id. Balances are
//! keyed by the payout `Address` a participant binds, so several participants
//! sharing one address pool their credit.

use crate::constants::ONE_PTE;
use crate::error::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-point token amount (18 implied decimals)
pub type Amount = u128;

static ADDRESS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("address pattern compiles"));

/// ParticipantId - The host's identifier for a player
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParticipantId({})", self.0)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Address - Payout destination, `0x` followed by 40 hex characters
///
/// Case is preserved: `0xAB..` and `0xab..` are distinct ledger keys.
/// Deserialization does not re-validate, so ledger files edited by an
/// external writer load as-is.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Check a candidate string against the address pattern
    pub fn is_valid(candidate: &str) -> bool {
        ADDRESS_PATTERN.is_match(candidate)
    }

    /// Parse and validate an address
    pub fn parse(candidate: &str) -> Result<Self, ValidationError> {
        if Self::is_valid(candidate) {
            Ok(Self(candidate.to_string()))
        } else {
            Err(ValidationError::InvalidAddress(candidate.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Whether a participant earned on the most recent tick
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarningStatus {
    Earning,
    NotEarning,
}

impl fmt::Display for EarningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Earning => f.write_str("Currently earning PTE"),
            Self::NotEarning => f.write_str("YOU ARE NOT EARNING PTE"),
        }
    }
}

/// Format a fixed-point amount as whole PTE with two decimals.
///
/// Rounds half-up at the third decimal: `10 * ONE_PTE` is `"10.00"`,
/// `5 * ONE_PTE / 1000` is `"0.01"`.
pub fn format_amount(amount: Amount) -> String {
    const CENT: u128 = ONE_PTE / 100;
    let cents = amount / CENT + u128::from(amount % CENT >= CENT / 2);
    format!("{}.{:02}", cents / 100, cents % 100)
}

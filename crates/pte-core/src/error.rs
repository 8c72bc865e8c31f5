//! Error types for PlayToEarn core operations

use crate::types::{Address, Amount};
use thiserror::Error;

/// Errors raised while mutating the in-memory ledger
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Crediting would exceed the representable balance
    #[error("Balance overflow for {address}: {balance} + {amount} exceeds u128")]
    Overflow {
        address: Address,
        balance: Amount,
        amount: Amount,
    },

    /// Rate times elapsed seconds does not fit an amount
    #[error("Credit overflow: {rate} per second for {seconds}s exceeds u128")]
    CreditOverflow { rate: Amount, seconds: u64 },
}

/// Errors surfaced synchronously to the caller of `bind`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Address does not match `^0x[0-9a-fA-F]{40}$`
    #[error("Invalid wallet: {0}")]
    InvalidAddress(String),

    /// No address argument given
    #[error("No wallet provided")]
    NoAddressProvided,
}

/// Short codes matching the command responses
impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAddress(_) => "1",
            Self::NoAddressProvided => "5",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_codes() {
        assert_eq!(ValidationError::InvalidAddress("0x1".into()).code(), "1");
        assert_eq!(ValidationError::NoAddressProvided.code(), "5");
    }

    #[test]
    fn test_error_display() {
        let err = LedgerError::CreditOverflow {
            rate: u128::MAX,
            seconds: 2,
        };
        assert!(err.to_string().contains("Credit overflow"));
    }
}

//! Command boundary
//!
//! Results of the `bind` and `balance` operations, with the short codes the
//! chat layer shows to players.

use pte_core::{format_amount, Address, Amount, EarningStatus, ValidationError};
use std::fmt;
use thiserror::Error;

pub const CODE_WALLET_SET: &str = "2";
pub const CODE_BALANCE: &str = "3";

/// Player-facing command failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Invalid wallet")]
    InvalidAddress(String),

    #[error("No wallet provided")]
    NoAddressProvided,

    #[error("You don't have any wallet set up")]
    NoWalletBound,

    #[error("You don't have any balance")]
    NoBalanceRecorded,
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAddress(_) => "1",
            Self::NoWalletBound => "4",
            Self::NoAddressProvided => "5",
            Self::NoBalanceRecorded => "6",
        }
    }
}

impl From<ValidationError> for CommandError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::InvalidAddress(raw) => Self::InvalidAddress(raw),
            ValidationError::NoAddressProvided => Self::NoAddressProvided,
        }
    }
}

/// Successful balance lookup
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BalanceReport {
    pub address: Address,
    pub balance: Amount,
    pub status: EarningStatus,
}

impl BalanceReport {
    pub fn formatted(&self) -> String {
        format_amount(self.balance)
    }
}

impl fmt::Display for BalanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PTE: {}, {}", self.formatted(), self.status)
    }
}

/// Success flag, stable code and message for the chat layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandReply {
    pub success: bool,
    pub code: &'static str,
    pub message: String,
}

impl CommandReply {
    fn error(err: &CommandError) -> Self {
        Self {
            success: false,
            code: err.code(),
            message: err.to_string(),
        }
    }

    pub fn for_bind(result: &Result<Address, CommandError>) -> Self {
        match result {
            Ok(_) => Self {
                success: true,
                code: CODE_WALLET_SET,
                message: "Wallet Set!".to_string(),
            },
            Err(err) => Self::error(err),
        }
    }

    pub fn for_balance(result: &Result<BalanceReport, CommandError>) -> Self {
        match result {
            Ok(report) => Self {
                success: true,
                code: CODE_BALANCE,
                message: report.to_string(),
            },
            Err(err) => Self::error(err),
        }
    }
}

impl fmt::Display for CommandReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.success { "ok" } else { "error" };
        write!(f, "[{} {}] {}", kind, self.code, self.message)
    }
}

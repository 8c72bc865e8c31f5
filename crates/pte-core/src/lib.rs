//! # PlayToEarn Core
//!
//! Core data structures for the PlayToEarn accrual node.
//!
//! This crate provides the in-memory building blocks:
//! - `Address` - A validated payout address (`0x` + 40 hex characters)
//! - `LedgerStore` - Address to balance map credited by the accrual scheduler
//! - `WalletRegistry` - Participant to address bindings
//!
//! Persistence lives in `pte-storage`, scheduling in `pte-node`.
//!
//! ## Fixed-point amounts
//!
//! ```text
//!   1 PTE  = 1_000_000_000_000_000_000 units (10^18)
//!   Amount = u128, checked arithmetic, overflow is an error
//! ```

pub mod error;
pub mod ledger;
pub mod types;
pub mod wallets;

pub use error::*;
pub use ledger::*;
pub use types::*;
pub use wallets::*;

/// PTE token constants
pub mod constants {
    /// Token symbol
    pub const SYMBOL: &str = "PTE";

    /// Decimal places (same as ETH)
    pub const DECIMALS: u8 = 18;

    /// One PTE in smallest unit
    pub const ONE_PTE: u128 = 1_000_000_000_000_000_000; // 10^18

    /// Default accrual rate: ~1 PTE per hour
    pub const DEFAULT_COINS_PER_SECOND: u128 = 277_777_800_000_000;

    /// Longest elapsed window a configured rate must be able to credit
    /// without overflowing `u128`: 100 years in seconds.
    pub const MAX_ACCRUAL_WINDOW_SECS: u64 = 100 * 365 * 24 * 3600;
}

pub use constants::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{LedgerError, ValidationError};
    pub use crate::ledger::{Ledger, LedgerStore};
    pub use crate::types::*;
    pub use crate::wallets::{WalletBindings, WalletRegistry};
}

//! # PlayToEarn Storage
//!
//! JSON persistence for the ledger and wallet bindings.
//!
//! ## Storage Layout
//!
//! - `Wallets/wallets.json` - Address to balance ledger
//! - `Wallets/players_wallets.json` - Participant to address bindings
//! - `Wallets/wallets.lock` - Lock marker, present during ledger I/O
//! - `Wallets/wallets.resync` - Resync marker, raised by external writers

pub mod error;
pub mod gateway;
pub mod marker;

pub use error::{Result, StorageError};
pub use gateway::{PersistenceGateway, StoragePaths};
pub use marker::LockGuard;

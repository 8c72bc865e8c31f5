//! Error types for the accrual node

use pte_core::LedgerError;
use pte_storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Cannot write configuration {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot serialize configuration: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Node lifecycle errors
#[derive(Error, Debug)]
pub enum NodeError {
    /// Initialization stopped before any timer was registered
    #[error("Fatal startup error: {0}")]
    FatalStartup(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors that abort a single accrual tick
#[derive(Error, Debug)]
pub enum AccrualError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

//! # PlayToEarn Node
//!
//! The accrual node: scheduler, persistence driver and the `bind`/`balance`
//! commands, wired together by [`PteNode`].

pub mod accrual;
pub mod commands;
pub mod config;
pub mod error;
pub mod node;
pub mod roster;

pub use accrual::{
    AccrualConfig, AccrualEvent, AccrualScheduler, AccrualStats, PersistOutcome, TickOutcome,
    TickReport,
};
pub use commands::{BalanceReport, CommandError, CommandReply};
pub use config::{AccrualSettings, LoggingConfig, NodeConfig, StorageSettings};
pub use error::{AccrualError, ConfigError, NodeError};
pub use node::{NodeState, PteNode};
pub use roster::{AfkMonitor, AfkSet, OnlineRoster, Roster};

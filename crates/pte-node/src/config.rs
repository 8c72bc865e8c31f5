//! Node configuration types

use crate::error::ConfigError;
use pte_core::{Amount, DEFAULT_COINS_PER_SECOND, MAX_ACCRUAL_WINDOW_SECS};
use pte_storage::StoragePaths;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete node configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Accrual settings
    #[serde(default)]
    pub accrual: AccrualSettings,

    /// File locations
    #[serde(default)]
    pub storage: StorageSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Accrual settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualSettings {
    /// Scheduler interval in milliseconds
    #[serde(default = "default_millis_per_tick")]
    pub millis_per_tick: u64,

    /// Run the accrual scheduler at all
    #[serde(default = "default_true")]
    pub earn_by_playing: bool,

    /// Fixed-point units credited per elapsed second
    #[serde(default = "default_coins_per_second")]
    pub coins_per_second: Amount,
}

fn default_millis_per_tick() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_coins_per_second() -> Amount {
    DEFAULT_COINS_PER_SECOND
}

impl Default for AccrualSettings {
    fn default() -> Self {
        Self {
            millis_per_tick: default_millis_per_tick(),
            earn_by_playing: true,
            coins_per_second: default_coins_per_second(),
        }
    }
}

impl AccrualSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.millis_per_tick)
    }
}

/// File locations
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Address to balance ledger
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Participant to address bindings
    #[serde(default = "default_wallets_path")]
    pub wallets_path: PathBuf,

    /// Lock marker
    #[serde(default = "default_lock_marker")]
    pub lock_marker: PathBuf,

    /// Resync marker
    #[serde(default = "default_resync_marker")]
    pub resync_marker: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_ledger_path() -> PathBuf {
    StoragePaths::under(&default_data_dir()).ledger
}

fn default_wallets_path() -> PathBuf {
    StoragePaths::under(&default_data_dir()).wallets
}

fn default_lock_marker() -> PathBuf {
    StoragePaths::under(&default_data_dir()).lock_marker
}

fn default_resync_marker() -> PathBuf {
    StoragePaths::under(&default_data_dir()).resync_marker
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self::under(&default_data_dir())
    }
}

impl StorageSettings {
    /// Standard layout rooted at `data_dir`
    pub fn under(data_dir: &Path) -> Self {
        let paths = StoragePaths::under(data_dir);
        Self {
            ledger_path: paths.ledger,
            wallets_path: paths.wallets,
            lock_marker: paths.lock_marker,
            resync_marker: paths.resync_marker,
        }
    }

    pub fn paths(&self) -> StoragePaths {
        StoragePaths {
            ledger: self.ledger_path.clone(),
            wallets: self.wallets_path.clone(),
            lock_marker: self.lock_marker.clone(),
            resync_marker: self.resync_marker.clone(),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log per-participant tick detail at info instead of debug
    #[serde(default)]
    pub extended: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            extended: false,
        }
    }
}

impl NodeConfig {
    /// Defaults with every file placed under `data_dir`
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            storage: StorageSettings::under(data_dir),
            ..Self::default()
        }
    }

    /// Load the configuration file, recreating it when missing.
    ///
    /// - missing file: defaults rooted at `data_dir` are written and used
    /// - unreadable or corrupt file: defaults are used, the file is left alone
    pub fn load_or_create(path: &Path, data_dir: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(err) => {
                    tracing::error!("Cannot parse configuration {}: {}", path.display(), err);
                    tracing::warn!("Loading default configuration");
                    Self::with_data_dir(data_dir)
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::warn!(
                    "Configuration {} not found, recreating it from defaults",
                    path.display()
                );
                let config = Self::with_data_dir(data_dir);
                if let Err(err) = config.save(path) {
                    tracing::error!("{}", err);
                }
                config
            }
            Err(err) => {
                tracing::error!("Cannot read configuration {}: {}", path.display(), err);
                tracing::warn!("Loading default configuration");
                Self::with_data_dir(data_dir)
            }
        }
    }

    /// Write as pretty JSON, creating the parent directory
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject values the scheduler cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accrual.millis_per_tick == 0 {
            return Err(ConfigError::Invalid(
                "accrual.millis_per_tick must be greater than zero".to_string(),
            ));
        }
        if self
            .accrual
            .coins_per_second
            .checked_mul(MAX_ACCRUAL_WINDOW_SECS as u128)
            .is_none()
        {
            return Err(ConfigError::Invalid(format!(
                "accrual.coins_per_second {} overflows u128 within {} seconds",
                self.accrual.coins_per_second, MAX_ACCRUAL_WINDOW_SECS
            )));
        }
        Ok(())
    }

    pub fn storage_paths(&self) -> StoragePaths {
        self.storage.paths()
    }
}

//! Optional JSON settings file.
//!
//! Keys are camelCase; anything absent takes the library default.
//!
//! ```json
//! {
//!   "store": { "syncOnCommit": true },
//!   "sync": { "deviceId": "till-1", "retry": { "maxAttempts": 3 } },
//!   "server": { "maxBatchRecords": 500 }
//! }
//! ```

use ledgersync_core::StoreConfig;
use ledgersync_sync_engine::{RetryConfig, SyncConfig};
use ledgersync_sync_server::ServerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors loading a settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file could not be read.
    #[error("cannot read settings {path}: {source}")]
    Io {
        /// Settings path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid settings JSON.
    #[error("invalid settings {path}: {source}")]
    Parse {
        /// Settings path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
}

/// All settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Settings {
    /// Local store.
    pub store: StoreSettings,
    /// Client sync.
    pub sync: SyncSettings,
    /// Loopback reconciler.
    pub server: ServerSettings,
}

/// Local store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Sync the journal on every commit.
    pub sync_on_commit: bool,
    /// Create the store directory when missing.
    pub create_if_missing: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        let config = StoreConfig::default();
        Self {
            sync_on_commit: config.sync_on_commit,
            create_if_missing: config.create_if_missing,
        }
    }
}

/// Client sync settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Name this device logs under.
    pub device_id: String,
    /// Remote base URL.
    pub server_url: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Local-change debounce in milliseconds.
    pub debounce_ms: u64,
    /// Retry policy.
    pub retry: RetrySettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let config = SyncConfig::default();
        Self {
            device_id: config.device_id,
            server_url: "http://loopback".into(),
            timeout_ms: millis(config.timeout),
            debounce_ms: millis(config.debounce),
            retry: RetrySettings::default(),
        }
    }
}

/// Retry settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Attempts including the first.
    pub max_attempts: u32,
    /// First backoff delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor between attempts.
    pub backoff_multiplier: f64,
    /// Randomize delays.
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let config = RetryConfig::default();
        Self {
            max_attempts: config.max_attempts,
            initial_delay_ms: millis(config.initial_delay),
            max_delay_ms: millis(config.max_delay),
            backoff_multiplier: config.backoff_multiplier,
            jitter: config.add_jitter,
        }
    }
}

/// Loopback reconciler settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Records accepted per request.
    pub max_batch_records: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_batch_records: ServerConfig::default().max_batch_records,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Settings {
    /// Loads `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses settings JSON.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Store configuration.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new()
            .create_if_missing(self.store.create_if_missing)
            .sync_on_commit(self.store.sync_on_commit)
    }

    /// Client sync configuration.
    pub fn sync_config(&self) -> SyncConfig {
        let retry = &self.sync.retry;
        SyncConfig::new(self.sync.device_id.clone(), self.sync.server_url.clone())
            .with_timeout(Duration::from_millis(self.sync.timeout_ms))
            .with_debounce(Duration::from_millis(self.sync.debounce_ms))
            .with_retry(
                RetryConfig::new(retry.max_attempts)
                    .with_initial_delay(Duration::from_millis(retry.initial_delay_ms))
                    .with_max_delay(Duration::from_millis(retry.max_delay_ms))
                    .with_backoff_multiplier(retry.backoff_multiplier)
                    .with_jitter(retry.jitter),
            )
    }

    /// Loopback reconciler configuration.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new().with_max_batch_records(self.server.max_batch_records)
    }
}

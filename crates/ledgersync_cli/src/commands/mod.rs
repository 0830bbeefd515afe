//! CLI command implementations.
//!
//! Each command prints its result and also returns it, so tests can drive
//! commands directly.

pub mod account;
pub mod ledger;
pub mod migrate;
pub mod pay;
pub mod sale;
pub mod sync;

use crate::settings::Settings;
use clap::ValueEnum;
use ledgersync_core::{Books, EntityStore};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Result type for commands.
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable lines.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// What every command needs: where the books live and how to talk.
pub struct Context {
    /// Local store directory.
    pub store_dir: PathBuf,
    /// Loaded settings.
    pub settings: Settings,
    /// Output format.
    pub format: Format,
}

impl Context {
    /// Opens the local store, applying pending migrations.
    pub fn open_store(&self) -> CliResult<Arc<EntityStore>> {
        debug!(path = %self.store_dir.display(), "opening local store");
        let store = EntityStore::open(&self.store_dir, self.settings.store_config())?;
        Ok(Arc::new(store))
    }

    /// Bookkeeping over the local store.
    pub fn books(&self) -> CliResult<Books> {
        Ok(Books::new(self.open_store()?))
    }

    /// Prints `value` as JSON, or through `text` in text mode.
    pub fn emit<T: Serialize + ?Sized>(&self, value: &T, text: impl FnOnce(&T) -> String) -> CliResult<()> {
        match self.format {
            Format::Json => println!("{}", serde_json::to_string_pretty(value)?),
            Format::Text => println!("{}", text(value)),
        }
        Ok(())
    }
}

//! Application configuration for the transition-stats binary.
//!
//! A TOML file with three optional sections; anything left out falls back
//! to the built-in defaults.
//!
//! ```toml
//! [storage]
//! path = "data/stats.db"
//! page_size = 1000
//!
//! [run]
//! batch = 1000
//! bar_page = 512
//! progress_interval = 10000
//!
//! [pipeline]
//! horizons = [1, 5, 10, 20]
//! # averages, spreads, speeds, normalizers, discretizers, key, ranges
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use storage::StorageConfig;
use types::PipelineConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// SQLite database file.
    pub path: String,
    /// Rows fetched per cursor page.
    pub page_size: usize,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            path: "data/stats.db".to_string(),
            page_size: StorageConfig::default().page_size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Records written per transaction.
    pub batch: usize,
    /// Bars fetched per page by the bar source.
    pub bar_page: usize,
    /// Units between progress lines.
    pub progress_interval: u64,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            batch: pipeline::DEFAULT_BATCH,
            bar_page: 512,
            progress_interval: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageSection,
    pub run: RunSection,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Load from a TOML file, or the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: AppConfig =
            toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        config
            .pipeline
            .validate()
            .with_context(|| format!("validating config {}", path.display()))?;
        Ok(config)
    }

    /// Override the database path.
    pub fn with_db(mut self, db: Option<String>) -> Self {
        if let Some(db) = db {
            self.storage.path = db;
        }
        self
    }

    pub fn storage(&self) -> StorageConfig {
        StorageConfig {
            path: self.storage.path.clone(),
            page_size: self.storage.page_size.max(1),
        }
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

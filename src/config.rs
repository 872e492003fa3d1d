//! Configuration Management
//!
//! Handles persistent configuration storage for bq-shortcuts.

use crate::gcp::client::DEFAULT_API_BASE;
use crate::refresh::RefreshOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Overrides the BigQuery endpoint, e.g. for an emulator
pub const API_BASE_ENV: &str = "BQ_SHORTCUTS_API_BASE";

const APP_DIR: &str = "bq-shortcuts";

/// User configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of tables kept per dataset
    pub max_tables_per_dataset: usize,
    /// Aggregate page requests per second across all listings
    pub requests_per_second: u32,
    /// `maxResults` for table listing pages
    pub table_page_size: u32,
    /// Where the snapshot lives
    pub data_dir: Option<PathBuf>,
    /// BigQuery REST endpoint
    pub api_base: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let refresh = RefreshOptions::default();
        Self {
            max_tables_per_dataset: refresh.max_tables_per_dataset,
            requests_per_second: 100,
            table_page_size: refresh.table_page_size,
            data_dir: None,
            api_base: None,
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR).join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        Self::load_from(&path)
    }

    /// Load configuration from a specific file, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Get effective snapshot directory (config > platform data dir)
    pub fn effective_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|p| p.join(APP_DIR)))
            .or_else(|| dirs::home_dir().map(|p| p.join(".bq-shortcuts")))
            .unwrap_or_else(|| PathBuf::from(APP_DIR))
    }

    /// Get effective API endpoint (environment > config > public endpoint)
    pub fn effective_api_base(&self) -> String {
        std::env::var(API_BASE_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| self.api_base.clone())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
    }

    pub fn refresh_options(&self) -> RefreshOptions {
        RefreshOptions {
            max_tables_per_dataset: self.max_tables_per_dataset,
            table_page_size: self.table_page_size.max(1),
        }
    }
}

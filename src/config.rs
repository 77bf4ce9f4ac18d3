//! Browser configuration.
//!
//! Settings are layered: built-in defaults, then a TOML file, then `BQB_*`
//! environment variables (a `.env` file is honoured), then command-line
//! flags. The file is looked up at `./bqb.toml` first, then at
//! `$XDG_CONFIG_HOME/bq-browser/config.toml` (or the platform config dir).
//!
//! # Example Configuration
//!
//! ```toml
//! base_project = "physionet-data."
//! databases = ["mimic_core", "mimic_hosp", "mimic_icu", "mimic_derived"]
//! query_size = 1000
//! manifest_path = ".mimic_info.yaml"
//! ```

use crate::auth::DEFAULT_SCOPE;
use crate::browser::{BrowserOptions, DEFAULT_PAGE_SIZE};
use crate::client::DEFAULT_DATASET;
use crate::manifest::DEFAULT_MANIFEST_FILE;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const LOCAL_CONFIG_FILE: &str = "bqb.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Everything a browsing session needs to know up front.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Prefix joined to each database name, e.g. `physionet-data.`.
    pub base_project: String,

    /// Databases offered by the browser and enumerated into the manifest.
    pub databases: Vec<String>,

    /// Rows per query window.
    pub query_size: u64,

    /// Row-count manifest location.
    pub manifest_path: PathBuf,

    /// Default dataset for unqualified table names.
    pub dataset_id: String,

    /// OAuth scopes requested from the identity provider.
    pub scopes: Vec<String>,

    /// Recompute the plot pane when the offset changes.
    pub redraw_plot_on_offset: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            base_project: "physionet-data.".to_string(),
            databases: vec![
                "mimic_core".to_string(),
                "mimic_derived".to_string(),
                "mimic_hosp".to_string(),
                "mimic_icu".to_string(),
            ],
            query_size: DEFAULT_PAGE_SIZE,
            manifest_path: PathBuf::from(DEFAULT_MANIFEST_FILE),
            dataset_id: DEFAULT_DATASET.to_string(),
            scopes: vec![DEFAULT_SCOPE.to_string()],
            redraw_plot_on_offset: false,
        }
    }
}

impl BrowserConfig {
    /// Load from the first config file found, then apply env overrides.
    ///
    /// Missing files are not an error; defaults apply.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::discover_path() {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Per-user configuration file path.
    ///
    /// Uses XDG conventions:
    /// - Primary: `$XDG_CONFIG_HOME/bq-browser/config.toml`
    /// - Fallback: platform-specific config dir
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(xdg_config) = dotenvy::var("XDG_CONFIG_HOME") {
            return Ok(PathBuf::from(xdg_config).join("bq-browser").join("config.toml"));
        }
        directories::ProjectDirs::from("org", "bq-browser", "bq-browser")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    fn discover_path() -> Option<PathBuf> {
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.is_file() {
            return Some(local);
        }
        Self::config_path().ok().filter(|p| p.is_file())
    }

    /// Apply `BQB_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = dotenvy::var("BQB_BASE_PROJECT") {
            self.base_project = v;
        }
        if let Ok(v) = dotenvy::var("BQB_DATABASES") {
            self.databases = split_list(&v);
        }
        if let Ok(v) = dotenvy::var("BQB_QUERY_SIZE") {
            self.query_size = v.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: "BQB_QUERY_SIZE",
                value: v.clone(),
            })?;
        }
        if let Ok(v) = dotenvy::var("BQB_MANIFEST") {
            self.manifest_path = PathBuf::from(v);
        }
        if let Ok(v) = dotenvy::var("BQB_DATASET") {
            self.dataset_id = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query_size == 0 {
            return Err(ConfigError::Validation(
                "query_size must be at least 1".into(),
            ));
        }
        if self.databases.iter().any(|d| d.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "database names cannot be empty".into(),
            ));
        }
        if self.dataset_id.trim().is_empty() {
            return Err(ConfigError::Validation("dataset_id cannot be empty".into()));
        }
        Ok(())
    }

    pub fn scope_refs(&self) -> Vec<&str> {
        self.scopes.iter().map(String::as_str).collect()
    }

    pub fn browser_options(&self) -> BrowserOptions {
        BrowserOptions {
            base_project: self.base_project.clone(),
            databases: self.databases.clone(),
            page_size: self.query_size,
            redraw_plot_on_offset: self.redraw_plot_on_offset,
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

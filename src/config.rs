use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::http::BackoffPolicy;
use crate::ident;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// In-process remote settings; first provider of the settings chain.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RemoteConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    #[serde(default)]
    pub plan: Option<PathBuf>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_sleep_ms")]
    pub base_sleep_ms: u64,
    #[serde(default = "default_max_sleep_ms")]
    pub max_sleep_ms: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            plan: None,
            page_size: default_page_size(),
            max_retries: default_max_retries(),
            base_sleep_ms: default_base_sleep_ms(),
            max_sleep_ms: default_max_sleep_ms(),
        }
    }
}

// Larger pages trip the API rate limiter.
fn default_page_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    8
}
fn default_base_sleep_ms() -> u64 {
    800
}
fn default_max_sleep_ms() -> u64 {
    20_000
}

impl ImportConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_tries: self.max_retries,
            base_sleep: Duration::from_millis(self.base_sleep_ms),
            max_sleep: Duration::from_millis(self.max_sleep_ms),
            ..BackoffPolicy::default()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CalendarConfig {
    #[serde(default = "default_columns")]
    pub columns: PathBuf,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    #[serde(default = "default_location_table")]
    pub location_table: String,
    #[serde(default = "default_address_column")]
    pub address_column: String,
    #[serde(default)]
    pub address_suffix: String,
    /// Declared `table → foreign key column` links to the location table.
    #[serde(default)]
    pub location_keys: BTreeMap<String, String>,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            columns: default_columns(),
            base_path: default_base_path(),
            public_base_url: default_public_base_url(),
            location_table: default_location_table(),
            address_column: default_address_column(),
            address_suffix: String::new(),
            location_keys: BTreeMap::new(),
        }
    }
}

fn default_columns() -> PathBuf {
    PathBuf::from("./static/custom/calendar_columns.txt")
}
fn default_base_path() -> String {
    "/output".to_string()
}
fn default_public_base_url() -> String {
    "http://127.0.0.1:8001".to_string()
}
fn default_location_table() -> String {
    "luogo".to_string()
}
fn default_address_column() -> String {
    "indirizzo".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate import
    if config.import.page_size == 0 {
        anyhow::bail!("import.page_size must be > 0");
    }
    if config.import.max_retries == 0 {
        anyhow::bail!("import.max_retries must be > 0");
    }
    if config.import.base_sleep_ms > config.import.max_sleep_ms {
        anyhow::bail!("import.base_sleep_ms must be <= import.max_sleep_ms");
    }

    // Validate calendar
    let cal = &config.calendar;
    ident::validate(&cal.location_table).context("calendar.location_table")?;
    ident::validate(&cal.address_column).context("calendar.address_column")?;
    for (table, column) in &cal.location_keys {
        ident::validate(table).context("calendar.location_keys")?;
        ident::validate(column).context("calendar.location_keys")?;
    }
    if !cal.base_path.is_empty() && !cal.base_path.starts_with('/') {
        anyhow::bail!("calendar.base_path must start with '/' (got '{}')", cal.base_path);
    }

    Ok(())
}

//! Application configuration for parcelpipe.
//!
//! User config lives at `~/.parcelpipe/parcelpipe.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "parcelpipe.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".parcelpipe";

// ---------------------------------------------------------------------------
// Config structs (matching parcelpipe.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database connection settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Source data file locations.
    #[serde(default)]
    pub data: DataConfig,

    /// Bulk loader defaults.
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Transaction crawler settings.
    #[serde(default)]
    pub crawler: CrawlerConfig,
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Name of the env var holding the PostGIS URL (never store the URL itself).
    #[serde(default = "default_url_env")]
    pub url_env: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url_env: default_url_env(),
        }
    }
}

fn default_url_env() -> String {
    "DATABASE_URL".into()
}

/// `[data]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root directory holding per-source download subdirectories.
    #[serde(default = "default_data_root")]
    pub root: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            root: default_data_root(),
        }
    }
}

fn default_data_root() -> String {
    "~/parcelpipe-data".into()
}

/// `[loader]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Default rows per database round trip when a processor does not set one.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How many row-level error messages to keep per source for the summary.
    #[serde(default = "default_error_samples")]
    pub error_samples: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            error_samples: default_error_samples(),
        }
    }
}

fn default_batch_size() -> usize {
    500
}
fn default_error_samples() -> usize {
    5
}

/// `[crawler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Portal base URL.
    #[serde(default = "default_portal_url")]
    pub base_url: String,

    /// Delay between downloads in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Maximum concurrent chunk downloads.
    #[serde(default = "default_crawl_concurrency")]
    pub concurrency: u32,

    /// Retry attempts per chunk before recording a failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Backoff between retries in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Destination directory for downloaded spreadsheets (under data root
    /// when relative).
    #[serde(default = "default_crawl_output")]
    pub output_dir: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            base_url: default_portal_url(),
            delay_ms: default_delay_ms(),
            concurrency: default_crawl_concurrency(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            retry_backoff_ms: default_retry_backoff_ms(),
            output_dir: default_crawl_output(),
        }
    }
}

fn default_portal_url() -> String {
    "https://rt.molit.go.kr".into()
}
fn default_delay_ms() -> u64 {
    3000
}
fn default_crawl_concurrency() -> u32 {
    2
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    180
}
fn default_retry_backoff_ms() -> u64 {
    5000
}
fn default_crawl_output() -> String {
    "transactions".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.parcelpipe/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PipelineError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.parcelpipe/parcelpipe.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| PipelineError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PipelineError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PipelineError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve the database URL from the configured env var.
pub fn database_url(config: &AppConfig) -> Result<String> {
    let var_name = &config.database.url_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(PipelineError::config(format!(
            "database URL not found. Set the {var_name} environment variable to a \
             postgres:// URL with PostGIS enabled."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("DATABASE_URL"));
        assert!(toml_str.contains("rt.molit.go.kr"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.loader.batch_size, 500);
        assert_eq!(parsed.crawler.max_retries, 3);
        assert_eq!(parsed.database.url_env, "DATABASE_URL");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[crawler]
delay_ms = 500
concurrency = 4
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.crawler.delay_ms, 500);
        assert_eq!(config.crawler.concurrency, 4);
        assert_eq!(config.crawler.timeout_secs, 180);
        assert_eq!(config.loader.batch_size, 500);
    }

    #[test]
    fn database_url_requires_env() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.database.url_env = "PP_TEST_NONEXISTENT_DB_URL_9z".into();
        let result = database_url(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("database URL"));
    }
}

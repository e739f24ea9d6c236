//! Configuration infrastructure
//!
//! Configuration is a single JSON document under the user config directory:
//! 1. `api`: catalog endpoint, paging and request pacing
//! 2. `query`: batch sizes and the channel list
//! 3. `labels`: code → label tables for display fields
//! 4. `logging`: log level, outputs and module filters
//!
//! `CATALOG_INSPECTOR_*` environment variables override a handful of keys on
//! top of the file (see [`ConfigManager::load_layered`]).

#![allow(clippy::derivable_impls)]

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::domain::constants::{DEFAULT_CHANNELS, OPEN_ENDED_RAW};
use crate::domain::LabelTables;

/// Current configuration document version
pub const CONFIG_VERSION: u32 = 2;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "CATALOG_INSPECTOR";

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub query: QueryConfig,
    pub labels: LabelTables,
    pub logging: LoggingConfig,
    /// Configuration version for migration purposes
    pub config_version: u32,
}

/// Catalog API connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub master_path: String,
    pub descriptor_path: String,
    /// Channel windows of one master code
    pub channel_path: String,
    /// Paged channel-sales listing used by the channel query modes
    pub channel_sales_path: String,

    /// Request timeout in seconds
    pub timeout_seconds: u64,

    /// Maximum requests per second sent to the catalog (0 disables pacing)
    pub max_requests_per_second: u32,

    /// Retries for retryable HTTP statuses and network errors
    pub max_retries: u32,

    /// Records requested per page
    pub page_size: u32,

    /// Upper bound of pages fetched for one logical query
    pub max_pages: u32,

    pub user_agent: String,

    /// Wire value sent for "no end date filter". The backend expects a
    /// sentinel here rather than an absent field; empty omits the field.
    pub unrestricted_end_date: String,

    /// Wire value of the open-ended sentinel
    pub open_ended_end_date: String,

    /// Environment variable holding the bearer token
    pub token_env: String,
}

/// Query dispatch and enrichment settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Codes looked up concurrently per by-code batch
    pub code_batch_size: usize,

    /// Rows enriched concurrently per batch (clamped to 10..=20)
    pub enrichment_batch_size: usize,

    /// Channels queried when a channel-mode request names none
    pub channels: Vec<String>,
}

/// Logging configuration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Directory for log files; defaults to `logs/` next to the executable
    pub log_dir: Option<PathBuf>,

    pub file_name: String,

    /// Module-specific log level filters (e.g., "reqwest": "info")
    pub module_filters: HashMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            query: QueryConfig::default(),
            labels: LabelTables::default(),
            logging: LoggingConfig::default(),
            config_version: CONFIG_VERSION,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::API_BASE_URL.to_string(),
            master_path: defaults::MASTER_PATH.to_string(),
            descriptor_path: defaults::DESCRIPTOR_PATH.to_string(),
            channel_path: defaults::CHANNEL_PATH.to_string(),
            channel_sales_path: defaults::CHANNEL_SALES_PATH.to_string(),
            timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
            max_retries: defaults::MAX_RETRIES,
            page_size: defaults::PAGE_SIZE,
            max_pages: defaults::MAX_PAGES,
            user_agent: defaults::USER_AGENT.to_string(),
            unrestricted_end_date: defaults::UNRESTRICTED_END_DATE.to_string(),
            open_ended_end_date: OPEN_ENDED_RAW.to_string(),
            token_env: defaults::TOKEN_ENV.to_string(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            code_batch_size: defaults::CODE_BATCH_SIZE,
            enrichment_batch_size: defaults::ENRICHMENT_BATCH_SIZE,
            channels: DEFAULT_CHANNELS.iter().map(|c| (*c).to_string()).collect(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: defaults::LOG_CONSOLE_OUTPUT,
            file_output: defaults::LOG_FILE_OUTPUT,
            log_dir: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
            module_filters: {
                let mut filters = HashMap::new();
                filters.insert("reqwest".to_string(), "info".to_string());
                filters.insert("hyper".to_string(), "warn".to_string());
                filters.insert("tokio".to_string(), "info".to_string());
                filters.insert("catalog_inspector".to_string(), "info".to_string());
                filters
            },
        }
    }
}

impl QueryConfig {
    /// Enrichment batch size within the supported 10..=20 window
    pub fn effective_enrichment_batch_size(&self) -> usize {
        self.enrichment_batch_size.clamp(
            defaults::MIN_ENRICHMENT_BATCH_SIZE,
            defaults::MAX_ENRICHMENT_BATCH_SIZE,
        )
    }

    pub fn effective_code_batch_size(&self) -> usize {
        self.code_batch_size.max(1)
    }
}

/// Keys that may be overridden from the environment
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnvOverrides {
    api_base_url: Option<String>,
    api_token_env: Option<String>,
    api_page_size: Option<u32>,
    api_max_requests_per_second: Option<u32>,
    code_batch_size: Option<usize>,
    enrichment_batch_size: Option<usize>,
    log_level: Option<String>,
}

impl EnvOverrides {
    fn apply(self, config: &mut AppConfig) {
        if let Some(v) = self.api_base_url {
            config.api.base_url = v;
        }
        if let Some(v) = self.api_token_env {
            config.api.token_env = v;
        }
        if let Some(v) = self.api_page_size {
            config.api.page_size = v;
        }
        if let Some(v) = self.api_max_requests_per_second {
            config.api.max_requests_per_second = v;
        }
        if let Some(v) = self.code_batch_size {
            config.query.code_batch_size = v;
        }
        if let Some(v) = self.enrichment_batch_size {
            config.query.enrichment_batch_size = v;
        }
        if let Some(v) = self.log_level {
            config.logging.level = v;
        }
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    pub config_path: PathBuf,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join("catalog-inspector");

        Ok(config_dir)
    }

    /// Create a configuration manager pointing at the default location
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;
        let config_path = config_dir.join("catalog_inspector_config.json");

        Ok(Self { config_path })
    }

    /// Create a configuration manager for an explicit file
    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self {
            config_path: path.as_ref().to_path_buf(),
        }
    }

    /// Load configuration from file, creating default if it doesn't exist
    pub async fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!("Configuration file not found, creating default: {:?}", self.config_path);
            let default_config = AppConfig::default();
            self.save_config(&default_config).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .context("Failed to read configuration file")?;

        match serde_json::from_str::<AppConfig>(&content) {
            Ok(mut config) => {
                info!("Loaded configuration from: {:?}", self.config_path);
                self.migrate_config_if_needed(&mut config).await?;
                Ok(config)
            }
            Err(parse_error) => {
                tracing::warn!("⚠️  Configuration parse error: {}", parse_error);
                tracing::warn!("⚠️  Resetting to default configuration");

                // Keep the broken file around for inspection
                let backup_path = self.config_path.with_extension("json.corrupted");
                if let Err(e) = fs::copy(&self.config_path, &backup_path).await {
                    tracing::warn!("Failed to create backup of corrupted config: {}", e);
                } else {
                    tracing::info!("Backed up corrupted config to: {:?}", backup_path);
                }

                let default_config = AppConfig::default();
                self.save_config(&default_config)
                    .await
                    .context("Failed to save default configuration")?;

                tracing::info!("✅ Reset to default configuration");
                Ok(default_config)
            }
        }
    }

    /// Load the file and apply `CATALOG_INSPECTOR_*` environment overrides
    pub async fn load_layered(&self) -> Result<AppConfig> {
        let mut config = self.load_config().await?;
        Self::apply_env_overrides(&mut config, None)?;
        Ok(config)
    }

    /// Applies environment overrides. `source` replaces the process
    /// environment when given.
    pub fn apply_env_overrides(
        config: &mut AppConfig,
        source: Option<HashMap<String, String>>,
    ) -> Result<()> {
        let overrides: EnvOverrides = ::config::Config::builder()
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(source),
            )
            .build()
            .context("Failed to read environment overrides")?
            .try_deserialize()
            .context("Invalid environment override value")?;

        overrides.apply(config);
        Ok(())
    }

    /// Save configuration to file
    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;

        fs::write(&self.config_path, content)
            .await
            .context("Failed to write configuration file")?;

        info!("Saved configuration to: {:?}", self.config_path);
        Ok(())
    }

    /// Reset configuration to defaults (useful for troubleshooting)
    pub async fn reset_to_defaults(&self) -> Result<AppConfig> {
        info!("🔄 Resetting configuration to defaults");

        let default_config = AppConfig::default();
        self.save_config(&default_config).await?;

        info!("✅ Configuration reset to defaults");
        Ok(default_config)
    }

    /// Migrate configuration from older versions
    pub async fn migrate_config_if_needed(&self, config: &mut AppConfig) -> Result<bool> {
        if config.config_version >= CONFIG_VERSION {
            return Ok(false);
        }

        info!(
            "🔄 Migrating configuration from version {} to {}",
            config.config_version, CONFIG_VERSION
        );

        // Version 1 documents shipped an enrichment batch of 50, which the
        // catalog throttles; pull it back into the supported window.
        if config.config_version < 2 {
            config.query.enrichment_batch_size = config.query.effective_enrichment_batch_size();
        }
        config.config_version = CONFIG_VERSION;

        self.save_config(config).await?;
        Ok(true)
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }
}

/// Default configuration values
pub mod defaults {
    pub const API_BASE_URL: &str = "http://localhost:8080";
    pub const MASTER_PATH: &str = "/api/catalog/master/query";
    pub const DESCRIPTOR_PATH: &str = "/api/catalog/descriptor/query";
    pub const CHANNEL_PATH: &str = "/api/catalog/channel/query";
    pub const CHANNEL_SALES_PATH: &str = "/api/catalog/channel-sales/query";

    /// Default request timeout in seconds
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;

    pub const MAX_REQUESTS_PER_SECOND: u32 = 10;

    pub const MAX_RETRIES: u32 = 3;

    /// Default records per page
    pub const PAGE_SIZE: u32 = 200;

    pub const MAX_PAGES: u32 = 50;

    pub const USER_AGENT: &str = "catalog-inspector/0.1";

    /// Empty: the unrestricted filter field is omitted from requests
    pub const UNRESTRICTED_END_DATE: &str = "";

    pub const TOKEN_ENV: &str = "CATALOG_API_TOKEN";

    pub const CODE_BATCH_SIZE: usize = 10;

    pub const ENRICHMENT_BATCH_SIZE: usize = 15;
    pub const MIN_ENRICHMENT_BATCH_SIZE: usize = 10;
    pub const MAX_ENRICHMENT_BATCH_SIZE: usize = 20;

    /// Default log level
    pub const LOG_LEVEL: &str = "info";

    pub const LOG_JSON_FORMAT: bool = false;

    pub const LOG_CONSOLE_OUTPUT: bool = true;

    pub const LOG_FILE_OUTPUT: bool = false;

    pub const LOG_FILE_NAME: &str = "catalog-inspector.log";
}

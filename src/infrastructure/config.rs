//! Configuration infrastructure
//!
//! Contains configuration loading and management for catalog ingestion.
//!
//! Configuration is organized by pipeline concern:
//! 1. Ingestion run behavior (concurrency, sweep)
//! 2. Upstream client tuning (endpoint, rate limit, headers)
//! 3. Retry/backoff policy shared by fetches and downloads
//! 4. Normalization stage (batch size, image cache)

#![allow(clippy::uninlined_format_args)]
#![allow(missing_docs)]

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// SQLite database URL; defaults to a file under the app data dir
    pub database_url: String,

    /// Ingestion run behavior
    pub ingest: IngestConfig,

    /// Upstream catalog client settings
    pub client: ClientConfig,

    /// Retry/backoff policy for network operations
    pub retry: RetryConfig,

    /// Normalization stage settings
    pub normalization: NormalizationConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Ingestion run behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Maximum concurrent record upserts within one page
    pub db_max_concurrency: usize,

    /// Tombstone unseen records automatically after a completed run
    pub sweep_after_run: bool,
}

/// Upstream catalog client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Catalog API base URL (versioned root, e.g. `.../v1`)
    pub base_url: String,

    /// User agent sent with every request
    pub user_agent: String,

    /// Per-request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Upper bound on request rate, enforced client-side
    pub max_requests_per_second: u32,

    /// Attribute groups requested via the `with` parameter
    pub with_attributes: Vec<String>,

    /// Extra `filters[key]=value` parameters applied to every page request
    pub filters: HashMap<String, String>,
}

/// Retry/backoff policy for network operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,

    /// First retry delay; doubles per attempt
    pub base_delay_ms: u64,

    /// Ceiling on any single delay
    pub max_delay_ms: u64,
}

/// Normalization stage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationConfig {
    /// Records pulled per batch call
    pub batch_size: u32,

    /// Download product images alongside normalization
    pub cache_images: bool,

    /// Where cached images land; defaults to `<app data dir>/images`
    pub image_dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Module-specific log level filters (e.g., "sqlx": "warn", "reqwest": "info")
    pub module_filters: HashMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: defaults::default_database_url(),
            ingest: IngestConfig::default(),
            client: ClientConfig::default(),
            retry: RetryConfig::default(),
            normalization: NormalizationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            db_max_concurrency: defaults::DB_MAX_CONCURRENCY,
            sweep_after_run: defaults::SWEEP_AFTER_RUN,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: aboutyou::BASE_URL.to_string(),
            user_agent: aboutyou::USER_AGENT.to_string(),
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
            with_attributes: aboutyou::DEFAULT_WITH_ATTRIBUTES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            filters: HashMap::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_RETRY_ATTEMPTS,
            base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
        }
    }
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::NORMALIZE_BATCH_SIZE,
            cache_images: defaults::CACHE_IMAGES,
            image_dir: None,
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
            module_filters: {
                let mut filters = HashMap::new();
                filters.insert("sqlx".to_string(), "warn".to_string());
                filters.insert("reqwest".to_string(), "info".to_string());
                filters.insert("hyper".to_string(), "warn".to_string());
                filters.insert("tokio".to_string(), "info".to_string());
                filters.insert("catalog_ingest_lib".to_string(), "info".to_string());
                filters
            },
        }
    }
}

/// Configuration file manager
pub struct ConfigManager {
    pub config_path: PathBuf,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join("catalog-ingest");

        Ok(config_dir)
    }

    /// Create a new configuration manager with automatic setup
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;
        let config_path = config_dir.join("catalog_ingest_config.json");

        Ok(Self { config_path })
    }

    /// Initialize configuration system on first run
    pub async fn initialize_on_first_run(&self) -> Result<AppConfig> {
        let config_dir = self
            .config_path
            .parent()
            .context("Failed to get config directory")?;

        if !config_dir.exists() {
            fs::create_dir_all(config_dir)
                .await
                .context("Failed to create config directory")?;
            info!("✅ Created configuration directory: {:?}", config_dir);
        }

        let is_first_run = !self.config_path.exists();

        if is_first_run {
            info!("🎉 First run detected - initializing default configuration");

            let default_config = AppConfig::default();
            self.save_config(&default_config).await?;
            self.create_data_directories().await?;

            info!("✅ Initial configuration setup completed");
            Ok(default_config)
        } else {
            self.load_config().await
        }
    }

    /// Create necessary data directories
    async fn create_data_directories(&self) -> Result<()> {
        let app_data_dir = Self::get_app_data_dir()?;

        let directories = [
            app_data_dir.join("database"),
            app_data_dir.join("logs"),
            app_data_dir.join("images"),
        ];

        for dir in &directories {
            if !dir.exists() {
                fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("Failed to create directory: {:?}", dir))?;
                info!("📁 Created directory: {:?}", dir);
            }
        }

        Ok(())
    }

    /// Get application data directory
    pub fn get_app_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to get user data directory")?
            .join("catalog-ingest");

        Ok(data_dir)
    }

    /// Load configuration from file, creating default if it doesn't exist
    pub async fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!(
                "Configuration file not found, creating default: {:?}",
                self.config_path
            );
            let default_config = AppConfig::default();
            self.save_config(&default_config).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .context("Failed to read configuration file")?;

        match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => {
                info!("Loaded configuration from: {:?}", self.config_path);
                Ok(config)
            }
            Err(parse_error) => {
                tracing::warn!("⚠️  Configuration file unreadable: {}", parse_error);
                tracing::warn!("⚠️  Resetting to default configuration");

                // Keep the broken file around for manual recovery
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

                Ok(default_config)
            }
        }
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

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }
}

/// Upstream catalog endpoint constants
pub mod aboutyou {
    /// Versioned API root every endpoint hangs off
    pub const BASE_URL: &str = "https://api-cloud.aboutyou.de/v1";

    /// Attribute groups the pipeline needs on every product
    pub const DEFAULT_WITH_ATTRIBUTES: &[&str] = &["categories", "priceRange"];

    /// Image CDN root; product images are addressed by hash below it
    pub const CDN_IMAGE_BASE: &str = "https://cdn.aboutyou.com";

    /// Browser-typical user agent; the API refuses obvious bots
    pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
        AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";
}

/// Default configuration values
pub mod defaults {
    /// Default per-request timeout in seconds
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;

    /// Default client-side request rate (the upstream tolerates ~1 rps)
    pub const MAX_REQUESTS_PER_SECOND: u32 = 1;

    /// Default retry attempts for failed requests
    pub const MAX_RETRY_ATTEMPTS: u32 = 3;

    /// Default first retry delay in milliseconds
    pub const RETRY_BASE_DELAY_MS: u64 = 1000;

    /// Default ceiling on a single retry delay
    pub const RETRY_MAX_DELAY_MS: u64 = 60_000;

    /// Default concurrent upserts within one page
    pub const DB_MAX_CONCURRENCY: usize = 10;

    /// Tombstone sweep after completed runs is on by default
    pub const SWEEP_AFTER_RUN: bool = true;

    /// Default normalization batch size
    pub const NORMALIZE_BATCH_SIZE: u32 = 50;

    /// Image caching is opt-in
    pub const CACHE_IMAGES: bool = false;

    /// Default log level
    pub const LOG_LEVEL: &str = "info";

    /// Default JSON log format setting
    pub const LOG_JSON_FORMAT: bool = false;

    /// Default console output setting
    pub const LOG_CONSOLE_OUTPUT: bool = true;

    /// Default file output setting
    pub const LOG_FILE_OUTPUT: bool = true;

    /// Database URL under the app data dir, with a relative fallback when
    /// the platform offers no data dir
    pub fn default_database_url() -> String {
        let db_path = super::ConfigManager::get_app_data_dir()
            .map(|dir| dir.join("database").join("catalog_ingest.db"))
            .unwrap_or_else(|_| std::path::PathBuf::from("./data/catalog_ingest.db"));
        format!("sqlite:{}", db_path.display())
    }
}

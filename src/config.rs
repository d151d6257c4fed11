use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub api: OpinionApiConfig,
    pub telegram: TelegramConfig,
    pub database: DatabaseConfig,
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpinionApiConfig {
    /// API key sent in the `apikey` header
    pub api_key: String,
    /// REST base URL for the Opinion openapi surface
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_base_url() -> String {
    "https://openapi.opinion.trade".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

impl OpinionApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot token for the delivery channel
    pub bot_token: String,
    /// Bot API base URL (overridable for tests/proxies)
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Startup connection attempts before aborting
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Delay before the second connection attempt (doubles each retry)
    #[serde(default = "default_connect_initial_delay_secs")]
    pub connect_initial_delay_secs: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_connect_initial_delay_secs() -> u64 {
    2
}

impl DatabaseConfig {
    /// Retry policy for the startup connection
    pub fn connect_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.connect_attempts,
            initial_delay: Duration::from_secs(self.connect_initial_delay_secs),
            multiplier: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between monitoring cycles
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Age of the baseline sample the current price is compared against
    #[serde(default = "default_baseline_age_secs")]
    pub baseline_age_secs: u64,
    /// Tolerance window around the baseline age
    #[serde(default = "default_baseline_tolerance_secs")]
    pub baseline_tolerance_secs: u64,
    /// Samples older than this are purged after each cycle
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Bounded worker pool size for per-market processing
    #[serde(default = "default_max_concurrent_markets")]
    pub max_concurrent_markets: usize,
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_baseline_age_secs() -> u64 {
    60
}

fn default_baseline_tolerance_secs() -> u64 {
    10
}

fn default_retention_secs() -> u64 {
    300
}

fn default_max_concurrent_markets() -> usize {
    4
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn baseline_age(&self) -> Duration {
        Duration::from_secs(self.baseline_age_secs)
    }

    pub fn baseline_tolerance(&self) -> Duration {
        Duration::from_secs(self.baseline_tolerance_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            baseline_age_secs: default_baseline_age_secs(),
            baseline_tolerance_secs: default_baseline_tolerance_secs(),
            retention_secs: default_retention_secs(),
            max_concurrent_markets: default_max_concurrent_markets(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("api.base_url", default_api_base_url())?
            .set_default("telegram.api_url", default_telegram_api_url())?
            .set_default("logging.level", "info")?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g. config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SPIKEWATCH_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SPIKEWATCH__DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("SPIKEWATCH")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.api.api_key.is_empty() {
            errors.push("api.api_key is required".to_string());
        }

        if self.telegram.bot_token.is_empty() {
            errors.push("telegram.bot_token is required".to_string());
        }

        if self.monitor.poll_interval_secs == 0 {
            errors.push("monitor.poll_interval_secs must be positive".to_string());
        }

        if self.monitor.baseline_tolerance_secs >= self.monitor.baseline_age_secs {
            errors.push(
                "monitor.baseline_tolerance_secs must be smaller than baseline_age_secs"
                    .to_string(),
            );
        }

        if self.monitor.retention_secs
            < self.monitor.baseline_age_secs + self.monitor.baseline_tolerance_secs
        {
            errors.push(
                "monitor.retention_secs must cover baseline_age_secs + baseline_tolerance_secs"
                    .to_string(),
            );
        }

        if self.monitor.max_concurrent_markets == 0 {
            errors.push("monitor.max_concurrent_markets must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

//! Configuration management for Patcher
//!
//! Settings are layered: built-in defaults, then a TOML file, then
//! environment variables, then CLI flags applied by the command handlers.
//! Credentials never appear here; they live in the OS keychain.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::app::{CacheConfig, ClientConfig, CoordinatorConfig, FetchConfig, TokenConfig};
use crate::constants::{auth, cache, env as env_constants, http, jamf, limits};
use crate::errors::{ConfigError, ConfigResult};

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP client settings
    pub client: ClientConfigToml,
    /// Token lifecycle settings
    pub token: TokenConfigToml,
    /// Fetch executor settings
    pub fetcher: FetchConfigToml,
    /// Snapshot cache settings
    pub cache: CacheConfigToml,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// TOML-friendly client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfigToml {
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Maximum idle connections per host
    pub pool_max_per_host: usize,
    /// Client-side rate limit in requests per second (0 = disabled)
    pub rate_limit_rps: u32,
    /// Additional trusted CA bundle (PEM)
    pub ca_file: Option<PathBuf>,
    /// Source of the latest iOS releases
    pub sofa_feed_url: String,
}

impl Default for ClientConfigToml {
    fn default() -> Self {
        Self {
            request_timeout: http::DEFAULT_TIMEOUT,
            connect_timeout: http::CONNECT_TIMEOUT,
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            rate_limit_rps: limits::DEFAULT_RATE_LIMIT_RPS,
            ca_file: None,
            sofa_feed_url: jamf::SOFA_IOS_FEED_URL.to_string(),
        }
    }
}

/// TOML-friendly token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfigToml {
    /// Refresh tokens this long before they expire
    #[serde(with = "humantime_serde")]
    pub safety_margin: Duration,
    /// Shortest acceptable issued token lifetime
    #[serde(with = "humantime_serde")]
    pub min_lifetime: Duration,
    /// Fail when the server issues a shorter lifetime
    pub reject_short_lifetime: bool,
}

impl Default for TokenConfigToml {
    fn default() -> Self {
        Self {
            safety_margin: auth::TOKEN_SAFETY_MARGIN,
            min_lifetime: auth::MIN_TOKEN_LIFETIME,
            reject_short_lifetime: true,
        }
    }
}

/// TOML-friendly fetcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfigToml {
    /// Maximum requests in flight
    pub concurrency: usize,
    /// Total attempts per request for transient failures
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub retry_max_delay: Duration,
    /// Jitter fraction for backoff randomization (0.0-1.0)
    pub backoff_jitter: f64,
    /// Page size for paginated listings
    pub page_size: u32,
}

impl Default for FetchConfigToml {
    fn default() -> Self {
        Self {
            concurrency: limits::DEFAULT_CONCURRENCY,
            max_attempts: limits::MAX_ATTEMPTS,
            retry_base_delay: limits::RETRY_BASE_DELAY,
            retry_max_delay: limits::RETRY_MAX_DELAY,
            backoff_jitter: limits::BACKOFF_JITTER_FACTOR,
            page_size: limits::DEFAULT_PAGE_SIZE,
        }
    }
}

/// TOML-friendly cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfigToml {
    /// Cache directory path (system default when unset)
    pub cache_root: Option<PathBuf>,
    /// Snapshots older than this are evicted
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    /// Never write snapshots
    pub disabled: bool,
}

impl Default for CacheConfigToml {
    fn default() -> Self {
        Self {
            cache_root: None,
            retention: cache::DEFAULT_RETENTION,
            disabled: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level for the application
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Parsed level, `None` when the setting is not a tracing level
    pub fn level(&self) -> Option<tracing::Level> {
        self.level.parse().ok()
    }
}

impl AppConfig {
    /// Load configuration with multi-source precedence:
    /// 1. Default values
    /// 2. Config file (if exists)
    /// 3. Environment variables
    pub async fn load(config_file_override: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        let config_path = match config_file_override {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound { path });
                }
                Some(path)
            }
            None => Self::find_config_file(),
        };

        if let Some(path) = config_path {
            debug!("Loading config from: {}", path.display());
            config = Self::load_from_file(&path).await?;
        }

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PATCHER_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        if let Ok(value) = env::var(env_constants::CONCURRENCY) {
            self.fetcher.concurrency =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        field: env_constants::CONCURRENCY.to_string(),
                        value: value.clone(),
                        reason: "Expected a positive integer".to_string(),
                    })?;
            debug!("Concurrency overridden from environment: {}", self.fetcher.concurrency);
        }

        if let Ok(value) = env::var(env_constants::CACHE_DIR) {
            if !value.trim().is_empty() {
                self.cache.cache_root = Some(PathBuf::from(value));
            }
        }

        Ok(())
    }

    /// Collect every invalid setting into one error
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.fetcher.concurrency == 0 {
            errors.push("fetcher.concurrency must be at least 1".to_string());
        }
        if self.fetcher.concurrency > limits::MAX_CONCURRENCY {
            errors.push(format!(
                "fetcher.concurrency must not exceed {}",
                limits::MAX_CONCURRENCY
            ));
        }
        if self.logging.level().is_none() {
            errors.push(format!(
                "logging.level '{}' must be one of error, warn, info, debug, trace",
                self.logging.level
            ));
        }
        if self.fetcher.max_attempts == 0 {
            errors.push("fetcher.max_attempts must be at least 1".to_string());
        }
        if self.fetcher.retry_base_delay > self.fetcher.retry_max_delay {
            errors.push("fetcher.retry_base_delay must not exceed retry_max_delay".to_string());
        }
        if !(0.0..=1.0).contains(&self.fetcher.backoff_jitter) {
            errors.push("fetcher.backoff_jitter must be between 0.0 and 1.0".to_string());
        }
        if self.fetcher.page_size == 0 {
            errors.push("fetcher.page_size must be at least 1".to_string());
        }
        if self.client.request_timeout.is_zero() {
            errors.push("client.request_timeout must be greater than zero".to_string());
        }
        if self.cache.retention.is_zero() {
            errors.push("cache.retention must be greater than zero".to_string());
        }
        if url::Url::parse(&self.client.sofa_feed_url).is_err() {
            errors.push(format!(
                "client.sofa_feed_url is not a valid URL: {}",
                self.client.sofa_feed_url
            ));
        }

        if self.fetcher.concurrency > limits::RECOMMENDED_MAX_CONCURRENCY {
            warn!(
                "fetcher.concurrency {} exceeds the recommended maximum of {}",
                self.fetcher.concurrency,
                limits::RECOMMENDED_MAX_CONCURRENCY
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationFailed { errors })
        }
    }

    /// Convert TOML-friendly configuration to runtime configuration
    pub fn to_coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            client: self.client.to_runtime_config(),
            token: self.token.to_runtime_config().with_retries(
                self.fetcher.max_attempts,
                self.fetcher.retry_base_delay,
                self.fetcher.retry_max_delay,
            ),
            fetch: self.fetcher.to_runtime_config(self.client.request_timeout),
            cache: self.cache.to_runtime_config(),
            sofa_feed_url: self.client.sofa_feed_url.clone(),
        }
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![PathBuf::from("./patcher.toml")];
        if let Some(path) = Self::get_default_config_path() {
            search_paths.push(path);
        }

        for path in search_paths {
            if path.exists() {
                debug!("Found config file: {}", path.display());
                return Some(path);
            }
        }

        debug!("No config file found in standard locations");
        None
    }

    /// Get the default config file path for the current user
    pub fn get_default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(cache::DIR_NAME).join("config.toml"))
    }

    /// Load configuration from a TOML file
    async fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let config: AppConfig = toml::from_str(&content)?;
        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Generate default configuration content with helpful comments
    pub fn generate_default_config_content() -> String {
        format!(
            r#"# Patcher Configuration
# Credentials are stored in the system keychain, never in this file.
# Durations accept values such as "500ms", "30s", "5m" or "90days".

[client]
request_timeout = "{request_timeout}"
connect_timeout = "{connect_timeout}"
pool_max_per_host = {pool_max_per_host}
rate_limit_rps = {rate_limit_rps}  # 0 = disabled
# ca_file = "/path/to/ca-bundle.pem"
sofa_feed_url = "{sofa_feed_url}"

[token]
safety_margin = "{safety_margin}"
min_lifetime = "{min_lifetime}"
reject_short_lifetime = true

[fetcher]
concurrency = {concurrency}  # values above {recommended} may trigger API throttling
max_attempts = {max_attempts}
retry_base_delay = "{retry_base_delay}"
retry_max_delay = "{retry_max_delay}"
backoff_jitter = {backoff_jitter}
page_size = {page_size}

[cache]
# cache_root = "/path/to/custom/cache"
retention = "{retention}"
disabled = false

[logging]
level = "warn"  # error, warn, info, debug, trace
"#,
            request_timeout = human(http::DEFAULT_TIMEOUT),
            connect_timeout = human(http::CONNECT_TIMEOUT),
            pool_max_per_host = http::POOL_MAX_PER_HOST,
            rate_limit_rps = limits::DEFAULT_RATE_LIMIT_RPS,
            sofa_feed_url = jamf::SOFA_IOS_FEED_URL,
            safety_margin = human(auth::TOKEN_SAFETY_MARGIN),
            min_lifetime = human(auth::MIN_TOKEN_LIFETIME),
            concurrency = limits::DEFAULT_CONCURRENCY,
            recommended = limits::RECOMMENDED_MAX_CONCURRENCY,
            max_attempts = limits::MAX_ATTEMPTS,
            retry_base_delay = human(limits::RETRY_BASE_DELAY),
            retry_max_delay = human(limits::RETRY_MAX_DELAY),
            backoff_jitter = limits::BACKOFF_JITTER_FACTOR,
            page_size = limits::DEFAULT_PAGE_SIZE,
            retention = format!("{}days", cache::DEFAULT_RETENTION.as_secs() / 86_400),
        )
    }
}

fn human(duration: Duration) -> String {
    humantime_serde::re::humantime::format_duration(duration).to_string()
}

impl ClientConfigToml {
    /// Convert to runtime ClientConfig
    pub fn to_runtime_config(&self) -> ClientConfig {
        ClientConfig {
            request_timeout: self.request_timeout,
            connect_timeout: self.connect_timeout,
            pool_max_per_host: self.pool_max_per_host,
            rate_limit_rps: self.rate_limit_rps,
            ca_file: self.ca_file.clone(),
            ..ClientConfig::default()
        }
    }
}

impl TokenConfigToml {
    /// Convert to runtime TokenConfig
    pub fn to_runtime_config(&self) -> TokenConfig {
        TokenConfig {
            safety_margin: self.safety_margin,
            min_lifetime: self.min_lifetime,
            reject_short_lifetime: self.reject_short_lifetime,
            ..TokenConfig::default()
        }
    }
}

impl FetchConfigToml {
    /// Convert to runtime FetchConfig
    pub fn to_runtime_config(&self, request_timeout: Duration) -> FetchConfig {
        FetchConfig {
            concurrency: self.concurrency,
            max_attempts: self.max_attempts,
            retry_base_delay: self.retry_base_delay,
            retry_max_delay: self.retry_max_delay,
            backoff_jitter: self.backoff_jitter,
            page_size: self.page_size,
            request_timeout: Some(request_timeout),
            ..FetchConfig::default()
        }
    }
}

impl CacheConfigToml {
    /// Convert to runtime CacheConfig
    pub fn to_runtime_config(&self) -> CacheConfig {
        CacheConfig {
            cache_root: self.cache_root.clone(),
            retention: self.retention,
            disabled: self.disabled,
        }
    }
}

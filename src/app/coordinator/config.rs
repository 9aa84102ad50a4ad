//! Configuration structures for the fetch coordinator

use serde::{Deserialize, Serialize};
use url::Url;

use crate::app::cache::CacheConfig;
use crate::app::client::{ClientConfig, TokenConfig};
use crate::app::fetcher::FetchConfig;
use crate::constants::jamf;
use crate::errors::{ConfigError, ConfigResult};

/// Configuration for the fetch coordinator and the components it builds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// HTTP client settings
    pub client: ClientConfig,
    /// Token lifecycle settings
    pub token: TokenConfig,
    /// Fetch executor settings
    pub fetch: FetchConfig,
    /// Snapshot cache settings
    pub cache: CacheConfig,
    /// Source of the latest iOS releases
    pub sofa_feed_url: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            token: TokenConfig::default(),
            fetch: FetchConfig::default(),
            cache: CacheConfig::default(),
            sofa_feed_url: jamf::SOFA_IOS_FEED_URL.to_string(),
        }
    }
}

impl CoordinatorConfig {
    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_token(mut self, token: TokenConfig) -> Self {
        self.token = token;
        self
    }

    pub fn with_sofa_feed_url(mut self, url: impl Into<String>) -> Self {
        self.sofa_feed_url = url.into();
        self
    }

    /// Parsed SOFA feed address
    pub fn sofa_feed(&self) -> ConfigResult<Url> {
        Url::parse(&self.sofa_feed_url).map_err(|e| ConfigError::InvalidValue {
            field: "sofa_feed_url".to_string(),
            value: self.sofa_feed_url.clone(),
            reason: e.to_string(),
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        self.fetch.validate()?;
        self.sofa_feed()?;

        if self.token.safety_margin >= self.token.min_lifetime && !self.token.min_lifetime.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "token.safety_margin".to_string(),
                value: format!("{:?}", self.token.safety_margin),
                reason: "Safety margin must be shorter than the minimum token lifetime".to_string(),
            });
        }

        if self.cache.retention.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "cache.retention".to_string(),
                value: "0s".to_string(),
                reason: "Retention must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

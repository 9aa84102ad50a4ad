//! Application constants for Patcher
//!
//! This module centralizes all constants used throughout the application,
//! organized by functional domain.

use std::time::Duration;

/// Environment variable names for configuration overrides
pub mod env {
    /// Overrides the fetch concurrency ceiling
    pub const CONCURRENCY: &str = "PATCHER_CONCURRENCY";

    /// Overrides the cache directory
    pub const CACHE_DIR: &str = "PATCHER_CACHE_DIR";
}

/// Credential store constants
pub mod auth {
    use super::Duration;

    /// Keychain service name under which all credentials are stored
    pub const KEYCHAIN_SERVICE: &str = "Patcher";

    /// Keychain entry name for the Jamf Pro server URL
    pub const URL_KEY: &str = "URL";

    /// Keychain entry name for the API client ID
    pub const CLIENT_ID_KEY: &str = "CLIENT_ID";

    /// Keychain entry name for the API client secret
    pub const CLIENT_SECRET_KEY: &str = "CLIENT_SECRET";

    /// Token must outlive `now` by this margin to be reused
    pub const TOKEN_SAFETY_MARGIN: Duration = Duration::from_secs(60);

    /// Minimum acceptable lifetime of a freshly issued token
    pub const MIN_TOKEN_LIFETIME: Duration = Duration::from_secs(5 * 60);

    /// Issued lifetimes below this produce a warning
    pub const RECOMMENDED_TOKEN_LIFETIME: Duration = Duration::from_secs(10 * 60);
}

/// HTTP client configuration constants
pub mod http {
    use super::Duration;

    /// Default user agent for all HTTP requests
    pub const USER_AGENT: &str = concat!("Patcher/", env!("CARGO_PKG_VERSION"));

    /// Default HTTP request timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Maximum idle connections per host in pool
    pub const POOL_MAX_PER_HOST: usize = 8;
}

/// Concurrency, retry and backoff configuration
pub mod limits {
    use super::Duration;

    /// Default number of concurrent API requests
    pub const DEFAULT_CONCURRENCY: usize = 5;

    /// Concurrency above this risks degrading the Jamf Pro server
    pub const RECOMMENDED_MAX_CONCURRENCY: usize = 5;

    /// Hard ceiling on concurrent API requests
    pub const MAX_CONCURRENCY: usize = 1024;

    /// Total attempts per request for transient failures
    pub const MAX_ATTEMPTS: u32 = 3;

    /// First backoff delay
    pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

    /// Backoff cap
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

    /// Exponential backoff multiplier
    pub const RETRY_BACKOFF_MULTIPLIER: u32 = 2;

    /// Jitter factor for randomizing delays (0.0-1.0)
    pub const BACKOFF_JITTER_FACTOR: f64 = 0.1;

    /// Default client-side rate limit (requests per second, 0 = disabled)
    pub const DEFAULT_RATE_LIMIT_RPS: u32 = 0;

    /// Default page size for paginated endpoints
    pub const DEFAULT_PAGE_SIZE: u32 = 100;
}

/// Jamf Pro API endpoints
pub mod jamf {
    /// OAuth client-credentials token endpoint
    pub const TOKEN_PATH: &str = "/api/oauth/token";

    /// Patch software title configurations (policies)
    pub const PATCH_TITLES_PATH: &str = "/api/v2/patch-software-title-configurations";

    /// Mobile device inventory
    pub const MOBILE_DEVICES_PATH: &str = "/api/v2/mobile-devices";

    /// SOFA iOS data feed
    pub const SOFA_IOS_FEED_URL: &str = "https://sofafeed.macadmins.io/v1/ios_data_feed.json";
}

/// Cache constants
pub mod cache {
    use super::Duration;

    /// Snapshot file name prefix
    pub const FILE_PREFIX: &str = "patch_data_";

    /// Snapshot file extension
    pub const FILE_EXTENSION: &str = "json";

    /// Temporary file suffix for atomic writes
    pub const TEMP_FILE_SUFFIX: &str = ".tmp";

    /// Timestamp layout used in snapshot keys
    pub const KEY_FORMAT: &str = "%Y%m%d%H%M%S";

    /// Default retention window for snapshots
    pub const DEFAULT_RETENTION: Duration = Duration::from_secs(90 * 24 * 60 * 60);

    /// Cache directory name under the OS cache directory
    pub const DIR_NAME: &str = "patcher";
}

// Re-export commonly used constants for convenience
pub use http::USER_AGENT;
pub use limits::{DEFAULT_CONCURRENCY, MAX_ATTEMPTS};

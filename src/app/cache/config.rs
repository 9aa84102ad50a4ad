//! Cache configuration types and defaults

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::cache;

/// Configuration for the snapshot cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory for cache storage (OS-specific if None)
    pub cache_root: Option<PathBuf>,
    /// Snapshots older than this are evicted
    pub retention: Duration,
    /// Skip writing snapshots entirely
    pub disabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_root: None, // Will use OS-specific cache directory
            retention: cache::DEFAULT_RETENTION,
            disabled: false,
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration with custom cache root
    pub fn with_cache_root(cache_root: PathBuf) -> Self {
        Self {
            cache_root: Some(cache_root),
            ..Default::default()
        }
    }

    /// Set the retention window
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Enable or disable snapshot writes
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_defaults() {
        let config = CacheConfig::default();
        assert!(config.cache_root.is_none());
        assert_eq!(config.retention, Duration::from_secs(90 * 24 * 60 * 60));
        assert!(!config.disabled);

        let custom = CacheConfig::with_cache_root(PathBuf::from("/tmp/patcher"))
            .with_retention(Duration::from_secs(60))
            .with_disabled(true);
        assert_eq!(custom.cache_root, Some(PathBuf::from("/tmp/patcher")));
        assert!(custom.disabled);
    }
}

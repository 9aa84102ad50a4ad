//! Local snapshot cache for aggregated patch data
//!
//! # Key Features
//!
//! - **OS-specific cache directories**: Uses standard system cache locations
//! - **Atomic operations**: Snapshots are written with the temp-file + rename pattern
//! - **Retention**: Snapshots older than the retention window are evicted on every save and load
//!
//! # Module Organization
//!
//! - [`config`] - Configuration types and defaults
//! - [`entry`] - Snapshot entries and file naming
//! - [`manager`] - Core cache manager
//!
//! # Examples
//!
//! ```rust,no_run
//! use patcher::app::cache::{CacheConfig, CacheManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = CacheManager::new(CacheConfig::default()).await?;
//! if let Some(entry) = cache.load_latest().await? {
//!     println!("{} records cached at {}", entry.records.len(), entry.created_at);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod manager;

pub use config::CacheConfig;
pub use entry::CacheEntry;
pub use manager::CacheManager;

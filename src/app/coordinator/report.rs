//! Fetch options and results exposed by the coordinator

use std::time::Duration;

use crate::app::aggregator::SkippedItem;
use crate::app::fetcher::FetchStats;
use crate::app::models::{DeviceRecord, PatchTitle, SofaRelease, SortKey};

/// Recently released titles are removed within this window when omitting
pub const OMIT_WINDOW_HOURS: i64 = 48;

/// Per-call options for [`super::Coordinator::fetch_patch_data`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Overrides the configured concurrency ceiling
    pub concurrency: Option<usize>,
    /// Persist the result set as a snapshot
    pub use_cache: bool,
    /// Append iOS version compliance records
    pub include_ios: bool,
    /// Drop titles released in the last 48 hours
    pub omit_recent: bool,
    /// Sort the result set by this column
    pub sort: Option<SortKey>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            concurrency: None,
            use_cache: true,
            include_ios: false,
            omit_recent: false,
            sort: None,
        }
    }
}

impl FetchOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.use_cache = enabled;
        self
    }

    pub fn with_ios(mut self, enabled: bool) -> Self {
        self.include_ios = enabled;
        self
    }

    pub fn with_omit_recent(mut self, enabled: bool) -> Self {
        self.omit_recent = enabled;
        self
    }

    pub fn with_sort(mut self, key: SortKey) -> Self {
        self.sort = Some(key);
        self
    }
}

/// Outcome of a patch data fetch
#[derive(Debug, Clone)]
pub struct FetchReport {
    /// Aggregated records, first-seen order unless sorted
    pub records: Vec<PatchTitle>,
    /// Items that failed or could not be parsed
    pub skipped: Vec<SkippedItem>,
    /// Items dropped as duplicates of an earlier identifier
    pub duplicates: usize,
    /// Titles removed by the recent-release filter
    pub omitted: usize,
    /// Executor counters for the whole run
    pub stats: FetchStats,
    /// Token exchanges performed during the run
    pub token_exchanges: u64,
    /// Key of the snapshot written, if any
    pub cache_key: Option<String>,
    /// Why the snapshot could not be written
    pub cache_error: Option<String>,
    pub elapsed: Duration,
}

impl FetchReport {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Outcome of a mobile device version fetch
#[derive(Debug, Clone, Default)]
pub struct DeviceReport {
    pub devices: Vec<DeviceRecord>,
    pub releases: Vec<SofaRelease>,
    /// One compliance record per major iOS version in use
    pub titles: Vec<PatchTitle>,
    pub skipped: Vec<SkippedItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_options_defaults() {
        let options = FetchOptions::default();
        assert!(options.use_cache);
        assert!(!options.include_ios);
        assert_eq!(options.concurrency, None);

        let options = options
            .with_concurrency(2)
            .with_cache(false)
            .with_sort(SortKey::Title);
        assert_eq!(options.concurrency, Some(2));
        assert!(!options.use_cache);
        assert_eq!(options.sort, Some(SortKey::Title));
    }
}

//! Core application logic for Patcher
//!
//! This module contains the fetch core: the HTTP transport and token
//! lifecycle, the bounded fetch executor, result aggregation, the snapshot
//! cache and the coordinator that drives them.
//!
//! # Examples
//!
//! ```rust,no_run
//! use patcher::app::{Coordinator, CoordinatorConfig, FetchOptions, SortKey};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = Coordinator::from_config(CoordinatorConfig::default()).await?;
//!
//! let options = FetchOptions::default().with_sort(SortKey::CompletionPercent);
//! let report = coordinator.fetch_patch_data(&options).await?;
//!
//! for title in &report.records {
//!     println!("{}: {}%", title.title, title.completion_percent);
//! }
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod cache;
pub mod client;
pub mod coordinator;
pub mod fetcher;
pub mod models;

// Re-export main public API
pub use aggregator::{aggregate, AggregateReport, Record, RecordPayload, SkippedItem};
pub use cache::{CacheConfig, CacheEntry, CacheManager};
pub use client::{
    AccessToken, ClientConfig, HttpRequest, HttpResponse, ReqwestTransport, TokenConfig,
    TokenManager, Transport,
};
pub use coordinator::{
    Coordinator, CoordinatorConfig, DeviceReport, FetchOptions, FetchReport, SignalHandler,
};
pub use fetcher::{
    Endpoint, FailureKind, FetchConfig, FetchExecutor, FetchFailure, FetchOutcome, FetchRequest,
    FetchStats, RawResponse,
};
pub use models::{
    DeviceRecord, PatchPackage, PatchTitle, PolicyPayload, SofaRelease, SortKey, SummaryPayload,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_structure() {
        // Ensure public API is accessible
        let config = ClientConfig::default();
        assert!(config.tcp_nodelay);
        assert!(CoordinatorConfig::default().validate().is_ok());
    }
}

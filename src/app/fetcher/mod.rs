//! Bounded concurrent fetching of Jamf Pro API resources
//!
//! - `config`: concurrency, retry and backoff settings
//! - `types`: requests, outcomes and counters
//! - `executor`: the executor itself, with 401 refresh, transient retries
//!   and cooperative cancellation

pub mod config;
pub mod executor;
pub mod types;

pub use config::{BackoffCalculator, FetchConfig};
pub use executor::{is_retryable_status, FetchExecutor};
pub use types::{
    Endpoint, FailureKind, FetchFailure, FetchOutcome, FetchRequest, FetchStats, PageParams,
    RawResponse,
};

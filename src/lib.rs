//! Patcher Library
//!
//! A Rust library for collecting patch compliance data from the Jamf Pro API.
//! Provides bounded concurrent fetching with token refresh, retry logic and a
//! local snapshot cache.

pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};

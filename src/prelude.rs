//! Prelude module for Patcher Library
//!
//! This module re-exports the most commonly used items from the library,
//! providing a convenient way to import everything needed for typical usage
//! with a single `use patcher::prelude::*;` statement.
//!
//! # Usage
//!
//! ```rust,no_run
//! use patcher::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let coordinator = Coordinator::from_config(CoordinatorConfig::default()).await?;
//!     let report = coordinator.fetch_patch_data(&FetchOptions::default()).await?;
//!     println!("{} titles", report.records.len());
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{AppError, Result};

// Essential app components that are used in most integrations
pub use crate::app::{
    CacheConfig, CacheEntry, CacheManager, ClientConfig, Coordinator, CoordinatorConfig,
    FetchConfig, FetchOptions, FetchReport, PatchTitle, SortKey, TokenConfig,
};

// Credential management
pub use crate::auth::{
    get_auth_status, AuthStatus, CredentialKey, CredentialStore, KeyringStore, MemoryStore,
};

// Standard library re-exports that are commonly needed
pub use std::sync::Arc;

pub use tokio;

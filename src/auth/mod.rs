//! Credential management for the Jamf Pro API client
//!
//! This module provides the credential store abstraction, the OS keychain
//! backend, and helpers for interactive setup, status and reset.
//!
//! # Examples
//!
//! ```rust,no_run
//! use patcher::auth::{get_auth_status, KeyringStore};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = KeyringStore::default();
//! let status = get_auth_status(&store)?;
//! println!("{}", status.status_message());
//! # Ok(())
//! # }
//! ```

pub mod credentials;

// Re-export main public API
pub use credentials::{
    get_auth_status, normalize_server_url, prompt_credentials, reset_credentials,
    save_credentials, AuthStatus, ClientCredentials, CredentialKey, CredentialStore, KeyringStore,
    MemoryStore,
};

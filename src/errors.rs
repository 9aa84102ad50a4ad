//! Error types for Patcher
//!
//! This module defines the error types for every component of the fetch core.
//! Errors are grouped by the component that raises them so callers can decide
//! what is fatal (authentication), what is retried internally (transport), and
//! what is reported but never aborts the pipeline (cache).

use std::path::PathBuf;
use thiserror::Error;

/// Authentication and credential errors
#[derive(Error, Debug)]
pub enum AuthError {
    /// A required credential is not present in the credential store
    #[error("Missing credential '{key}'. Run 'patcher auth setup' to configure Patcher")]
    MissingCredential { key: String },

    /// The configured server URL could not be parsed
    #[error("Invalid server URL: {url} - {error}")]
    InvalidUrl { url: String, error: String },

    /// Token endpoint returned a non-success status
    #[error("Token request rejected by server: HTTP {status}")]
    ExchangeRejected { status: u16 },

    /// Token endpoint could not be reached
    #[error("Token request failed")]
    Transport(#[from] TransportError),

    /// Token payload did not carry the expected fields
    #[error("Received invalid token response: {reason}")]
    MalformedToken { reason: String },

    /// Issued token lives shorter than the configured floor
    #[error(
        "Bearer token lifetime is too short ({seconds}s, minimum {minimum}s). Increase the API client's token lifetime in Jamf Pro"
    )]
    TokenLifetimeTooShort { seconds: i64, minimum: u64 },

    /// OS keychain access failed
    #[error("Keychain access failed: {0}")]
    Keychain(String),

    /// Interactive credential entry failed
    #[error("Failed to read credential input")]
    Input(#[from] std::io::Error),
}

/// Transport-level failures raised by an HTTP transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request did not complete within its timeout
    #[error("Request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// The connection could not be established or was reset
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Any other failure while sending or reading the response
    #[error("Request failed: {0}")]
    Request(String),

    /// The transport could not be constructed
    #[error("Transport setup failed: {0}")]
    Setup(String),
}

impl TransportError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout { .. } | TransportError::Connect(_)
        )
    }
}

/// Errors that abort a whole fetch operation
#[derive(Error, Debug)]
pub enum FetchError {
    /// No usable token could be obtained
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The operation was interrupted before completion
    #[error("Fetch cancelled before completion")]
    Cancelled,

    /// A listing endpoint required to plan the fetch failed
    #[error("Listing request to {endpoint} failed: {reason}")]
    ListingFailed { endpoint: String, reason: String },

    /// A listing endpoint returned something other than the expected shape
    #[error("Unexpected response format from {endpoint}: {reason}")]
    UnexpectedPayload { endpoint: String, reason: String },
}

/// Cache management errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache directory not found or inaccessible
    #[error("Cache directory not accessible: {path}")]
    DirectoryNotAccessible { path: PathBuf },

    /// I/O failure on a specific cache file
    #[error("Cache I/O failed for {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot could not be encoded or decoded
    #[error("Cache entry serialization failed")]
    Serialization(#[from] serde_json::Error),

    /// Temp file could not be moved into place
    #[error("Atomic cache write failed: could not rename {temp_path} to {final_path}")]
    AtomicWriteFailed {
        temp_path: PathBuf,
        final_path: PathBuf,
    },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Configuration file could not be read
    #[error("Failed to read configuration file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<String> },
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Authentication error
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Fetch pipeline error
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Cache error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport error outside the fetch pipeline
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is recoverable (transient)
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Transport(e) | AppError::Auth(AuthError::Transport(e)) => e.is_transient(),
            AppError::Fetch(FetchError::Auth(AuthError::Transport(e))) => e.is_transient(),
            AppError::Cache(_) => true,
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Auth(_) | AppError::Fetch(FetchError::Auth(_)) => "authentication",
            AppError::Fetch(_) => "fetch",
            AppError::Cache(_) => "cache",
            AppError::Config(_) => "config",
            AppError::Transport(_) => "transport",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Authentication result type alias
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Transport result type alias
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Fetch result type alias
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Cache result type alias
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

//! HTTP client configuration and building logic
//!
//! This module handles the configuration and construction of the reqwest
//! client used to talk to the Jamf Pro API.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::{Certificate, Client};
use serde::{Deserialize, Serialize};

use crate::constants::{http, limits};
use crate::errors::{TransportError, TransportResult};

/// Configuration for the HTTP client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// TCP keep-alive settings
    pub tcp_keepalive: Option<Duration>,
    /// TCP nodelay (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
    /// Connection pool idle timeout
    pub pool_idle_timeout: Option<Duration>,
    /// Maximum number of idle connections per host
    pub pool_max_per_host: usize,
    /// Default request timeout, used when a request carries none
    pub request_timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Client-side rate limit in requests per second (0 = disabled)
    pub rate_limit_rps: u32,
    /// PEM bundle trusted in addition to the system roots
    pub ca_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tcp_keepalive: Some(Duration::from_secs(30)),
            tcp_nodelay: true,
            pool_idle_timeout: Some(http::POOL_IDLE_TIMEOUT),
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            request_timeout: http::DEFAULT_TIMEOUT,
            connect_timeout: http::CONNECT_TIMEOUT,
            rate_limit_rps: limits::DEFAULT_RATE_LIMIT_RPS,
            ca_file: None,
        }
    }
}

impl ClientConfig {
    /// Set the default request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the client-side rate limit
    pub fn with_rate_limit(mut self, rps: u32) -> Self {
        self.rate_limit_rps = rps;
        self
    }

    /// Trust an additional CA bundle
    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Builds the HTTP client with the specified configuration
    pub fn build_http_client(&self) -> TransportResult<Client> {
        let mut client_builder = Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(http::USER_AGENT)
            .tcp_nodelay(self.tcp_nodelay)
            .pool_max_idle_per_host(self.pool_max_per_host);

        if let Some(keepalive) = self.tcp_keepalive {
            client_builder = client_builder.tcp_keepalive(keepalive);
        }

        if let Some(idle_timeout) = self.pool_idle_timeout {
            client_builder = client_builder.pool_idle_timeout(idle_timeout);
        }

        if let Some(ca_file) = &self.ca_file {
            let pem = std::fs::read(ca_file).map_err(|e| {
                TransportError::Setup(format!(
                    "Failed to read CA file {}: {}",
                    ca_file.display(),
                    e
                ))
            })?;
            let certificate = Certificate::from_pem(&pem).map_err(|e| {
                TransportError::Setup(format!("Invalid CA file {}: {}", ca_file.display(), e))
            })?;
            client_builder = client_builder.add_root_certificate(certificate);
            tracing::debug!("Added custom CA certificate from {}", ca_file.display());
        }

        client_builder
            .build()
            .map_err(|e| TransportError::Setup(e.to_string()))
    }
}

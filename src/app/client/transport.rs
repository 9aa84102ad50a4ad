//! HTTP transport abstraction
//!
//! The fetch core never talks to reqwest directly: every request goes through
//! the [`Transport`] trait so that token exchange, pagination and retry logic
//! can be exercised against scripted transports.

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{clock::DefaultClock, state::InMemoryState, Jitter, Quota, RateLimiter};
use reqwest::Client;
use url::Url;

use super::config::ClientConfig;
use crate::errors::{TransportError, TransportResult};

type DirectRateLimiter = RateLimiter<governor::state::NotKeyed, InMemoryState, DefaultClock>;

/// HTTP methods used by the fetch core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Request body
#[derive(Clone, PartialEq, Eq)]
pub enum RequestBody {
    None,
    /// `application/x-www-form-urlencoded` fields
    Form(Vec<(String, String)>),
}

/// A single outgoing HTTP request
#[derive(Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    /// Per-request timeout; the transport default applies when `None`
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            body: RequestBody::None,
            timeout: None,
        }
    }

    pub fn post_form(url: Url, fields: Vec<(String, String)>) -> Self {
        Self {
            method: HttpMethod::Post,
            url,
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            body: RequestBody::Form(fields),
            timeout: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_bearer(self, token: &str) -> Self {
        self.with_header("Authorization", format!("Bearer {}", token))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Look up a header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

// Header values and form fields carry bearer tokens and client secrets.
impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        let body = match &self.body {
            RequestBody::None => "none".to_string(),
            RequestBody::Form(fields) => format!("form({} fields)", fields.len()),
        };
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &header_names)
            .field("body", &body)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Response status and raw body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends HTTP requests on behalf of the fetch core
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> TransportResult<HttpResponse>;
}

/// Transport backed by a pooled reqwest client with optional rate limiting
#[derive(Debug)]
pub struct ReqwestTransport {
    client: Client,
    default_timeout: Duration,
    rate_limiter: Option<DirectRateLimiter>,
}

impl ReqwestTransport {
    /// Creates a transport from the client configuration
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Setup` if the CA file cannot be loaded or the
    /// client cannot be built
    pub fn new(config: &ClientConfig) -> TransportResult<Self> {
        let client = config.build_http_client()?;
        Ok(Self {
            client,
            default_timeout: config.request_timeout,
            rate_limiter: Self::build_rate_limiter(config.rate_limit_rps),
        })
    }

    /// Builds the rate limiter, `None` when limiting is disabled
    fn build_rate_limiter(rate_limit_rps: u32) -> Option<DirectRateLimiter> {
        NonZeroU32::new(rate_limit_rps).map(|rps| RateLimiter::direct(Quota::per_second(rps)))
    }

    fn map_error(&self, error: reqwest::Error, timeout: Duration) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout {
                seconds: timeout.as_secs(),
            }
        } else if error.is_connect() {
            TransportError::Connect(error.to_string())
        } else {
            TransportError::Request(error.to_string())
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> TransportResult<HttpResponse> {
        if let Some(limiter) = &self.rate_limiter {
            // Wait for a permit, jittered up to 100ms
            limiter
                .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(100)))
                .await;
        }

        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(request.url.as_str()),
            HttpMethod::Post => self.client.post(request.url.as_str()),
        }
        .timeout(timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let RequestBody::Form(fields) = &request.body {
            builder = builder.form(fields);
        }

        tracing::debug!("{:?} {}", request.method, request.url);
        let response = builder
            .send()
            .await
            .map_err(|e| self.map_error(e, timeout))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_error(e, timeout))?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

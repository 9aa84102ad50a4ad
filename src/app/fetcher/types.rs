//! Request and outcome types for the fetch executor

use std::fmt;

use thiserror::Error;
use url::Url;

use crate::app::client::endpoint_url;

/// Target of a fetch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Path under the Jamf Pro server, sent with a bearer token
    Api(String),
    /// Fully qualified URL outside the server, sent without credentials
    External(Url),
}

impl Endpoint {
    pub fn api(path: impl Into<String>) -> Self {
        Endpoint::Api(path.into())
    }

    pub fn requires_auth(&self) -> bool {
        matches!(self, Endpoint::Api(_))
    }

    /// Resolve to an absolute URL against the server base
    pub fn resolve(&self, base: &Url) -> Result<Url, url::ParseError> {
        match self {
            Endpoint::Api(path) => endpoint_url(base, path),
            Endpoint::External(url) => Ok(url.clone()),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Api(path) => f.write_str(path),
            Endpoint::External(url) => f.write_str(url.as_str()),
        }
    }
}

/// Pagination parameters sent as `page` and `page-size`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    pub page: u32,
    pub page_size: u32,
}

/// A single request handed to the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Position in the submitted batch, assigned by the executor
    pub index: usize,
    pub endpoint: Endpoint,
    pub page: Option<PageParams>,
}

impl FetchRequest {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            index: 0,
            endpoint,
            page: None,
        }
    }

    pub fn api(path: impl Into<String>) -> Self {
        Self::new(Endpoint::api(path))
    }

    pub fn with_page(mut self, page: u32, page_size: u32) -> Self {
        self.page = Some(PageParams { page, page_size });
        self
    }

    /// Absolute URL for this request, pagination included
    pub fn url(&self, base: &Url) -> Result<Url, url::ParseError> {
        let mut url = self.endpoint.resolve(base)?;
        if let Some(page) = self.page {
            url.query_pairs_mut()
                .append_pair("page", &page.page.to_string())
                .append_pair("page-size", &page.page_size.to_string());
        }
        Ok(url)
    }
}

impl fmt::Display for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.page {
            Some(page) => write!(f, "{} (page {})", self.endpoint, page.page),
            None => write!(f, "{}", self.endpoint),
        }
    }
}

/// Successful response body for one request
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub request: FetchRequest,
    pub status: u16,
    pub body: Vec<u8>,
}

/// Why a single request produced no data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Still unauthorized after one token refresh
    #[error("unauthorized after token refresh")]
    Unauthorized,

    /// Non-retryable HTTP status
    #[error("HTTP {0}")]
    HttpStatus(u16),

    /// Transient failure that outlasted the retry budget
    #[error("transient failure after retries: {0}")]
    Transient(String),

    /// The request could not be built or sent
    #[error("request failed: {0}")]
    Request(String),
}

/// A request that produced no data
#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub request: FetchRequest,
    pub kind: FailureKind,
    pub attempts: u32,
}

/// Result of one request
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Success(RawResponse),
    Failure(FetchFailure),
}

impl FetchOutcome {
    pub fn request(&self) -> &FetchRequest {
        match self {
            FetchOutcome::Success(response) => &response.request,
            FetchOutcome::Failure(failure) => &failure.request,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }
}

/// Counters collected while executing batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Transport calls made, retries included
    pub attempts: u64,
    /// Retries after transient failures
    pub retries: u64,
    /// Retries after a 401 with a refreshed token
    pub auth_retries: u64,
    /// Requests that ended as a failure outcome
    pub failures: u64,
    /// Highest number of simultaneous transport calls
    pub peak_in_flight: usize,
}

//! Bounded fetch executor
//!
//! Drives a batch of requests cooperatively inside the calling task. Every
//! transport call holds a semaphore permit, so no more than `concurrency`
//! calls are ever in flight; permits are released while a request sleeps in
//! backoff. Outcomes are returned in submission order.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::config::FetchConfig;
use super::types::{
    Endpoint, FailureKind, FetchFailure, FetchOutcome, FetchRequest, FetchStats, RawResponse,
};
use crate::app::client::{HttpRequest, TokenManager, Transport};
use crate::constants::limits;
use crate::errors::{FetchError, FetchResult};

/// Statuses worth retrying with backoff
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

#[derive(Debug, Default)]
struct StatsCounters {
    attempts: AtomicU64,
    retries: AtomicU64,
    auth_retries: AtomicU64,
    failures: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlightGuard<'a> {
    counters: &'a StatsCounters,
}

impl<'a> InFlightGuard<'a> {
    fn enter(counters: &'a StatsCounters) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { counters }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Executes batches of API requests under a concurrency ceiling
pub struct FetchExecutor {
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenManager>,
    base_url: Url,
    config: FetchConfig,
    permits: Semaphore,
    cancel: CancellationToken,
    counters: StatsCounters,
}

impl FetchExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        tokens: Arc<TokenManager>,
        base_url: Url,
        config: FetchConfig,
    ) -> Self {
        if config.concurrency > limits::RECOMMENDED_MAX_CONCURRENCY {
            warn!(
                "Concurrency of {} exceeds the recommended maximum of {}. High values can degrade Jamf Pro server performance",
                config.concurrency,
                limits::RECOMMENDED_MAX_CONCURRENCY
            );
        }

        Self {
            transport,
            tokens,
            base_url,
            permits: Semaphore::new(config.concurrency.clamp(1, limits::MAX_CONCURRENCY)),
            config,
            cancel: CancellationToken::new(),
            counters: StatsCounters::default(),
        }
    }

    /// Use an externally controlled cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Snapshot of the counters accumulated so far
    pub fn stats(&self) -> FetchStats {
        FetchStats {
            attempts: self.counters.attempts.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            auth_retries: self.counters.auth_retries.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            peak_in_flight: self.counters.peak_in_flight.load(Ordering::SeqCst),
        }
    }

    /// Execute every request, returning one outcome per request in order
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Auth` if a token cannot be obtained and
    /// `FetchError::Cancelled` if the batch is cancelled. Partial results are
    /// discarded in both cases.
    pub async fn fetch_all(&self, requests: Vec<FetchRequest>) -> FetchResult<Vec<FetchOutcome>> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let total = requests.len();
        let mut pending: FuturesUnordered<_> = requests
            .into_iter()
            .enumerate()
            .map(|(index, mut request)| {
                request.index = index;
                async move { (index, self.execute(request).await) }
            })
            .collect();

        let mut slots: Vec<Option<FetchOutcome>> = (0..total).map(|_| None).collect();
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Fetch cancelled with {} requests outstanding", pending.len());
                    return Err(FetchError::Cancelled);
                }
                next = pending.next() => match next {
                    Some((index, result)) => slots[index] = Some(result?),
                    None => break,
                }
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }

    /// Fetch every page of a paginated listing
    ///
    /// Page 0 is fetched first and its `totalCount` decides how many further
    /// pages are requested. A bare JSON array is treated as a complete result.
    pub async fn fetch_paginated(
        &self,
        endpoint: Endpoint,
        page_size: u32,
    ) -> FetchResult<Vec<FetchOutcome>> {
        let page_size = page_size.max(1);
        let first_request = FetchRequest::new(endpoint.clone()).with_page(0, page_size);
        let first = self
            .fetch_all(vec![first_request])
            .await?
            .pop()
            .ok_or_else(|| FetchError::ListingFailed {
                endpoint: endpoint.to_string(),
                reason: "no response".to_string(),
            })?;

        let total = match &first {
            FetchOutcome::Success(response) => {
                page_total(&response.body).map_err(|reason| FetchError::UnexpectedPayload {
                    endpoint: endpoint.to_string(),
                    reason,
                })?
            }
            FetchOutcome::Failure(failure) => {
                return Err(FetchError::ListingFailed {
                    endpoint: endpoint.to_string(),
                    reason: failure.kind.to_string(),
                })
            }
        };

        let Some(total) = total else {
            return Ok(vec![first]);
        };

        let pages = total.div_ceil(page_size as u64) as u32;
        debug!("{} reports {} items across {} pages", endpoint, total, pages);

        let remaining: Vec<FetchRequest> = (1..pages)
            .map(|page| FetchRequest::new(endpoint.clone()).with_page(page, page_size))
            .collect();
        let mut outcomes = vec![first];
        for mut outcome in self.fetch_all(remaining).await? {
            let index = outcomes.len();
            match &mut outcome {
                FetchOutcome::Success(response) => response.request.index = index,
                FetchOutcome::Failure(failure) => failure.request.index = index,
            }
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    async fn execute(&self, request: FetchRequest) -> FetchResult<FetchOutcome> {
        let url = match request.url(&self.base_url) {
            Ok(url) => url,
            Err(e) => return Ok(self.fail(request, FailureKind::Request(e.to_string()), 0)),
        };

        let mut attempts = 0u32;
        let mut transient_failures = 0u32;
        let mut auth_retried = false;

        loop {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let token = if request.endpoint.requires_auth() {
                Some(self.tokens.get_valid_token().await?)
            } else {
                None
            };

            let mut http_request = HttpRequest::get(url.clone());
            if let Some(token) = &token {
                http_request = http_request.with_bearer(token.value());
            }
            if let Some(timeout) = self.config.request_timeout {
                http_request = http_request.with_timeout(timeout);
            }

            attempts += 1;
            let result = {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| FetchError::Cancelled)?;
                let _in_flight = InFlightGuard::enter(&self.counters);
                self.counters.attempts.fetch_add(1, Ordering::Relaxed);
                debug!(attempt = attempts, "GET {}", request);
                self.transport.send(http_request).await
            };

            let reason = match result {
                Ok(response) if response.is_success() => {
                    return Ok(FetchOutcome::Success(RawResponse {
                        request,
                        status: response.status,
                        body: response.body,
                    }));
                }
                Ok(response) if response.status == 401 => match token {
                    Some(token) if !auth_retried => {
                        auth_retried = true;
                        self.counters.auth_retries.fetch_add(1, Ordering::Relaxed);
                        self.tokens.invalidate_token(&token).await;
                        warn!("{} returned 401, retrying with a refreshed token", request);
                        continue;
                    }
                    Some(_) => return Ok(self.fail(request, FailureKind::Unauthorized, attempts)),
                    None => {
                        return Ok(self.fail(request, FailureKind::HttpStatus(401), attempts))
                    }
                },
                Ok(response) if is_retryable_status(response.status) => {
                    format!("HTTP {}", response.status)
                }
                Ok(response) => {
                    return Ok(self.fail(request, FailureKind::HttpStatus(response.status), attempts))
                }
                Err(e) if e.is_transient() => e.to_string(),
                Err(e) => return Ok(self.fail(request, FailureKind::Request(e.to_string()), attempts)),
            };

            transient_failures += 1;
            if transient_failures >= self.config.max_attempts {
                return Ok(self.fail(request, FailureKind::Transient(reason), attempts));
            }

            let delay = self.config.jittered_retry_delay(transient_failures);
            self.counters.retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                "{} failed ({}), attempt {}/{}. Retrying in {}ms",
                request,
                reason,
                transient_failures,
                self.config.max_attempts,
                delay.as_millis()
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn fail(&self, request: FetchRequest, kind: FailureKind, attempts: u32) -> FetchOutcome {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        warn!("{} failed after {} attempts: {}", request, attempts, kind);
        FetchOutcome::Failure(FetchFailure {
            request,
            kind,
            attempts,
        })
    }
}

/// `Some(totalCount)` for a paged envelope, `None` for a bare list
fn page_total(body: &[u8]) -> Result<Option<u64>, String> {
    let value: serde_json::Value = serde_json::from_slice(body).map_err(|e| e.to_string())?;
    match value {
        serde_json::Value::Array(_) => Ok(None),
        serde_json::Value::Object(map) => map
            .get("totalCount")
            .and_then(serde_json::Value::as_u64)
            .map(Some)
            .ok_or_else(|| "missing totalCount".to_string()),
        other => Err(format!("expected object or array, got {}", other)),
    }
}

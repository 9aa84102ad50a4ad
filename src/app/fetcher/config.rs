//! Fetch executor configuration
//!
//! Concurrency ceiling, retry budget and backoff parameters for the bounded
//! fetch executor, with validation and a small backoff calculator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::limits;
use crate::errors::{ConfigError, ConfigResult};

/// Configuration for the bounded fetch executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum number of requests in flight at any moment
    pub concurrency: usize,
    /// Total attempts per request for transient failures
    pub max_attempts: u32,
    /// Delay before the first retry
    pub retry_base_delay: Duration,
    /// Maximum retry delay (backoff cap)
    pub retry_max_delay: Duration,
    /// Exponential backoff multiplier for retries
    pub retry_backoff_multiplier: u32,
    /// Jitter fraction for backoff randomization (0.0-1.0)
    pub backoff_jitter: f64,
    /// Page size for paginated listings
    pub page_size: u32,
    /// Per-request timeout, `None` uses the transport default
    pub request_timeout: Option<Duration>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: limits::DEFAULT_CONCURRENCY,
            max_attempts: limits::MAX_ATTEMPTS,
            retry_base_delay: limits::RETRY_BASE_DELAY,
            retry_max_delay: limits::RETRY_MAX_DELAY,
            retry_backoff_multiplier: limits::RETRY_BACKOFF_MULTIPLIER,
            backoff_jitter: limits::BACKOFF_JITTER_FACTOR,
            page_size: limits::DEFAULT_PAGE_SIZE,
            request_timeout: None,
        }
    }
}

impl FetchConfig {
    /// Set the concurrency ceiling
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the total attempt budget for transient failures
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the backoff window
    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = base;
        self.retry_max_delay = max;
        self
    }

    /// Set backoff jitter fraction
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.backoff_jitter = jitter;
        self
    }

    /// Set the page size for paginated listings
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Validate configuration values and return errors for invalid settings
    pub fn validate(&self) -> ConfigResult<()> {
        if self.concurrency == 0 {
            return Err(invalid(
                "fetcher.concurrency",
                self.concurrency,
                "Concurrency must be at least 1",
            ));
        }

        if self.concurrency > limits::MAX_CONCURRENCY {
            return Err(invalid(
                "fetcher.concurrency",
                self.concurrency,
                &format!("Concurrency must not exceed {}", limits::MAX_CONCURRENCY),
            ));
        }

        if self.max_attempts == 0 {
            return Err(invalid(
                "fetcher.max_attempts",
                self.max_attempts,
                "At least one attempt is required",
            ));
        }

        if self.retry_base_delay > self.retry_max_delay {
            return Err(invalid(
                "fetcher.retry_base_delay",
                format!("{:?}", self.retry_base_delay),
                "Retry base delay must not exceed max delay",
            ));
        }

        if self.retry_backoff_multiplier == 0 {
            return Err(invalid(
                "fetcher.retry_backoff_multiplier",
                self.retry_backoff_multiplier,
                "Multiplier must be at least 1",
            ));
        }

        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(invalid(
                "fetcher.backoff_jitter",
                self.backoff_jitter,
                "Jitter must be between 0.0 and 1.0",
            ));
        }

        if self.page_size == 0 {
            return Err(invalid(
                "fetcher.page_size",
                self.page_size,
                "Page size must be at least 1",
            ));
        }

        Ok(())
    }

    /// Delay before retry number `retry` (1-based) without jitter
    pub fn retry_delay(&self, retry: u32) -> Duration {
        BackoffCalculator::calculate_retry_delay(
            retry.saturating_sub(1),
            self.retry_base_delay,
            self.retry_max_delay,
            self.retry_backoff_multiplier,
        )
    }

    /// Delay before retry number `retry` (1-based) with jitter applied
    pub fn jittered_retry_delay(&self, retry: u32) -> Duration {
        BackoffCalculator::apply_jitter(self.retry_delay(retry), self.backoff_jitter)
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Backoff calculation utilities
pub struct BackoffCalculator;

impl BackoffCalculator {
    /// Calculate retry delay with exponential backoff
    pub fn calculate_retry_delay(
        retry_count: u32,
        base_delay: Duration,
        max_delay: Duration,
        multiplier: u32,
    ) -> Duration {
        let delay_millis = base_delay.as_millis() as u64;
        let factor = (multiplier as u64).saturating_pow(retry_count);
        let multiplied_delay = delay_millis.saturating_mul(factor);
        let capped_delay = std::cmp::min(multiplied_delay, max_delay.as_millis() as u64);
        Duration::from_millis(capped_delay)
    }

    /// Spread a delay by up to `jitter_fraction` in either direction
    pub fn apply_jitter(delay: Duration, jitter_fraction: f64) -> Duration {
        let millis = delay.as_millis() as u64;
        let jitter_range = (millis as f64 * jitter_fraction) as u64;
        if jitter_range == 0 {
            return delay;
        }

        let offset = fastrand::u64(0..=jitter_range * 2);
        Duration::from_millis((millis + offset).saturating_sub(jitter_range))
    }
}

//! Fetch orchestration
//!
//! The coordinator is the public entry point of the fetch core. It wires the
//! credential store, transport, token manager, executor, aggregator and cache
//! together for each operation.
//!
//! # Architecture
//!
//! - [`config`] - Configuration structures and validation
//! - [`report`] - Per-call options and results
//! - [`signals`] - Signal handling for graceful shutdown
//!
//! # Examples
//!
//! ```rust,no_run
//! use patcher::app::{Coordinator, CoordinatorConfig, FetchOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = Coordinator::from_config(CoordinatorConfig::default()).await?;
//! let _signals = coordinator.install_signal_handler();
//!
//! let report = coordinator.fetch_patch_data(&FetchOptions::default()).await?;
//! println!("{} titles, {} items skipped", report.records.len(), report.skipped_count());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod report;
pub mod signals;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::app::aggregator::{aggregate, SkippedItem};
use crate::app::cache::{CacheEntry, CacheManager};
use crate::app::client::{ReqwestTransport, TokenManager, Transport};
use crate::app::fetcher::{Endpoint, FetchExecutor, FetchOutcome, FetchRequest};
use crate::app::models::{
    ios_patch_titles, parse_sofa_feed, sort_records, DeviceDetailPayload, DeviceRef,
    PolicyPayload, SummaryPayload,
};
use crate::auth::{
    normalize_server_url, reset_credentials, CredentialKey, CredentialStore, KeyringStore,
};
use crate::constants::jamf;
use crate::errors::{AuthError, FetchError, Result};

pub use config::CoordinatorConfig;
pub use report::{DeviceReport, FetchOptions, FetchReport, OMIT_WINDOW_HOURS};
pub use signals::SignalHandler;

/// Entry point for fetching, caching and resetting patch data
pub struct Coordinator {
    config: CoordinatorConfig,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    tokens: Arc<TokenManager>,
    cache: CacheManager,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Create a coordinator over explicit collaborators
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the cache
    /// directory cannot be created
    pub async fn new(
        config: CoordinatorConfig,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self> {
        config.validate()?;

        let tokens = Arc::new(TokenManager::new(
            transport.clone(),
            credentials.clone(),
            config.token.clone(),
        ));
        let cache = CacheManager::new(config.cache.clone()).await?;

        Ok(Self {
            config,
            transport,
            credentials,
            tokens,
            cache,
            cancel: CancellationToken::new(),
        })
    }

    /// Create a coordinator using reqwest and the OS keychain
    pub async fn from_config(config: CoordinatorConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config.client)?);
        Self::new(config, transport, Arc::new(KeyringStore::default())).await
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Token cancelling any running operation
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel on CTRL-C or SIGTERM
    pub fn install_signal_handler(&self) -> JoinHandle<()> {
        SignalHandler::new(self.cancel.clone()).setup()
    }

    pub fn token_manager(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Fetch, aggregate and cache patch compliance for every software title
    ///
    /// # Errors
    ///
    /// Fails when no token can be obtained, the policy listing fails, or the
    /// run is cancelled. Per-title failures are reported in
    /// [`FetchReport::skipped`]; cache failures in [`FetchReport::cache_error`].
    pub async fn fetch_patch_data(&self, options: &FetchOptions) -> Result<FetchReport> {
        let started = Instant::now();
        let executor = self.executor(options.concurrency)?;

        // Fail fast on bad credentials before any listing work
        self.tokens
            .get_valid_token()
            .await
            .map_err(FetchError::Auth)?;

        let listing = executor
            .fetch_paginated(
                Endpoint::api(jamf::PATCH_TITLES_PATH),
                executor.config().page_size,
            )
            .await?;
        let policies = aggregate::<PolicyPayload>(&listing);
        info!(
            "Found {} patch software title configurations",
            policies.records.len()
        );

        let requests: Vec<FetchRequest> = policies
            .records
            .iter()
            .map(|policy| FetchRequest::api(policy.summary_path()))
            .collect();
        let outcomes = executor.fetch_all(requests).await?;
        let summaries = aggregate::<SummaryPayload>(&outcomes);

        // First policy listed for a title owns its packages
        let mut by_title: HashMap<&str, &PolicyPayload> = HashMap::new();
        for policy in &policies.records {
            by_title.entry(policy.title_key()).or_insert(policy);
        }
        let mut records = summaries.records;
        for record in &mut records {
            if let Some(policy) = by_title.get(record.title_id.as_str()) {
                record.merge_policy(policy);
            }
        }

        let mut skipped = policies.skipped;
        skipped.extend(summaries.skipped);
        let mut duplicates = policies.duplicates + summaries.duplicates;

        if options.include_ios {
            let ios = self.collect_ios(&executor).await?;
            let known: HashSet<String> =
                records.iter().map(|r| r.title_id.clone()).collect();
            for title in ios.titles {
                if known.contains(&title.title_id) {
                    duplicates += 1;
                } else {
                    records.push(title);
                }
            }
            skipped.extend(ios.skipped);
        }

        let mut omitted = 0;
        if options.omit_recent {
            let before = records.len();
            let now = Utc::now();
            let window = chrono::Duration::hours(OMIT_WINDOW_HOURS);
            records.retain(|r| !r.released_within(window, now));
            omitted = before - records.len();
            info!(
                "Omitted {} titles released in the last {} hours",
                omitted, OMIT_WINDOW_HOURS
            );
        }

        if let Some(key) = options.sort {
            sort_records(&mut records, key);
        }

        let (cache_key, cache_error) = if options.use_cache {
            match self.cache.save(&records).await {
                Ok(entry) => (entry.map(|e| e.key), None),
                Err(e) => {
                    warn!("Failed to cache patch data: {}", e);
                    (None, Some(e.to_string()))
                }
            }
        } else {
            (None, None)
        };

        if !skipped.is_empty() {
            warn!("{} items skipped", skipped.len());
        }
        info!(
            "Fetched {} patch titles in {:.1}s",
            records.len(),
            started.elapsed().as_secs_f64()
        );

        Ok(FetchReport {
            records,
            skipped,
            duplicates,
            omitted,
            stats: executor.stats(),
            token_exchanges: self.tokens.exchange_count(),
            cache_key,
            cache_error,
            elapsed: started.elapsed(),
        })
    }

    /// Fetch mobile device OS versions and the matching SOFA releases
    pub async fn fetch_device_versions(&self) -> Result<DeviceReport> {
        let executor = self.executor(None)?;
        self.collect_ios(&executor).await
    }

    /// Most recent snapshot no older than `max_age`
    pub async fn load_cached(&self, max_age: Option<Duration>) -> Result<Option<CacheEntry>> {
        let latest = self.cache.load_latest().await?;
        let now = Utc::now();
        Ok(latest.filter(|entry| max_age.map_or(true, |max_age| entry.age_at(now) <= max_age)))
    }

    /// Every cached snapshot, newest first
    pub async fn list_cached(&self) -> Result<Vec<CacheEntry>> {
        Ok(self.cache.load_all().await?)
    }

    /// Delete every snapshot, returning how many were removed
    pub async fn reset_cache(&self) -> Result<usize> {
        Ok(self.cache.clear_all().await?)
    }

    /// Delete one stored credential, or all of them
    pub async fn reset_credentials(
        &self,
        which: Option<CredentialKey>,
    ) -> Result<Vec<CredentialKey>> {
        let removed = reset_credentials(self.credentials.as_ref(), which)?;
        self.tokens.invalidate().await;
        Ok(removed)
    }

    fn server_url(&self) -> Result<Url> {
        let raw = self
            .credentials
            .get(CredentialKey::Url)?
            .ok_or_else(|| AuthError::MissingCredential {
                key: CredentialKey::Url.to_string(),
            })?;
        Ok(normalize_server_url(&raw)?)
    }

    fn executor(&self, concurrency: Option<usize>) -> Result<FetchExecutor> {
        let mut fetch_config = self.config.fetch.clone();
        if let Some(concurrency) = concurrency {
            fetch_config = fetch_config.with_concurrency(concurrency);
        }
        fetch_config.validate()?;

        Ok(FetchExecutor::new(
            self.transport.clone(),
            self.tokens.clone(),
            self.server_url()?,
            fetch_config,
        )
        .with_cancellation(self.cancel.clone()))
    }

    async fn collect_ios(&self, executor: &FetchExecutor) -> Result<DeviceReport> {
        let listing = executor
            .fetch_paginated(
                Endpoint::api(jamf::MOBILE_DEVICES_PATH),
                executor.config().page_size,
            )
            .await?;
        let refs = aggregate::<DeviceRef>(&listing);

        let requests: Vec<FetchRequest> = refs
            .records
            .iter()
            .map(|device| FetchRequest::api(device.detail_path()))
            .collect();
        let details = aggregate::<DeviceDetailPayload>(&executor.fetch_all(requests).await?);
        info!("Obtained OS versions for {} devices", details.records.len());

        let feed_url = self.config.sofa_feed()?;
        let feed = executor
            .fetch_all(vec![FetchRequest::new(Endpoint::External(feed_url.clone()))])
            .await?;
        let releases = match feed.first() {
            Some(FetchOutcome::Success(response)) => {
                parse_sofa_feed(&response.body).map_err(|e| FetchError::UnexpectedPayload {
                    endpoint: feed_url.to_string(),
                    reason: e.to_string(),
                })?
            }
            Some(FetchOutcome::Failure(failure)) => {
                return Err(FetchError::ListingFailed {
                    endpoint: feed_url.to_string(),
                    reason: failure.kind.to_string(),
                }
                .into())
            }
            None => Vec::new(),
        };

        let titles = ios_patch_titles(&details.records, &releases);
        let mut skipped: Vec<SkippedItem> = refs.skipped;
        skipped.extend(details.skipped);

        Ok(DeviceReport {
            devices: details.records,
            releases,
            titles,
            skipped,
        })
    }
}

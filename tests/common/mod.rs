//! Shared test doubles for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use patcher::app::client::{HttpRequest, HttpResponse, Transport};
use patcher::app::{FetchConfig, FetchExecutor, TokenConfig, TokenManager};
use patcher::auth::MemoryStore;
use patcher::errors::{TransportError, TransportResult};
use url::Url;

pub const BASE_URL: &str = "https://jamf.example.com";

/// Scripted Jamf stand-in that counts what it sees
///
/// Every GET answers `{"id": "<last path segment>"}` after `latency` unless a
/// script entry says otherwise. Tokens are issued as `token-1`, `token-2`, ...
pub struct CountingTransport {
    pub latency: Duration,
    pub token_latency: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub exchanges: AtomicUsize,
    /// Token requests received, including those that timed out
    pub token_attempts: AtomicUsize,
    pub gets: AtomicUsize,
    /// Remaining timeouts per path
    timeouts: Mutex<HashMap<String, usize>>,
    /// Bodies served per path instead of the default
    bodies: Mutex<HashMap<String, String>>,
    /// Tokens the server no longer accepts
    rejected_tokens: Mutex<HashSet<String>>,
    /// Reject `token-1` once this many GETs were served
    pub expire_first_token_after: Option<usize>,
    pub always_unauthorized: AtomicBool,
}

impl CountingTransport {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            token_latency: Duration::from_millis(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            exchanges: AtomicUsize::new(0),
            token_attempts: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            timeouts: Mutex::new(HashMap::new()),
            bodies: Mutex::new(HashMap::new()),
            rejected_tokens: Mutex::new(HashSet::new()),
            expire_first_token_after: None,
            always_unauthorized: AtomicBool::new(false),
        }
    }

    pub fn with_token_latency(mut self, latency: Duration) -> Self {
        self.token_latency = latency;
        self
    }

    pub fn with_expiry_after(mut self, gets: usize) -> Self {
        self.expire_first_token_after = Some(gets);
        self
    }

    pub fn time_out(&self, path: &str, times: usize) {
        self.timeouts
            .lock()
            .unwrap()
            .insert(path.to_string(), times);
    }

    pub fn serve(&self, path: &str, body: impl Into<String>) {
        self.bodies
            .lock()
            .unwrap()
            .insert(path.to_string(), body.into());
    }

    pub fn reject_token(&self, token: &str) {
        self.rejected_tokens
            .lock()
            .unwrap()
            .insert(token.to_string());
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    fn take_timeout(&self, path: &str) -> bool {
        let mut timeouts = self.timeouts.lock().unwrap();
        match timeouts.get_mut(path) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn bearer(request: &HttpRequest) -> Option<String> {
        request
            .header("authorization")
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_string)
    }
}

#[async_trait]
impl Transport for CountingTransport {
    async fn send(&self, request: HttpRequest) -> TransportResult<HttpResponse> {
        let path = request.url.path().to_string();

        if path == "/api/oauth/token" {
            tokio::time::sleep(self.token_latency).await;
            self.token_attempts.fetch_add(1, Ordering::SeqCst);
            if self.take_timeout(&path) {
                return Err(TransportError::Timeout { seconds: 1 });
            }
            let n = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
            return Ok(HttpResponse::new(
                200,
                format!(r#"{{"access_token":"token-{}","expires_in":1800}}"#, n),
            ));
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let served = self.gets.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.expire_first_token_after {
            if served >= limit {
                self.reject_token("token-1");
            }
        }

        if self.take_timeout(&path) {
            return Err(TransportError::Timeout { seconds: 1 });
        }

        let token = Self::bearer(&request);
        if self.always_unauthorized.load(Ordering::SeqCst) {
            return Ok(HttpResponse::new(401, ""));
        }
        if let Some(token) = token {
            if self.rejected_tokens.lock().unwrap().contains(&token) {
                return Ok(HttpResponse::new(401, ""));
            }
        }

        if let Some(body) = self.bodies.lock().unwrap().get(&path) {
            return Ok(HttpResponse::new(200, body.clone()));
        }

        let id = path.rsplit('/').next().unwrap_or_default();
        Ok(HttpResponse::new(200, format!(r#"{{"id":"{}"}}"#, id)))
    }
}

pub fn store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_credentials(BASE_URL, "client", "secret"))
}

pub fn fast_retries() -> FetchConfig {
    FetchConfig::default().with_retry_delays(Duration::from_millis(1), Duration::from_millis(5))
}

/// Executor and token manager over `transport`
pub fn executor(
    transport: Arc<CountingTransport>,
    config: FetchConfig,
) -> (Arc<TokenManager>, FetchExecutor) {
    let tokens = Arc::new(TokenManager::new(
        transport.clone(),
        store(),
        TokenConfig::default().with_retries(
            3,
            Duration::from_millis(1),
            Duration::from_millis(5),
        ),
    ));
    let executor = FetchExecutor::new(
        transport,
        tokens.clone(),
        Url::parse(BASE_URL).unwrap(),
        config,
    );
    (tokens, executor)
}

//! Bearer token lifecycle
//!
//! The [`TokenManager`] owns the single live access token. It exchanges API
//! client credentials for a token on demand, reuses it while it is comfortably
//! inside its lifetime, and serialises refreshes so that concurrent callers
//! observing an expired token trigger exactly one exchange.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::endpoint_url;
use super::transport::{HttpRequest, Transport};
use crate::auth::{ClientCredentials, CredentialStore};
use crate::app::fetcher::BackoffCalculator;
use crate::constants::{auth, jamf, limits};
use crate::errors::{AuthError, AuthResult};

/// Token manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// A token is only reused while it outlives `now` by this margin
    pub safety_margin: Duration,
    /// Shortest acceptable issued lifetime
    pub min_lifetime: Duration,
    /// Fail the exchange when the issued lifetime is below `min_lifetime`
    pub reject_short_lifetime: bool,
    /// Total exchange attempts when the token endpoint is unreachable
    pub max_attempts: u32,
    /// Delay before the first exchange retry, doubled for each further retry
    pub retry_base_delay: Duration,
    /// Upper bound for the exchange retry delay
    pub retry_max_delay: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            safety_margin: auth::TOKEN_SAFETY_MARGIN,
            min_lifetime: auth::MIN_TOKEN_LIFETIME,
            reject_short_lifetime: true,
            max_attempts: limits::MAX_ATTEMPTS,
            retry_base_delay: limits::RETRY_BASE_DELAY,
            retry_max_delay: limits::RETRY_MAX_DELAY,
        }
    }
}

impl TokenConfig {
    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn with_min_lifetime(mut self, lifetime: Duration, reject: bool) -> Self {
        self.min_lifetime = lifetime;
        self.reject_short_lifetime = reject;
        self
    }

    pub fn with_retries(
        mut self,
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        self.max_attempts = max_attempts;
        self.retry_base_delay = base_delay;
        self.retry_max_delay = max_delay;
        self
    }

    /// Delay before exchange retry number `retry` (1-based)
    fn retry_delay(&self, retry: u32) -> Duration {
        let delay = BackoffCalculator::calculate_retry_delay(
            retry.saturating_sub(1),
            self.retry_base_delay,
            self.retry_max_delay,
            limits::RETRY_BACKOFF_MULTIPLIER,
        );
        BackoffCalculator::apply_jitter(delay, limits::BACKOFF_JITTER_FACTOR)
    }
}

/// A bearer token issued by the token endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
    generation: u64,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>, generation: u64) -> Self {
        Self {
            value: value.into(),
            expires_at,
            generation,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Sequence number of the exchange that issued this token
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the token can still be presented at `now` given `margin`
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or_else(|_| chrono::Duration::zero());
        now < self.expires_at - margin
    }

    /// First characters of the token, safe for debug output
    pub fn redacted(&self) -> String {
        let prefix: String = self.value.chars().take(8).collect();
        format!("{}...", prefix)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &self.redacted())
            .field("expires_at", &self.expires_at)
            .field("generation", &self.generation)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Default)]
struct TokenState {
    current: Option<AccessToken>,
    generation: u64,
}

/// Owner of the bearer token shared by all concurrent requests
pub struct TokenManager {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    config: TokenConfig,
    state: RwLock<TokenState>,
    refresh_lock: Mutex<()>,
    exchanges: AtomicU64,
}

impl TokenManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
        config: TokenConfig,
    ) -> Self {
        Self {
            transport,
            credentials,
            config,
            state: RwLock::new(TokenState::default()),
            refresh_lock: Mutex::new(()),
            exchanges: AtomicU64::new(0),
        }
    }

    /// Return a token that can be presented now, exchanging credentials if needed
    ///
    /// # Errors
    ///
    /// Returns `AuthError` if credentials are missing or the exchange fails
    pub async fn get_valid_token(&self) -> AuthResult<AccessToken> {
        let seen_generation = {
            let state = self.state.read().await;
            if let Some(token) = state
                .current
                .as_ref()
                .filter(|token| token.is_valid_at(Utc::now(), self.config.safety_margin))
            {
                return Ok(token.clone());
            }
            state.generation
        };

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        // A token issued after we started waiting is handed out even when its
        // lifetime is already inside the safety margin.
        {
            let state = self.state.read().await;
            if let Some(token) = state.current.as_ref() {
                if state.generation != seen_generation
                    || token.is_valid_at(Utc::now(), self.config.safety_margin)
                {
                    debug!("Reusing token refreshed by concurrent caller");
                    return Ok(token.clone());
                }
            }
        }

        self.exchange_with_retry().await
    }

    /// Mark the current token unusable regardless of its generation
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        if state.current.take().is_some() {
            debug!("Bearer token invalidated");
        }
    }

    /// Invalidate `token` only if it is still the live token
    ///
    /// Returns `true` if the live token was discarded.
    pub async fn invalidate_token(&self, token: &AccessToken) -> bool {
        let mut state = self.state.write().await;
        match &state.current {
            Some(current) if current.generation == token.generation => {
                state.current = None;
                debug!(generation = token.generation, "Bearer token invalidated");
                true
            }
            _ => false,
        }
    }

    /// Number of credential exchanges performed so far
    pub fn exchange_count(&self) -> u64 {
        self.exchanges.load(Ordering::Relaxed)
    }

    /// Exchange credentials, retrying while the token endpoint is unreachable
    async fn exchange_with_retry(&self) -> AuthResult<AccessToken> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.exchange().await {
                Err(AuthError::Transport(error))
                    if error.is_transient() && attempt < max_attempts =>
                {
                    let delay = self.config.retry_delay(attempt);
                    warn!(
                        "Token request failed ({}), retrying in {:?} (attempt {}/{})",
                        error, delay, attempt, max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn exchange(&self) -> AuthResult<AccessToken> {
        let credentials = ClientCredentials::load(self.credentials.as_ref())?;
        let url = endpoint_url(&credentials.base_url, jamf::TOKEN_PATH).map_err(|e| {
            AuthError::InvalidUrl {
                url: credentials.base_url.to_string(),
                error: e.to_string(),
            }
        })?;

        let request = HttpRequest::post_form(
            url,
            vec![
                ("grant_type".to_string(), "client_credentials".to_string()),
                ("client_id".to_string(), credentials.client_id.clone()),
                ("client_secret".to_string(), credentials.client_secret.clone()),
            ],
        );
        drop(credentials);

        self.exchanges.fetch_add(1, Ordering::Relaxed);
        debug!("Requesting bearer token");
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(AuthError::ExchangeRejected {
                status: response.status,
            });
        }

        let payload: TokenPayload =
            serde_json::from_slice(&response.body).map_err(|e| AuthError::MalformedToken {
                reason: e.to_string(),
            })?;
        let value = payload
            .access_token
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AuthError::MalformedToken {
                reason: "missing access_token".to_string(),
            })?;
        let lifetime = match payload.expires_in {
            Some(seconds) if seconds > 0 => seconds,
            other => {
                return Err(AuthError::MalformedToken {
                    reason: format!("invalid expires_in: {:?}", other),
                })
            }
        };

        self.check_lifetime(lifetime)?;
        if lifetime.unsigned_abs() <= self.config.safety_margin.as_secs() {
            warn!(
                "Bearer token lifetime of {}s is within the {}s safety margin. Every request will refresh it",
                lifetime,
                self.config.safety_margin.as_secs()
            );
        }

        let mut state = self.state.write().await;
        state.generation += 1;
        let token = AccessToken::new(
            value,
            Utc::now() + chrono::Duration::seconds(lifetime),
            state.generation,
        );
        state.current = Some(token.clone());

        info!("Obtained bearer token (expires in {}s)", lifetime);
        debug!(token = %token.redacted(), generation = token.generation, "Token issued");
        Ok(token)
    }

    fn check_lifetime(&self, seconds: i64) -> AuthResult<()> {
        let seconds_u = seconds.unsigned_abs();
        let minimum = self.config.min_lifetime.as_secs();

        if seconds_u < minimum {
            if self.config.reject_short_lifetime {
                return Err(AuthError::TokenLifetimeTooShort { seconds, minimum });
            }
            warn!(
                "Bearer token lifetime is {}s, below the {}s minimum. Requests may fail mid-run",
                seconds, minimum
            );
        } else if seconds_u < auth::RECOMMENDED_TOKEN_LIFETIME.as_secs() {
            warn!(
                "Bearer token lifetime is {}s. Consider increasing the API client's token lifetime to at least {}s",
                seconds,
                auth::RECOMMENDED_TOKEN_LIFETIME.as_secs()
            );
        }
        Ok(())
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("config", &self.config)
            .field("exchanges", &self.exchange_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::client::transport::HttpResponse;
    use crate::auth::MemoryStore;
    use crate::errors::{TransportError, TransportResult};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Token endpoint stand-in that numbers every issued token
    struct TokenEndpoint {
        status: u16,
        expires_in: i64,
        delay: Duration,
        calls: AtomicUsize,
        /// Leading calls that time out
        timeouts: usize,
        failure: Option<TransportError>,
    }

    impl TokenEndpoint {
        fn issuing(expires_in: i64) -> Self {
            Self {
                status: 200,
                expires_in,
                delay: Duration::from_millis(0),
                calls: AtomicUsize::new(0),
                timeouts: 0,
                failure: None,
            }
        }
    }

    #[async_trait]
    impl Transport for TokenEndpoint {
        async fn send(&self, request: HttpRequest) -> TransportResult<HttpResponse> {
            assert!(request.url.path().ends_with("/api/oauth/token"));
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if n <= self.timeouts {
                return Err(TransportError::Timeout { seconds: 1 });
            }
            if let Some(error) = &self.failure {
                return Err(error.clone());
            }
            let body = format!(
                r#"{{"access_token":"token-{}","expires_in":{}}}"#,
                n, self.expires_in
            );
            Ok(HttpResponse::new(self.status, body))
        }
    }

    fn manager(endpoint: TokenEndpoint, config: TokenConfig) -> TokenManager {
        let store = MemoryStore::with_credentials("https://jamf.example.com", "id", "secret");
        TokenManager::new(Arc::new(endpoint), Arc::new(store), config)
    }

    #[test]
    fn test_validity_respects_margin() {
        let now = Utc::now();
        let token = AccessToken::new("abc", now + chrono::Duration::seconds(90), 1);
        assert!(token.is_valid_at(now, Duration::from_secs(60)));
        assert!(!token.is_valid_at(now + chrono::Duration::seconds(31), Duration::from_secs(60)));
        assert!(!token.is_valid_at(now, Duration::from_secs(120)));
    }

    #[test]
    fn test_debug_redacts_token() {
        let token = AccessToken::new("0123456789abcdefghij", Utc::now(), 1);
        let rendered = format!("{:?}", token);
        assert!(rendered.contains("01234567..."));
        assert!(!rendered.contains("abcdefghij"));
    }

    #[tokio::test]
    async fn test_token_reused_while_valid() {
        let manager = manager(TokenEndpoint::issuing(1800), TokenConfig::default());

        let first = manager.get_valid_token().await.unwrap();
        let second = manager.get_valid_token().await.unwrap();

        assert_eq!(first.value(), "token-1");
        assert_eq!(first, second);
        assert_eq!(manager.exchange_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_exchange() {
        let mut endpoint = TokenEndpoint::issuing(1800);
        endpoint.delay = Duration::from_millis(50);
        let manager = manager(endpoint, TokenConfig::default());

        let results =
            futures::future::join_all((0..10).map(|_| manager.get_valid_token())).await;

        assert_eq!(manager.exchange_count(), 1);
        for result in results {
            assert_eq!(result.unwrap().value(), "token-1");
        }
    }

    #[tokio::test]
    async fn test_token_inside_margin_is_refreshed() {
        let config = TokenConfig::default()
            .with_safety_margin(Duration::from_secs(3600))
            .with_min_lifetime(Duration::from_secs(0), false);
        let manager = manager(TokenEndpoint::issuing(1800), config);

        assert_eq!(manager.get_valid_token().await.unwrap().value(), "token-1");
        assert_eq!(manager.get_valid_token().await.unwrap().value(), "token-2");
        assert_eq!(manager.exchange_count(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let manager = manager(TokenEndpoint::issuing(1800), TokenConfig::default());

        manager.get_valid_token().await.unwrap();
        manager.invalidate().await;
        let refreshed = manager.get_valid_token().await.unwrap();

        assert_eq!(refreshed.value(), "token-2");
        assert_eq!(refreshed.generation(), 2);
        assert_eq!(manager.exchange_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_invalidation_is_ignored() {
        let manager = manager(TokenEndpoint::issuing(1800), TokenConfig::default());

        let stale = manager.get_valid_token().await.unwrap();
        assert!(manager.invalidate_token(&stale).await);
        let fresh = manager.get_valid_token().await.unwrap();

        // A late 401 for the old token must not discard the new one
        assert!(!manager.invalidate_token(&stale).await);
        assert_eq!(manager.get_valid_token().await.unwrap(), fresh);
        assert_eq!(manager.exchange_count(), 2);
    }

    #[tokio::test]
    async fn test_rejected_exchange() {
        let mut endpoint = TokenEndpoint::issuing(1800);
        endpoint.status = 401;
        let manager = manager(endpoint, TokenConfig::default());

        match manager.get_valid_token().await {
            Err(AuthError::ExchangeRejected { status }) => assert_eq!(status, 401),
            other => panic!("Expected ExchangeRejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_positive_lifetime_is_malformed() {
        let manager = manager(TokenEndpoint::issuing(0), TokenConfig::default());
        assert!(matches!(
            manager.get_valid_token().await,
            Err(AuthError::MalformedToken { .. })
        ));
    }

    #[tokio::test]
    async fn test_short_lifetime_rejected_by_default() {
        let manager = manager(TokenEndpoint::issuing(120), TokenConfig::default());
        match manager.get_valid_token().await {
            Err(AuthError::TokenLifetimeTooShort { seconds, minimum }) => {
                assert_eq!(seconds, 120);
                assert_eq!(minimum, 300);
            }
            other => panic!("Expected TokenLifetimeTooShort, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_short_lifetime_allowed_when_configured() {
        let config = TokenConfig::default().with_min_lifetime(auth::MIN_TOKEN_LIFETIME, false);
        let manager = manager(TokenEndpoint::issuing(120), config);
        assert!(manager.get_valid_token().await.is_ok());
    }

    fn fast_retries() -> TokenConfig {
        TokenConfig::default().with_retries(3, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_timed_out_exchange_is_retried() {
        let mut endpoint = TokenEndpoint::issuing(1800);
        endpoint.timeouts = 1;
        let manager = manager(endpoint, fast_retries());

        let token = manager.get_valid_token().await.unwrap();

        assert_eq!(token.value(), "token-2");
        assert_eq!(token.generation(), 1);
        assert_eq!(manager.exchange_count(), 2);
    }

    #[tokio::test]
    async fn test_exchange_retry_budget_exhausted() {
        let mut endpoint = TokenEndpoint::issuing(1800);
        endpoint.timeouts = 10;
        let manager = manager(endpoint, fast_retries());

        assert!(matches!(
            manager.get_valid_token().await,
            Err(AuthError::Transport(TransportError::Timeout { .. }))
        ));
        assert_eq!(manager.exchange_count(), 3);
    }

    #[tokio::test]
    async fn test_non_transient_exchange_failure_not_retried() {
        let mut endpoint = TokenEndpoint::issuing(1800);
        endpoint.failure = Some(TransportError::Request("bad certificate".to_string()));
        let manager = manager(endpoint, fast_retries());

        assert!(matches!(
            manager.get_valid_token().await,
            Err(AuthError::Transport(TransportError::Request(_)))
        ));
        assert_eq!(manager.exchange_count(), 1);
    }

    #[tokio::test]
    async fn test_lifetime_inside_margin_still_single_flight() {
        let mut endpoint = TokenEndpoint::issuing(30);
        endpoint.delay = Duration::from_millis(50);
        let config = TokenConfig::default().with_min_lifetime(Duration::from_secs(0), false);
        let manager = manager(endpoint, config);

        let results =
            futures::future::join_all((0..10).map(|_| manager.get_valid_token())).await;

        assert_eq!(manager.exchange_count(), 1);
        for result in results {
            assert_eq!(result.unwrap().value(), "token-1");
        }
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let manager = TokenManager::new(
            Arc::new(TokenEndpoint::issuing(1800)),
            Arc::new(MemoryStore::new()),
            TokenConfig::default(),
        );
        assert!(matches!(
            manager.get_valid_token().await,
            Err(AuthError::MissingCredential { .. })
        ));
        assert_eq!(manager.exchange_count(), 0);
    }
}

//! Gamma-exposure data provider client.
//!
//! Every network call goes through the shared [`GatewayState`]: the response
//! cache is consulted first (a hit never touches the limiter), concurrent
//! callers for the same key are collapsed by a single-flight gate, and the
//! shared limiter spaces requests and enforces the circuit breaker.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use gex_core::GatewayConfig;
//! use gex_gateway::{DataGateway, GatewayState};
//!
//! let config = GatewayConfig::default();
//! let state = Arc::new(GatewayState::new(&config));
//! let gateway = DataGateway::new(config, state)?;
//! let snapshot = gateway.fetch("SPY").await?;
//! println!("{} strikes around {}", snapshot.strikes.len(), snapshot.spot);
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use gex_core::{ExposureSnapshot, ExposureSource, ExposureSummary, GatewayConfig};
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CachedResponse, Endpoint, ResponseCache};
use crate::error::{excerpt, GatewayError, Result};
use crate::limiter::{LimiterConfig, LimiterState, SharedLimiter, WaitMode};
use crate::payload::{is_rate_limit_response, parse_snapshot, parse_summary};

/// Longest accepted symbol.
pub const MAX_SYMBOL_LEN: usize = 16;

/// Header carrying the provider API key.
pub const API_KEY_HEADER: &str = "X-Api-Key";

// =============================================================================
// Shared state
// =============================================================================

/// Limiter, circuit breaker and cache shared by every gateway instance.
///
/// Construct once per process and hand an `Arc` to each [`DataGateway`].
#[derive(Debug)]
pub struct GatewayState {
    pub limiter: SharedLimiter,
    pub cache: ResponseCache,
}

impl GatewayState {
    #[must_use]
    pub fn new(config: &GatewayConfig) -> Self {
        Self::with_parts(
            LimiterConfig::from(config),
            Duration::from_secs(config.cache_ttl_secs),
        )
    }

    #[must_use]
    pub fn with_parts(limiter: LimiterConfig, cache_ttl: Duration) -> Self {
        Self {
            limiter: SharedLimiter::new(limiter),
            cache: ResponseCache::new(cache_ttl),
        }
    }
}

// =============================================================================
// Retry policy
// =============================================================================

/// Caller-supplied retry policy for [`DataGateway::fetch_with_retry`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub base_delay: Duration,
    /// Errors whose known delay exceeds this are returned instead of retried.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Builder method to set the attempt count.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Builder method to set the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Builder method to set the longest delay worth waiting for.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay)
    }
}

// =============================================================================
// Client
// =============================================================================

/// Resilient client to the exposure-data provider.
#[derive(Clone)]
pub struct DataGateway {
    config: GatewayConfig,
    http: Client,
    state: Arc<GatewayState>,
}

impl std::fmt::Debug for DataGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataGateway")
            .field("base_url", &self.config.base_url)
            .field("has_api_key", &self.config.api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl DataGateway {
    /// Creates a gateway sharing `state` with every other instance.
    ///
    /// # Errors
    /// Returns `Configuration` if the HTTP client cannot be built.
    pub fn new(config: GatewayConfig, state: Arc<GatewayState>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http,
            state,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    #[must_use]
    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    /// Fetches the per-strike snapshot, waiting on the limiter if needed.
    ///
    /// # Errors
    /// Any [`GatewayError`]; waits beyond `max_wait_secs` fail with
    /// `RateLimited` or `CircuitOpen`.
    pub async fn fetch(&self, symbol: &str) -> Result<ExposureSnapshot> {
        match self.request(Endpoint::Strikes, symbol, WaitMode::Blocking).await? {
            CachedResponse::Snapshot(snapshot) => Ok(snapshot),
            CachedResponse::Summary(_) => Err(unexpected_variant(Endpoint::Strikes)),
        }
    }

    /// Non-blocking variant of [`fetch`](Self::fetch): fails immediately
    /// instead of waiting on the limiter or an open circuit.
    ///
    /// # Errors
    /// Any [`GatewayError`].
    pub async fn try_fetch(&self, symbol: &str) -> Result<ExposureSnapshot> {
        match self
            .request(Endpoint::Strikes, symbol, WaitMode::NonBlocking)
            .await?
        {
            CachedResponse::Snapshot(snapshot) => Ok(snapshot),
            CachedResponse::Summary(_) => Err(unexpected_variant(Endpoint::Strikes)),
        }
    }

    /// Fetches the aggregate summary (spot, net exposure, flip price).
    ///
    /// # Errors
    /// Any [`GatewayError`].
    pub async fn fetch_summary(&self, symbol: &str) -> Result<ExposureSummary> {
        match self.request(Endpoint::Summary, symbol, WaitMode::Blocking).await? {
            CachedResponse::Summary(summary) => Ok(summary),
            CachedResponse::Snapshot(_) => Err(unexpected_variant(Endpoint::Summary)),
        }
    }

    /// Fetches the snapshot, retrying retryable errors per `policy`.
    ///
    /// A `RateLimited`/`CircuitOpen` error's own delay is honoured when it is
    /// longer than the policy backoff.
    ///
    /// # Errors
    /// The last error once attempts are exhausted, or immediately for
    /// non-retryable errors.
    pub async fn fetch_with_retry(
        &self,
        symbol: &str,
        policy: &RetryPolicy,
    ) -> Result<ExposureSnapshot> {
        let mut attempt = 1;
        loop {
            match self.fetch(symbol).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) if !e.is_retryable() || attempt >= policy.max_attempts => return Err(e),
                Err(e) => {
                    let backoff = policy.backoff(attempt);
                    let delay = e.retry_delay().map_or(backoff, |d| d.max(backoff));
                    if delay > policy.max_delay {
                        warn!(symbol, ?delay, error = %e, "Retry delay exceeds policy, giving up");
                        return Err(e);
                    }
                    warn!(
                        symbol,
                        attempt,
                        max_attempts = policy.max_attempts,
                        ?delay,
                        error = %e,
                        "Fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Copy of the shared limiter and circuit-breaker fields.
    pub async fn limiter_snapshot(&self) -> LimiterState {
        self.state.limiter.snapshot().await
    }

    /// Drops cached responses for `symbol`.
    pub fn invalidate(&self, symbol: &str) -> usize {
        let symbol = symbol.to_ascii_uppercase();
        self.state.cache.invalidate(&symbol)
    }

    async fn request(
        &self,
        endpoint: Endpoint,
        symbol: &str,
        mode: WaitMode,
    ) -> Result<CachedResponse> {
        let symbol = validate_symbol(symbol)?;
        let key = CacheKey::new(endpoint, symbol.clone());

        if let Some(hit) = self.state.cache.get(&key) {
            debug!(symbol = %symbol, endpoint = endpoint.path(), "Cache hit");
            return Ok(hit);
        }

        let gate = self.state.cache.gate(&key);
        let result = {
            let _flight = gate.lock().await;
            self.request_uncached(endpoint, &symbol, key.clone(), mode).await
        };
        self.state.cache.release_gate(&key, gate);
        result
    }

    async fn request_uncached(
        &self,
        endpoint: Endpoint,
        symbol: &str,
        key: CacheKey,
        mode: WaitMode,
    ) -> Result<CachedResponse> {
        // A concurrent caller may have filled the cache while we queued
        if let Some(hit) = self.state.cache.get(&key) {
            debug!(symbol = %symbol, endpoint = endpoint.path(), "Cache hit after single-flight wait");
            return Ok(hit);
        }
        debug!(symbol = %symbol, endpoint = endpoint.path(), "Cache miss");

        self.state.limiter.acquire(symbol, mode).await?;

        let url = format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            symbol,
            endpoint.path()
        );
        let mut request = self.http.get(&url);
        if let Some(api_key) = &self.config.api_key {
            request = request.header(API_KEY_HEADER, api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        let received_at = Utc::now();

        if is_rate_limit_response(status.as_u16(), &body) {
            let retry_after = self.state.limiter.record_rate_limited().await;
            return Err(GatewayError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            return Err(GatewayError::ProviderUnavailable(format!(
                "{status}: {}",
                excerpt(&body)
            )));
        }
        if !status.is_success() {
            return Err(GatewayError::RequestRejected {
                status: status.as_u16(),
                message: excerpt(&body),
            });
        }

        let parsed = match endpoint {
            Endpoint::Strikes => parse_snapshot(symbol, &body, received_at).map(CachedResponse::Snapshot),
            Endpoint::Summary => parse_summary(symbol, &body, received_at).map(CachedResponse::Summary),
        };
        let value = match parsed {
            Ok(value) => value,
            Err(e) => {
                warn!(symbol = %symbol, endpoint = endpoint.path(), error = %e, payload = %excerpt(&body), "Malformed provider response");
                return Err(e);
            }
        };

        self.state.limiter.record_success().await;
        self.state.cache.insert(key, value.clone());
        info!(symbol = %symbol, endpoint = endpoint.path(), "Fetched exposure data");
        Ok(value)
    }
}

#[async_trait]
impl ExposureSource for DataGateway {
    async fn fetch_snapshot(&self, symbol: &str) -> anyhow::Result<ExposureSnapshot> {
        Ok(self.fetch(symbol).await?)
    }
}

/// Validates and normalizes a symbol before it is placed in a URL path.
///
/// # Errors
/// Returns `InvalidSymbol` for empty, overlong, or path-unsafe symbols.
pub fn validate_symbol(symbol: &str) -> Result<String> {
    let trimmed = symbol.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::InvalidSymbol("symbol cannot be empty".to_string()));
    }
    if trimmed.len() > MAX_SYMBOL_LEN {
        return Err(GatewayError::InvalidSymbol(format!(
            "symbol exceeds {MAX_SYMBOL_LEN} characters: {trimmed}"
        )));
    }
    if trimmed.contains("..")
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '^'))
    {
        return Err(GatewayError::InvalidSymbol(format!(
            "symbol contains forbidden characters: {trimmed}"
        )));
    }
    if !trimmed.chars().any(|c| c.is_ascii_alphanumeric()) {
        return Err(GatewayError::InvalidSymbol(format!(
            "symbol has no alphanumeric characters: {trimmed}"
        )));
    }
    Ok(trimmed.to_ascii_uppercase())
}

fn unexpected_variant(endpoint: Endpoint) -> GatewayError {
    GatewayError::malformed(
        format!("cached value has wrong shape for {} endpoint", endpoint.path()),
        "",
    )
}

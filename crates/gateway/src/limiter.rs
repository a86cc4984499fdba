//! Process-wide request limiter and circuit breaker for the data provider.
//!
//! One `SharedLimiter` is constructed per process and shared by every gateway
//! instance. All read-modify-write of the limiter fields happens under a
//! single async mutex, which is held across the limiter's own bounded sleeps
//! so concurrent callers cannot race past the minimum interval. Queueing on
//! that mutex is charged to the caller's `max_wait`.
//!
//! Three independent budgets apply to every network request:
//! - a minimum interval between any two requests
//! - a global per-minute call budget
//! - a per-symbol per-minute quota (keyed `governor` limiter)
//!
//! After the provider reports its rate limit the circuit opens for the next
//! rung of the backoff ladder; no request is issued before it reopens.

use std::num::NonZeroU32;
use std::time::Duration;

use gex_core::GatewayConfig;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};

const MINUTE: Duration = Duration::from_secs(60);

// =============================================================================
// Configuration
// =============================================================================

/// Limiter and breaker policy.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    pub min_interval: Duration,
    /// Delays after 1, 2, 3... consecutive rate-limit responses; the last rung repeats.
    pub backoff_ladder: Vec<Duration>,
    pub max_calls_per_minute: u32,
    pub per_symbol_per_minute: NonZeroU32,
    /// Longest a blocking caller will wait in total before failing.
    pub max_wait: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

impl From<&GatewayConfig> for LimiterConfig {
    fn from(config: &GatewayConfig) -> Self {
        let mut ladder: Vec<Duration> = config
            .backoff_ladder_secs
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect();
        if ladder.is_empty() {
            ladder.push(Duration::from_secs(60));
        }
        Self {
            min_interval: Duration::from_secs(config.min_interval_secs),
            backoff_ladder: ladder,
            max_calls_per_minute: config.max_calls_per_minute.max(1),
            per_symbol_per_minute: NonZeroU32::new(config.per_symbol_calls_per_minute)
                .unwrap_or(NonZeroU32::MIN),
            max_wait: Duration::from_secs(config.max_wait_secs),
        }
    }
}

impl LimiterConfig {
    /// Builder method to set the minimum request interval.
    #[must_use]
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Builder method to set the backoff ladder.
    #[must_use]
    pub fn with_backoff_ladder(mut self, ladder: Vec<Duration>) -> Self {
        if !ladder.is_empty() {
            self.backoff_ladder = ladder;
        }
        self
    }

    /// Builder method to set the global per-minute budget.
    #[must_use]
    pub fn with_max_calls_per_minute(mut self, calls: u32) -> Self {
        self.max_calls_per_minute = calls.max(1);
        self
    }

    /// Builder method to set the per-symbol quota.
    #[must_use]
    pub fn with_per_symbol_per_minute(mut self, calls: NonZeroU32) -> Self {
        self.per_symbol_per_minute = calls;
        self
    }

    /// Builder method to set the maximum wait.
    #[must_use]
    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = wait;
        self
    }

    /// Backoff delay after `consecutive` rate-limit responses (1-based).
    #[must_use]
    pub fn backoff_for(&self, consecutive: u32) -> Duration {
        let idx = (consecutive.max(1) as usize - 1).min(self.backoff_ladder.len() - 1);
        self.backoff_ladder[idx]
    }
}

// =============================================================================
// State
// =============================================================================

/// Shared rate-limiter and circuit-breaker fields.
#[derive(Debug, Clone, Default)]
pub struct LimiterState {
    pub last_request_time: Option<Instant>,
    pub window_start: Option<Instant>,
    pub calls_this_minute: u32,
    pub circuit_open: bool,
    pub circuit_reopen_time: Option<Instant>,
    pub consecutive_error_count: u32,
}

/// How a caller treats limiter waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Sleep up to the configured `max_wait`.
    Blocking,
    /// Fail immediately if any wait would be needed.
    NonBlocking,
}

/// Tracks the caller's remaining wait allowance across limiter stages.
struct WaitBudget {
    mode: WaitMode,
    remaining: Duration,
}

impl WaitBudget {
    fn spend(&mut self, wait: Duration) -> bool {
        if self.mode == WaitMode::NonBlocking || wait > self.remaining {
            return false;
        }
        self.remaining -= wait;
        true
    }
}

// =============================================================================
// Shared limiter
// =============================================================================

/// Process-wide limiter shared by all gateway instances.
pub struct SharedLimiter {
    config: LimiterConfig,
    state: Mutex<LimiterState>,
    per_symbol: DefaultKeyedRateLimiter<String>,
}

impl std::fmt::Debug for SharedLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SharedLimiter {
    #[must_use]
    pub fn new(config: LimiterConfig) -> Self {
        let per_symbol = RateLimiter::keyed(Quota::per_minute(config.per_symbol_per_minute));
        Self {
            config,
            state: Mutex::new(LimiterState::default()),
            per_symbol,
        }
    }

    #[must_use]
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Waits until a request for `symbol` may be issued and records it.
    ///
    /// Time spent queued behind other callers counts against `max_wait`.
    /// The per-symbol quota is only charged once every shared gate passes.
    ///
    /// # Errors
    ///
    /// - `CircuitOpen` if the breaker is open and the wait is not allowed
    /// - `RateLimited` if a queue, interval, window, or quota wait is not allowed
    pub async fn acquire(&self, symbol: &str, mode: WaitMode) -> Result<()> {
        let started = Instant::now();
        let queued = match mode {
            WaitMode::Blocking => tokio::time::timeout(self.config.max_wait, self.state.lock())
                .await
                .ok(),
            WaitMode::NonBlocking => self.state.try_lock().ok(),
        };
        let Some(mut state) = queued else {
            debug!(symbol, waited = ?started.elapsed(), "Gave up queueing for the limiter");
            return Err(GatewayError::RateLimited {
                retry_after: self.config.min_interval,
            });
        };

        let mut budget = WaitBudget {
            mode,
            remaining: self.config.max_wait.saturating_sub(started.elapsed()),
        };

        // Circuit breaker
        if state.circuit_open {
            if let Some(reopen) = state.circuit_reopen_time {
                let now = Instant::now();
                if now < reopen {
                    let wait = reopen - now;
                    if !budget.spend(wait) {
                        return Err(GatewayError::CircuitOpen { reopen_in: wait });
                    }
                    debug!(?wait, "Waiting for circuit to reopen");
                    tokio::time::sleep_until(reopen).await;
                }
            }
            state.circuit_open = false;
            info!(
                consecutive_errors = state.consecutive_error_count,
                "Circuit half-open, allowing probe request"
            );
        }

        // Global per-minute window
        let now = Instant::now();
        match state.window_start {
            Some(start) if now.duration_since(start) < MINUTE => {}
            _ => {
                state.window_start = Some(now);
                state.calls_this_minute = 0;
            }
        }
        if state.calls_this_minute >= self.config.max_calls_per_minute {
            let window_end = state.window_start.unwrap_or(now) + MINUTE;
            let wait = window_end.saturating_duration_since(now);
            if !budget.spend(wait) {
                return Err(GatewayError::RateLimited { retry_after: wait });
            }
            debug!(?wait, "Per-minute budget exhausted, waiting for next window");
            tokio::time::sleep_until(window_end).await;
            state.window_start = Some(Instant::now());
            state.calls_this_minute = 0;
        }

        // Minimum interval
        if let Some(last) = state.last_request_time {
            let elapsed = Instant::now().duration_since(last);
            if elapsed < self.config.min_interval {
                let wait = self.config.min_interval - elapsed;
                if !budget.spend(wait) {
                    return Err(GatewayError::RateLimited { retry_after: wait });
                }
                debug!(?wait, "Waiting for minimum request interval");
                tokio::time::sleep(wait).await;
            }
        }

        self.acquire_symbol_quota(symbol, &mut budget).await?;

        state.last_request_time = Some(Instant::now());
        state.calls_this_minute += 1;
        Ok(())
    }

    /// A failed `check_key` does not consume a token.
    async fn acquire_symbol_quota(&self, symbol: &str, budget: &mut WaitBudget) -> Result<()> {
        let key = symbol.to_string();
        loop {
            match self.per_symbol.check_key(&key) {
                Ok(()) => return Ok(()),
                Err(not_until) => {
                    let wait = not_until.wait_time_from(DefaultClock::default().now());
                    if !budget.spend(wait) {
                        return Err(GatewayError::RateLimited { retry_after: wait });
                    }
                    debug!(symbol, ?wait, "Per-symbol quota exhausted, waiting");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Records a provider rate-limit response and opens the circuit.
    ///
    /// Returns the backoff delay applied.
    pub async fn record_rate_limited(&self) -> Duration {
        let mut state = self.state.lock().await;
        state.consecutive_error_count += 1;
        let delay = self.config.backoff_for(state.consecutive_error_count);
        state.circuit_open = true;
        state.circuit_reopen_time = Some(Instant::now() + delay);
        warn!(
            consecutive_errors = state.consecutive_error_count,
            ?delay,
            "Provider rate limit hit, circuit opened"
        );
        delay
    }

    /// Records a successfully parsed response, closing the circuit.
    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        if state.consecutive_error_count > 0 {
            debug!(
                previous_errors = state.consecutive_error_count,
                "Provider recovered, resetting error streak"
            );
        }
        state.consecutive_error_count = 0;
        state.circuit_open = false;
        state.circuit_reopen_time = None;
    }

    /// Returns a copy of the current state.
    pub async fn snapshot(&self) -> LimiterState {
        self.state.lock().await.clone()
    }
}

// =============================================================================
// Tests
// =============================================================================

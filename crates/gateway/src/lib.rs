//! Resilient client for the external gamma-exposure data provider.
//!
//! This crate provides:
//! - `DataGateway`: fetches per-strike snapshots and summaries
//! - `GatewayState`: the process-wide limiter, circuit breaker and cache
//! - `GatewayError`: retryable vs non-retryable failure taxonomy
//!
//! No other crate in the workspace talks to the network directly.

pub mod cache;
pub mod client;
pub mod error;
pub mod limiter;
pub mod payload;

pub use cache::{CacheKey, CachedResponse, Endpoint, ResponseCache};
pub use client::{validate_symbol, DataGateway, GatewayState, RetryPolicy, API_KEY_HEADER};
pub use error::{GatewayError, Result};
pub use limiter::{LimiterConfig, LimiterState, SharedLimiter, WaitMode};

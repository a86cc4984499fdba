//! Time-boxed response cache keyed by (endpoint, symbol).
//!
//! The cache also owns the per-key single-flight gates: concurrent callers
//! for the same key queue on one gate, and whoever goes second finds the
//! first caller's response already cached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gex_core::{ExposureSnapshot, ExposureSummary};
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

/// Provider endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Summary,
    Strikes,
}

impl Endpoint {
    /// Path segment appended after the symbol.
    #[must_use]
    pub fn path(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Strikes => "strikes",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub endpoint: Endpoint,
    pub symbol: String,
}

impl CacheKey {
    pub fn new(endpoint: Endpoint, symbol: impl Into<String>) -> Self {
        Self {
            endpoint,
            symbol: symbol.into(),
        }
    }
}

/// A parsed provider response.
#[derive(Debug, Clone)]
pub enum CachedResponse {
    Summary(ExposureSummary),
    Snapshot(ExposureSnapshot),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    stored_at: Instant,
    value: CachedResponse,
}

/// TTL cache plus single-flight gates.
#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    gates: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ResponseCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns a fresh entry, if one exists.
    pub fn get(&self, key: &CacheKey) -> Option<CachedResponse> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone())
    }

    pub fn insert(&self, key: CacheKey, value: CachedResponse) {
        self.entries.write().insert(
            key,
            CacheEntry {
                stored_at: Instant::now(),
                value,
            },
        );
    }

    /// Drops every cached entry for `symbol`. Returns how many were removed.
    pub fn invalidate(&self, symbol: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| key.symbol != symbol);
        before - entries.len()
    }

    /// Drops expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns the single-flight gate for `key`, creating it on first use.
    pub fn gate(&self, key: &CacheKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock();
        Arc::clone(gates.entry(key.clone()).or_default())
    }

    /// Hands back a gate from [`gate`](Self::gate). The entry is dropped once
    /// no other caller holds or waits on it.
    pub fn release_gate(&self, key: &CacheKey, gate: Arc<tokio::sync::Mutex<()>>) {
        let mut gates = self.gates.lock();
        if Arc::strong_count(&gate) == 2 {
            gates.remove(key);
        }
    }

    pub fn gate_count(&self) -> usize {
        self.gates.lock().len()
    }
}

//! Exposure snapshots as delivered by the data provider, and the key levels
//! derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standard US equity option contract multiplier.
pub const CONTRACT_MULTIPLIER: f64 = 100.0;

/// Gamma and open interest for a single strike.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrikeData {
    pub strike: f64,
    pub call_gamma: f64,
    pub put_gamma: f64,
    pub open_interest: f64,
}

impl StrikeData {
    #[must_use]
    pub fn new(strike: f64, call_gamma: f64, put_gamma: f64, open_interest: f64) -> Self {
        Self {
            strike,
            call_gamma,
            put_gamma,
            open_interest,
        }
    }
}

/// Per-strike option data for one underlying at one point in time.
///
/// Immutable once produced; one per gateway fetch (live or cached).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureSnapshot {
    pub symbol: String,
    pub spot: f64,
    pub strikes: Vec<StrikeData>,
    pub collected_at: DateTime<Utc>,
}

impl ExposureSnapshot {
    #[must_use]
    pub fn new(symbol: impl Into<String>, spot: f64, strikes: Vec<StrikeData>) -> Self {
        Self {
            symbol: symbol.into(),
            spot,
            strikes,
            collected_at: Utc::now(),
        }
    }

    /// Replaces the collection timestamp (useful for reproducible fixtures).
    #[must_use]
    pub fn collected_at(mut self, at: DateTime<Utc>) -> Self {
        self.collected_at = at;
        self
    }
}

/// Aggregate figures from the provider's summary endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureSummary {
    pub symbol: String,
    pub spot: f64,
    pub net_exposure: f64,
    pub flip_price: Option<f64>,
    pub collected_at: DateTime<Utc>,
}

/// Kind of key level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelType {
    CallWall,
    PutWall,
    GammaFlip,
}

impl std::fmt::Display for LevelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CallWall => write!(f, "call_wall"),
            Self::PutWall => write!(f, "put_wall"),
            Self::GammaFlip => write!(f, "gamma_flip"),
        }
    }
}

/// A support/resistance level derived from an exposure snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureLevel {
    pub strike: f64,
    /// Signed exposure at the strike (puts negative).
    pub signed_exposure: f64,
    pub level_type: LevelType,
    /// Share of total absolute exposure, 0-100.
    pub strength_pct: f64,
    /// `(strike - spot) / spot * 100`; positive above spot.
    pub distance_from_spot_pct: f64,
}

impl ExposureLevel {
    #[must_use]
    pub fn is_above(&self, spot: f64) -> bool {
        self.strike > spot
    }
}

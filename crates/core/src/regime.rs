//! Regime classification types.
//!
//! `RegimeClassification` is the one piece of classifier state that survives
//! between evaluation cycles: it carries the hysteresis counters needed to
//! decide whether a new reading is accepted.

use serde::{Deserialize, Serialize};

/// Implied-volatility regime, bucketed over IV rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityRegime {
    ExtremeLow,
    Low,
    Normal,
    High,
    ExtremeHigh,
}

impl VolatilityRegime {
    #[must_use]
    pub fn is_elevated(&self) -> bool {
        matches!(self, Self::High | Self::ExtremeHigh)
    }

    #[must_use]
    pub fn is_depressed(&self) -> bool {
        matches!(self, Self::Low | Self::ExtremeLow)
    }
}

/// Dealer gamma regime, bucketed over net exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GammaRegime {
    StrongNegative,
    Negative,
    Neutral,
    Positive,
    StrongPositive,
}

impl GammaRegime {
    #[must_use]
    pub fn is_negative(&self) -> bool {
        matches!(self, Self::Negative | Self::StrongNegative)
    }

    #[must_use]
    pub fn is_positive(&self) -> bool {
        matches!(self, Self::Positive | Self::StrongPositive)
    }
}

/// Trend regime, bucketed over a momentum/moving-average score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendRegime {
    StrongDowntrend,
    Downtrend,
    Sideways,
    Uptrend,
    StrongUptrend,
}

impl TrendRegime {
    #[must_use]
    pub fn is_up(&self) -> bool {
        matches!(self, Self::Uptrend | Self::StrongUptrend)
    }

    #[must_use]
    pub fn is_down(&self) -> bool {
        matches!(self, Self::Downtrend | Self::StrongDowntrend)
    }
}

/// Action recommended for the underlying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    SellPremium,
    BuyCalls,
    BuyPuts,
    StayFlat,
    ClosePositions,
}

impl std::fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SellPremium => "sell_premium",
            Self::BuyCalls => "buy_calls",
            Self::BuyPuts => "buy_puts",
            Self::StayFlat => "stay_flat",
            Self::ClosePositions => "close_positions",
        };
        f.write_str(s)
    }
}

/// The three regime readings taken together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegimeSet {
    pub volatility: VolatilityRegime,
    pub gamma: GammaRegime,
    pub trend: TrendRegime,
}

/// A candidate regime that has not yet persisted long enough to be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRegime {
    pub regimes: RegimeSet,
    pub bars: u32,
}

/// Output of one classifier evaluation; also the prior state of the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeClassification {
    pub volatility_regime: VolatilityRegime,
    pub gamma_regime: GammaRegime,
    pub trend_regime: TrendRegime,
    pub recommended_action: RecommendedAction,
    /// 0-100.
    pub confidence: u8,
    pub reasoning: String,
    /// Consecutive evaluations the accepted regimes have held.
    pub bars_in_regime: u32,
    /// Raw reading that differs from the accepted regimes, if any.
    pub pending: Option<PendingRegime>,
    /// Evaluations since the recommended action last changed.
    pub bars_since_action_change: u32,
}

impl RegimeClassification {
    #[must_use]
    pub fn regimes(&self) -> RegimeSet {
        RegimeSet {
            volatility: self.volatility_regime,
            gamma: self.gamma_regime,
            trend: self.trend_regime,
        }
    }
}

//! Ordered `(upper_bound, label)` tables for bucketing a numeric reading.

use gex_core::{GammaRegime, RegimeConfig, TrendRegime, VolatilityRegime};

/// A threshold ladder. A value maps to the first entry whose upper bound it
/// is strictly below; the last entry's bound is `+inf`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdTable<L> {
    entries: Vec<(f64, L)>,
}

impl<L: Copy> ThresholdTable<L> {
    /// Builds a five-bucket table from four ascending breakpoints.
    ///
    /// Unsorted breakpoints are sorted so the table stays monotone.
    #[must_use]
    pub fn from_breakpoints(breakpoints: [f64; 4], labels: [L; 5]) -> Self {
        let mut bounds = breakpoints;
        bounds.sort_by(f64::total_cmp);
        let mut entries: Vec<(f64, L)> = bounds.iter().copied().zip(labels).collect();
        entries.push((f64::INFINITY, labels[4]));
        Self { entries }
    }

    /// Label for `value`. NaN falls into the middle bucket.
    #[must_use]
    pub fn classify(&self, value: f64) -> L {
        if value.is_nan() {
            return self.entries[self.entries.len() / 2].1;
        }
        self.entries
            .iter()
            .find(|(bound, _)| value < *bound)
            .map_or(self.entries[self.entries.len() - 1].1, |(_, label)| *label)
    }

    #[must_use]
    pub fn entries(&self) -> &[(f64, L)] {
        &self.entries
    }
}

/// IV-rank (0-100) ladder.
#[must_use]
pub fn volatility_table(config: &RegimeConfig) -> ThresholdTable<VolatilityRegime> {
    ThresholdTable::from_breakpoints(
        config.iv_rank_breakpoints,
        [
            VolatilityRegime::ExtremeLow,
            VolatilityRegime::Low,
            VolatilityRegime::Normal,
            VolatilityRegime::High,
            VolatilityRegime::ExtremeHigh,
        ],
    )
}

/// Net-exposure ladder.
#[must_use]
pub fn gamma_table(config: &RegimeConfig) -> ThresholdTable<GammaRegime> {
    ThresholdTable::from_breakpoints(
        config.gamma_breakpoints,
        [
            GammaRegime::StrongNegative,
            GammaRegime::Negative,
            GammaRegime::Neutral,
            GammaRegime::Positive,
            GammaRegime::StrongPositive,
        ],
    )
}

/// Trend-score ladder over the integer score in `[-4, 4]`.
#[must_use]
pub fn trend_table(config: &RegimeConfig) -> ThresholdTable<TrendRegime> {
    ThresholdTable::from_breakpoints(
        config.trend_score_breakpoints,
        [
            TrendRegime::StrongDowntrend,
            TrendRegime::Downtrend,
            TrendRegime::Sideways,
            TrendRegime::Uptrend,
            TrendRegime::StrongUptrend,
        ],
    )
}

//! Gamma-exposure aggregation, flip-point search and wall ranking.
//!
//! Per-strike exposure is `spot * gamma * open_interest * 100`, with puts
//! contributing negatively. The computation is pure: the same snapshot always
//! produces a bit-identical profile.

use chrono::{DateTime, Utc};
use gex_core::{
    ExposureConfig, ExposureLevel, ExposureSnapshot, LevelType, CONTRACT_MULTIPLIER,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from exposure computation. None are retryable; the same snapshot
/// always fails the same way.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExposureError {
    #[error("snapshot for {symbol} has no strikes")]
    EmptySnapshot { symbol: String },

    #[error("invalid spot price {spot}")]
    InvalidSpot { spot: f64 },

    #[error("non-finite input at strike {strike}")]
    NonFiniteInput { strike: f64 },
}

impl ExposureError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Exposure at one strike after merging duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeExposure {
    pub strike: f64,
    /// Call-side exposure (non-negative for non-negative inputs).
    pub call_exposure: f64,
    /// Put-side exposure (non-positive for non-negative inputs).
    pub put_exposure: f64,
    pub net_exposure: f64,
}

/// Output of [`ExposureEngine::compute`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureProfile {
    pub symbol: String,
    pub spot: f64,
    /// Sum of per-strike net exposure in ascending strike order.
    pub net_exposure: f64,
    /// Ascending by strike.
    pub strikes: Vec<StrikeExposure>,
    pub flip_point: f64,
    /// Call walls, then put walls (each strongest first), then the flip level.
    pub levels: Vec<ExposureLevel>,
    pub total_abs_exposure: f64,
    pub computed_from: DateTime<Utc>,
}

impl ExposureProfile {
    pub fn call_walls(&self) -> impl Iterator<Item = &ExposureLevel> {
        self.levels_of(LevelType::CallWall)
    }

    pub fn put_walls(&self) -> impl Iterator<Item = &ExposureLevel> {
        self.levels_of(LevelType::PutWall)
    }

    /// Strongest call wall.
    #[must_use]
    pub fn call_wall(&self) -> Option<&ExposureLevel> {
        self.call_walls().next()
    }

    /// Strongest put wall.
    #[must_use]
    pub fn put_wall(&self) -> Option<&ExposureLevel> {
        self.put_walls().next()
    }

    #[must_use]
    pub fn flip_level(&self) -> Option<&ExposureLevel> {
        self.levels_of(LevelType::GammaFlip).next()
    }

    /// `|spot - flip| / spot * 100`.
    #[must_use]
    pub fn flip_distance_pct(&self) -> f64 {
        (self.spot - self.flip_point).abs() / self.spot * 100.0
    }

    /// Listed strike closest to spot; ties resolve to the lower strike.
    #[must_use]
    pub fn nearest_strike(&self) -> Option<f64> {
        self.strikes
            .iter()
            .map(|s| s.strike)
            .min_by(|a, b| (a - self.spot).abs().total_cmp(&(b - self.spot).abs()))
    }

    fn levels_of(&self, level_type: LevelType) -> impl Iterator<Item = &ExposureLevel> {
        self.levels.iter().filter(move |l| l.level_type == level_type)
    }
}

/// Turns snapshots into exposure profiles.
#[derive(Debug, Clone)]
pub struct ExposureEngine {
    max_walls: usize,
}

impl Default for ExposureEngine {
    fn default() -> Self {
        Self::new(&ExposureConfig::default())
    }
}

impl ExposureEngine {
    #[must_use]
    pub fn new(config: &ExposureConfig) -> Self {
        Self {
            max_walls: config.max_walls,
        }
    }

    /// Computes net exposure, the flip point and ranked levels.
    ///
    /// # Errors
    /// `EmptySnapshot`, `InvalidSpot`, or `NonFiniteInput`.
    pub fn compute(&self, snapshot: &ExposureSnapshot) -> Result<ExposureProfile, ExposureError> {
        let spot = snapshot.spot;
        if !spot.is_finite() || spot <= 0.0 {
            return Err(ExposureError::InvalidSpot { spot });
        }
        if snapshot.strikes.is_empty() {
            return Err(ExposureError::EmptySnapshot {
                symbol: snapshot.symbol.clone(),
            });
        }

        let strikes = aggregate(snapshot)?;
        let net_exposure: f64 = strikes.iter().map(|s| s.net_exposure).sum();
        let total_abs_exposure: f64 = strikes
            .iter()
            .map(|s| s.call_exposure.abs() + s.put_exposure.abs())
            .sum();
        let flip_point = find_flip_point(&strikes, spot);

        let mut levels = Vec::with_capacity(2 * self.max_walls + 1);
        levels.extend(self.walls(&strikes, spot, total_abs_exposure, LevelType::CallWall));
        levels.extend(self.walls(&strikes, spot, total_abs_exposure, LevelType::PutWall));
        levels.push(ExposureLevel {
            strike: flip_point,
            signed_exposure: 0.0,
            level_type: LevelType::GammaFlip,
            strength_pct: 0.0,
            distance_from_spot_pct: distance_pct(flip_point, spot),
        });

        Ok(ExposureProfile {
            symbol: snapshot.symbol.clone(),
            spot,
            net_exposure,
            strikes,
            flip_point,
            levels,
            total_abs_exposure,
            computed_from: snapshot.collected_at,
        })
    }

    fn walls(
        &self,
        strikes: &[StrikeExposure],
        spot: f64,
        total_abs: f64,
        level_type: LevelType,
    ) -> Vec<ExposureLevel> {
        let side = |s: &StrikeExposure| match level_type {
            LevelType::CallWall => s.call_exposure,
            _ => s.put_exposure,
        };
        let mut candidates: Vec<&StrikeExposure> = strikes
            .iter()
            .filter(|s| match level_type {
                LevelType::CallWall => s.call_exposure > 0.0,
                _ => s.put_exposure < 0.0,
            })
            .collect();
        // Stable sort keeps ascending strike order among equal magnitudes
        candidates.sort_by(|a, b| side(b).abs().total_cmp(&side(a).abs()));

        candidates
            .into_iter()
            .take(self.max_walls)
            .map(|s| {
                let exposure = side(s);
                ExposureLevel {
                    strike: s.strike,
                    signed_exposure: exposure,
                    level_type,
                    strength_pct: if total_abs > 0.0 {
                        exposure.abs() / total_abs * 100.0
                    } else {
                        0.0
                    },
                    distance_from_spot_pct: distance_pct(s.strike, spot),
                }
            })
            .collect()
    }
}

fn distance_pct(price: f64, spot: f64) -> f64 {
    (price - spot) / spot * 100.0
}

/// Per-strike exposure, merged and sorted ascending by strike.
fn aggregate(snapshot: &ExposureSnapshot) -> Result<Vec<StrikeExposure>, ExposureError> {
    let spot = snapshot.spot;
    let mut rows: Vec<StrikeExposure> = Vec::with_capacity(snapshot.strikes.len());
    for data in &snapshot.strikes {
        if ![data.strike, data.call_gamma, data.put_gamma, data.open_interest]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(ExposureError::NonFiniteInput {
                strike: data.strike,
            });
        }
        let call = spot * data.call_gamma * data.open_interest * CONTRACT_MULTIPLIER;
        let put = -(spot * data.put_gamma * data.open_interest * CONTRACT_MULTIPLIER);
        rows.push(StrikeExposure {
            strike: data.strike,
            call_exposure: call,
            put_exposure: put,
            net_exposure: call + put,
        });
    }
    rows.sort_by(|a, b| a.strike.total_cmp(&b.strike));

    let mut merged: Vec<StrikeExposure> = Vec::with_capacity(rows.len());
    for row in rows {
        match merged.last_mut() {
            Some(last) if last.strike == row.strike => {
                last.call_exposure += row.call_exposure;
                last.put_exposure += row.put_exposure;
                last.net_exposure = last.call_exposure + last.put_exposure;
            }
            _ => merged.push(row),
        }
    }
    Ok(merged)
}

/// Strike price where cumulative exposure (ascending strikes) crosses zero.
///
/// Crossings between strikes are linearly interpolated; a cumulative value
/// of exactly zero is a crossing at that strike. With several crossings the
/// one nearest spot wins, ties to the lower price. Without any crossing the
/// flip is pinned to the lowest strike when cumulative exposure is positive
/// throughout and to the highest strike otherwise.
fn find_flip_point(strikes: &[StrikeExposure], spot: f64) -> f64 {
    let mut crossings: Vec<f64> = Vec::new();
    let mut cumulative = 0.0;
    let mut previous: Option<(f64, f64)> = None;

    for s in strikes {
        cumulative += s.net_exposure;
        if cumulative == 0.0 {
            crossings.push(s.strike);
        } else if let Some((s0, c0)) = previous {
            if c0 != 0.0 && (c0 < 0.0) != (cumulative < 0.0) {
                crossings.push(s0 + (0.0 - c0) * (s.strike - s0) / (cumulative - c0));
            }
        }
        previous = Some((s.strike, cumulative));
    }

    if let Some(nearest) = crossings.into_iter().min_by(|a, b| {
        (a - spot)
            .abs()
            .total_cmp(&(b - spot).abs())
            .then(a.total_cmp(b))
    }) {
        return nearest;
    }

    let first = strikes.first().map_or(spot, |s| s.strike);
    let last = strikes.last().map_or(spot, |s| s.strike);
    let first_cumulative = strikes.first().map_or(0.0, |s| s.net_exposure);
    if first_cumulative > 0.0 {
        first
    } else {
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gex_core::StrikeData;

    const EPS: f64 = 1e-9;

    fn snapshot(strikes: Vec<StrikeData>) -> ExposureSnapshot {
        ExposureSnapshot::new("SPY", 100.0, strikes)
    }

    /// Cumulative: -200k, -200k, +100k.
    fn mixed() -> ExposureSnapshot {
        snapshot(vec![
            StrikeData::new(110.0, 0.03, 0.0, 1000.0),
            StrikeData::new(90.0, 0.0, 0.02, 1000.0),
            StrikeData::new(100.0, 0.01, 0.01, 1000.0),
        ])
    }

    #[test]
    fn test_per_strike_exposure_and_sign() {
        let profile = ExposureEngine::default().compute(&mixed()).unwrap();
        let strikes: Vec<f64> = profile.strikes.iter().map(|s| s.strike).collect();
        assert_eq!(strikes, vec![90.0, 100.0, 110.0]);
        assert!((profile.strikes[0].put_exposure + 200_000.0).abs() < EPS);
        assert!((profile.strikes[2].call_exposure - 300_000.0).abs() < EPS);
        assert!((profile.net_exposure - 100_000.0).abs() < EPS);
        assert!((profile.total_abs_exposure - 700_000.0).abs() < EPS);
    }

    #[test]
    fn test_flip_point_is_interpolated() {
        let profile = ExposureEngine::default().compute(&mixed()).unwrap();
        let expected = 100.0 + 200_000.0 * 10.0 / 300_000.0;
        assert!((profile.flip_point - expected).abs() < EPS);
        assert!((profile.flip_level().unwrap().strike - expected).abs() < EPS);
    }

    #[test]
    fn test_all_positive_pins_to_min_strike() {
        let profile = ExposureEngine::default()
            .compute(&snapshot(vec![
                StrikeData::new(95.0, 0.02, 0.01, 500.0),
                StrikeData::new(105.0, 0.03, 0.0, 500.0),
            ]))
            .unwrap();
        assert_eq!(profile.flip_point, 95.0);
    }

    #[test]
    fn test_all_negative_pins_to_max_strike() {
        let profile = ExposureEngine::default()
            .compute(&snapshot(vec![
                StrikeData::new(95.0, 0.0, 0.02, 500.0),
                StrikeData::new(105.0, 0.01, 0.03, 500.0),
            ]))
            .unwrap();
        assert_eq!(profile.flip_point, 105.0);
    }

    #[test]
    fn test_exact_zero_cumulative_is_crossing_at_strike() {
        // Cumulative: -100k, 0, +100k
        let profile = ExposureEngine::default()
            .compute(&snapshot(vec![
                StrikeData::new(90.0, 0.0, 0.01, 1000.0),
                StrikeData::new(100.0, 0.01, 0.0, 1000.0),
                StrikeData::new(110.0, 0.01, 0.0, 1000.0),
            ]))
            .unwrap();
        assert_eq!(profile.flip_point, 100.0);
    }

    #[test]
    fn test_multiple_crossings_pick_nearest_spot() {
        // Cumulative: +100k, -100k, +100k; crossings at 85 and 95 (spot 100)
        let profile = ExposureEngine::default()
            .compute(&snapshot(vec![
                StrikeData::new(80.0, 0.01, 0.0, 1000.0),
                StrikeData::new(90.0, 0.0, 0.02, 1000.0),
                StrikeData::new(100.0, 0.02, 0.0, 1000.0),
            ]))
            .unwrap();
        assert!((profile.flip_point - 95.0).abs() < EPS);
    }

    #[test]
    fn test_duplicate_strikes_are_merged() {
        let profile = ExposureEngine::default()
            .compute(&snapshot(vec![
                StrikeData::new(100.0, 0.01, 0.0, 1000.0),
                StrikeData::new(100.0, 0.02, 0.0, 1000.0),
            ]))
            .unwrap();
        assert_eq!(profile.strikes.len(), 1);
        assert!((profile.strikes[0].call_exposure - 300_000.0).abs() < EPS);
    }

    #[test]
    fn test_aggregation_identity() {
        let profile = ExposureEngine::default().compute(&mixed()).unwrap();
        let sum: f64 = profile.strikes.iter().map(|s| s.net_exposure).sum();
        assert_eq!(sum, profile.net_exposure);
    }

    #[test]
    fn test_compute_is_idempotent() {
        let engine = ExposureEngine::default();
        let snap = mixed();
        let a = engine.compute(&snap).unwrap();
        let b = engine.compute(&snap).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.flip_point.to_bits(), b.flip_point.to_bits());
    }

    #[test]
    fn test_walls_ranked_by_strength() {
        let profile = ExposureEngine::default().compute(&mixed()).unwrap();
        let calls: Vec<f64> = profile.call_walls().map(|l| l.strike).collect();
        let puts: Vec<f64> = profile.put_walls().map(|l| l.strike).collect();
        assert_eq!(calls, vec![110.0, 100.0]);
        assert_eq!(puts, vec![90.0, 100.0]);

        let call_wall = profile.call_wall().unwrap();
        assert!((call_wall.strength_pct - 300_000.0 / 700_000.0 * 100.0).abs() < EPS);
        assert!((call_wall.distance_from_spot_pct - 10.0).abs() < EPS);
        let put_wall = profile.put_wall().unwrap();
        assert!(put_wall.signed_exposure < 0.0);
        assert!((put_wall.distance_from_spot_pct + 10.0).abs() < EPS);
    }

    #[test]
    fn test_max_walls_limits_each_side() {
        let engine = ExposureEngine::new(&ExposureConfig { max_walls: 1 });
        let profile = engine.compute(&mixed()).unwrap();
        assert_eq!(profile.call_walls().count(), 1);
        assert_eq!(profile.put_walls().count(), 1);
        assert_eq!(profile.levels.len(), 3);
    }

    #[test]
    fn test_invalid_inputs() {
        let engine = ExposureEngine::default();
        assert!(matches!(
            engine.compute(&snapshot(vec![])),
            Err(ExposureError::EmptySnapshot { .. })
        ));
        let bad_spot = ExposureSnapshot::new("SPY", 0.0, vec![StrikeData::new(100.0, 0.1, 0.1, 1.0)]);
        assert!(matches!(
            engine.compute(&bad_spot),
            Err(ExposureError::InvalidSpot { .. })
        ));
        let nan = snapshot(vec![StrikeData::new(100.0, f64::NAN, 0.1, 1.0)]);
        assert_eq!(
            engine.compute(&nan),
            Err(ExposureError::NonFiniteInput { strike: 100.0 })
        );
    }

    #[test]
    fn test_nearest_strike() {
        let profile = ExposureEngine::default().compute(&mixed()).unwrap();
        assert_eq!(profile.nearest_strike(), Some(100.0));
    }
}

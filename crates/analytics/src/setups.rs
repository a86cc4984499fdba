//! Trade setup generation from a classified regime and exposure levels.
//!
//! Three families are scanned independently:
//! - squeezes toward the flip point when net exposure is extreme
//! - premium selling at strong walls within a distance band of spot
//! - iron condors between a call wall above and a put wall below spot
//!
//! Candidates that agree with the regime's recommended action get a
//! confidence bonus, contradicting ones a penalty. The result is ranked by
//! confidence, then reward-to-risk.

use gex_core::{
    ExpirationWindow, ExposureLevel, RecommendedAction, RegimeClassification, SetupAction,
    SetupConfig, StrategyType, TradeSetup, CONTRACT_MULTIPLIER,
};
use tracing::debug;

use crate::exposure::ExposureProfile;

const SQUEEZE_WINDOW: ExpirationWindow = ExpirationWindow::new(1, 7);
const PREMIUM_WINDOW: ExpirationWindow = ExpirationWindow::new(21, 45);
const CONDOR_WINDOW: ExpirationWindow = ExpirationWindow::new(30, 45);

const SQUEEZE_BASE_CONFIDENCE: f64 = 50.0;
const SQUEEZE_CONFIDENCE_PER_THRESHOLD: f64 = 20.0;
const SQUEEZE_CONFIDENCE_CAP: f64 = 90.0;

const PREMIUM_BASE_CONFIDENCE: f64 = 30.0;
const PREMIUM_CONFIDENCE_PER_STRENGTH: f64 = 1.5;

const CONDOR_BALANCED_BONUS: f64 = 20.0;
const CONDOR_SKEWED_BONUS: f64 = 5.0;

/// Stop placed this far beyond a wall, percent of the wall strike.
const WALL_BREACH_PCT: f64 = 0.5;

/// Emits ranked trade setups.
#[derive(Debug, Clone, Default)]
pub struct SetupGenerator {
    config: SetupConfig,
}

impl SetupGenerator {
    #[must_use]
    pub fn new(config: SetupConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &SetupConfig {
        &self.config
    }

    /// Generates setups for one symbol. Returns an empty list when nothing
    /// qualifies or the regime says to close positions.
    #[must_use]
    pub fn generate(
        &self,
        regime: &RegimeClassification,
        profile: &ExposureProfile,
    ) -> Vec<TradeSetup> {
        if regime.recommended_action == RecommendedAction::ClosePositions {
            debug!(symbol = %profile.symbol, "Regime recommends closing positions, no setups");
            return Vec::new();
        }

        let mut setups = Vec::new();
        setups.extend(self.squeeze(profile));
        setups.extend(self.premium(profile));
        setups.extend(self.condor(profile));

        for setup in &mut setups {
            let alignment = f64::from(alignment(setup, regime.recommended_action));
            setup.confidence_score = (setup.confidence_score
                + alignment * self.config.regime_agreement_bonus)
                .clamp(0.0, 100.0);
        }

        rank(&mut setups);
        debug!(symbol = %profile.symbol, count = setups.len(), "Setups generated");
        setups
    }

    fn squeeze(&self, profile: &ExposureProfile) -> Option<TradeSetup> {
        let cfg = &self.config;
        let net = profile.net_exposure;
        let threshold = if net <= cfg.squeeze_negative_threshold {
            cfg.squeeze_negative_threshold.abs()
        } else if net >= cfg.squeeze_positive_threshold {
            cfg.squeeze_positive_threshold.abs()
        } else {
            return None;
        };
        let spot = profile.spot;
        let flip = profile.flip_point;
        if profile.flip_distance_pct() > cfg.squeeze_flip_band_pct || (flip - spot).abs() < f64::EPSILON {
            return None;
        }

        let toward_upside = flip > spot;
        let (action, stop) = if toward_upside {
            (SetupAction::BuyCall, spot * (1.0 - cfg.squeeze_stop_pct / 100.0))
        } else {
            (SetupAction::BuyPut, spot * (1.0 + cfg.squeeze_stop_pct / 100.0))
        };
        let ratio = if threshold > 0.0 { net.abs() / threshold } else { 1.0 };
        let confidence = (SQUEEZE_BASE_CONFIDENCE
            + SQUEEZE_CONFIDENCE_PER_THRESHOLD * (ratio - 1.0).clamp(0.0, 2.0))
        .min(SQUEEZE_CONFIDENCE_CAP);
        let side = if net < 0.0 { "negative" } else { "positive" };

        Some(TradeSetup {
            symbol: profile.symbol.clone(),
            strategy_type: StrategyType::GammaSqueeze,
            action,
            entry_price: spot,
            target_price: flip,
            stop_loss: stop,
            strike: profile.nearest_strike().unwrap_or(spot),
            secondary_strike: None,
            expiration_window: SQUEEZE_WINDOW,
            confidence_score: confidence,
            risk_reward_ratio: TradeSetup::reward_to_risk(spot, flip, stop),
            capital_at_risk: (spot - stop).abs() * CONTRACT_MULTIPLIER,
            notes: format!(
                "{side} gamma squeeze toward flip {flip:.2} (net exposure {net:.3e}, {:.2}% away)",
                profile.flip_distance_pct()
            ),
        })
    }

    fn wall_qualifies(&self, level: &ExposureLevel) -> bool {
        let distance = level.distance_from_spot_pct.abs();
        level.strength_pct >= self.config.min_wall_strength_pct
            && distance >= self.config.wall_distance_min_pct
            && distance <= self.config.wall_distance_max_pct
    }

    fn premium_confidence(&self, level: &ExposureLevel) -> f64 {
        (PREMIUM_BASE_CONFIDENCE + PREMIUM_CONFIDENCE_PER_STRENGTH * level.strength_pct)
            .min(self.config.premium_confidence_cap)
    }

    fn premium(&self, profile: &ExposureProfile) -> Vec<TradeSetup> {
        let spot = profile.spot;
        let mut setups = Vec::new();

        for wall in profile.call_walls().filter(|l| l.is_above(spot) && self.wall_qualifies(l)) {
            let stop = wall.strike * (1.0 + WALL_BREACH_PCT / 100.0);
            let target = spot - (wall.strike - spot);
            setups.push(TradeSetup {
                symbol: profile.symbol.clone(),
                strategy_type: StrategyType::CallCreditSpread,
                action: SetupAction::SellCall,
                entry_price: spot,
                target_price: target,
                stop_loss: stop,
                strike: wall.strike,
                secondary_strike: None,
                expiration_window: PREMIUM_WINDOW,
                confidence_score: self.premium_confidence(wall),
                risk_reward_ratio: TradeSetup::reward_to_risk(spot, target, stop),
                capital_at_risk: (spot - stop).abs() * CONTRACT_MULTIPLIER,
                notes: format!(
                    "sell calls at call wall {:.2} ({:.1}% strength, {:.2}% above spot)",
                    wall.strike, wall.strength_pct, wall.distance_from_spot_pct
                ),
            });
        }

        for wall in profile.put_walls().filter(|l| l.strike < spot && self.wall_qualifies(l)) {
            let stop = wall.strike * (1.0 - WALL_BREACH_PCT / 100.0);
            let target = spot + (spot - wall.strike);
            setups.push(TradeSetup {
                symbol: profile.symbol.clone(),
                strategy_type: StrategyType::Wheel,
                action: SetupAction::SellPut,
                entry_price: spot,
                target_price: target,
                stop_loss: stop,
                strike: wall.strike,
                secondary_strike: None,
                expiration_window: PREMIUM_WINDOW,
                confidence_score: self.premium_confidence(wall),
                risk_reward_ratio: TradeSetup::reward_to_risk(spot, target, stop),
                // Cash securing the put
                capital_at_risk: wall.strike * CONTRACT_MULTIPLIER,
                notes: format!(
                    "cash-secured put at put wall {:.2} ({:.1}% strength, {:.2}% below spot)",
                    wall.strike,
                    wall.strength_pct,
                    wall.distance_from_spot_pct.abs()
                ),
            });
        }
        setups
    }

    fn condor(&self, profile: &ExposureProfile) -> Option<TradeSetup> {
        let cfg = &self.config;
        let spot = profile.spot;
        let call = profile.call_walls().find(|l| l.is_above(spot))?;
        let put = profile.put_walls().find(|l| l.strike < spot)?;

        let spread_pct = (call.strike - put.strike) / spot * 100.0;
        if spread_pct < cfg.condor_min_spread_pct || spread_pct > cfg.condor_max_spread_pct {
            return None;
        }
        let combined = call.strength_pct + put.strength_pct;
        if combined < cfg.condor_min_combined_strength_pct {
            return None;
        }

        let call_mag = call.signed_exposure.abs();
        let put_mag = put.signed_exposure.abs();
        let smaller = call_mag.min(put_mag);
        let ratio = if smaller > 0.0 {
            call_mag.max(put_mag) / smaller
        } else {
            f64::INFINITY
        };
        let balanced = ratio <= cfg.condor_balance_ratio;
        let shape = if balanced {
            "balanced".to_string()
        } else if call_mag > put_mag {
            "skewed toward calls".to_string()
        } else {
            "skewed toward puts".to_string()
        };

        let target = (call.strike + put.strike) / 2.0;
        let stop = if call.strike - spot < spot - put.strike {
            call.strike * (1.0 + WALL_BREACH_PCT / 100.0)
        } else {
            put.strike * (1.0 - WALL_BREACH_PCT / 100.0)
        };
        let bonus = if balanced {
            CONDOR_BALANCED_BONUS
        } else {
            CONDOR_SKEWED_BONUS
        };

        Some(TradeSetup {
            symbol: profile.symbol.clone(),
            strategy_type: StrategyType::IronCondor,
            action: SetupAction::SellIronCondor,
            entry_price: spot,
            target_price: target,
            stop_loss: stop,
            strike: put.strike,
            secondary_strike: Some(call.strike),
            expiration_window: CONDOR_WINDOW,
            confidence_score: (combined + bonus).min(cfg.premium_confidence_cap),
            risk_reward_ratio: TradeSetup::reward_to_risk(spot, target, stop),
            capital_at_risk: (spot - stop).abs() * CONTRACT_MULTIPLIER,
            notes: format!(
                "{shape} condor {:.2}/{:.2} (spread {spread_pct:.1}%, combined strength {combined:.1}%, ratio {ratio:.2})",
                put.strike, call.strike
            ),
        })
    }
}

/// +1 if the setup agrees with `action`, -1 if it contradicts it, else 0.
fn alignment(setup: &TradeSetup, action: RecommendedAction) -> i8 {
    use RecommendedAction as A;
    use SetupAction as S;
    match (action, setup.action) {
        (A::SellPremium, S::SellCall | S::SellPut | S::SellIronCondor) => 1,
        (A::SellPremium, S::BuyCall | S::BuyPut) => -1,
        (A::BuyCalls, S::BuyCall) | (A::BuyPuts, S::BuyPut) => 1,
        (A::BuyCalls, S::BuyPut | S::SellCall | S::SellIronCondor) => -1,
        (A::BuyPuts, S::BuyCall | S::SellPut | S::SellIronCondor) => -1,
        _ => 0,
    }
}

/// Confidence descending, then reward-to-risk descending.
fn rank(setups: &mut [TradeSetup]) {
    setups.sort_by(|a, b| {
        b.confidence_score
            .total_cmp(&a.confidence_score)
            .then(b.risk_reward_ratio.total_cmp(&a.risk_reward_ratio))
    });
}

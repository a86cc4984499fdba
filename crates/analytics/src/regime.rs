//! Regime classification with hysteresis.
//!
//! A raw reading (volatility, gamma, trend) is only accepted once it has
//! persisted for `min_bars_for_regime` evaluations. The recommended action is
//! chosen from an ordered rule table over the accepted regimes, and a changed
//! action is held back until `decision_cooldown_bars` evaluations have passed
//! since the previous change.

use gex_core::{
    ExposureLevel, GammaRegime, LevelType, PendingRegime, RecommendedAction,
    RegimeClassification, RegimeConfig, RegimeSet, TrendRegime, VolatilityRegime,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::exposure::ExposureProfile;
use crate::thresholds::{gamma_table, trend_table, volatility_table, ThresholdTable};

/// Trend inputs supplied by the external analytics collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrendInputs {
    /// Short-horizon return, percent.
    pub short_momentum_pct: f64,
    /// Medium-horizon return, percent.
    pub medium_momentum_pct: f64,
    pub above_short_ma: bool,
    pub above_long_ma: bool,
}

/// Numeric inputs for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeInputs {
    pub spot: f64,
    pub net_exposure: f64,
    pub flip_point: f64,
    /// IV rank, 0-100.
    pub iv_rank: f64,
    /// Implied over historical volatility.
    pub iv_hv_ratio: f64,
    pub trend: TrendInputs,
}

impl RegimeInputs {
    /// Takes spot, net exposure and flip point from a computed profile.
    #[must_use]
    pub fn from_profile(
        profile: &ExposureProfile,
        iv_rank: f64,
        iv_hv_ratio: f64,
        trend: TrendInputs,
    ) -> Self {
        Self {
            spot: profile.spot,
            net_exposure: profile.net_exposure,
            flip_point: profile.flip_point,
            iv_rank,
            iv_hv_ratio,
            trend,
        }
    }

    /// `|spot - flip| / spot * 100`.
    #[must_use]
    pub fn flip_distance_pct(&self) -> f64 {
        if self.spot > 0.0 {
            (self.spot - self.flip_point).abs() / self.spot * 100.0
        } else {
            f64::INFINITY
        }
    }
}

// =============================================================================
// Action rules
// =============================================================================

struct ActionContext<'a> {
    regimes: RegimeSet,
    iv_hv_ratio: f64,
    flip_distance_pct: f64,
    config: &'a RegimeConfig,
}

struct ActionRule {
    name: &'static str,
    action: RecommendedAction,
    applies: fn(&ActionContext<'_>) -> bool,
}

fn crash_risk(ctx: &ActionContext<'_>) -> bool {
    ctx.regimes.gamma == GammaRegime::StrongNegative
        && ctx.regimes.volatility == VolatilityRegime::ExtremeHigh
}

fn rich_premium_pinned(ctx: &ActionContext<'_>) -> bool {
    ctx.regimes.volatility.is_elevated()
        && ctx.regimes.gamma.is_positive()
        && ctx.iv_hv_ratio >= ctx.config.rich_iv_hv_ratio
}

fn squeeze_up(ctx: &ActionContext<'_>) -> bool {
    ctx.regimes.gamma.is_negative()
        && ctx.regimes.trend.is_up()
        && ctx.flip_distance_pct <= ctx.config.near_flip_pct
}

fn negative_gamma_selloff(ctx: &ActionContext<'_>) -> bool {
    ctx.regimes.gamma.is_negative() && ctx.regimes.trend.is_down()
}

fn pinned_range(ctx: &ActionContext<'_>) -> bool {
    ctx.regimes.gamma.is_positive()
        && ctx.regimes.trend == TrendRegime::Sideways
        && !ctx.regimes.volatility.is_depressed()
}

fn cheap_vol_breakout_up(ctx: &ActionContext<'_>) -> bool {
    ctx.regimes.trend == TrendRegime::StrongUptrend
        && (ctx.regimes.volatility.is_depressed() || ctx.iv_hv_ratio <= ctx.config.cheap_iv_hv_ratio)
}

fn cheap_vol_breakout_down(ctx: &ActionContext<'_>) -> bool {
    ctx.regimes.trend == TrendRegime::StrongDowntrend
        && (ctx.regimes.volatility.is_depressed() || ctx.iv_hv_ratio <= ctx.config.cheap_iv_hv_ratio)
}

/// First match wins; no match means `StayFlat`.
const ACTION_RULES: &[ActionRule] = &[
    ActionRule {
        name: "crash_risk",
        action: RecommendedAction::ClosePositions,
        applies: crash_risk,
    },
    ActionRule {
        name: "rich_premium_pinned",
        action: RecommendedAction::SellPremium,
        applies: rich_premium_pinned,
    },
    ActionRule {
        name: "squeeze_up",
        action: RecommendedAction::BuyCalls,
        applies: squeeze_up,
    },
    ActionRule {
        name: "negative_gamma_selloff",
        action: RecommendedAction::BuyPuts,
        applies: negative_gamma_selloff,
    },
    ActionRule {
        name: "pinned_range",
        action: RecommendedAction::SellPremium,
        applies: pinned_range,
    },
    ActionRule {
        name: "cheap_vol_breakout_up",
        action: RecommendedAction::BuyCalls,
        applies: cheap_vol_breakout_up,
    },
    ActionRule {
        name: "cheap_vol_breakout_down",
        action: RecommendedAction::BuyPuts,
        applies: cheap_vol_breakout_down,
    },
];

fn decide(ctx: &ActionContext<'_>) -> (RecommendedAction, &'static str) {
    ACTION_RULES
        .iter()
        .find(|rule| (rule.applies)(ctx))
        .map_or((RecommendedAction::StayFlat, "no_rule_matched"), |rule| {
            (rule.action, rule.name)
        })
}

/// Share (0-100) of the five independent signals that support `action`.
fn confidence(action: RecommendedAction, ctx: &ActionContext<'_>) -> u8 {
    let r = ctx.regimes;
    let cfg = ctx.config;
    let rich = ctx.iv_hv_ratio >= cfg.rich_iv_hv_ratio;
    let cheap = ctx.iv_hv_ratio <= cfg.cheap_iv_hv_ratio;
    let near_flip = ctx.flip_distance_pct <= cfg.near_flip_pct;
    let far_flip = ctx.flip_distance_pct >= cfg.far_flip_pct;

    let signals: [bool; 5] = match action {
        RecommendedAction::SellPremium => [
            !r.volatility.is_depressed(),
            r.gamma.is_positive(),
            r.trend == TrendRegime::Sideways,
            rich,
            far_flip,
        ],
        RecommendedAction::BuyCalls => [
            !r.volatility.is_elevated(),
            r.gamma.is_negative(),
            r.trend.is_up(),
            cheap,
            near_flip,
        ],
        RecommendedAction::BuyPuts => [
            !r.volatility.is_elevated(),
            r.gamma.is_negative(),
            r.trend.is_down(),
            cheap,
            near_flip,
        ],
        RecommendedAction::ClosePositions => [
            r.volatility.is_elevated(),
            r.gamma.is_negative(),
            r.trend.is_down(),
            rich,
            near_flip,
        ],
        RecommendedAction::StayFlat => [
            r.volatility == VolatilityRegime::Normal,
            r.gamma == GammaRegime::Neutral,
            r.trend == TrendRegime::Sideways,
            !rich && !cheap,
            !near_flip && !far_flip,
        ],
    };
    let supporting = signals.iter().filter(|s| **s).count() as u8;
    supporting * 20
}

// =============================================================================
// Classifier
// =============================================================================

/// Converts exposure and volatility/trend inputs into a regime and action.
#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    config: RegimeConfig,
    volatility: ThresholdTable<VolatilityRegime>,
    gamma: ThresholdTable<GammaRegime>,
    trend: ThresholdTable<TrendRegime>,
}

impl Default for RegimeClassifier {
    fn default() -> Self {
        Self::new(RegimeConfig::default())
    }
}

impl RegimeClassifier {
    #[must_use]
    pub fn new(config: RegimeConfig) -> Self {
        Self {
            volatility: volatility_table(&config),
            gamma: gamma_table(&config),
            trend: trend_table(&config),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Trend score in `[-4, 4]`.
    #[must_use]
    pub fn trend_score(&self, trend: &TrendInputs) -> i32 {
        let momentum = |value: f64, threshold: f64| {
            if value > threshold {
                1
            } else if value < -threshold {
                -1
            } else {
                0
            }
        };
        let flag = |above: bool| if above { 1 } else { -1 };

        momentum(trend.short_momentum_pct, self.config.short_momentum_threshold_pct)
            + momentum(trend.medium_momentum_pct, self.config.medium_momentum_threshold_pct)
            + flag(trend.above_short_ma)
            + flag(trend.above_long_ma)
    }

    /// Raw regime reading without hysteresis.
    #[must_use]
    pub fn read(&self, inputs: &RegimeInputs) -> RegimeSet {
        RegimeSet {
            volatility: self.volatility.classify(inputs.iv_rank),
            gamma: self.gamma.classify(inputs.net_exposure),
            trend: self.trend.classify(f64::from(self.trend_score(&inputs.trend))),
        }
    }

    /// Classifies one evaluation given the previous classification.
    ///
    /// With no prior the raw reading is accepted immediately.
    #[must_use]
    pub fn classify(
        &self,
        levels: &[ExposureLevel],
        inputs: &RegimeInputs,
        prior: Option<&RegimeClassification>,
    ) -> RegimeClassification {
        let raw = self.read(inputs);
        let min_bars = self.config.min_bars_for_regime.max(1);
        let cooldown = self.config.decision_cooldown_bars;

        // Regime hysteresis
        let (accepted, bars_in_regime, pending) = match prior {
            None => (raw, 1, None),
            Some(prev) if prev.regimes() == raw => (raw, prev.bars_in_regime.saturating_add(1), None),
            Some(prev) => {
                let bars = match prev.pending {
                    Some(p) if p.regimes == raw => p.bars.saturating_add(1),
                    _ => 1,
                };
                if bars >= min_bars {
                    info!(
                        from = ?prev.regimes(),
                        to = ?raw,
                        bars,
                        "Regime change accepted"
                    );
                    (raw, bars, None)
                } else {
                    (
                        prev.regimes(),
                        prev.bars_in_regime.saturating_add(1),
                        Some(PendingRegime { regimes: raw, bars }),
                    )
                }
            }
        };

        let ctx = ActionContext {
            regimes: accepted,
            iv_hv_ratio: inputs.iv_hv_ratio,
            flip_distance_pct: inputs.flip_distance_pct(),
            config: &self.config,
        };
        let (candidate, rule) = decide(&ctx);

        // Action cooldown
        let mut suppressed = None;
        let (action, bars_since_action_change) = match prior {
            // The first reading starts outside the cooldown
            None => (candidate, cooldown),
            Some(prev) => {
                let since = prev.bars_since_action_change.saturating_add(1);
                if candidate == prev.recommended_action {
                    (candidate, since)
                } else if since > cooldown {
                    info!(
                        from = %prev.recommended_action,
                        to = %candidate,
                        rule,
                        "Recommended action changed"
                    );
                    (candidate, 0)
                } else {
                    suppressed = Some((candidate, since));
                    (prev.recommended_action, since)
                }
            }
        };

        let confidence = confidence(action, &ctx);
        let reasoning = self.reasoning(
            &ctx,
            inputs,
            levels,
            action,
            rule,
            pending.as_ref(),
            suppressed,
        );
        debug!(%action, confidence, reasoning = %reasoning, "Regime classified");

        RegimeClassification {
            volatility_regime: accepted.volatility,
            gamma_regime: accepted.gamma,
            trend_regime: accepted.trend,
            recommended_action: action,
            confidence,
            reasoning,
            bars_in_regime,
            pending,
            bars_since_action_change,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn reasoning(
        &self,
        ctx: &ActionContext<'_>,
        inputs: &RegimeInputs,
        levels: &[ExposureLevel],
        action: RecommendedAction,
        rule: &str,
        pending: Option<&PendingRegime>,
        suppressed: Option<(RecommendedAction, u32)>,
    ) -> String {
        let mut parts = vec![format!(
            "vol={:?} (iv_rank {:.0}), gamma={:?} (net {:.3e}), trend={:?} (score {}); iv/hv {:.2}, flip {:.2} ({:.2}% away)",
            ctx.regimes.volatility,
            inputs.iv_rank,
            ctx.regimes.gamma,
            inputs.net_exposure,
            ctx.regimes.trend,
            self.trend_score(&inputs.trend),
            inputs.iv_hv_ratio,
            inputs.flip_point,
            ctx.flip_distance_pct,
        )];

        let strongest = |level_type: LevelType| {
            levels
                .iter()
                .find(|l| l.level_type == level_type)
                .map(|l| format!("{level_type} {:.2} ({:.1}%)", l.strike, l.strength_pct))
        };
        let walls: Vec<String> = [LevelType::CallWall, LevelType::PutWall]
            .into_iter()
            .filter_map(strongest)
            .collect();
        if !walls.is_empty() {
            parts.push(walls.join(", "));
        }

        if let Some(p) = pending {
            parts.push(format!(
                "pending {:?}/{:?}/{:?} ({}/{} bars)",
                p.regimes.volatility,
                p.regimes.gamma,
                p.regimes.trend,
                p.bars,
                self.config.min_bars_for_regime
            ));
        }

        match suppressed {
            Some((candidate, since)) => parts.push(format!(
                "{action} held: change to {candidate} suppressed by cooldown ({since}/{} bars)",
                self.config.decision_cooldown_bars
            )),
            None => parts.push(format!("{action} via {rule}")),
        }
        parts.join("; ")
    }
}

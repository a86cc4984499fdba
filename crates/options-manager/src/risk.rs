//! Risk gating for trade setups.
//!
//! Stateless: every decision is a function of the setup, the portfolio
//! snapshot and the configured limits. Rejections are values, not errors.

use std::collections::HashMap;

use gex_core::{RiskLimits, StrategyType, TradeSetup};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Portfolio figures the risk checks read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub account_value: Decimal,
    /// Realized P&L for the current trading day; negative for a loss.
    pub daily_realized_pnl: Decimal,
    pub open_positions: HashMap<StrategyType, usize>,
    /// Capital currently at risk across all open positions.
    pub open_risk: Decimal,
}

impl PortfolioState {
    #[must_use]
    pub fn new(account_value: Decimal) -> Self {
        Self {
            account_value,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_daily_realized_pnl(mut self, pnl: Decimal) -> Self {
        self.daily_realized_pnl = pnl;
        self
    }

    #[must_use]
    pub fn with_open_positions(mut self, strategy: StrategyType, count: usize) -> Self {
        self.open_positions.insert(strategy, count);
        self
    }

    #[must_use]
    pub fn with_open_risk(mut self, risk: Decimal) -> Self {
        self.open_risk = risk;
        self
    }

    #[must_use]
    pub fn open_count(&self, strategy: StrategyType) -> usize {
        self.open_positions.get(&strategy).copied().unwrap_or(0)
    }
}

/// Why a setup was refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RejectReason {
    DailyLossCap {
        realized_loss: Decimal,
        cap: Decimal,
    },
    MaxConcurrentPositions {
        strategy: StrategyType,
        open: usize,
        max: usize,
    },
    PortfolioExposure {
        would_be_pct: Decimal,
        max_pct: Decimal,
    },
    InvalidAccount {
        account_value: Decimal,
    },
    /// Capital at risk is not a finite, non-negative amount.
    InvalidSetup {
        capital_at_risk: f64,
    },
}

impl RejectReason {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DailyLossCap { .. } => "daily_loss_cap",
            Self::MaxConcurrentPositions { .. } => "max_concurrent_positions",
            Self::PortfolioExposure { .. } => "portfolio_exposure",
            Self::InvalidAccount { .. } => "invalid_account",
            Self::InvalidSetup { .. } => "invalid_setup",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DailyLossCap { realized_loss, cap } => {
                write!(f, "daily loss {realized_loss} has reached the cap of {cap}")
            }
            Self::MaxConcurrentPositions { strategy, open, max } => {
                write!(f, "{open} open {strategy} positions, limit is {max}")
            }
            Self::PortfolioExposure {
                would_be_pct,
                max_pct,
            } => write!(
                f,
                "portfolio exposure would be {would_be_pct}% of account, limit is {max_pct}%"
            ),
            Self::InvalidAccount { account_value } => {
                write!(f, "account value {account_value} is not positive")
            }
            Self::InvalidSetup { capital_at_risk } => {
                write!(f, "capital at risk {capital_at_risk} is not a valid amount")
            }
        }
    }
}

/// Outcome of a single risk check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RiskDecision {
    Approved {
        /// Exposure capacity left after this setup.
        residual_risk_budget: Decimal,
        /// Exposure after this setup as a share of the cap, percent.
        utilization_pct: Decimal,
    },
    Rejected {
        reason: RejectReason,
    },
}

impl RiskDecision {
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovedSetup {
    pub setup: TradeSetup,
    pub residual_risk_budget: Decimal,
    pub utilization_pct: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedSetup {
    pub setup: TradeSetup,
    pub reason: RejectReason,
}

/// Result of screening a ranked batch of setups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskReview {
    pub approved: Vec<ApprovedSetup>,
    pub rejected: Vec<RejectedSetup>,
}

impl RiskReview {
    /// Approved wheel setups; these are handed to the wheel engine.
    pub fn wheel_candidates(&self) -> impl Iterator<Item = &ApprovedSetup> {
        self.approved
            .iter()
            .filter(|a| a.setup.strategy_type == StrategyType::Wheel)
    }
}

/// Applies the configured caps to trade setups.
#[derive(Debug, Clone, Default)]
pub struct RiskManager {
    limits: RiskLimits,
}

impl RiskManager {
    #[must_use]
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    #[must_use]
    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Checks one setup: daily loss cap, concurrent positions, then exposure.
    #[must_use]
    pub fn approve(&self, setup: &TradeSetup, portfolio: &PortfolioState) -> RiskDecision {
        let hundred = Decimal::ONE_HUNDRED;

        if portfolio.account_value <= Decimal::ZERO {
            return Self::reject(RejectReason::InvalidAccount {
                account_value: portfolio.account_value,
            });
        }

        // Daily loss cap
        let cap = portfolio.account_value * self.limits.daily_loss_pct / hundred;
        let realized_loss = (-portfolio.daily_realized_pnl).max(Decimal::ZERO);
        if portfolio.daily_realized_pnl < Decimal::ZERO && realized_loss >= cap {
            return Self::reject(RejectReason::DailyLossCap { realized_loss, cap });
        }

        // Concurrent positions per strategy
        let open = portfolio.open_count(setup.strategy_type);
        if open >= self.limits.max_concurrent_per_strategy {
            return Self::reject(RejectReason::MaxConcurrentPositions {
                strategy: setup.strategy_type,
                open,
                max: self.limits.max_concurrent_per_strategy,
            });
        }

        // Portfolio exposure
        let Some(capital) = capital_at_risk(setup) else {
            return Self::reject(RejectReason::InvalidSetup {
                capital_at_risk: setup.capital_at_risk,
            });
        };
        let max_exposure = portfolio.account_value * self.limits.max_portfolio_exposure_pct / hundred;
        let after = portfolio.open_risk + capital;
        if after > max_exposure {
            return Self::reject(RejectReason::PortfolioExposure {
                would_be_pct: (after / portfolio.account_value * hundred).round_dp(2),
                max_pct: self.limits.max_portfolio_exposure_pct,
            });
        }

        let utilization_pct = if max_exposure.is_zero() {
            Decimal::ZERO
        } else {
            (after / max_exposure * hundred).round_dp(2)
        };
        RiskDecision::Approved {
            residual_risk_budget: max_exposure - after,
            utilization_pct,
        }
    }

    /// Screens setups in order. Each approval counts against the caps seen
    /// by the setups after it.
    #[must_use]
    pub fn filter(&self, setups: Vec<TradeSetup>, portfolio: &PortfolioState) -> RiskReview {
        let mut working = portfolio.clone();
        let mut review = RiskReview::default();

        for setup in setups {
            match self.approve(&setup, &working) {
                RiskDecision::Approved {
                    residual_risk_budget,
                    utilization_pct,
                } => {
                    info!(
                        symbol = %setup.symbol,
                        strategy = %setup.strategy_type,
                        confidence = setup.confidence_score,
                        residual = %residual_risk_budget,
                        "Setup approved"
                    );
                    working.open_risk += capital_at_risk(&setup).unwrap_or(Decimal::ZERO);
                    *working.open_positions.entry(setup.strategy_type).or_insert(0) += 1;
                    review.approved.push(ApprovedSetup {
                        setup,
                        residual_risk_budget,
                        utilization_pct,
                    });
                }
                RiskDecision::Rejected { reason } => {
                    info!(
                        symbol = %setup.symbol,
                        strategy = %setup.strategy_type,
                        code = reason.code(),
                        reason = %reason,
                        "Setup rejected"
                    );
                    review.rejected.push(RejectedSetup { setup, reason });
                }
            }
        }

        review
    }

    fn reject(reason: RejectReason) -> RiskDecision {
        debug!(code = reason.code(), "Risk check failed");
        RiskDecision::Rejected { reason }
    }
}

fn capital_at_risk(setup: &TradeSetup) -> Option<Decimal> {
    if !setup.capital_at_risk.is_finite() || setup.capital_at_risk < 0.0 {
        return None;
    }
    Decimal::from_f64_retain(setup.capital_at_risk).map(|d| d.round_dp(2))
}

//! Trade setup candidates emitted by the setup generator.

use serde::{Deserialize, Serialize};

/// Strategy family of a setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    /// Directional long option toward the flip point.
    GammaSqueeze,
    /// Short call (spread) at a call wall.
    CallCreditSpread,
    /// Cash-secured put at a put wall; lifecycle owned by the wheel engine.
    Wheel,
    /// Short strangle between the put and call walls, hedged with wings.
    IronCondor,
}

impl StrategyType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GammaSqueeze => "gamma_squeeze",
            Self::CallCreditSpread => "call_credit_spread",
            Self::Wheel => "wheel",
            Self::IronCondor => "iron_condor",
        }
    }
}

impl std::fmt::Display for StrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order intent of a setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupAction {
    BuyCall,
    BuyPut,
    SellCall,
    SellPut,
    SellIronCondor,
}

/// Days-to-expiration range for the option to trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationWindow {
    pub min_dte: u32,
    pub max_dte: u32,
}

impl ExpirationWindow {
    #[must_use]
    pub const fn new(min_dte: u32, max_dte: u32) -> Self {
        Self { min_dte, max_dte }
    }

    #[must_use]
    pub fn contains(&self, dte: u32) -> bool {
        (self.min_dte..=self.max_dte).contains(&dte)
    }
}

impl std::fmt::Display for ExpirationWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{} DTE", self.min_dte, self.max_dte)
    }
}

/// A risk-bounded trade candidate. Created fresh each decision cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSetup {
    pub symbol: String,
    pub strategy_type: StrategyType,
    pub action: SetupAction,
    /// Underlying price at which the setup is valid.
    pub entry_price: f64,
    /// Underlying target.
    pub target_price: f64,
    /// Underlying invalidation level.
    pub stop_loss: f64,
    /// Primary option strike (short put for condors).
    pub strike: f64,
    /// Second short strike for two-sided structures (call side of a condor).
    pub secondary_strike: Option<f64>,
    pub expiration_window: ExpirationWindow,
    /// 0-100.
    pub confidence_score: f64,
    pub risk_reward_ratio: f64,
    /// Capital at risk for one contract, in account currency.
    pub capital_at_risk: f64,
    pub notes: String,
}

impl TradeSetup {
    /// Reward-to-risk of moving from `entry` to `target` against a stop at `stop`.
    ///
    /// Returns 0 when the stop sits on the entry.
    #[must_use]
    pub fn reward_to_risk(entry: f64, target: f64, stop: f64) -> f64 {
        let risk = (entry - stop).abs();
        if risk <= f64::EPSILON {
            return 0.0;
        }
        (target - entry).abs() / risk
    }
}

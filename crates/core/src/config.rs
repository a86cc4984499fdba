use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub exposure: ExposureConfig,
    pub regime: RegimeConfig,
    pub setups: SetupConfig,
    pub risk: RiskLimits,
    pub database: DatabaseConfig,
}

/// Exposure-data provider access and the shared limiter/cache policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Minimum spacing between any two provider requests.
    pub min_interval_secs: u64,
    pub cache_ttl_secs: u64,
    /// Circuit-breaker delays after 1, 2, 3... consecutive rate-limit errors.
    /// The last rung repeats.
    pub backoff_ladder_secs: Vec<u64>,
    /// Global request budget per rolling minute window.
    pub max_calls_per_minute: u32,
    pub per_symbol_calls_per_minute: u32,
    pub request_timeout_secs: u64,
    /// Longest a caller will wait on the limiter before failing.
    pub max_wait_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.gexbot.com".to_string(),
            api_key: None,
            min_interval_secs: 15,
            cache_ttl_secs: 300,
            backoff_ladder_secs: vec![30, 60, 120, 300],
            max_calls_per_minute: 4,
            per_symbol_calls_per_minute: 2,
            request_timeout_secs: 30,
            max_wait_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    /// Walls reported per side.
    pub max_walls: usize,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self { max_walls: 3 }
    }
}

/// Breakpoints and hysteresis for the regime classifier.
///
/// Each `*_breakpoints` array holds four ascending upper bounds separating
/// five buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub min_bars_for_regime: u32,
    pub decision_cooldown_bars: u32,
    pub iv_rank_breakpoints: [f64; 4],
    pub gamma_breakpoints: [f64; 4],
    pub trend_score_breakpoints: [f64; 4],
    pub short_momentum_threshold_pct: f64,
    pub medium_momentum_threshold_pct: f64,
    pub rich_iv_hv_ratio: f64,
    pub cheap_iv_hv_ratio: f64,
    pub near_flip_pct: f64,
    pub far_flip_pct: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            min_bars_for_regime: 2,
            decision_cooldown_bars: 3,
            iv_rank_breakpoints: [10.0, 30.0, 70.0, 90.0],
            gamma_breakpoints: [-1.0e9, -1.0e8, 1.0e8, 1.0e9],
            trend_score_breakpoints: [-2.5, -0.5, 0.5, 2.5],
            short_momentum_threshold_pct: 1.0,
            medium_momentum_threshold_pct: 3.0,
            rich_iv_hv_ratio: 1.2,
            cheap_iv_hv_ratio: 0.9,
            near_flip_pct: 1.0,
            far_flip_pct: 3.0,
        }
    }
}

/// Trigger thresholds for the setup generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    /// Net exposure at or below which a negative-gamma squeeze is armed.
    pub squeeze_negative_threshold: f64,
    /// Net exposure at or above which a positive-gamma reversion is armed.
    pub squeeze_positive_threshold: f64,
    /// Maximum distance of spot from the flip point, percent of spot.
    pub squeeze_flip_band_pct: f64,
    pub squeeze_stop_pct: f64,
    pub min_wall_strength_pct: f64,
    pub wall_distance_min_pct: f64,
    pub wall_distance_max_pct: f64,
    pub premium_confidence_cap: f64,
    pub condor_min_spread_pct: f64,
    pub condor_max_spread_pct: f64,
    pub condor_min_combined_strength_pct: f64,
    /// Wall magnitude ratio above which a condor is classed as skewed.
    pub condor_balance_ratio: f64,
    pub regime_agreement_bonus: f64,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            squeeze_negative_threshold: -5.0e8,
            squeeze_positive_threshold: 5.0e8,
            squeeze_flip_band_pct: 1.0,
            squeeze_stop_pct: 1.5,
            min_wall_strength_pct: 15.0,
            wall_distance_min_pct: 0.5,
            wall_distance_max_pct: 5.0,
            premium_confidence_cap: 85.0,
            condor_min_spread_pct: 3.0,
            condor_max_spread_pct: 10.0,
            condor_min_combined_strength_pct: 30.0,
            condor_balance_ratio: 1.5,
            regime_agreement_bonus: 10.0,
        }
    }
}

/// Portfolio-level caps enforced by the risk manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// Daily realized loss cap, percent of account value.
    pub daily_loss_pct: Decimal,
    pub max_concurrent_per_strategy: usize,
    /// Total capital at risk cap, percent of account value.
    pub max_portfolio_exposure_pct: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            daily_loss_pct: Decimal::from(2),
            max_concurrent_per_strategy: 3,
            max_portfolio_exposure_pct: Decimal::from(25),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/gex".to_string(),
            max_connections: 10,
        }
    }
}

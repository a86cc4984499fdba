//! Core types, configuration, and traits shared by every gamma-exposure crate.
//!
//! This crate provides:
//! - Exposure snapshots and derived key levels
//! - Regime classification and trade setup types
//! - Layered configuration (`figment`)
//! - The `ExposureSource` seam between the data gateway and the decision cycle

pub mod config;
pub mod config_loader;
pub mod regime;
pub mod setup;
pub mod snapshot;
pub mod traits;

pub use config::{
    AppConfig, DatabaseConfig, ExposureConfig, GatewayConfig, RegimeConfig, RiskLimits,
    SetupConfig,
};
pub use config_loader::ConfigLoader;
pub use regime::{
    GammaRegime, PendingRegime, RecommendedAction, RegimeClassification, RegimeSet, TrendRegime,
    VolatilityRegime,
};
pub use setup::{ExpirationWindow, SetupAction, StrategyType, TradeSetup};
pub use snapshot::{
    ExposureLevel, ExposureSnapshot, ExposureSummary, LevelType, StrikeData, CONTRACT_MULTIPLIER,
};
pub use traits::ExposureSource;

//! Gamma-exposure analytics.
//!
//! - `exposure`: per-strike aggregation, flip point, wall ranking
//! - `greeks`: Black-Scholes gamma/delta and quote-to-snapshot conversion
//! - `regime`: threshold-table regime classification with hysteresis
//! - `setups`: ranked trade setup generation
//!
//! Everything here is pure and deterministic; no I/O.

pub mod exposure;
pub mod greeks;
pub mod regime;
pub mod setups;
pub mod thresholds;

pub use exposure::{ExposureEngine, ExposureError, ExposureProfile, StrikeExposure};
pub use greeks::{OptionQuote, OptionRight};
pub use regime::{RegimeClassifier, RegimeInputs, TrendInputs};
pub use setups::SetupGenerator;
pub use thresholds::ThresholdTable;

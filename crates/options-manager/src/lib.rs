//! Deterministic options decision core.
//!
//! - `risk`: approves or rejects trade setups against portfolio caps
//! - `wheel`: cash-secured put → assignment → covered call lifecycle
//! - `service`: the per-symbol decision cycle feeding the risk gate
//!
//! No LLM in the decision path; every rule is deterministic.

pub mod risk;
pub mod service;
pub mod wheel;

pub use risk::{
    ApprovedSetup, PortfolioState, RejectReason, RejectedSetup, RiskDecision, RiskManager,
    RiskReview,
};
pub use service::{DecisionOutcome, DecisionService, MarketInputs, SkippedSymbol, SymbolDecision};
pub use wheel::{
    CycleReport, InMemoryWheelStore, LegTerms, PutQuote, RollTerms, WheelEngine, WheelError,
    WheelStore,
};

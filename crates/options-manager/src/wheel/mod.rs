//! Wheel strategy lifecycle.
//!
//! - `machine`: pure transitions producing a [`WheelChange`](gex_data::WheelChange)
//! - `store`: where changes are applied atomically (memory or Postgres)
//! - `engine`: per-cycle serialized orchestration over a store
//! - `report`: full-cycle P&L attribution

pub mod engine;
pub mod machine;
pub mod report;
pub mod store;

pub use engine::{PutQuote, WheelEngine};
pub use machine::{LegTerms, RollTerms};
pub use report::CycleReport;
pub use store::{InMemoryWheelStore, WheelStore};

use gex_data::WheelPhase;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, WheelError>;

/// Errors from wheel transitions.
#[derive(Debug, Error)]
pub enum WheelError {
    /// The operation is not allowed from the cycle's current phase.
    #[error("cannot {operation} cycle {cycle_id} in phase {phase}")]
    InvalidStateTransition {
        cycle_id: Uuid,
        phase: WheelPhase,
        operation: &'static str,
    },

    #[error("invalid {operation} input: {message}")]
    InvalidInput {
        operation: &'static str,
        message: String,
    },

    #[error("wheel cycle {0} not found")]
    NotFound(Uuid),

    #[error("wheel storage failed: {0:#}")]
    Storage(anyhow::Error),
}

impl WheelError {
    /// Only storage failures may succeed on retry; the rest are contract
    /// violations by the caller.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    pub(crate) fn invalid_input(operation: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            operation,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_is_retryable() {
        let transition = WheelError::InvalidStateTransition {
            cycle_id: Uuid::nil(),
            phase: WheelPhase::Csp,
            operation: "sell_covered_call",
        };
        assert!(!transition.is_retryable());
        assert!(transition.to_string().contains("phase csp"));
        assert!(WheelError::Storage(anyhow::anyhow!("connection reset")).is_retryable());
        assert!(!WheelError::NotFound(Uuid::nil()).is_retryable());
    }
}

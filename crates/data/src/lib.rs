//! Persistence for wheel strategy cycles.
//!
//! This crate provides:
//! - Cycle, leg and activity models with string-backed enums
//! - A `PostgreSQL` repository that writes each transition in one transaction
//! - The wheel schema, applied with [`WheelRepository::ensure_schema`]

pub mod models;
pub mod repositories;

pub use models::{
    ActivityAction, ActivityRecord, CloseReason, LegAction, LegType, WheelChange, WheelCycle,
    WheelLeg, WheelPhase, SHARES_PER_CONTRACT,
};
pub use repositories::{Repositories, WheelRepository, WHEEL_SCHEMA};

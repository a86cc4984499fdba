//! Persistence models.

pub mod wheel;

pub use wheel::{
    ActivityAction, ActivityRecord, CloseReason, LegAction, LegType, WheelChange, WheelCycle,
    WheelLeg, WheelPhase, SHARES_PER_CONTRACT,
};

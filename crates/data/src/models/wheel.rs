//! Wheel strategy records: cycles, legs, and the activity log.
//!
//! Money fields are `Decimal`. Strikes and premiums are per share; totals
//! and P&L are in account currency.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shares controlled by one option contract.
pub const SHARES_PER_CONTRACT: i64 = 100;

/// Lifecycle phase of a wheel cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WheelPhase {
    /// Selling cash-secured puts; no shares held.
    Csp,
    /// Shares held, no call open.
    Assigned,
    /// Shares held with a covered call open.
    CoveredCall,
    /// Shares sold at the call strike. Terminal.
    CalledAway,
    /// Manually exited. Terminal.
    Closed,
}

impl WheelPhase {
    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csp => "csp",
            Self::Assigned => "assigned",
            Self::CoveredCall => "covered_call",
            Self::CalledAway => "called_away",
            Self::Closed => "closed",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "csp" => Some(Self::Csp),
            "assigned" => Some(Self::Assigned),
            "covered_call" => Some(Self::CoveredCall),
            "called_away" => Some(Self::CalledAway),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CalledAway | Self::Closed)
    }

    /// Phases in which the cycle must hold shares.
    #[must_use]
    pub fn holds_shares(&self) -> bool {
        matches!(self, Self::Assigned | Self::CoveredCall)
    }
}

impl std::fmt::Display for WheelPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Option leg type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegType {
    Csp,
    Cc,
}

impl LegType {
    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csp => "csp",
            Self::Cc => "cc",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "csp" => Some(Self::Csp),
            "cc" => Some(Self::Cc),
            _ => None,
        }
    }
}

/// Order action that opened a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegAction {
    SellToOpen,
}

impl LegAction {
    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SellToOpen => "sell_to_open",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sell_to_open" => Some(Self::SellToOpen),
            _ => None,
        }
    }
}

/// Why a leg was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    ExpiredOtm,
    Assigned,
    CalledAway,
    Rolled,
    Manual,
}

impl CloseReason {
    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExpiredOtm => "expired_otm",
            Self::Assigned => "assigned",
            Self::CalledAway => "called_away",
            Self::Rolled => "rolled",
            Self::Manual => "manual",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "expired_otm" => Some(Self::ExpiredOtm),
            "assigned" => Some(Self::Assigned),
            "called_away" => Some(Self::CalledAway),
            "rolled" => Some(Self::Rolled),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Activity log action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    OpenCsp,
    SellPut,
    CspExpired,
    Assigned,
    SellCc,
    CcExpired,
    CalledAway,
    Roll,
    CloseManual,
}

impl ActivityAction {
    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenCsp => "open_csp",
            Self::SellPut => "sell_put",
            Self::CspExpired => "csp_expired",
            Self::Assigned => "assigned",
            Self::SellCc => "sell_cc",
            Self::CcExpired => "cc_expired",
            Self::CalledAway => "called_away",
            Self::Roll => "roll",
            Self::CloseManual => "close_manual",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "open_csp" => Some(Self::OpenCsp),
            "sell_put" => Some(Self::SellPut),
            "csp_expired" => Some(Self::CspExpired),
            "assigned" => Some(Self::Assigned),
            "sell_cc" => Some(Self::SellCc),
            "cc_expired" => Some(Self::CcExpired),
            "called_away" => Some(Self::CalledAway),
            "roll" => Some(Self::Roll),
            "close_manual" => Some(Self::CloseManual),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One wheel cycle, from the first cash-secured put to call-away or exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WheelCycle {
    pub id: Uuid,
    pub symbol: String,
    pub phase: WheelPhase,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub shares_owned: i64,
    /// Assignment strike less the assigned put's premium; zero before assignment.
    pub share_cost_basis: Decimal,
    pub total_csp_premium: Decimal,
    pub total_cc_premium: Decimal,
    /// Net of roll buy-backs.
    pub total_premium_collected: Decimal,
    pub assignment_date: Option<DateTime<Utc>>,
    pub assignment_price: Option<Decimal>,
    pub called_away_date: Option<DateTime<Utc>>,
    pub called_away_price: Option<Decimal>,
    pub realized_pnl: Decimal,
    /// Bumped by every transition. A store only accepts a change whose
    /// predecessor revision is the one it holds.
    #[serde(default)]
    pub revision: i64,
}

impl WheelCycle {
    /// Creates an empty cycle in the CSP phase.
    #[must_use]
    pub fn new(symbol: impl Into<String>, start_date: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            phase: WheelPhase::Csp,
            start_date,
            end_date: None,
            shares_owned: 0,
            share_cost_basis: Decimal::ZERO,
            total_csp_premium: Decimal::ZERO,
            total_cc_premium: Decimal::ZERO,
            total_premium_collected: Decimal::ZERO,
            assignment_date: None,
            assignment_price: None,
            called_away_date: None,
            called_away_price: None,
            realized_pnl: Decimal::ZERO,
            revision: 0,
        }
    }

    /// Copy of this cycle at the next revision, as a transition's output.
    #[must_use]
    pub fn successor(&self) -> Self {
        Self {
            revision: self.revision + 1,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// True when the phase/share invariant holds.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.phase.holds_shares() == (self.shares_owned > 0)
    }
}

/// One option leg of a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WheelLeg {
    pub id: Uuid,
    pub cycle_id: Uuid,
    pub leg_type: LegType,
    pub action: LegAction,
    pub strike: Decimal,
    pub expiration_date: NaiveDate,
    pub contracts: i32,
    /// Per share.
    pub premium_received: Decimal,
    /// Per share buy-back price; set once when the leg is closed by a trade.
    pub premium_paid: Option<Decimal>,
    pub open_date: DateTime<Utc>,
    pub close_date: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
    pub underlying_price_at_open: Decimal,
    pub underlying_price_at_close: Option<Decimal>,
    pub delta_at_open: Option<Decimal>,
    pub dte_at_open: i32,
}

impl WheelLeg {
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.close_date.is_none()
    }

    /// Shares covered by this leg.
    #[must_use]
    pub fn shares(&self) -> i64 {
        i64::from(self.contracts) * SHARES_PER_CONTRACT
    }

    /// Premium received for the whole leg.
    #[must_use]
    pub fn premium_total(&self) -> Decimal {
        self.premium_received * Decimal::from(self.shares())
    }

    /// Buy-back cost for the whole leg, zero if not bought back.
    #[must_use]
    pub fn cost_to_close(&self) -> Decimal {
        self.premium_paid.unwrap_or(Decimal::ZERO) * Decimal::from(self.shares())
    }

    /// Premium received less buy-back cost.
    #[must_use]
    pub fn net_premium(&self) -> Decimal {
        self.premium_total() - self.cost_to_close()
    }
}

/// Immutable audit record; exactly one per transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub cycle_id: Uuid,
    pub leg_id: Option<Uuid>,
    pub action: ActivityAction,
    pub description: String,
    /// Change to the cycle's premium total.
    pub premium_impact: Decimal,
    /// Change to the cycle's realized P&L.
    pub pnl_impact: Decimal,
    pub underlying_price: Decimal,
    pub option_price: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

/// Everything one transition writes; applied atomically by a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WheelChange {
    /// Cycle state after the transition.
    pub cycle: WheelCycle,
    /// Legs inserted or updated by the transition.
    pub legs: Vec<WheelLeg>,
    pub activity: ActivityRecord,
}

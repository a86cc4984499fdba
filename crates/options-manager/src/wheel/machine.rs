//! Wheel state machine.
//!
//! Every transition is a pure function of the cycle, its legs and the
//! operation's inputs. It returns the complete [`WheelChange`] (updated
//! cycle, touched legs, one activity record) or fails without side effects.
//!
//! ```text
//! CSP ──expired OTM──▶ CSP (ready for sell_put)
//!  │  ──rolled───────▶ CSP
//!  └─assigned──▶ ASSIGNED ──sell_cc──▶ COVERED_CALL ──called away──▶ CALLED_AWAY
//!                   ▲                       │
//!                   └──────expired OTM──────┘ (rolled: stays COVERED_CALL)
//! any non-terminal ──close_manually──▶ CLOSED
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use gex_analytics::greeks::{self, OptionRight};
use gex_data::{
    ActivityAction, ActivityRecord, CloseReason, LegAction, LegType, WheelChange, WheelCycle,
    WheelLeg, WheelPhase, SHARES_PER_CONTRACT,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{Result, WheelError};

// =============================================================================
// Inputs
// =============================================================================

/// Terms of a newly sold option leg. Prices are per share.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegTerms {
    pub strike: Decimal,
    pub expiration: NaiveDate,
    pub premium: Decimal,
    /// Underlying price when the leg is sold.
    pub spot: Decimal,
    /// Defaults to 1 for puts and to all held shares for covered calls.
    pub contracts: Option<i32>,
    /// When set, the leg's opening delta is computed from it.
    pub implied_volatility: Option<f64>,
    pub risk_free_rate: f64,
}

impl LegTerms {
    #[must_use]
    pub fn new(strike: Decimal, expiration: NaiveDate, premium: Decimal, spot: Decimal) -> Self {
        Self {
            strike,
            expiration,
            premium,
            spot,
            contracts: None,
            implied_volatility: None,
            risk_free_rate: 0.0,
        }
    }

    #[must_use]
    pub fn with_contracts(mut self, contracts: i32) -> Self {
        self.contracts = Some(contracts);
        self
    }

    #[must_use]
    pub fn with_implied_volatility(mut self, iv: f64) -> Self {
        self.implied_volatility = Some(iv);
        self
    }

    #[must_use]
    pub fn with_risk_free_rate(mut self, rate: f64) -> Self {
        self.risk_free_rate = rate;
        self
    }
}

/// Terms of a roll: buy back the open leg, sell a new one of the same type
/// and size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollTerms {
    pub strike: Decimal,
    pub expiration: NaiveDate,
    /// Per-share buy-back price of the open leg.
    pub close_price: Decimal,
    /// Per-share premium of the new leg.
    pub open_premium: Decimal,
    pub spot: Decimal,
    pub implied_volatility: Option<f64>,
}

impl RollTerms {
    #[must_use]
    pub fn new(
        strike: Decimal,
        expiration: NaiveDate,
        close_price: Decimal,
        open_premium: Decimal,
        spot: Decimal,
    ) -> Self {
        Self {
            strike,
            expiration,
            close_price,
            open_premium,
            spot,
            implied_volatility: None,
        }
    }

    #[must_use]
    pub fn with_implied_volatility(mut self, iv: f64) -> Self {
        self.implied_volatility = Some(iv);
        self
    }
}

// =============================================================================
// Transitions
// =============================================================================

/// Starts a cycle with its first cash-secured put.
///
/// # Errors
/// `InvalidInput` for an empty symbol or invalid leg terms.
pub fn open_csp(symbol: &str, terms: &LegTerms, at: DateTime<Utc>) -> Result<WheelChange> {
    const OP: &str = "open_csp";
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return Err(WheelError::invalid_input(OP, "symbol is empty"));
    }

    let mut cycle = WheelCycle::new(symbol.to_uppercase(), at);
    let contracts = terms.contracts.unwrap_or(1);
    let leg = new_leg(OP, cycle.id, LegType::Csp, terms, contracts, at)?;
    book_sold_premium(&mut cycle, &leg);

    let activity = ActivityRecord {
        leg_id: Some(leg.id),
        description: describe_sale(&cycle.symbol, &leg, "put"),
        premium_impact: leg.premium_total(),
        option_price: Some(leg.premium_received),
        ..record(cycle.id, ActivityAction::OpenCsp, terms.spot, at)
    };
    Ok(WheelChange {
        cycle,
        legs: vec![leg],
        activity,
    })
}

/// Sells a new put on a cycle that is waiting in the CSP phase.
///
/// # Errors
/// `InvalidStateTransition` unless the phase is CSP with no open leg.
pub fn sell_put(
    cycle: &WheelCycle,
    legs: &[WheelLeg],
    terms: &LegTerms,
    at: DateTime<Utc>,
) -> Result<WheelChange> {
    const OP: &str = "sell_put";
    require_phase(cycle, &[WheelPhase::Csp], OP)?;
    require_no_open_leg(cycle, legs, OP)?;

    let mut next = cycle.successor();
    let contracts = terms.contracts.unwrap_or(1);
    let leg = new_leg(OP, next.id, LegType::Csp, terms, contracts, at)?;
    book_sold_premium(&mut next, &leg);

    let activity = ActivityRecord {
        leg_id: Some(leg.id),
        description: describe_sale(&next.symbol, &leg, "put"),
        premium_impact: leg.premium_total(),
        option_price: Some(leg.premium_received),
        ..record(next.id, ActivityAction::SellPut, terms.spot, at)
    };
    Ok(WheelChange {
        cycle: next,
        legs: vec![leg],
        activity,
    })
}

/// Settles the open put at expiration.
///
/// Above the strike the put expires worthless and its premium is realized.
/// At or below the strike the shares are assigned with a cost basis of
/// strike less the put premium.
///
/// # Errors
/// `InvalidStateTransition` unless a CSP leg is open.
pub fn resolve_csp_expiration(
    cycle: &WheelCycle,
    legs: &[WheelLeg],
    final_spot: Decimal,
    at: DateTime<Utc>,
) -> Result<WheelChange> {
    const OP: &str = "resolve_csp_expiration";
    require_phase(cycle, &[WheelPhase::Csp], OP)?;
    let leg = require_open_leg(cycle, legs, LegType::Csp, OP)?;
    require_positive(OP, "final spot", final_spot)?;

    let mut next = cycle.successor();
    let mut closed = leg.clone();

    let activity = if final_spot > leg.strike {
        let premium = leg.premium_total();
        close_leg(&mut closed, CloseReason::ExpiredOtm, final_spot, at);
        next.realized_pnl += premium;
        ActivityRecord {
            leg_id: Some(closed.id),
            description: format!(
                "{} {} put expired OTM at {final_spot}, realized {premium}",
                next.symbol, leg.strike
            ),
            pnl_impact: premium,
            ..record(next.id, ActivityAction::CspExpired, final_spot, at)
        }
    } else {
        close_leg(&mut closed, CloseReason::Assigned, final_spot, at);
        next.phase = WheelPhase::Assigned;
        next.shares_owned = leg.shares();
        next.share_cost_basis = leg.strike - leg.premium_received;
        next.assignment_date = Some(at);
        next.assignment_price = Some(leg.strike);
        ActivityRecord {
            leg_id: Some(closed.id),
            description: format!(
                "Assigned {} {} shares at {}, cost basis {}",
                next.shares_owned, next.symbol, leg.strike, next.share_cost_basis
            ),
            ..record(next.id, ActivityAction::Assigned, final_spot, at)
        }
    };

    Ok(WheelChange {
        cycle: next,
        legs: vec![closed],
        activity,
    })
}

/// Sells a covered call against assigned shares.
///
/// # Errors
/// `InvalidStateTransition` unless the phase is ASSIGNED with no open leg;
/// `InvalidInput` when the contracts exceed the shares held.
pub fn sell_covered_call(
    cycle: &WheelCycle,
    legs: &[WheelLeg],
    terms: &LegTerms,
    at: DateTime<Utc>,
) -> Result<WheelChange> {
    const OP: &str = "sell_covered_call";
    require_phase(cycle, &[WheelPhase::Assigned], OP)?;
    require_no_open_leg(cycle, legs, OP)?;

    let coverable = i32::try_from(cycle.shares_owned / SHARES_PER_CONTRACT).unwrap_or(i32::MAX);
    let contracts = terms.contracts.unwrap_or(coverable);
    if contracts > coverable {
        return Err(WheelError::invalid_input(
            OP,
            format!(
                "{contracts} contracts need {} shares, {} held",
                i64::from(contracts) * SHARES_PER_CONTRACT,
                cycle.shares_owned
            ),
        ));
    }

    let mut next = cycle.successor();
    let leg = new_leg(OP, next.id, LegType::Cc, terms, contracts, at)?;
    book_sold_premium(&mut next, &leg);
    next.phase = WheelPhase::CoveredCall;

    let activity = ActivityRecord {
        leg_id: Some(leg.id),
        description: describe_sale(&next.symbol, &leg, "call"),
        premium_impact: leg.premium_total(),
        option_price: Some(leg.premium_received),
        ..record(next.id, ActivityAction::SellCc, terms.spot, at)
    };
    Ok(WheelChange {
        cycle: next,
        legs: vec![leg],
        activity,
    })
}

/// Settles the open covered call at expiration.
///
/// Below the strike the call expires worthless, its premium is realized and
/// the cycle returns to ASSIGNED. At or above the strike the covered shares
/// are sold at the strike; the cycle ends once no shares remain.
///
/// # Errors
/// `InvalidStateTransition` unless a CC leg is open.
pub fn resolve_cc_expiration(
    cycle: &WheelCycle,
    legs: &[WheelLeg],
    final_spot: Decimal,
    at: DateTime<Utc>,
) -> Result<WheelChange> {
    const OP: &str = "resolve_cc_expiration";
    require_phase(cycle, &[WheelPhase::CoveredCall], OP)?;
    let leg = require_open_leg(cycle, legs, LegType::Cc, OP)?;
    require_positive(OP, "final spot", final_spot)?;

    let mut next = cycle.successor();
    let mut closed = leg.clone();
    let premium = leg.premium_total();

    let activity = if final_spot < leg.strike {
        close_leg(&mut closed, CloseReason::ExpiredOtm, final_spot, at);
        next.realized_pnl += premium;
        next.phase = WheelPhase::Assigned;
        ActivityRecord {
            leg_id: Some(closed.id),
            description: format!(
                "{} {} call expired OTM at {final_spot}, realized {premium}",
                next.symbol, leg.strike
            ),
            pnl_impact: premium,
            ..record(next.id, ActivityAction::CcExpired, final_spot, at)
        }
    } else {
        close_leg(&mut closed, CloseReason::CalledAway, final_spot, at);
        let called = leg.shares().min(next.shares_owned);
        let share_pnl = (leg.strike - next.share_cost_basis) * Decimal::from(called);
        let pnl = share_pnl + premium;

        next.realized_pnl += pnl;
        next.shares_owned -= called;
        next.called_away_date = Some(at);
        next.called_away_price = Some(leg.strike);
        if next.shares_owned == 0 {
            next.phase = WheelPhase::CalledAway;
            next.end_date = Some(at);
        } else {
            next.phase = WheelPhase::Assigned;
        }

        ActivityRecord {
            leg_id: Some(closed.id),
            description: format!(
                "{called} {} shares called away at {}, share P&L {share_pnl}, call premium {premium}",
                next.symbol, leg.strike
            ),
            pnl_impact: pnl,
            ..record(next.id, ActivityAction::CalledAway, final_spot, at)
        }
    };

    Ok(WheelChange {
        cycle: next,
        legs: vec![closed],
        activity,
    })
}

/// Buys back the open leg and sells a new one of the same type and size.
///
/// The closed leg's net premium is realized; the cycle premium total moves
/// by the roll's net credit. The phase is unchanged.
///
/// # Errors
/// `InvalidStateTransition` when no leg is open.
pub fn roll(
    cycle: &WheelCycle,
    legs: &[WheelLeg],
    terms: &RollTerms,
    at: DateTime<Utc>,
) -> Result<WheelChange> {
    const OP: &str = "roll";
    require_phase(cycle, &[WheelPhase::Csp, WheelPhase::CoveredCall], OP)?;
    let leg_type = match cycle.phase {
        WheelPhase::CoveredCall => LegType::Cc,
        _ => LegType::Csp,
    };
    let leg = require_open_leg(cycle, legs, leg_type, OP)?;
    require_non_negative(OP, "close price", terms.close_price)?;

    let mut closed = leg.clone();
    closed.premium_paid = Some(terms.close_price);
    close_leg(&mut closed, CloseReason::Rolled, terms.spot, at);

    let new_terms = LegTerms {
        strike: terms.strike,
        expiration: terms.expiration,
        premium: terms.open_premium,
        spot: terms.spot,
        contracts: Some(leg.contracts),
        implied_volatility: terms.implied_volatility,
        risk_free_rate: 0.0,
    };
    let mut next = cycle.successor();
    let opened = new_leg(OP, next.id, leg_type, &new_terms, leg.contracts, at)?;

    let shares = Decimal::from(leg.shares());
    let realized = closed.net_premium();
    let net_credit = (terms.open_premium - terms.close_price) * shares;

    next.realized_pnl += realized;
    next.total_premium_collected += net_credit;
    match leg_type {
        LegType::Csp => next.total_csp_premium += net_credit,
        LegType::Cc => next.total_cc_premium += net_credit,
    }

    let activity = ActivityRecord {
        leg_id: Some(opened.id),
        description: format!(
            "Rolled {} {} {} to {} exp {}, paid {} received {}, net {net_credit}",
            next.symbol,
            leg.strike,
            leg_type.as_str(),
            opened.strike,
            opened.expiration_date,
            terms.close_price,
            terms.open_premium
        ),
        premium_impact: net_credit,
        pnl_impact: realized,
        option_price: Some(terms.close_price),
        ..record(next.id, ActivityAction::Roll, terms.spot, at)
    };
    Ok(WheelChange {
        cycle: next,
        legs: vec![closed, opened],
        activity,
    })
}

/// Exits the cycle: buys back any open leg at `close_price` and sells any
/// held shares at `spot`.
///
/// # Errors
/// `InvalidStateTransition` on a terminal cycle.
pub fn close_manually(
    cycle: &WheelCycle,
    legs: &[WheelLeg],
    reason: &str,
    close_price: Decimal,
    spot: Decimal,
    at: DateTime<Utc>,
) -> Result<WheelChange> {
    const OP: &str = "close_manually";
    if cycle.is_terminal() {
        return Err(invalid_transition(cycle, OP));
    }
    require_non_negative(OP, "close price", close_price)?;
    require_positive(OP, "spot", spot)?;

    let mut next = cycle.successor();
    let mut touched = Vec::new();
    let mut pnl = Decimal::ZERO;
    let mut premium_impact = Decimal::ZERO;

    if let Some(leg) = legs.iter().find(|l| l.is_open()) {
        let mut closed = leg.clone();
        closed.premium_paid = Some(close_price);
        close_leg(&mut closed, CloseReason::Manual, spot, at);

        let cost = closed.cost_to_close();
        pnl += closed.net_premium();
        premium_impact -= cost;
        next.total_premium_collected -= cost;
        match closed.leg_type {
            LegType::Csp => next.total_csp_premium -= cost,
            LegType::Cc => next.total_cc_premium -= cost,
        }
        touched.push(closed);
    }

    if next.shares_owned > 0 {
        pnl += (spot - next.share_cost_basis) * Decimal::from(next.shares_owned);
        next.shares_owned = 0;
    }

    next.realized_pnl += pnl;
    next.phase = WheelPhase::Closed;
    next.end_date = Some(at);

    let activity = ActivityRecord {
        leg_id: touched.first().map(|l| l.id),
        description: format!("Closed {} cycle manually: {reason}", next.symbol),
        premium_impact,
        pnl_impact: pnl,
        option_price: touched.first().map(|_| close_price),
        ..record(next.id, ActivityAction::CloseManual, spot, at)
    };
    Ok(WheelChange {
        cycle: next,
        legs: touched,
        activity,
    })
}

// =============================================================================
// Helpers
// =============================================================================

fn record(
    cycle_id: Uuid,
    action: ActivityAction,
    underlying_price: Decimal,
    at: DateTime<Utc>,
) -> ActivityRecord {
    ActivityRecord {
        id: Uuid::new_v4(),
        cycle_id,
        leg_id: None,
        action,
        description: String::new(),
        premium_impact: Decimal::ZERO,
        pnl_impact: Decimal::ZERO,
        underlying_price,
        option_price: None,
        timestamp: at,
    }
}

fn new_leg(
    operation: &'static str,
    cycle_id: Uuid,
    leg_type: LegType,
    terms: &LegTerms,
    contracts: i32,
    at: DateTime<Utc>,
) -> Result<WheelLeg> {
    require_positive(operation, "strike", terms.strike)?;
    require_positive(operation, "spot", terms.spot)?;
    require_non_negative(operation, "premium", terms.premium)?;
    if contracts <= 0 {
        return Err(WheelError::invalid_input(
            operation,
            format!("contracts must be positive, got {contracts}"),
        ));
    }
    let dte = (terms.expiration - at.date_naive()).num_days();
    if dte < 0 {
        return Err(WheelError::invalid_input(
            operation,
            format!("expiration {} is before {}", terms.expiration, at.date_naive()),
        ));
    }
    if let Some(iv) = terms.implied_volatility {
        if !iv.is_finite() || iv <= 0.0 {
            return Err(WheelError::invalid_input(
                operation,
                format!("implied volatility must be positive, got {iv}"),
            ));
        }
    }

    let right = match leg_type {
        LegType::Csp => OptionRight::Put,
        LegType::Cc => OptionRight::Call,
    };

    Ok(WheelLeg {
        id: Uuid::new_v4(),
        cycle_id,
        leg_type,
        action: LegAction::SellToOpen,
        strike: terms.strike,
        expiration_date: terms.expiration,
        contracts,
        premium_received: terms.premium,
        premium_paid: None,
        open_date: at,
        close_date: None,
        close_reason: None,
        underlying_price_at_open: terms.spot,
        underlying_price_at_close: None,
        delta_at_open: opening_delta(right, terms, at),
        dte_at_open: i32::try_from(dte).unwrap_or(i32::MAX),
    })
}

fn opening_delta(right: OptionRight, terms: &LegTerms, at: DateTime<Utc>) -> Option<Decimal> {
    let iv = terms.implied_volatility?;
    let spot = terms.spot.to_f64()?;
    let strike = terms.strike.to_f64()?;
    let years = greeks::years_to_expiry(at, terms.expiration);
    let delta = greeks::delta(right, spot, strike, years, terms.risk_free_rate, iv);
    Decimal::from_f64_retain(delta).map(|d| d.round_dp(4))
}

fn book_sold_premium(cycle: &mut WheelCycle, leg: &WheelLeg) {
    let premium = leg.premium_total();
    match leg.leg_type {
        LegType::Csp => cycle.total_csp_premium += premium,
        LegType::Cc => cycle.total_cc_premium += premium,
    }
    cycle.total_premium_collected += premium;
}

fn close_leg(leg: &mut WheelLeg, reason: CloseReason, underlying: Decimal, at: DateTime<Utc>) {
    leg.close_date = Some(at);
    leg.close_reason = Some(reason);
    leg.underlying_price_at_close = Some(underlying);
}

fn describe_sale(symbol: &str, leg: &WheelLeg, kind: &str) -> String {
    format!(
        "Sold {} {symbol} {} {kind} exp {} for {} ({} total)",
        leg.contracts,
        leg.strike,
        leg.expiration_date,
        leg.premium_received,
        leg.premium_total()
    )
}

fn invalid_transition(cycle: &WheelCycle, operation: &'static str) -> WheelError {
    WheelError::InvalidStateTransition {
        cycle_id: cycle.id,
        phase: cycle.phase,
        operation,
    }
}

fn require_phase(cycle: &WheelCycle, allowed: &[WheelPhase], operation: &'static str) -> Result<()> {
    if allowed.contains(&cycle.phase) {
        Ok(())
    } else {
        Err(invalid_transition(cycle, operation))
    }
}

fn require_no_open_leg(cycle: &WheelCycle, legs: &[WheelLeg], operation: &'static str) -> Result<()> {
    if legs.iter().any(WheelLeg::is_open) {
        return Err(invalid_transition(cycle, operation));
    }
    Ok(())
}

fn require_open_leg<'a>(
    cycle: &WheelCycle,
    legs: &'a [WheelLeg],
    leg_type: LegType,
    operation: &'static str,
) -> Result<&'a WheelLeg> {
    legs.iter()
        .find(|l| l.is_open() && l.leg_type == leg_type)
        .ok_or_else(|| invalid_transition(cycle, operation))
}

fn require_positive(operation: &'static str, field: &str, value: Decimal) -> Result<()> {
    if value <= Decimal::ZERO {
        return Err(WheelError::invalid_input(
            operation,
            format!("{field} must be positive, got {value}"),
        ));
    }
    Ok(())
}

fn require_non_negative(operation: &'static str, field: &str, value: Decimal) -> Result<()> {
    if value < Decimal::ZERO {
        return Err(WheelError::invalid_input(
            operation,
            format!("{field} must not be negative, got {value}"),
        ));
    }
    Ok(())
}

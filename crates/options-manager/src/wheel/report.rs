//! Full-cycle P&L attribution.

use chrono::{DateTime, Utc};
use gex_data::{CloseReason, LegType, WheelCycle, WheelLeg, WheelPhase};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a cycle's money came from.
///
/// Option P&L counts legs that closed without assignment (the assigned put's
/// premium lives in the share cost basis instead). Share P&L is the rest of
/// the realized total, measured against that premium-adjusted basis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub symbol: String,
    pub phase: WheelPhase,
    /// Gross put premium sold, before buy-backs.
    pub csp_premium: Decimal,
    /// Gross call premium sold, before buy-backs.
    pub cc_premium: Decimal,
    /// Buy-back cost of rolled legs.
    pub roll_debits: Decimal,
    /// Buy-back cost of legs closed manually.
    pub close_debits: Decimal,
    pub option_pnl: Decimal,
    pub share_pnl: Decimal,
    pub net_realized: Decimal,
    /// Premium sold and not yet resolved.
    pub open_premium: Decimal,
    pub legs_opened: usize,
    pub rolls: usize,
    pub days_active: i64,
    /// Largest cash collateral any put required.
    pub collateral: Decimal,
    /// Realized P&L over collateral, percent.
    pub return_on_collateral_pct: Decimal,
}

impl CycleReport {
    #[must_use]
    pub fn build(cycle: &WheelCycle, legs: &[WheelLeg], as_of: DateTime<Utc>) -> Self {
        let gross = |leg_type: LegType| -> Decimal {
            legs.iter()
                .filter(|l| l.leg_type == leg_type)
                .map(WheelLeg::premium_total)
                .sum()
        };
        let debits = |reason: CloseReason| -> Decimal {
            legs.iter()
                .filter(|l| l.close_reason == Some(reason))
                .map(WheelLeg::cost_to_close)
                .sum()
        };

        let option_pnl: Decimal = legs
            .iter()
            .filter(|l| matches!(l.close_reason, Some(r) if r != CloseReason::Assigned))
            .map(WheelLeg::net_premium)
            .sum();
        let open_premium: Decimal = legs
            .iter()
            .filter(|l| l.is_open())
            .map(WheelLeg::premium_total)
            .sum();
        let collateral = legs
            .iter()
            .filter(|l| l.leg_type == LegType::Csp)
            .map(|l| l.strike * Decimal::from(l.shares()))
            .max()
            .unwrap_or(Decimal::ZERO);

        let end = cycle.end_date.unwrap_or(as_of);
        let return_on_collateral_pct = if collateral.is_zero() {
            Decimal::ZERO
        } else {
            (cycle.realized_pnl / collateral * Decimal::ONE_HUNDRED).round_dp(2)
        };

        Self {
            cycle_id: cycle.id,
            symbol: cycle.symbol.clone(),
            phase: cycle.phase,
            csp_premium: gross(LegType::Csp),
            cc_premium: gross(LegType::Cc),
            roll_debits: debits(CloseReason::Rolled),
            close_debits: debits(CloseReason::Manual),
            option_pnl,
            share_pnl: cycle.realized_pnl - option_pnl,
            net_realized: cycle.realized_pnl,
            open_premium,
            legs_opened: legs.len(),
            rolls: legs
                .iter()
                .filter(|l| l.close_reason == Some(CloseReason::Rolled))
                .count(),
            days_active: (end - cycle.start_date).num_days().max(0),
            collateral,
            return_on_collateral_pct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wheel::machine::{self, LegTerms, RollTerms};
    use chrono::{NaiveDate, TimeZone};
    use gex_data::WheelChange;
    use rust_decimal_macros::dec;

    fn at(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, month, day, 15, 0, 0).unwrap()
    }

    fn date(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, month, day).unwrap()
    }

    fn apply(cycle: &mut WheelCycle, legs: &mut Vec<WheelLeg>, change: WheelChange) {
        *cycle = change.cycle;
        for leg in change.legs {
            match legs.iter().position(|l| l.id == leg.id) {
                Some(idx) => legs[idx] = leg,
                None => legs.push(leg),
            }
        }
    }

    #[test]
    fn attributes_full_cycle_with_roll() {
        let open = machine::open_csp(
            "SPY",
            &LegTerms::new(dec!(450), date(3, 15), dec!(2.50), dec!(455)),
            at(3, 1),
        )
        .unwrap();
        let (mut cycle, mut legs) = (open.cycle, open.legs);

        // Roll down and out for a 1.00 debit on the old put.
        let change = machine::roll(
            &cycle,
            &legs,
            &RollTerms::new(dec!(450), date(3, 29), dec!(1.00), dec!(2.00), dec!(451)),
            at(3, 14),
        )
        .unwrap();
        apply(&mut cycle, &mut legs, change);

        let change = machine::resolve_csp_expiration(&cycle, &legs, dec!(448), at(3, 29)).unwrap();
        apply(&mut cycle, &mut legs, change);

        let change = machine::sell_covered_call(
            &cycle,
            &legs,
            &LegTerms::new(dec!(455), date(4, 12), dec!(1.50), dec!(449)),
            at(3, 29),
        )
        .unwrap();
        apply(&mut cycle, &mut legs, change);

        let change = machine::resolve_cc_expiration(&cycle, &legs, dec!(457), at(4, 12)).unwrap();
        apply(&mut cycle, &mut legs, change);

        let report = CycleReport::build(&cycle, &legs, at(5, 1));

        // Roll: 250 - 100 = 150. Basis 450 - 2.00 = 448. Called: (455 - 448) * 100 + 150.
        assert_eq!(report.net_realized, dec!(1000));
        assert_eq!(report.option_pnl, dec!(300));
        assert_eq!(report.share_pnl, dec!(700));
        assert_eq!(report.csp_premium, dec!(450));
        assert_eq!(report.cc_premium, dec!(150));
        assert_eq!(report.roll_debits, dec!(100));
        assert_eq!(report.rolls, 1);
        assert_eq!(report.legs_opened, 3);
        assert_eq!(report.open_premium, Decimal::ZERO);
        assert_eq!(report.days_active, 42);
        assert_eq!(report.collateral, dec!(45000));
        assert_eq!(report.return_on_collateral_pct, dec!(2.22));
    }

    #[test]
    fn open_cycle_counts_unresolved_premium() {
        let open = machine::open_csp(
            "IWM",
            &LegTerms::new(dec!(200), date(6, 21), dec!(1.10), dec!(204)).with_contracts(2),
            at(6, 3),
        )
        .unwrap();
        let report = CycleReport::build(&open.cycle, &open.legs, at(6, 10));

        assert_eq!(report.open_premium, dec!(220));
        assert_eq!(report.net_realized, Decimal::ZERO);
        assert_eq!(report.days_active, 7);
        assert_eq!(report.collateral, dec!(40000));
    }
}

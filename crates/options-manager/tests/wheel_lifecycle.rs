//! End-to-end wheel scenarios through the engine and the in-memory store.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use gex_core::{AppConfig, ExposureSnapshot, ExposureSource, StrikeData};
use gex_data::{ActivityAction, CloseReason, WheelPhase};
use gex_options_manager::{
    DecisionService, InMemoryWheelStore, LegTerms, PortfolioState, PutQuote, RollTerms,
    WheelEngine, WheelError, WheelStore,
};
use rust_decimal_macros::dec;

fn at(month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, month, day, 15, 30, 0).unwrap()
}

fn date(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, month, day).unwrap()
}

fn engine() -> WheelEngine<InMemoryWheelStore> {
    WheelEngine::new(Arc::new(InMemoryWheelStore::new()))
}

#[tokio::test]
async fn full_cycle_assigned_then_called_away() {
    let engine = engine();

    let cycle = engine
        .open_csp(
            "SPY",
            LegTerms::new(dec!(450), date(3, 15), dec!(2.50), dec!(455)),
            at(3, 1),
        )
        .await
        .unwrap();

    let cycle = engine
        .resolve_csp_expiration(cycle.id, dec!(448), at(3, 15))
        .await
        .unwrap();
    assert_eq!(cycle.phase, WheelPhase::Assigned);
    assert_eq!(cycle.shares_owned, 100);
    assert_eq!(cycle.share_cost_basis, dec!(447.50));

    let cycle = engine
        .sell_covered_call(
            cycle.id,
            LegTerms::new(dec!(455), date(3, 29), dec!(1.50), dec!(449)),
            at(3, 15),
        )
        .await
        .unwrap();
    assert_eq!(cycle.phase, WheelPhase::CoveredCall);

    let cycle = engine
        .resolve_cc_expiration(cycle.id, dec!(458), at(3, 29))
        .await
        .unwrap();

    assert_eq!(cycle.phase, WheelPhase::CalledAway);
    assert_eq!(cycle.shares_owned, 0);
    assert_eq!(cycle.realized_pnl, dec!(900.00));
    assert_eq!(cycle.total_premium_collected, dec!(400));

    let actions: Vec<_> = engine
        .activity(cycle.id)
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            ActivityAction::OpenCsp,
            ActivityAction::Assigned,
            ActivityAction::SellCc,
            ActivityAction::CalledAway,
        ]
    );

    let legs = engine.legs(cycle.id).await.unwrap();
    assert_eq!(legs[0].close_reason, Some(CloseReason::Assigned));
    assert_eq!(legs[1].close_reason, Some(CloseReason::CalledAway));

    let report = engine.report(cycle.id, at(4, 1)).await.unwrap();
    assert_eq!(report.net_realized, dec!(900));
    assert_eq!(report.share_pnl, dec!(750));
    assert_eq!(report.option_pnl, dec!(150));
    assert_eq!(report.days_active, 28);

    // Terminal: nothing else is allowed.
    let err = engine
        .close_manually(cycle.id, "late exit", dec!(0), dec!(460), at(4, 2))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WheelError::InvalidStateTransition {
            phase: WheelPhase::CalledAway,
            ..
        }
    ));
}

#[tokio::test]
async fn repeated_puts_expiring_otm_accumulate_premium() {
    let engine = engine();
    let cycle = engine
        .open_csp(
            "AMD",
            LegTerms::new(dec!(150), date(5, 17), dec!(1.25), dec!(158)).with_contracts(2),
            at(5, 1),
        )
        .await
        .unwrap();

    let cycle = engine
        .resolve_csp_expiration(cycle.id, dec!(155), at(5, 17))
        .await
        .unwrap();
    assert_eq!(cycle.phase, WheelPhase::Csp);
    assert_eq!(cycle.shares_owned, 0);
    assert_eq!(cycle.realized_pnl, dec!(250));

    let cycle = engine
        .sell_put(
            cycle.id,
            LegTerms::new(dec!(150), date(5, 31), dec!(1.00), dec!(155)).with_contracts(2),
            at(5, 17),
        )
        .await
        .unwrap();
    let cycle = engine
        .resolve_csp_expiration(cycle.id, dec!(151), at(5, 31))
        .await
        .unwrap();

    assert_eq!(cycle.realized_pnl, dec!(450));
    assert_eq!(cycle.total_csp_premium, dec!(450));
    assert_eq!(engine.store().open_cycles(Some("AMD")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn rolled_covered_call_then_manual_exit() {
    let engine = engine();
    let cycle = engine
        .open_csp(
            "KO",
            LegTerms::new(dec!(60), date(6, 21), dec!(0.60), dec!(61)),
            at(6, 3),
        )
        .await
        .unwrap();
    let cycle = engine
        .resolve_csp_expiration(cycle.id, dec!(59), at(6, 21))
        .await
        .unwrap();
    let cycle = engine
        .sell_covered_call(
            cycle.id,
            LegTerms::new(dec!(61), date(7, 5), dec!(0.40), dec!(59)),
            at(6, 21),
        )
        .await
        .unwrap();

    let cycle = engine
        .roll(
            cycle.id,
            RollTerms::new(dec!(62), date(7, 19), dec!(0.90), dec!(0.70), dec!(60.80)),
            at(7, 1),
        )
        .await
        .unwrap();
    assert_eq!(cycle.phase, WheelPhase::CoveredCall);
    // Bought back at 0.90 against 0.40 received.
    assert_eq!(cycle.realized_pnl, dec!(-50));
    assert_eq!(cycle.total_cc_premium, dec!(20));

    let cycle = engine
        .close_manually(cycle.id, "dividend risk", dec!(0.30), dec!(61.50), at(7, 10))
        .await
        .unwrap();

    // Call: 70 - 30. Shares: (61.50 - 59.40) * 100.
    assert_eq!(cycle.realized_pnl, dec!(200));
    assert_eq!(cycle.phase, WheelPhase::Closed);
    assert_eq!(cycle.shares_owned, 0);

    let report = engine.report(cycle.id, at(8, 1)).await.unwrap();
    assert_eq!(report.rolls, 1);
    assert_eq!(report.roll_debits, dec!(90));
    assert_eq!(report.close_debits, dec!(30));
    assert_eq!(report.days_active, 37);
    assert!(engine.store().open_cycles(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn cycles_progress_independently() {
    let engine = Arc::new(engine());
    let a = engine
        .open_csp(
            "AAPL",
            LegTerms::new(dec!(180), date(4, 19), dec!(2), dec!(185)),
            at(4, 1),
        )
        .await
        .unwrap();
    let b = engine
        .open_csp(
            "MSFT",
            LegTerms::new(dec!(400), date(4, 19), dec!(5), dec!(410)),
            at(4, 1),
        )
        .await
        .unwrap();

    let (ra, rb) = tokio::join!(
        engine.resolve_csp_expiration(a.id, dec!(170), at(4, 19)),
        engine.resolve_csp_expiration(b.id, dec!(420), at(4, 19)),
    );

    assert_eq!(ra.unwrap().phase, WheelPhase::Assigned);
    let b = rb.unwrap();
    assert_eq!(b.phase, WheelPhase::Csp);
    assert_eq!(b.realized_pnl, dec!(500));
}

struct WallSource;

#[async_trait]
impl ExposureSource for WallSource {
    async fn fetch_snapshot(&self, symbol: &str) -> Result<ExposureSnapshot> {
        Ok(ExposureSnapshot::new(
            symbol,
            100.0,
            vec![
                StrikeData::new(97.0, 0.0, 0.05, 10_000.0),
                StrikeData::new(103.0, 0.05, 0.0, 10_000.0),
            ],
        )
        .collected_at(at(3, 1)))
    }
}

#[tokio::test]
async fn approved_wheel_setup_opens_a_cycle() {
    let service = DecisionService::from_config(Arc::new(WallSource), &AppConfig::default());
    let outcome = service
        .run(
            &["XYZ".to_string()],
            &HashMap::new(),
            &PortfolioState::new(dec!(250000)),
        )
        .await;

    let quotes = HashMap::from([("XYZ".to_string(), PutQuote::new(date(4, 19), dec!(1.10)))]);
    let engine = engine();
    let cycles = engine.open_approved(&outcome.review, &quotes, at(3, 1)).await;

    for cycle in &cycles {
        assert_eq!(cycle.phase, WheelPhase::Csp);
        let legs = engine.legs(cycle.id).await.unwrap();
        assert!(legs[0].strike < dec!(100));
        assert_eq!(legs[0].premium_received, dec!(1.10));
    }

    let opened = engine.store().open_cycles(Some("XYZ")).await.unwrap().len();
    assert_eq!(opened, outcome.review.wheel_candidates().count());
}

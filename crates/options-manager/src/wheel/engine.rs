//! Wheel engine: runs state-machine transitions against a store.
//!
//! Transitions on one cycle are serialized by a per-cycle async lock held
//! across load, transition and apply. Different cycles run independently.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use gex_core::StrategyType;
use gex_data::{ActivityRecord, WheelChange, WheelCycle, WheelLeg};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::machine::{self, LegTerms, RollTerms};
use super::report::CycleReport;
use super::store::WheelStore;
use super::{Result, WheelError};
use crate::risk::{ApprovedSetup, RiskReview};

pub struct WheelEngine<S> {
    store: Arc<S>,
    cycle_locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl<S: WheelStore> WheelEngine<S> {
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            cycle_locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Opens a new cycle with a cash-secured put.
    ///
    /// # Errors
    /// `InvalidInput` for bad terms, `Storage` if the change cannot be written.
    pub async fn open_csp(
        &self,
        symbol: &str,
        terms: LegTerms,
        at: DateTime<Utc>,
    ) -> Result<WheelCycle> {
        let change = machine::open_csp(symbol, &terms, at).inspect_err(|e| {
            error!(symbol, error = %e, "Rejected wheel transition");
        })?;
        let cycle_id = change.cycle.id;
        let lock = self.lock_for(cycle_id);
        let result = {
            let _guard = lock.lock().await;
            self.commit(change).await
        };
        self.release_lock(cycle_id, lock);
        result
    }

    /// Opens a cycle for a risk-approved wheel setup: a put at the setup's
    /// strike, quoted at `premium` for `expiration`.
    ///
    /// # Errors
    /// `InvalidInput` for non-wheel setups or prices that cannot be
    /// represented; otherwise as [`open_csp`](Self::open_csp).
    pub async fn open_from_setup(
        &self,
        approved: &ApprovedSetup,
        expiration: NaiveDate,
        premium: Decimal,
        at: DateTime<Utc>,
    ) -> Result<WheelCycle> {
        let setup = &approved.setup;
        if setup.strategy_type != StrategyType::Wheel {
            return Err(WheelError::invalid_input(
                "open_from_setup",
                format!("{} setup for {} is not a wheel", setup.strategy_type, setup.symbol),
            ));
        }
        let strike = to_price(setup.strike, "strike")?;
        let spot = to_price(setup.entry_price, "entry price")?;
        self.open_csp(&setup.symbol, LegTerms::new(strike, expiration, premium, spot), at)
            .await
    }

    /// Opens a cycle for every approved wheel setup that has a put quote.
    /// Setups without a quote, or whose open fails, are logged and left out.
    pub async fn open_approved(
        &self,
        review: &RiskReview,
        quotes: &HashMap<String, PutQuote>,
        at: DateTime<Utc>,
    ) -> Vec<WheelCycle> {
        let mut opened = Vec::new();
        for approved in review.wheel_candidates() {
            let symbol = &approved.setup.symbol;
            let Some(quote) = quotes.get(symbol) else {
                warn!(symbol = %symbol, strike = approved.setup.strike, "No put quote for approved wheel setup");
                continue;
            };
            match self
                .open_from_setup(approved, quote.expiration, quote.premium, at)
                .await
            {
                Ok(cycle) => opened.push(cycle),
                Err(e) => warn!(symbol = %symbol, error = %e, "Could not open wheel cycle"),
            }
        }
        opened
    }

    /// # Errors
    /// See [`machine::sell_put`].
    pub async fn sell_put(
        &self,
        cycle_id: Uuid,
        terms: LegTerms,
        at: DateTime<Utc>,
    ) -> Result<WheelCycle> {
        self.transition(cycle_id, |cycle, legs| {
            machine::sell_put(cycle, legs, &terms, at)
        })
        .await
    }

    /// # Errors
    /// See [`machine::resolve_csp_expiration`].
    pub async fn resolve_csp_expiration(
        &self,
        cycle_id: Uuid,
        final_spot: Decimal,
        at: DateTime<Utc>,
    ) -> Result<WheelCycle> {
        self.transition(cycle_id, |cycle, legs| {
            machine::resolve_csp_expiration(cycle, legs, final_spot, at)
        })
        .await
    }

    /// # Errors
    /// See [`machine::sell_covered_call`].
    pub async fn sell_covered_call(
        &self,
        cycle_id: Uuid,
        terms: LegTerms,
        at: DateTime<Utc>,
    ) -> Result<WheelCycle> {
        self.transition(cycle_id, |cycle, legs| {
            machine::sell_covered_call(cycle, legs, &terms, at)
        })
        .await
    }

    /// # Errors
    /// See [`machine::resolve_cc_expiration`].
    pub async fn resolve_cc_expiration(
        &self,
        cycle_id: Uuid,
        final_spot: Decimal,
        at: DateTime<Utc>,
    ) -> Result<WheelCycle> {
        self.transition(cycle_id, |cycle, legs| {
            machine::resolve_cc_expiration(cycle, legs, final_spot, at)
        })
        .await
    }

    /// # Errors
    /// See [`machine::roll`].
    pub async fn roll(
        &self,
        cycle_id: Uuid,
        terms: RollTerms,
        at: DateTime<Utc>,
    ) -> Result<WheelCycle> {
        self.transition(cycle_id, |cycle, legs| machine::roll(cycle, legs, &terms, at))
            .await
    }

    /// # Errors
    /// See [`machine::close_manually`].
    pub async fn close_manually(
        &self,
        cycle_id: Uuid,
        reason: &str,
        close_price: Decimal,
        spot: Decimal,
        at: DateTime<Utc>,
    ) -> Result<WheelCycle> {
        self.transition(cycle_id, |cycle, legs| {
            machine::close_manually(cycle, legs, reason, close_price, spot, at)
        })
        .await
    }

    /// # Errors
    /// `NotFound` for an unknown cycle, `Storage` on read failure.
    pub async fn cycle(&self, cycle_id: Uuid) -> Result<WheelCycle> {
        self.store
            .load_cycle(cycle_id)
            .await
            .map_err(WheelError::Storage)?
            .ok_or(WheelError::NotFound(cycle_id))
    }

    /// # Errors
    /// `Storage` on read failure.
    pub async fn legs(&self, cycle_id: Uuid) -> Result<Vec<WheelLeg>> {
        self.store.legs(cycle_id).await.map_err(WheelError::Storage)
    }

    /// # Errors
    /// `Storage` on read failure.
    pub async fn activity(&self, cycle_id: Uuid) -> Result<Vec<ActivityRecord>> {
        self.store
            .activity(cycle_id)
            .await
            .map_err(WheelError::Storage)
    }

    /// P&L attribution for one cycle as of `as_of`.
    ///
    /// # Errors
    /// `NotFound` for an unknown cycle, `Storage` on read failure.
    pub async fn report(&self, cycle_id: Uuid, as_of: DateTime<Utc>) -> Result<CycleReport> {
        let cycle = self.cycle(cycle_id).await?;
        let legs = self.legs(cycle_id).await?;
        Ok(CycleReport::build(&cycle, &legs, as_of))
    }

    async fn transition<F>(&self, cycle_id: Uuid, step: F) -> Result<WheelCycle>
    where
        F: FnOnce(&WheelCycle, &[WheelLeg]) -> Result<WheelChange> + Send,
    {
        let lock = self.lock_for(cycle_id);
        let result = {
            let _guard = lock.lock().await;
            self.transition_locked(cycle_id, step).await
        };
        self.release_lock(cycle_id, lock);
        result
    }

    async fn transition_locked<F>(&self, cycle_id: Uuid, step: F) -> Result<WheelCycle>
    where
        F: FnOnce(&WheelCycle, &[WheelLeg]) -> Result<WheelChange> + Send,
    {
        let cycle = self.cycle(cycle_id).await?;
        let legs = self.legs(cycle_id).await?;

        let change = step(&cycle, &legs).inspect_err(|e| {
            error!(
                cycle_id = %cycle_id,
                symbol = %cycle.symbol,
                phase = %cycle.phase,
                error = %e,
                "Rejected wheel transition"
            );
        })?;
        self.commit(change).await
    }

    async fn commit(&self, change: WheelChange) -> Result<WheelCycle> {
        self.store
            .apply(&change)
            .await
            .map_err(WheelError::Storage)?;

        info!(
            cycle_id = %change.cycle.id,
            symbol = %change.cycle.symbol,
            action = %change.activity.action,
            phase = %change.cycle.phase,
            premium_impact = %change.activity.premium_impact,
            pnl_impact = %change.activity.pnl_impact,
            realized_pnl = %change.cycle.realized_pnl,
            "Wheel transition applied"
        );
        Ok(change.cycle)
    }

    fn lock_for(&self, cycle_id: Uuid) -> Arc<AsyncMutex<()>> {
        self.cycle_locks
            .lock()
            .entry(cycle_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drops the cycle's lock entry once no other caller holds or waits on it.
    fn release_lock(&self, cycle_id: Uuid, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self.cycle_locks.lock();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&cycle_id);
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.cycle_locks.lock().len()
    }
}

/// Put quote used to open a cycle for an approved wheel setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutQuote {
    pub expiration: NaiveDate,
    pub premium: Decimal,
}

impl PutQuote {
    #[must_use]
    pub fn new(expiration: NaiveDate, premium: Decimal) -> Self {
        Self {
            expiration,
            premium,
        }
    }
}

fn to_price(value: f64, field: &str) -> Result<Decimal> {
    Decimal::from_f64_retain(value)
        .filter(|d| d.is_sign_positive() && !d.is_zero())
        .map(|d| d.round_dp(2))
        .ok_or_else(|| {
            WheelError::invalid_input("open_from_setup", format!("{field} {value} is not a valid price"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wheel::store::InMemoryWheelStore;
    use chrono::TimeZone;
    use gex_core::{ExpirationWindow, SetupAction, TradeSetup};
    use gex_data::WheelPhase;
    use rust_decimal_macros::dec;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 15, 0, 0).unwrap()
    }

    fn put() -> LegTerms {
        LegTerms::new(
            dec!(50),
            NaiveDate::from_ymd_opt(2024, 5, 17).unwrap(),
            dec!(0.80),
            dec!(52),
        )
        .with_contracts(3)
    }

    #[tokio::test]
    async fn unknown_cycle_is_not_found() {
        let engine = WheelEngine::new(Arc::new(InMemoryWheelStore::new()));
        let err = engine
            .resolve_csp_expiration(Uuid::new_v4(), dec!(50), at(17))
            .await
            .unwrap_err();
        assert!(matches!(err, WheelError::NotFound(_)));
    }

    #[tokio::test]
    async fn storage_failure_leaves_state_untouched() {
        let store = Arc::new(InMemoryWheelStore::new());
        let engine = WheelEngine::new(Arc::clone(&store));
        let cycle = engine.open_csp("XYZ", put(), at(1)).await.unwrap();

        store.fail_next_apply();
        let err = engine
            .resolve_csp_expiration(cycle.id, dec!(49), at(17))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let reloaded = engine.cycle(cycle.id).await.unwrap();
        assert_eq!(reloaded, cycle);
        assert_eq!(engine.activity(cycle.id).await.unwrap().len(), 1);
        assert!(engine.legs(cycle.id).await.unwrap()[0].is_open());
    }

    #[tokio::test]
    async fn invalid_transition_writes_no_activity() {
        let engine = WheelEngine::new(Arc::new(InMemoryWheelStore::new()));
        let cycle = engine.open_csp("XYZ", put(), at(1)).await.unwrap();

        let err = engine
            .resolve_cc_expiration(cycle.id, dec!(60), at(17))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(engine.activity(cycle.id).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_transitions_on_one_cycle_are_serialized() {
        let engine = Arc::new(WheelEngine::new(Arc::new(InMemoryWheelStore::new())));
        let cycle = engine.open_csp("XYZ", put(), at(1)).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    engine.resolve_csp_expiration(cycle.id, dec!(55), at(17)).await
                })
            })
            .collect();

        let mut ok = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                ok += 1;
            }
        }

        assert_eq!(ok, 1);
        let final_cycle = engine.cycle(cycle.id).await.unwrap();
        assert_eq!(final_cycle.realized_pnl, dec!(240));
        assert_eq!(engine.activity(cycle.id).await.unwrap().len(), 2);
        assert_eq!(engine.lock_count(), 0);
    }

    #[tokio::test]
    async fn lock_entries_are_dropped_after_transitions() {
        let engine = WheelEngine::new(Arc::new(InMemoryWheelStore::new()));
        let cycle = engine.open_csp("XYZ", put(), at(1)).await.unwrap();
        assert_eq!(engine.lock_count(), 0);

        engine
            .resolve_cc_expiration(cycle.id, dec!(60), at(17))
            .await
            .unwrap_err();
        engine
            .resolve_csp_expiration(cycle.id, dec!(55), at(17))
            .await
            .unwrap();
        assert_eq!(engine.lock_count(), 0);
    }

    fn approved(strategy_type: StrategyType, strike: f64, entry_price: f64) -> ApprovedSetup {
        ApprovedSetup {
            setup: TradeSetup {
                symbol: "XYZ".to_string(),
                strategy_type,
                action: SetupAction::SellPut,
                entry_price,
                target_price: entry_price,
                stop_loss: strike * 0.97,
                strike,
                secondary_strike: None,
                expiration_window: ExpirationWindow::new(30, 45),
                confidence_score: 80.0,
                risk_reward_ratio: 1.5,
                capital_at_risk: strike * 100.0,
                notes: String::new(),
            },
            residual_risk_budget: dec!(50000),
            utilization_pct: dec!(20),
        }
    }

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 21).unwrap()
    }

    #[tokio::test]
    async fn approved_wheel_setup_opens_put_at_setup_strike() {
        let engine = WheelEngine::new(Arc::new(InMemoryWheelStore::new()));
        let cycle = engine
            .open_from_setup(&approved(StrategyType::Wheel, 97.0, 100.0), expiry(), dec!(1.10), at(20))
            .await
            .unwrap();

        assert_eq!(cycle.symbol, "XYZ");
        assert_eq!(cycle.phase, WheelPhase::Csp);
        let legs = engine.legs(cycle.id).await.unwrap();
        assert_eq!(legs[0].strike, dec!(97));
        assert_eq!(legs[0].premium_received, dec!(1.10));
        assert_eq!(legs[0].expiration_date, expiry());
    }

    #[tokio::test]
    async fn non_wheel_or_unpriceable_setup_is_refused() {
        let engine = WheelEngine::new(Arc::new(InMemoryWheelStore::new()));
        let err = engine
            .open_from_setup(
                &approved(StrategyType::CallCreditSpread, 103.0, 100.0),
                expiry(),
                dec!(1),
                at(20),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WheelError::InvalidInput { .. }));

        let err = engine
            .open_from_setup(&approved(StrategyType::Wheel, f64::NAN, 100.0), expiry(), dec!(1), at(20))
            .await
            .unwrap_err();
        assert!(matches!(err, WheelError::InvalidInput { .. }));
        assert_eq!(engine.store().cycle_count(), 0);
    }

    #[tokio::test]
    async fn open_approved_routes_only_quoted_wheel_setups() {
        let engine = WheelEngine::new(Arc::new(InMemoryWheelStore::new()));
        let mut unquoted = approved(StrategyType::Wheel, 48.0, 50.0);
        unquoted.setup.symbol = "ABC".to_string();
        let review = RiskReview {
            approved: vec![
                approved(StrategyType::Wheel, 97.0, 100.0),
                approved(StrategyType::IronCondor, 95.0, 100.0),
                unquoted,
            ],
            rejected: Vec::new(),
        };
        let quotes = HashMap::from([("XYZ".to_string(), PutQuote::new(expiry(), dec!(1.10)))]);

        let opened = engine.open_approved(&review, &quotes, at(20)).await;

        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].symbol, "XYZ");
        assert_eq!(engine.store().cycle_count(), 1);
    }
}

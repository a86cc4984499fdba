//! Decision cycle: fetch → exposure → regime → setups → risk gate.
//!
//! Symbols are evaluated concurrently; each symbol is serialized behind its
//! own lock so its regime history advances one evaluation at a time. A
//! failing symbol is logged and skipped without affecting the others.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use gex_analytics::{
    ExposureEngine, ExposureProfile, RegimeClassifier, RegimeInputs, SetupGenerator, TrendInputs,
};
use gex_core::{AppConfig, ExposureSource, RegimeClassification, TradeSetup};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::risk::{PortfolioState, RiskManager, RiskReview};

/// Volatility and trend inputs for one symbol, supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketInputs {
    pub iv_rank: f64,
    pub iv_hv_ratio: f64,
    pub trend: TrendInputs,
}

impl Default for MarketInputs {
    /// Neutral reading: mid IV rank, IV equal to HV, flat trend.
    fn default() -> Self {
        Self {
            iv_rank: 50.0,
            iv_hv_ratio: 1.0,
            trend: TrendInputs::default(),
        }
    }
}

/// Everything computed for one symbol in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolDecision {
    pub symbol: String,
    pub profile: ExposureProfile,
    pub regime: RegimeClassification,
    /// Ranked, before risk gating.
    pub setups: Vec<TradeSetup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSymbol {
    pub symbol: String,
    pub error: String,
}

/// Result of one decision cycle across symbols.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub decisions: Vec<SymbolDecision>,
    pub review: RiskReview,
    pub skipped: Vec<SkippedSymbol>,
}

pub struct DecisionService {
    source: Arc<dyn ExposureSource>,
    engine: ExposureEngine,
    classifier: RegimeClassifier,
    generator: SetupGenerator,
    risk: RiskManager,
    regimes: Mutex<HashMap<String, RegimeClassification>>,
    symbol_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl DecisionService {
    #[must_use]
    pub fn new(
        source: Arc<dyn ExposureSource>,
        engine: ExposureEngine,
        classifier: RegimeClassifier,
        generator: SetupGenerator,
        risk: RiskManager,
    ) -> Self {
        Self {
            source,
            engine,
            classifier,
            generator,
            risk,
            regimes: Mutex::new(HashMap::new()),
            symbol_locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn from_config(source: Arc<dyn ExposureSource>, config: &AppConfig) -> Self {
        Self::new(
            source,
            ExposureEngine::new(&config.exposure),
            RegimeClassifier::new(config.regime.clone()),
            SetupGenerator::new(config.setups.clone()),
            RiskManager::new(config.risk.clone()),
        )
    }

    /// Last accepted classification for a symbol.
    #[must_use]
    pub fn regime(&self, symbol: &str) -> Option<RegimeClassification> {
        self.regimes.lock().get(&symbol.to_uppercase()).cloned()
    }

    /// Evaluates one symbol and records its new regime state.
    ///
    /// # Errors
    /// Propagates gateway and exposure errors unchanged.
    pub async fn evaluate(&self, symbol: &str, inputs: &MarketInputs) -> Result<SymbolDecision> {
        let key = symbol.to_uppercase();
        let lock = self.lock_for(&key);
        let result = {
            let _guard = lock.lock().await;
            self.evaluate_locked(key.clone(), inputs).await
        };
        self.release_lock(&key, lock);
        result
    }

    async fn evaluate_locked(&self, key: String, inputs: &MarketInputs) -> Result<SymbolDecision> {
        let snapshot = self.source.fetch_snapshot(&key).await?;
        let profile = self
            .engine
            .compute(&snapshot)
            .with_context(|| format!("exposure computation failed for {key}"))?;

        let prior = self.regime(&key);
        let regime_inputs =
            RegimeInputs::from_profile(&profile, inputs.iv_rank, inputs.iv_hv_ratio, inputs.trend);
        let regime = self
            .classifier
            .classify(&profile.levels, &regime_inputs, prior.as_ref());
        self.regimes.lock().insert(key.clone(), regime.clone());

        let setups = self.generator.generate(&regime, &profile);
        debug!(
            symbol = %key,
            action = ?regime.recommended_action,
            confidence = regime.confidence,
            setups = setups.len(),
            "Symbol evaluated"
        );

        Ok(SymbolDecision {
            symbol: key,
            profile,
            regime,
            setups,
        })
    }

    /// Runs one decision cycle. Symbols without an entry in `inputs` use
    /// [`MarketInputs::default`].
    pub async fn run(
        &self,
        symbols: &[String],
        inputs: &HashMap<String, MarketInputs>,
        portfolio: &PortfolioState,
    ) -> DecisionOutcome {
        let evaluations = symbols.iter().map(|symbol| async move {
            let market = inputs.get(symbol).copied().unwrap_or_else(|| {
                debug!(symbol = %symbol, "No market inputs, using neutral defaults");
                MarketInputs::default()
            });
            (symbol.clone(), self.evaluate(symbol, &market).await)
        });

        let mut outcome = DecisionOutcome::default();
        for (symbol, result) in join_all(evaluations).await {
            match result {
                Ok(decision) => outcome.decisions.push(decision),
                Err(e) => {
                    warn!(symbol = %symbol, error = %format!("{e:#}"), "Skipping symbol this cycle");
                    outcome.skipped.push(SkippedSymbol {
                        symbol,
                        error: format!("{e:#}"),
                    });
                }
            }
        }

        let mut candidates: Vec<TradeSetup> = outcome
            .decisions
            .iter()
            .flat_map(|d| d.setups.iter().cloned())
            .collect();
        candidates.sort_by(|a, b| {
            b.confidence_score
                .total_cmp(&a.confidence_score)
                .then(b.risk_reward_ratio.total_cmp(&a.risk_reward_ratio))
        });

        outcome.review = self.risk.filter(candidates, portfolio);
        info!(
            evaluated = outcome.decisions.len(),
            skipped = outcome.skipped.len(),
            approved = outcome.review.approved.len(),
            rejected = outcome.review.rejected.len(),
            "Decision cycle complete"
        );
        outcome
    }

    fn lock_for(&self, symbol: &str) -> Arc<AsyncMutex<()>> {
        self.symbol_locks
            .lock()
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn release_lock(&self, symbol: &str, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self.symbol_locks.lock();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(symbol);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use gex_core::{ExposureSnapshot, StrikeData};
    use rust_decimal_macros::dec;

    struct FixedSource {
        snapshots: HashMap<String, ExposureSnapshot>,
    }

    #[async_trait]
    impl ExposureSource for FixedSource {
        async fn fetch_snapshot(&self, symbol: &str) -> Result<ExposureSnapshot> {
            self.snapshots
                .get(symbol)
                .cloned()
                .ok_or_else(|| anyhow!("provider unavailable for {symbol}"))
        }
    }

    fn walls_snapshot(symbol: &str) -> ExposureSnapshot {
        ExposureSnapshot::new(
            symbol,
            100.0,
            vec![
                StrikeData::new(97.0, 0.0, 0.05, 10_000.0),
                StrikeData::new(100.0, 0.01, 0.01, 1_000.0),
                StrikeData::new(103.0, 0.05, 0.0, 10_000.0),
            ],
        )
    }

    fn service(symbols: &[&str]) -> DecisionService {
        let snapshots = symbols
            .iter()
            .map(|s| ((*s).to_string(), walls_snapshot(s)))
            .collect();
        DecisionService::from_config(Arc::new(FixedSource { snapshots }), &AppConfig::default())
    }

    fn names(symbols: &[&str]) -> Vec<String> {
        symbols.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn failing_symbol_is_skipped_not_fatal() {
        let service = service(&["SPY"]);
        let outcome = service
            .run(
                &names(&["SPY", "QQQ"]),
                &HashMap::new(),
                &PortfolioState::new(dec!(100000)),
            )
            .await;

        assert_eq!(outcome.decisions.len(), 1);
        assert_eq!(outcome.decisions[0].symbol, "SPY");
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].symbol, "QQQ");
        assert!(outcome.skipped[0].error.contains("provider unavailable"));
    }

    #[tokio::test]
    async fn regime_state_carries_between_cycles() {
        let service = service(&["SPY"]);
        let inputs = HashMap::new();
        let portfolio = PortfolioState::new(dec!(100000));

        service.run(&names(&["SPY"]), &inputs, &portfolio).await;
        assert_eq!(service.regime("SPY").unwrap().bars_in_regime, 1);

        service.run(&names(&["SPY"]), &inputs, &portfolio).await;
        assert_eq!(service.regime("spy").unwrap().bars_in_regime, 2);
    }

    #[tokio::test]
    async fn symbol_locks_do_not_accumulate() {
        let service = service(&["SPY", "QQQ"]);
        service
            .run(
                &names(&["SPY", "QQQ", "IWM"]),
                &HashMap::new(),
                &PortfolioState::new(dec!(100000)),
            )
            .await;
        assert!(service.symbol_locks.lock().is_empty());
        assert!(service.regime("SPY").is_some());
    }

    #[tokio::test]
    async fn every_setup_is_either_approved_or_rejected() {
        let service = service(&["SPY", "IWM"]);
        let outcome = service
            .run(
                &names(&["SPY", "IWM"]),
                &HashMap::new(),
                &PortfolioState::new(dec!(100000)),
            )
            .await;

        let generated: usize = outcome.decisions.iter().map(|d| d.setups.len()).sum();
        assert_eq!(
            outcome.review.approved.len() + outcome.review.rejected.len(),
            generated
        );
    }

    #[tokio::test]
    async fn daily_loss_cap_blocks_all_setups() {
        let service = service(&["SPY"]);
        let portfolio = PortfolioState::new(dec!(100000)).with_daily_realized_pnl(dec!(-5000));
        let outcome = service
            .run(&names(&["SPY"]), &HashMap::new(), &portfolio)
            .await;

        assert!(outcome.review.approved.is_empty());
        assert!(outcome
            .review
            .rejected
            .iter()
            .all(|r| r.reason.code() == "daily_loss_cap"));
    }

    #[tokio::test]
    async fn empty_snapshot_error_propagates() {
        let mut snapshots = HashMap::new();
        snapshots.insert(
            "SPY".to_string(),
            ExposureSnapshot::new("SPY", 100.0, Vec::new()),
        );
        let service =
            DecisionService::from_config(Arc::new(FixedSource { snapshots }), &AppConfig::default());

        let err = service
            .evaluate("SPY", &MarketInputs::default())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("no strikes"));
        assert!(service.regime("SPY").is_none());
    }
}

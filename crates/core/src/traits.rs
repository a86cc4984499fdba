use crate::snapshot::ExposureSnapshot;
use anyhow::Result;
use async_trait::async_trait;

/// Source of per-strike exposure snapshots.
///
/// The data gateway is the production implementation; tests and backtests
/// supply fixed snapshots.
#[async_trait]
pub trait ExposureSource: Send + Sync {
    async fn fetch_snapshot(&self, symbol: &str) -> Result<ExposureSnapshot>;
}

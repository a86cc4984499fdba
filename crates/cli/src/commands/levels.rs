//! Levels command: fetch one snapshot and print the computed exposure profile.

use anyhow::{Context, Result};
use clap::Args;
use gex_analytics::ExposureEngine;
use tracing::info;

use super::{gateway, print_json, ConfigArgs};

/// Arguments for the levels command.
#[derive(Args, Debug, Clone)]
pub struct LevelsArgs {
    /// Underlying symbol (e.g., "SPY")
    #[arg(long)]
    pub symbol: String,

    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Runs the levels command.
///
/// # Errors
/// Returns an error if the fetch or the exposure computation fails.
pub async fn run_levels(args: LevelsArgs) -> Result<()> {
    let config = args.config.load()?;
    let gateway = gateway(&config)?;

    let snapshot = gateway.fetch(&args.symbol).await?;
    let profile = ExposureEngine::new(&config.exposure)
        .compute(&snapshot)
        .with_context(|| format!("failed to compute exposure for {}", args.symbol))?;

    info!(
        symbol = %profile.symbol,
        spot = profile.spot,
        net_exposure = profile.net_exposure,
        flip_point = profile.flip_point,
        "Exposure computed"
    );
    print_json(&profile)
}

//! Wheel report command: P&L attribution and activity for one cycle.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use gex_data::{ActivityRecord, WheelLeg, WheelRepository};
use gex_options_manager::{CycleReport, WheelEngine};
use serde::Serialize;
use uuid::Uuid;

use super::{print_json, ConfigArgs};

/// Arguments for the wheel-report command.
#[derive(Args, Debug, Clone)]
pub struct WheelReportArgs {
    /// Wheel cycle ID
    #[arg(long)]
    pub cycle_id: Uuid,

    /// Database connection URL (overrides the configured database URL)
    #[arg(long, env = "DATABASE_URL")]
    pub db_url: Option<String>,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Debug, Serialize)]
struct WheelReportOutput {
    report: CycleReport,
    legs: Vec<WheelLeg>,
    activity: Vec<ActivityRecord>,
}

/// Runs the wheel-report command.
///
/// # Errors
/// Returns an error if the database is unreachable or the cycle is unknown.
pub async fn run_wheel_report(args: WheelReportArgs) -> Result<()> {
    let config = args.config.load()?;
    let url = args.db_url.unwrap_or(config.database.url);

    let repo = WheelRepository::connect(&url, config.database.max_connections).await?;
    tracing::info!("Connected to database");

    let engine = WheelEngine::new(Arc::new(repo));
    let report = engine.report(args.cycle_id, Utc::now()).await?;
    let legs = engine.legs(args.cycle_id).await?;
    let activity = engine.activity(args.cycle_id).await?;

    print_json(&WheelReportOutput {
        report,
        legs,
        activity,
    })
}

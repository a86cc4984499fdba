//! CLI commands for the gamma-exposure decision core.

pub mod levels;
pub mod scan;
pub mod wheel_report;

pub use levels::{run_levels, LevelsArgs};
pub use scan::{run_scan, ScanArgs};
pub use wheel_report::{run_wheel_report, WheelReportArgs};

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use gex_core::{AppConfig, ConfigLoader};
use gex_gateway::{DataGateway, GatewayState};
use serde::Serialize;

/// Configuration source shared by every command.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Config file path
    #[arg(short, long, default_value = gex_core::config_loader::CONFIG_FILE)]
    pub config: String,

    /// Profile overlay (loads config/Gex.<profile>.toml on top of the base file)
    #[arg(long)]
    pub profile: Option<String>,
}

impl ConfigArgs {
    /// # Errors
    /// Returns an error if a present configuration source cannot be parsed.
    pub fn load(&self) -> Result<AppConfig> {
        match &self.profile {
            Some(profile) => ConfigLoader::load_with_profile(profile),
            None => ConfigLoader::load_from(&self.config),
        }
        .context("failed to load configuration")
    }
}

/// Builds a gateway with freshly constructed shared state.
pub(crate) fn gateway(config: &AppConfig) -> Result<DataGateway> {
    let state = Arc::new(GatewayState::new(&config.gateway));
    DataGateway::new(config.gateway.clone(), state).context("failed to build data gateway")
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

use clap::{Parser, Subcommand};

mod commands;

use commands::{LevelsArgs, ScanArgs, WheelReportArgs};

#[derive(Parser)]
#[command(name = "gex")]
#[command(about = "Gamma-exposure options decision core", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one symbol and print its walls, flip point and net exposure
    Levels(LevelsArgs),
    /// Run one decision cycle and print regimes, setups and risk decisions
    Scan(ScanArgs),
    /// Print P&L attribution and the activity log of a wheel cycle
    WheelReport(WheelReportArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Levels(args) => commands::run_levels(args).await,
        Commands::Scan(args) => commands::run_scan(args).await,
        Commands::WheelReport(args) => commands::run_wheel_report(args).await,
    }
}

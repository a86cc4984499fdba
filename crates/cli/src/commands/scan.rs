//! Scan command: one decision cycle across a symbol list.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use gex_analytics::TrendInputs;
use gex_options_manager::{DecisionService, MarketInputs, PortfolioState};
use rust_decimal::Decimal;

use super::{gateway, print_json, ConfigArgs};

/// Arguments for the scan command.
#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// Comma-separated symbols (e.g., "SPY,QQQ,IWM")
    #[arg(long, value_delimiter = ',', required = true)]
    pub symbols: Vec<String>,

    /// IV rank (0-100), applied to every symbol
    #[arg(long, default_value_t = 50.0)]
    pub iv_rank: f64,

    /// Implied over historical volatility
    #[arg(long, default_value_t = 1.0)]
    pub iv_hv_ratio: f64,

    /// Short-horizon momentum, percent
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub short_momentum: f64,

    /// Medium-horizon momentum, percent
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub medium_momentum: f64,

    /// Spot is above the short moving average
    #[arg(long)]
    pub above_short_ma: bool,

    /// Spot is above the long moving average
    #[arg(long)]
    pub above_long_ma: bool,

    /// Account value for risk checks
    #[arg(long, default_value = "100000")]
    pub account_value: Decimal,

    /// Realized P&L so far today (negative for a loss)
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub daily_pnl: Decimal,

    /// Capital already at risk in open positions
    #[arg(long, default_value = "0")]
    pub open_risk: Decimal,

    #[command(flatten)]
    pub config: ConfigArgs,
}

impl ScanArgs {
    fn market_inputs(&self) -> MarketInputs {
        MarketInputs {
            iv_rank: self.iv_rank,
            iv_hv_ratio: self.iv_hv_ratio,
            trend: TrendInputs {
                short_momentum_pct: self.short_momentum,
                medium_momentum_pct: self.medium_momentum,
                above_short_ma: self.above_short_ma,
                above_long_ma: self.above_long_ma,
            },
        }
    }

    fn symbols(&self) -> Vec<String> {
        self.symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Runs the scan command.
///
/// # Errors
/// Returns an error if configuration or the gateway cannot be built.
/// Per-symbol failures are reported in the output, not as errors.
pub async fn run_scan(args: ScanArgs) -> Result<()> {
    let config = args.config.load()?;
    let service = DecisionService::from_config(Arc::new(gateway(&config)?), &config);

    let symbols = args.symbols();
    let market = args.market_inputs();
    let inputs: HashMap<String, MarketInputs> =
        symbols.iter().map(|s| (s.clone(), market)).collect();
    let portfolio = PortfolioState::new(args.account_value)
        .with_daily_realized_pnl(args.daily_pnl)
        .with_open_risk(args.open_risk);

    let outcome = service.run(&symbols, &inputs, &portfolio).await;
    print_json(&outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rust_decimal_macros::dec;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        scan: ScanArgs,
    }

    #[test]
    fn parses_symbol_list_and_portfolio() {
        let cli = TestCli::parse_from([
            "gex",
            "--symbols",
            "spy, qqq,,iwm",
            "--iv-rank",
            "72",
            "--short-momentum",
            "-1.5",
            "--daily-pnl",
            "-250.50",
            "--above-long-ma",
        ]);

        assert_eq!(cli.scan.symbols(), vec!["SPY", "QQQ", "IWM"]);
        assert_eq!(cli.scan.daily_pnl, dec!(-250.50));
        assert_eq!(cli.scan.account_value, dec!(100000));

        let market = cli.scan.market_inputs();
        assert_eq!(market.iv_rank, 72.0);
        assert_eq!(market.trend.short_momentum_pct, -1.5);
        assert!(market.trend.above_long_ma);
        assert!(!market.trend.above_short_ma);
    }
}

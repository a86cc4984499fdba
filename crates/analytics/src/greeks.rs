//! Black-Scholes greeks used when a provider supplies implied volatility
//! instead of gamma, and for leg deltas in the wheel engine.

use chrono::{DateTime, NaiveDate, Utc};
use gex_core::{ExposureSnapshot, StrikeData};
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, SQRT_2};

/// Calendar days per year used for time to expiry.
pub const DAYS_PER_YEAR: f64 = 365.0;

/// Option right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionRight {
    Call,
    Put,
}

/// Standard normal probability density.
#[must_use]
pub fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
}

/// Standard normal cumulative distribution.
#[must_use]
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + libm::erf(x / SQRT_2))
}

/// Black-Scholes `d1`.
///
/// Returns `None` when spot, strike, time or volatility is not positive.
#[must_use]
pub fn d1(spot: f64, strike: f64, years: f64, rate: f64, iv: f64) -> Option<f64> {
    if spot <= 0.0 || strike <= 0.0 || years <= 0.0 || iv <= 0.0 {
        return None;
    }
    let vol_sqrt_t = iv * years.sqrt();
    Some(((spot / strike).ln() + (rate + 0.5 * iv * iv) * years) / vol_sqrt_t)
}

/// Gamma per share; identical for calls and puts. Zero for degenerate inputs.
#[must_use]
pub fn gamma(spot: f64, strike: f64, years: f64, rate: f64, iv: f64) -> f64 {
    match d1(spot, strike, years, rate, iv) {
        Some(d) => normal_pdf(d) / (spot * iv * years.sqrt()),
        None => 0.0,
    }
}

/// Delta per share.
///
/// At or past expiry this collapses to the intrinsic indicator.
#[must_use]
pub fn delta(right: OptionRight, spot: f64, strike: f64, years: f64, rate: f64, iv: f64) -> f64 {
    let call_delta = match d1(spot, strike, years, rate, iv) {
        Some(d) => normal_cdf(d),
        None if spot > strike => 1.0,
        None => 0.0,
    };
    match right {
        OptionRight::Call => call_delta,
        OptionRight::Put => call_delta - 1.0,
    }
}

/// Years between `as_of` and the end of `expiry` day.
#[must_use]
pub fn years_to_expiry(as_of: DateTime<Utc>, expiry: NaiveDate) -> f64 {
    let days = (expiry - as_of.date_naive()).num_days();
    days.max(0) as f64 / DAYS_PER_YEAR
}

/// One option contract's market data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    pub strike: f64,
    pub right: OptionRight,
    pub implied_volatility: f64,
    pub open_interest: f64,
    pub expiry: NaiveDate,
}

/// Builds a per-strike snapshot from quotes carrying IV rather than gamma.
///
/// Contracts at the same strike are folded together. The stored gammas are
/// open-interest weighted so that `gamma * open_interest` equals the summed
/// `gamma_i * oi_i` of the contracts at that strike for each side.
#[must_use]
pub fn snapshot_from_quotes(
    symbol: &str,
    spot: f64,
    quotes: &[OptionQuote],
    rate: f64,
    as_of: DateTime<Utc>,
) -> ExposureSnapshot {
    // (strike, call gamma*oi, put gamma*oi, total oi)
    let mut rows: Vec<(f64, f64, f64, f64)> = Vec::new();
    for quote in quotes {
        let years = years_to_expiry(as_of, quote.expiry);
        let g = gamma(spot, quote.strike, years, rate, quote.implied_volatility);
        let weighted = g * quote.open_interest;
        let idx = match rows.iter().position(|r| r.0 == quote.strike) {
            Some(idx) => idx,
            None => {
                rows.push((quote.strike, 0.0, 0.0, 0.0));
                rows.len() - 1
            }
        };
        let row = &mut rows[idx];
        match quote.right {
            OptionRight::Call => row.1 += weighted,
            OptionRight::Put => row.2 += weighted,
        }
        row.3 += quote.open_interest;
    }
    rows.sort_by(|a, b| a.0.total_cmp(&b.0));

    let strikes = rows
        .into_iter()
        .map(|(strike, call_w, put_w, oi)| {
            if oi > 0.0 {
                StrikeData::new(strike, call_w / oi, put_w / oi, oi)
            } else {
                StrikeData::new(strike, 0.0, 0.0, 0.0)
            }
        })
        .collect();

    ExposureSnapshot::new(symbol, spot, strikes).collected_at(as_of)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const EPS: f64 = 1e-6;

    #[test]
    fn test_cdf_reference_points() {
        assert!((normal_cdf(0.0) - 0.5).abs() < EPS);
        assert!((normal_cdf(1.96) - 0.975_002).abs() < 1e-5);
        assert!((normal_cdf(-1.0) - 0.158_655).abs() < 1e-5);
    }

    #[test]
    fn test_pdf_peak() {
        assert!((normal_pdf(0.0) - 0.398_942).abs() < 1e-5);
    }

    #[test]
    fn test_atm_call_delta_above_half() {
        // Positive rate pushes ATM call delta above 0.5
        let d = delta(OptionRight::Call, 100.0, 100.0, 0.25, 0.05, 0.2);
        assert!(d > 0.5 && d < 0.6);
        let p = delta(OptionRight::Put, 100.0, 100.0, 0.25, 0.05, 0.2);
        assert!((d - p - 1.0).abs() < EPS);
    }

    #[test]
    fn test_reference_gamma() {
        // S=100 K=100 T=1 r=0 sigma=0.2: d1 = 0.1, gamma = pdf(0.1) / 20
        let expected = normal_pdf(0.1) / 20.0;
        assert!((gamma(100.0, 100.0, 1.0, 0.0, 0.2) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(gamma(100.0, 100.0, 0.0, 0.0, 0.2), 0.0);
        assert_eq!(gamma(100.0, 100.0, 1.0, 0.0, 0.0), 0.0);
        assert_eq!(delta(OptionRight::Call, 110.0, 100.0, 0.0, 0.0, 0.2), 1.0);
        assert_eq!(delta(OptionRight::Put, 110.0, 100.0, 0.0, 0.0, 0.2), 0.0);
        assert_eq!(delta(OptionRight::Put, 90.0, 100.0, 0.0, 0.0, 0.2), -1.0);
    }

    #[test]
    fn test_gamma_peaks_near_the_money() {
        let atm = gamma(100.0, 100.0, 0.1, 0.0, 0.25);
        let otm = gamma(100.0, 120.0, 0.1, 0.0, 0.25);
        assert!(atm > otm);
    }

    #[test]
    fn test_snapshot_from_quotes_folds_strikes() {
        let as_of = Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap();
        let expiry = NaiveDate::from_ymd_opt(2024, 3, 29).unwrap();
        let quotes = vec![
            OptionQuote {
                strike: 105.0,
                right: OptionRight::Call,
                implied_volatility: 0.2,
                open_interest: 1000.0,
                expiry,
            },
            OptionQuote {
                strike: 100.0,
                right: OptionRight::Call,
                implied_volatility: 0.2,
                open_interest: 3000.0,
                expiry,
            },
            OptionQuote {
                strike: 100.0,
                right: OptionRight::Put,
                implied_volatility: 0.25,
                open_interest: 1000.0,
                expiry,
            },
        ];
        let snapshot = snapshot_from_quotes("XYZ", 100.0, &quotes, 0.0, as_of);
        assert_eq!(snapshot.strikes.len(), 2);
        assert_eq!(snapshot.strikes[0].strike, 100.0);
        assert_eq!(snapshot.strikes[0].open_interest, 4000.0);

        let years = 28.0 / DAYS_PER_YEAR;
        let call_w = gamma(100.0, 100.0, years, 0.0, 0.2) * 3000.0;
        let row = &snapshot.strikes[0];
        assert!((row.call_gamma * row.open_interest - call_w).abs() < 1e-9);
        assert_eq!(snapshot.collected_at, as_of);
    }
}

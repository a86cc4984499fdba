//! Provider payload parsing.
//!
//! Payloads are deserialized into permissive raw structs first and then
//! validated: required top-level fields must be present and finite, while
//! optional per-strike figures default to zero with a logged warning.

use chrono::{DateTime, TimeZone, Utc};
use gex_core::{ExposureSnapshot, ExposureSummary, StrikeData};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{GatewayError, Result};

const RATE_LIMIT_MARKERS: [&str; 3] = ["rate limit exceeded", "too many requests", "rate limited"];

#[derive(Debug, Deserialize)]
struct RawStrike {
    strike: Option<f64>,
    call_gamma: Option<f64>,
    put_gamma: Option<f64>,
    #[serde(alias = "oi")]
    open_interest: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    spot: Option<f64>,
    strikes: Option<Vec<RawStrike>>,
    timestamp: Option<Value>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSummary {
    spot: Option<f64>,
    net_exposure: Option<f64>,
    #[serde(alias = "zero_gamma")]
    flip_price: Option<f64>,
    timestamp: Option<Value>,
    error: Option<String>,
}

/// Returns true if the response signals the provider's rate limit.
///
/// The provider sometimes reports this on a 200 status with an error body,
/// so the body is inspected regardless of status.
#[must_use]
pub fn is_rate_limit_response(status: u16, body: &str) -> bool {
    if status == 429 {
        return true;
    }
    let lower = body.to_lowercase();
    if RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }
    // A JSON `error` field that mentions a rate limit in any wording
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_lowercase))
        .is_some_and(|e| e.contains("rate") && e.contains("limit"))
}

/// Parses the per-strike endpoint body.
///
/// # Errors
///
/// Returns `MalformedResponse` if the body is empty or not JSON, carries an
/// `error` field, lacks `spot`/`strikes`, or holds non-finite values.
pub fn parse_snapshot(
    symbol: &str,
    body: &str,
    received_at: DateTime<Utc>,
) -> Result<ExposureSnapshot> {
    let raw: RawSnapshot = decode(body)?;
    if let Some(error) = raw.error {
        return Err(GatewayError::malformed(format!("provider error: {error}"), body));
    }
    let spot = required_spot(raw.spot, body)?;
    let raw_strikes = raw
        .strikes
        .ok_or_else(|| GatewayError::malformed("missing field `strikes`", body))?;
    if raw_strikes.is_empty() {
        return Err(GatewayError::malformed("empty `strikes` array", body));
    }

    let mut defaulted = 0usize;
    let mut strikes = Vec::with_capacity(raw_strikes.len());
    for (idx, raw) in raw_strikes.into_iter().enumerate() {
        let strike = raw.strike.ok_or_else(|| {
            GatewayError::malformed(format!("strike entry {idx} has no `strike`"), body)
        })?;
        if !strike.is_finite() || strike <= 0.0 {
            return Err(GatewayError::malformed(
                format!("strike entry {idx} has invalid strike {strike}"),
                body,
            ));
        }
        let mut take = |value: Option<f64>| match value {
            Some(v) => v,
            None => {
                defaulted += 1;
                0.0
            }
        };
        let call_gamma = take(raw.call_gamma);
        let put_gamma = take(raw.put_gamma);
        let open_interest = take(raw.open_interest);
        if ![call_gamma, put_gamma, open_interest]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(GatewayError::malformed(
                format!("strike {strike} has non-finite values"),
                body,
            ));
        }
        strikes.push(StrikeData::new(strike, call_gamma, put_gamma, open_interest));
    }

    if defaulted > 0 {
        warn!(
            symbol,
            defaulted_fields = defaulted,
            "Per-strike fields missing from provider payload, defaulted to zero"
        );
    }

    let collected_at = timestamp_or(raw.timestamp.as_ref(), received_at);
    Ok(ExposureSnapshot::new(symbol, spot, strikes).collected_at(collected_at))
}

/// Parses the summary endpoint body.
///
/// # Errors
///
/// Returns `MalformedResponse` if required fields are absent or invalid.
pub fn parse_summary(
    symbol: &str,
    body: &str,
    received_at: DateTime<Utc>,
) -> Result<ExposureSummary> {
    let raw: RawSummary = decode(body)?;
    if let Some(error) = raw.error {
        return Err(GatewayError::malformed(format!("provider error: {error}"), body));
    }
    let spot = required_spot(raw.spot, body)?;
    let net_exposure = raw
        .net_exposure
        .filter(|v| v.is_finite())
        .ok_or_else(|| GatewayError::malformed("missing or non-finite `net_exposure`", body))?;
    let flip_price = raw.flip_price.filter(|v| v.is_finite() && *v > 0.0);

    Ok(ExposureSummary {
        symbol: symbol.to_string(),
        spot,
        net_exposure,
        flip_price,
        collected_at: timestamp_or(raw.timestamp.as_ref(), received_at),
    })
}

fn decode<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T> {
    if body.trim().is_empty() {
        return Err(GatewayError::malformed("empty response body", body));
    }
    serde_json::from_str(body)
        .map_err(|e| GatewayError::malformed(format!("invalid JSON: {e}"), body))
}

fn required_spot(spot: Option<f64>, body: &str) -> Result<f64> {
    match spot {
        Some(s) if s.is_finite() && s > 0.0 => Ok(s),
        Some(s) => Err(GatewayError::malformed(format!("invalid spot {s}"), body)),
        None => Err(GatewayError::malformed("missing field `spot`", body)),
    }
}

/// Accepts RFC 3339 strings or epoch seconds/milliseconds.
fn timestamp_or(value: Option<&Value>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    let parsed = match value {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Some(Value::Number(n)) => n.as_i64().and_then(|secs| {
            if secs > 10_000_000_000 {
                Utc.timestamp_millis_opt(secs).single()
            } else {
                Utc.timestamp_opt(secs, 0).single()
            }
        }),
        _ => None,
    };
    parsed.unwrap_or(fallback)
}

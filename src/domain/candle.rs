//! Candle representation and series hygiene.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::EngineError;

/// One OHLCV candle. `timestamp` is the UTC period start in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }

    pub fn has_valid_ohlc(&self) -> bool {
        self.high >= self.open.max(self.close).max(self.low)
            && self.low <= self.open.min(self.close).min(self.high)
    }

    /// Clamp high/low so that low <= open, close <= high.
    pub fn repaired(self) -> Candle {
        let high = self.open.max(self.high).max(self.low).max(self.close);
        let low = self.open.min(self.high).min(self.low).min(self.close);
        Candle { high, low, ..self }
    }
}

/// Sort by timestamp and drop duplicate timestamps, keeping the candle with
/// the larger volume (the first one on a tie).
pub fn normalize_series(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by_key(|c| c.timestamp);
    let mut out: Vec<Candle> = Vec::with_capacity(candles.len());
    for candle in candles {
        match out.last_mut() {
            Some(last) if last.timestamp == candle.timestamp => {
                if candle.volume > last.volume {
                    *last = candle;
                }
            }
            _ => out.push(candle),
        }
    }
    out
}

/// Fails unless timestamps are strictly increasing.
pub fn validate_series(candles: &[Candle]) -> Result<(), EngineError> {
    for (i, pair) in candles.windows(2).enumerate() {
        if pair[1].timestamp <= pair[0].timestamp {
            let kind = if pair[1].timestamp == pair[0].timestamp {
                "duplicate"
            } else {
                "out-of-order"
            };
            return Err(EngineError::InvalidSeries {
                reason: format!(
                    "{kind} timestamp {} at index {}",
                    format_timestamp(pair[1].timestamp),
                    i + 1
                ),
            });
        }
    }
    Ok(())
}

/// Merge `incoming` into `existing`; on a timestamp conflict the incoming
/// candle wins. Output is sorted.
pub fn merge_candles(existing: &[Candle], incoming: &[Candle]) -> Vec<Candle> {
    let mut by_ts: BTreeMap<i64, Candle> = existing.iter().map(|c| (c.timestamp, *c)).collect();
    for candle in incoming {
        by_ts.insert(candle.timestamp, *candle);
    }
    by_ts.into_values().collect()
}

pub fn format_timestamp(ts: i64) -> String {
    DateTime::from_timestamp_millis(ts)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| ts.to_string())
}

/// Accepts epoch milliseconds, RFC 3339, `%Y-%m-%d %H:%M:%S` (UTC) or a bare
/// `%Y-%m-%d` date (UTC midnight).
pub fn parse_timestamp(input: &str) -> Option<i64> {
    let s = input.trim();
    if let Ok(ms) = s.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc().timestamp_millis());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

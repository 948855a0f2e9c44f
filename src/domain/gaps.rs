//! Gap detection and data quality assessment.
//!
//! A period counts as missing only once it is safely in the past: its start
//! must lie more than [`GRACE_PERIOD_MS`] before `now`. Future periods and a
//! period that opened less than a minute ago are never reported.

use serde::Serialize;
use std::collections::BTreeSet;

use super::candle::{Candle, format_timestamp, normalize_series, validate_series};
use super::timeframe::Timeframe;

pub const GRACE_PERIOD_MS: i64 = 60_000;
/// Spacing above this multiple of the interval is a gap.
pub const GAP_TOLERANCE: f64 = 1.1;
/// Periods checked before the first and after the last candle.
pub const EDGE_PERIODS: i64 = 3;
pub const MIN_COVERAGE_PCT: f64 = 95.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct MissingCandle {
    pub expected_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapReport {
    pub gap_count: usize,
    pub missing: Vec<MissingCandle>,
    pub expected_count: usize,
    pub actual_count: usize,
    pub coverage: f64,
}

fn is_due(t: i64, now: i64) -> bool {
    now - t > GRACE_PERIOD_MS
}

/// Expected start of the candle following `ts`.
fn next_slot(timeframe: Timeframe, ts: i64) -> i64 {
    if timeframe.is_period_based() {
        timeframe.period_start(ts) + timeframe.interval_ms()
    } else {
        ts + timeframe.interval_ms()
    }
}

fn slot_of(timeframe: Timeframe, ts: i64) -> i64 {
    if timeframe.is_period_based() {
        timeframe.period_start(ts)
    } else {
        ts
    }
}

/// Find missing candles in `candles` (sorted, unique) for `[start, end]`.
pub fn detect_gaps(
    candles: &[Candle],
    timeframe: Timeframe,
    start: i64,
    end: i64,
    now: i64,
) -> GapReport {
    let interval = timeframe.interval_ms();
    let aligned_start = timeframe.period_start(start);
    let mut missing = BTreeSet::new();
    let mut gap_count = 0;

    let (Some(first), Some(last)) = (candles.first(), candles.last()) else {
        let mut t = aligned_start;
        while t <= end && is_due(t, now) {
            missing.insert(MissingCandle {
                expected_timestamp: t,
            });
            t += interval;
        }
        return GapReport {
            gap_count: usize::from(!missing.is_empty()),
            expected_count: missing.len(),
            missing: missing.into_iter().collect(),
            actual_count: 0,
            coverage: 0.0,
        };
    };

    let threshold = interval as f64 * GAP_TOLERANCE;
    for pair in candles.windows(2) {
        let (prev, next) = (pair[0].timestamp, pair[1].timestamp);
        if ((next - prev) as f64) <= threshold {
            continue;
        }
        let before = missing.len();
        let mut t = next_slot(timeframe, prev);
        while t < next {
            if t > prev && is_due(t, now) {
                missing.insert(MissingCandle {
                    expected_timestamp: t,
                });
            }
            t += interval;
        }
        if missing.len() > before {
            gap_count += 1;
        }
    }

    let first_slot = slot_of(timeframe, first.timestamp);
    let before = missing.len();
    for k in 1..=EDGE_PERIODS {
        let t = first_slot - k * interval;
        if t < aligned_start {
            break;
        }
        if is_due(t, now) {
            missing.insert(MissingCandle {
                expected_timestamp: t,
            });
        }
    }
    if missing.len() > before {
        gap_count += 1;
    }

    let last_slot = slot_of(timeframe, last.timestamp);
    let before = missing.len();
    for k in 1..=EDGE_PERIODS {
        let t = last_slot + k * interval;
        if t > end {
            break;
        }
        if is_due(t, now) {
            missing.insert(MissingCandle {
                expected_timestamp: t,
            });
        }
    }
    if missing.len() > before {
        gap_count += 1;
    }

    let expected_count = ((last_slot - first_slot) / interval + 1).max(1) as usize;
    let actual_count = candles.len();
    let coverage = (actual_count as f64 / expected_count as f64 * 100.0).min(100.0);

    GapReport {
        gap_count,
        missing: missing.into_iter().collect(),
        expected_count,
        actual_count,
        coverage,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataQualityReport {
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub last_candle_age: Option<i64>,
    pub gap_count: usize,
    pub missing_candles: Vec<MissingCandle>,
    pub coverage: f64,
}

/// Number of due periods after the last candle that have no data.
pub fn stale_periods(timeframe: Timeframe, last_timestamp: i64, now: i64) -> i64 {
    let interval = timeframe.interval_ms();
    let span = now - GRACE_PERIOD_MS - next_slot(timeframe, last_timestamp);
    if span <= 0 {
        0
    } else {
        (span + interval - 1) / interval
    }
}

pub fn assess_quality(
    candles: &[Candle],
    timeframe: Timeframe,
    start: i64,
    end: i64,
    now: i64,
    min_candles: usize,
) -> DataQualityReport {
    let mut issues = Vec::new();
    let mut warnings = Vec::new();

    if candles.is_empty() {
        issues.push("no candles".to_string());
    }
    if let Err(e) = validate_series(candles) {
        issues.push(e.to_string());
    }
    if candles.len() < min_candles {
        issues.push(format!(
            "{} candles, at least {} required",
            candles.len(),
            min_candles
        ));
    }

    let series = normalize_series(candles.to_vec());
    let gaps = detect_gaps(&series, timeframe, start, end, now);

    let last_candle_age = series.last().map(|c| now - c.timestamp);
    if let Some(last) = series.last() {
        match stale_periods(timeframe, last.timestamp, now) {
            0 => {}
            1 => warnings.push(format!(
                "last candle at {} is one period stale",
                format_timestamp(last.timestamp)
            )),
            n => issues.push(format!(
                "last candle at {} is {n} periods stale",
                format_timestamp(last.timestamp)
            )),
        }
    }

    let bad_ohlc = series.iter().filter(|c| !c.has_valid_ohlc()).count();
    if bad_ohlc > 0 {
        warnings.push(format!("{bad_ohlc} candles with inconsistent OHLC"));
    }
    if gaps.gap_count > 0 {
        warnings.push(format!(
            "{} gaps, {} missing candles",
            gaps.gap_count,
            gaps.missing.len()
        ));
    }
    if !series.is_empty() && gaps.coverage < MIN_COVERAGE_PCT {
        warnings.push(format!("coverage {:.1}% below {MIN_COVERAGE_PCT}%", gaps.coverage));
    }

    DataQualityReport {
        is_valid: issues.is_empty(),
        issues,
        warnings,
        last_candle_age,
        gap_count: gaps.gap_count,
        missing_candles: gaps.missing,
        coverage: gaps.coverage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::timeframe::{HOUR_MS, MINUTE_MS};

    const H8: i64 = 8 * HOUR_MS;
    // 2024-01-01T00:00:00Z
    const BASE: i64 = 1_704_067_200_000;

    fn series(timestamps: &[i64]) -> Vec<Candle> {
        timestamps
            .iter()
            .map(|&ts| Candle {
                timestamp: ts,
                open: 10.0,
                high: 11.0,
                low: 9.0,
                close: 10.5,
                volume: 1.0,
            })
            .collect()
    }

    fn h8_series(count: i64) -> Vec<i64> {
        (0..count).map(|i| BASE + i * H8).collect()
    }

    #[test]
    fn complete_series_has_no_gaps() {
        let candles = series(&h8_series(10));
        let end = BASE + 9 * H8;
        let report = detect_gaps(&candles, Timeframe::H8, BASE, end, end + H8 / 2);
        assert_eq!(report.gap_count, 0);
        assert!(report.missing.is_empty());
        assert!((report.coverage - 100.0).abs() < 1e-9);
        assert_eq!(report.expected_count, 10);
    }

    #[test]
    fn single_interior_gap_reports_period_start() {
        let mut ts = h8_series(6);
        ts.remove(3);
        let candles = series(&ts);
        let end = BASE + 5 * H8 + H8 - 1;
        let report = detect_gaps(&candles, Timeframe::H8, BASE, end, end + 1);
        assert_eq!(report.gap_count, 1);
        assert_eq!(
            report.missing,
            vec![MissingCandle {
                expected_timestamp: BASE + 3 * H8
            }]
        );
        assert_eq!(report.expected_count, 6);
        assert!((report.coverage - 500.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn edges_are_checked_within_requested_range() {
        let candles = series(&[BASE + 2 * H8, BASE + 3 * H8]);
        let end = BASE + 8 * H8;
        let report = detect_gaps(&candles, Timeframe::H8, BASE, end, end + HOUR_MS);
        let missing: Vec<i64> = report.missing.iter().map(|m| m.expected_timestamp).collect();
        assert_eq!(
            missing,
            vec![
                BASE,
                BASE + H8,
                BASE + 4 * H8,
                BASE + 5 * H8,
                BASE + 6 * H8
            ]
        );
        assert_eq!(report.gap_count, 2);
    }

    #[test]
    fn current_period_is_graced() {
        let candles = series(&h8_series(3));
        let current = BASE + 3 * H8;
        let report = detect_gaps(&candles, Timeframe::H8, BASE, current + H8, current + 30_000);
        assert!(report.missing.is_empty());

        let report = detect_gaps(&candles, Timeframe::H8, BASE, current + H8, current + 61_000);
        assert_eq!(report.missing.len(), 1);
    }

    #[test]
    fn empty_series_reports_whole_due_range() {
        let end = BASE + 4 * H8 - 1;
        let report = detect_gaps(&[], Timeframe::H8, BASE, end, BASE + 10 * H8);
        assert_eq!(report.missing.len(), 4);
        assert_eq!(report.coverage, 0.0);
        assert_eq!(report.actual_count, 0);
    }

    #[test]
    fn minute_series_gap_uses_spacing() {
        let ts = [BASE, BASE + MINUTE_MS, BASE + 4 * MINUTE_MS];
        let report = detect_gaps(&series(&ts), Timeframe::M1, BASE, BASE + 4 * MINUTE_MS, BASE + HOUR_MS);
        let missing: Vec<i64> = report.missing.iter().map(|m| m.expected_timestamp).collect();
        assert_eq!(missing, vec![BASE + 2 * MINUTE_MS, BASE + 3 * MINUTE_MS]);
    }

    #[test]
    fn quality_of_fresh_complete_series_is_valid() {
        let candles = series(&h8_series(10));
        let end = BASE + 10 * H8 - 1;
        let report = assess_quality(&candles, Timeframe::H8, BASE, end, end + 1, 5);
        assert!(report.is_valid, "{:?}", report.issues);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(report.last_candle_age, Some(H8));
    }

    #[test]
    fn quality_flags_staleness_levels() {
        let candles = series(&h8_series(10));
        let next = BASE + 10 * H8;

        let one = assess_quality(&candles, Timeframe::H8, BASE, next + H8, next + 2 * MINUTE_MS, 1);
        assert!(one.is_valid);
        assert!(one.warnings.iter().any(|w| w.contains("one period stale")));

        let two = assess_quality(&candles, Timeframe::H8, BASE, next + 2 * H8, next + H8 + 2 * MINUTE_MS, 1);
        assert!(!two.is_valid);
        assert!(two.issues.iter().any(|i| i.contains("2 periods stale")));
    }

    #[test]
    fn quality_reports_structural_issues() {
        let report = assess_quality(&[], Timeframe::H1, BASE, BASE, BASE, 1);
        assert!(!report.is_valid);
        assert!(report.issues.iter().any(|i| i == "no candles"));

        let mut candles = series(&h8_series(3));
        candles.swap(0, 1);
        candles[2].high = 1.0;
        let end = BASE + 3 * H8 - 1;
        let report = assess_quality(&candles, Timeframe::H8, BASE, end, end + 1, 10);
        assert_eq!(report.issues.len(), 2);
        assert!(report.warnings.iter().any(|w| w.contains("OHLC")));
    }
}

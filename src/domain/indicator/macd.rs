//! MACD (Moving Average Convergence Divergence) indicator.
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of MACD Line
//! Histogram = MACD Line - Signal Line
//!
//! Default parameters: fast=12, slow=26, signal=9
//! Warmup: max(fast, slow) - 1 + signal - 1 candles

use crate::domain::candle::Candle;
use crate::domain::indicator::{
    calculate_ema, IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue,
};

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

pub fn calculate_macd(
    candles: &[Candle],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> IndicatorSeries {
    let indicator_type = IndicatorType::Macd {
        fast,
        slow,
        signal: signal_period,
    };
    if candles.is_empty() || fast == 0 || slow == 0 || signal_period == 0 {
        return IndicatorSeries {
            indicator_type,
            values: Vec::new(),
        };
    }

    let ema_fast = ema_raw_values(candles, fast);
    let ema_slow = ema_raw_values(candles, slow);

    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();

    let k = 2.0 / (signal_period as f64 + 1.0);
    let mut signal_line: Vec<f64> = vec![0.0; candles.len()];
    let macd_warmup = fast.max(slow) - 1;

    if macd_warmup + signal_period <= candles.len() {
        let sum: f64 = macd_line[macd_warmup..macd_warmup + signal_period]
            .iter()
            .sum();
        let mut signal_ema = sum / signal_period as f64;
        signal_line[macd_warmup + signal_period - 1] = signal_ema;

        for i in (macd_warmup + signal_period)..candles.len() {
            signal_ema = macd_line[i] * k + signal_ema * (1.0 - k);
            signal_line[i] = signal_ema;
        }
    }

    let signal_warmup = macd_warmup + signal_period - 1;

    let values = candles
        .iter()
        .enumerate()
        .map(|(i, candle)| {
            let line = macd_line[i];
            let signal = signal_line[i];
            IndicatorPoint {
                timestamp: candle.timestamp,
                valid: i >= signal_warmup,
                value: IndicatorValue::Macd {
                    line,
                    signal,
                    histogram: line - signal,
                },
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}

pub fn calculate_macd_default(candles: &[Candle]) -> IndicatorSeries {
    calculate_macd(candles, DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL)
}

/// Extract raw f64 values from the EMA module, using 0.0 for warmup candles.
fn ema_raw_values(candles: &[Candle], period: usize) -> Vec<f64> {
    calculate_ema(candles, period)
        .values
        .iter()
        .map(|p| match p.value {
            IndicatorValue::Simple(v) => v,
            _ => 0.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::candles_from_closes;

    #[test]
    fn macd_warmup_boundary() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let candles = candles_from_closes(&closes);
        let series = calculate_macd_default(&candles);

        assert_eq!(series.values.len(), 40);
        // 26 - 1 + 9 - 1 = 33
        assert!(series.macd_at(32).is_none());
        assert!(series.macd_at(33).is_some());
    }

    #[test]
    fn macd_flat_series_is_zero() {
        let candles = candles_from_closes(&[50.0; 40]);
        let series = calculate_macd_default(&candles);
        let (line, signal, histogram) = series.macd_at(39).unwrap();
        assert!(line.abs() < 1e-12);
        assert!(signal.abs() < 1e-12);
        assert!(histogram.abs() < 1e-12);
    }

    #[test]
    fn macd_rising_series_is_positive() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let candles = candles_from_closes(&closes);
        let series = calculate_macd_default(&candles);
        let (line, _, _) = series.macd_at(59).unwrap();
        assert!(line > 0.0);
    }

    #[test]
    fn macd_histogram_is_line_minus_signal() {
        let closes: Vec<f64> = (0..50).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let candles = candles_from_closes(&closes);
        let series = calculate_macd(&candles, 5, 10, 3);
        for i in 0..50 {
            if let Some((line, signal, histogram)) = series.macd_at(i) {
                assert!((histogram - (line - signal)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn macd_empty_input() {
        assert!(calculate_macd_default(&[]).values.is_empty());
    }
}

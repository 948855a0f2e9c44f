//! Average True Range with Wilder smoothing.
//!
//! Seed: mean true range of the first n candles (the first candle's TR is
//! high - low). Then ATR[i] = (ATR[i-1] * (n-1) + TR[i]) / n.

use crate::domain::candle::Candle;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};

pub const DEFAULT_ATR_PERIOD: usize = 14;

pub fn calculate_atr(candles: &[Candle], period: usize) -> IndicatorSeries {
    if candles.len() < period || period == 0 {
        return IndicatorSeries {
            indicator_type: IndicatorType::Atr(period),
            values: vec![],
        };
    }

    let tr_values: Vec<f64> = candles
        .iter()
        .enumerate()
        .map(|(i, candle)| {
            if i == 0 {
                candle.high - candle.low
            } else {
                candle.true_range(candles[i - 1].close)
            }
        })
        .collect();

    let mut results: Vec<IndicatorPoint> = Vec::with_capacity(candles.len());
    let mut atr = 0.0;

    for (i, candle) in candles.iter().enumerate() {
        if i < period - 1 {
            results.push(IndicatorPoint {
                timestamp: candle.timestamp,
                valid: false,
                value: IndicatorValue::Simple(0.0),
            });
            continue;
        }

        atr = if i == period - 1 {
            tr_values[0..=i].iter().sum::<f64>() / period as f64
        } else {
            (atr * (period - 1) as f64 + tr_values[i]) / period as f64
        };
        results.push(IndicatorPoint {
            timestamp: candle.timestamp,
            valid: true,
            value: IndicatorValue::Simple(atr),
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Atr(period),
        values: results,
    }
}

//! Market regime classification.
//!
//! Combines trend (moving-average deviations and crosses), momentum (MACD,
//! RSI, price rate of change) and volatility readings into a composite
//! signal and labels it bullish, bearish or neutral with a confidence in
//! `[0, 1]`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::candle::Candle;
use crate::domain::error::EngineError;
use crate::domain::indicator::IndicatorType;
use crate::domain::indicator::macd::{DEFAULT_FAST, DEFAULT_SIGNAL, DEFAULT_SLOW};
use crate::domain::indicator_cache::IndicatorCache;

pub const DEFAULT_WARMUP: usize = 50;

const SMA_SHORT: IndicatorType = IndicatorType::Sma(20);
const SMA_MEDIUM: IndicatorType = IndicatorType::Sma(50);
const SMA_LONG: IndicatorType = IndicatorType::Sma(200);
const EMA_FAST: IndicatorType = IndicatorType::Ema(12);
const EMA_SLOW: IndicatorType = IndicatorType::Ema(26);
const MACD: IndicatorType = IndicatorType::Macd {
    fast: DEFAULT_FAST,
    slow: DEFAULT_SLOW,
    signal: DEFAULT_SIGNAL,
};
const RSI: IndicatorType = IndicatorType::Rsi(14);

const RANGE_LOOKBACK: usize = 50;
const VOLATILITY_LOOKBACK: usize = 20;
const GOLDEN_CROSS_MIN_DEVIATION: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Regime::Bullish => "bullish",
            Regime::Bearish => "bearish",
            Regime::Neutral => "neutral",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegimeSignal {
    pub regime: Regime,
    pub confidence: f64,
    pub trend: f64,
    pub momentum: f64,
    pub volatility: f64,
    pub trend_strength: f64,
    pub momentum_strength: f64,
    /// (SMA50 - SMA200) / SMA200 when both are available.
    pub cross_deviation: Option<f64>,
}

impl RegimeSignal {
    pub fn neutral() -> Self {
        RegimeSignal {
            regime: Regime::Neutral,
            confidence: 0.0,
            trend: 0.0,
            momentum: 0.0,
            volatility: 0.0,
            trend_strength: 0.0,
            momentum_strength: 0.0,
            cross_deviation: None,
        }
    }

    pub fn combined(&self) -> f64 {
        0.5 * self.trend + 0.5 * self.momentum
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegimeConfig {
    pub warmup: usize,
    pub signal_threshold: f64,
    pub min_strength: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        RegimeConfig {
            warmup: DEFAULT_WARMUP,
            signal_threshold: 0.05,
            min_strength: 0.1,
        }
    }
}

/// Weighted accumulator of clamped sub-signals.
#[derive(Debug, Default)]
struct Composite {
    sum: f64,
    abs_sum: f64,
    weight: f64,
}

impl Composite {
    fn push(&mut self, value: f64, weight: f64) {
        let v = value.clamp(-1.0, 1.0);
        self.sum += v * weight;
        self.abs_sum += v.abs() * weight;
        self.weight += weight;
    }

    fn mean(&self) -> f64 {
        if self.weight > 0.0 { self.sum / self.weight } else { 0.0 }
    }

    fn strength(&self) -> f64 {
        if self.weight > 0.0 { self.abs_sum / self.weight } else { 0.0 }
    }
}

fn deviation(value: f64, reference: f64) -> f64 {
    if reference.abs() > f64::EPSILON {
        (value - reference) / reference
    } else {
        0.0
    }
}

/// Sign that treats values within `tolerance` of zero as zero.
fn sign(value: f64, tolerance: f64) -> f64 {
    if value > tolerance {
        1.0
    } else if value < -tolerance {
        -1.0
    } else {
        0.0
    }
}

/// Map RSI onto [-1, 1]; readings beyond 70/30 get extra weight.
fn rsi_component(rsi: f64) -> (f64, f64) {
    if rsi > 70.0 {
        (0.6 + (rsi - 70.0) / 30.0 * 0.4, 1.5)
    } else if rsi < 30.0 {
        (-(0.6 + (30.0 - rsi) / 30.0 * 0.4), 1.5)
    } else {
        ((rsi - 50.0) / 20.0 * 0.6, 1.0)
    }
}

/// Mean absolute close-to-close return over the trailing window, scaled so
/// that a 2% average move saturates at 1.
pub fn volatility_at(candles: &[Candle], index: usize, lookback: usize) -> f64 {
    let start = (index + 1).saturating_sub(lookback).max(1);
    if start > index {
        return 0.0;
    }
    let returns: Vec<f64> = (start..=index)
        .filter(|&j| candles[j - 1].close > 0.0)
        .map(|j| (candles[j].close / candles[j - 1].close - 1.0).abs())
        .collect();
    if returns.is_empty() {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    (mean * 50.0).min(1.0)
}

#[derive(Debug, Clone, Default)]
pub struct RegimeClassifier {
    config: RegimeConfig,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        RegimeClassifier { config }
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Classify the regime at `index` using only candles up to and including it.
    pub fn classify(
        &self,
        cache: &mut IndicatorCache,
        candles: &[Candle],
        index: usize,
    ) -> Result<RegimeSignal, EngineError> {
        if index >= candles.len() {
            return Err(EngineError::LookAhead {
                index,
                len: candles.len(),
            });
        }
        if index < self.config.warmup {
            return Ok(RegimeSignal::neutral());
        }

        let price = candles[index].close;
        let (trend, cross_deviation) = trend_component(cache, candles, index, price);
        let momentum = momentum_component(cache, candles, index, price);
        let volatility = volatility_at(candles, index, VOLATILITY_LOOKBACK);

        let trend_value = trend.mean();
        let momentum_value = momentum.mean();
        let combined = 0.5 * trend_value + 0.5 * momentum_value;
        let strength = (trend.strength() + momentum.strength()) / 2.0;

        let regime = if combined > self.config.signal_threshold && strength > self.config.min_strength {
            Regime::Bullish
        } else if combined < -self.config.signal_threshold && strength > self.config.min_strength {
            Regime::Bearish
        } else {
            Regime::Neutral
        };

        let mut confidence = 0.6 * combined.abs() + 0.4 * strength;
        if trend_value * momentum_value > 0.0 {
            confidence *= 1.2;
        }
        if cross_deviation.is_some_and(|d| d.abs() > GOLDEN_CROSS_MIN_DEVIATION) {
            confidence *= 1.1;
        }

        Ok(RegimeSignal {
            regime,
            confidence: confidence.clamp(0.0, 1.0),
            trend: trend_value,
            momentum: momentum_value,
            volatility,
            trend_strength: trend.strength(),
            momentum_strength: momentum.strength(),
            cross_deviation,
        })
    }
}

fn trend_component(
    cache: &mut IndicatorCache,
    candles: &[Candle],
    index: usize,
    price: f64,
) -> (Composite, Option<f64>) {
    let sma20 = cache.value_at(candles, SMA_SHORT, index);
    let sma50 = cache.value_at(candles, SMA_MEDIUM, index);
    let sma200 = cache.value_at(candles, SMA_LONG, index);
    let ema12 = cache.value_at(candles, EMA_FAST, index);
    let ema26 = cache.value_at(candles, EMA_SLOW, index);

    let mut trend = Composite::default();
    if let Some(s) = sma20 {
        trend.push(deviation(price, s) * 10.0, 1.0);
    }
    if let Some(s) = sma50 {
        trend.push(deviation(price, s) * 5.0, 1.0);
    }
    if let Some(s) = sma200 {
        trend.push(deviation(price, s) * 3.0, 1.0);
    }
    if let (Some(short), Some(medium)) = (sma20, sma50) {
        trend.push(deviation(short, medium) * 10.0, 1.0);
    }

    let mut cross_deviation = None;
    if let (Some(medium), Some(long)) = (sma50, sma200) {
        let d = deviation(medium, long);
        cross_deviation = Some(d);
        trend.push(d * 10.0, 2.0);
    }
    if let (Some(fast), Some(slow)) = (ema12, ema26) {
        trend.push(deviation(fast, slow) * 20.0, 1.0);
    }
    if let (Some(short), Some(medium), Some(long)) = (sma20, sma50, sma200) {
        if price > short && short > medium && medium > long {
            trend.push(0.5, 1.0);
        } else if price < short && short < medium && medium < long {
            trend.push(-0.5, 1.0);
        }
    }

    (trend, cross_deviation)
}

fn momentum_component(
    cache: &mut IndicatorCache,
    candles: &[Candle],
    index: usize,
    price: f64,
) -> Composite {
    let mut momentum = Composite::default();
    let tolerance = price.abs() * 1e-9;

    if let Some((line, signal, histogram)) = cache.macd_at(candles, MACD, index) {
        let window = &candles[(index + 1).saturating_sub(RANGE_LOOKBACK)..=index];
        let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let range = high - low;
        if range > 0.0 {
            momentum.push(histogram / range * 10.0, 1.0);
        }

        let spread = line - signal;
        let spread_term = if price > 0.0 {
            (spread / price * 100.0).clamp(-1.0, 1.0)
        } else {
            0.0
        };
        momentum.push(0.5 * sign(spread, tolerance) + 0.5 * spread_term, 1.0);
        momentum.push(0.3 * sign(line, tolerance), 1.0);
    }

    if let Some(rsi) = cache.value_at(candles, RSI, index) {
        let (value, weight) = rsi_component(rsi);
        momentum.push(value, weight);
    }

    if index >= 20 {
        momentum.push(deviation(price, candles[index - 20].close) * 10.0, 1.0);
    }
    if index >= 50 {
        momentum.push(deviation(price, candles[index - 50].close) * 5.0, 1.2);
    }

    momentum
}

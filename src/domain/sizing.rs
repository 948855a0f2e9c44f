//! Risk-adjusted position sizing.
//!
//! The order fraction is the product of signal strength, regime confidence,
//! a fractional-Kelly multiplier learned from recent closed trades and a
//! volatility multiplier that shrinks orders when ATR spikes, bounded by the
//! strategy and portfolio caps.

use serde::Serialize;

use crate::domain::candle::Candle;
use crate::domain::indicator::IndicatorType;
use crate::domain::indicator::atr::DEFAULT_ATR_PERIOD;
use crate::domain::indicator_cache::IndicatorCache;

#[derive(Debug, Clone, PartialEq)]
pub struct KellyConfig {
    pub enabled: bool,
    pub min_trades: usize,
    pub lookback: usize,
    pub fraction: f64,
}

impl Default for KellyConfig {
    fn default() -> Self {
        KellyConfig {
            enabled: true,
            min_trades: 10,
            lookback: 20,
            fraction: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolatilityConfig {
    pub enabled: bool,
    pub atr_period: usize,
    pub average_window: usize,
    pub threshold: f64,
    pub max_reduction: f64,
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        VolatilityConfig {
            enabled: true,
            atr_period: DEFAULT_ATR_PERIOD,
            average_window: 30,
            threshold: 2.0,
            max_reduction: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizingConfig {
    pub kelly: KellyConfig,
    pub volatility: VolatilityConfig,
    pub portfolio_cap: f64,
    pub min_trade_value: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        SizingConfig {
            kelly: KellyConfig::default(),
            volatility: VolatilityConfig::default(),
            portfolio_cap: 0.95,
            min_trade_value: 1.0,
        }
    }
}

/// Every input and multiplier behind one sizing decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SizingBreakdown {
    pub signal_strength: f64,
    pub confidence: f64,
    pub kelly: f64,
    pub volatility: f64,
    pub max_position_pct: f64,
    pub portfolio_cap: f64,
    pub fraction: f64,
}

impl SizingBreakdown {
    pub fn buy_notional(&self, cash: f64) -> f64 {
        cash * self.fraction
    }

    pub fn sell_amount(&self, asset_balance: f64) -> f64 {
        asset_balance * self.fraction
    }
}

/// Fractional Kelly from closed-trade P&L, oldest first.
///
/// Returns exactly 1.0 until `min_trades` trades have closed.
pub fn kelly_multiplier(closed_pnls: &[f64], config: &KellyConfig, max_position_pct: f64) -> f64 {
    if !config.enabled || closed_pnls.len() < config.min_trades {
        return 1.0;
    }

    let start = closed_pnls.len().saturating_sub(config.lookback);
    let recent = &closed_pnls[start..];
    let wins: Vec<f64> = recent.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = recent.iter().copied().filter(|p| *p < 0.0).map(f64::abs).collect();

    let win_rate = wins.len() as f64 / recent.len() as f64;
    let kelly = if losses.is_empty() {
        win_rate
    } else if wins.is_empty() {
        0.0
    } else {
        let avg_win = wins.iter().sum::<f64>() / wins.len() as f64;
        let avg_loss = losses.iter().sum::<f64>() / losses.len() as f64;
        let ratio = avg_win / avg_loss;
        (win_rate - (1.0 - win_rate) / ratio).max(0.0)
    };

    (kelly * config.fraction).min(max_position_pct)
}

/// Shrink size when current ATR% runs far above its recent average.
pub fn volatility_multiplier(
    cache: &mut IndicatorCache,
    candles: &[Candle],
    index: usize,
    config: &VolatilityConfig,
) -> f64 {
    if !config.enabled {
        return 1.0;
    }
    let atr_type = IndicatorType::Atr(config.atr_period);
    let Some(current) = atr_pct(cache, candles, atr_type, index) else {
        return 1.0;
    };

    let from = index.saturating_sub(config.average_window);
    let history: Vec<f64> = (from..index)
        .filter_map(|i| atr_pct(cache, candles, atr_type, i))
        .collect();
    if history.is_empty() {
        return 1.0;
    }
    let average = history.iter().sum::<f64>() / history.len() as f64;
    if average <= 0.0 {
        return 1.0;
    }

    let ratio = current / average;
    if ratio <= config.threshold {
        return 1.0;
    }
    let excess = ((ratio - config.threshold) / config.threshold).min(1.0);
    1.0 - config.max_reduction * excess
}

fn atr_pct(
    cache: &mut IndicatorCache,
    candles: &[Candle],
    atr_type: IndicatorType,
    index: usize,
) -> Option<f64> {
    let atr = cache.value_at(candles, atr_type, index)?;
    let price = candles.get(index)?.close;
    (price > 0.0).then(|| atr / price)
}

#[derive(Debug, Clone, Default)]
pub struct RiskSizer {
    config: SizingConfig,
}

impl RiskSizer {
    pub fn new(config: SizingConfig) -> Self {
        RiskSizer { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    #[allow(clippy::too_many_arguments)]
    pub fn size(
        &self,
        signal: f64,
        confidence: f64,
        max_position_pct: f64,
        closed_pnls: &[f64],
        cache: &mut IndicatorCache,
        candles: &[Candle],
        index: usize,
    ) -> SizingBreakdown {
        let kelly = kelly_multiplier(closed_pnls, &self.config.kelly, max_position_pct);
        let volatility = volatility_multiplier(cache, candles, index, &self.config.volatility);
        let raw = signal.abs() * confidence * kelly * volatility;
        let fraction = raw
            .min(max_position_pct)
            .min(self.config.portfolio_cap)
            .max(0.0);

        SizingBreakdown {
            signal_strength: signal.abs(),
            confidence,
            kelly,
            volatility,
            max_position_pct,
            portfolio_cap: self.config.portfolio_cap,
            fraction,
        }
    }

    /// Orders whose notional falls below the minimum are skipped.
    pub fn meets_minimum(&self, notional: f64) -> bool {
        notional >= self.config.min_trade_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::timeframe::HOUR_MS;
    use approx::assert_relative_eq;

    fn candles_with_ranges(ranges: &[f64]) -> Vec<Candle> {
        ranges
            .iter()
            .enumerate()
            .map(|(i, &range)| Candle {
                timestamp: i as i64 * HOUR_MS,
                open: 100.0,
                high: 100.0 + range / 2.0,
                low: 100.0 - range / 2.0,
                close: 100.0,
                volume: 1.0,
            })
            .collect()
    }

    #[test]
    fn kelly_is_neutral_below_min_trades() {
        let pnls = vec![10.0; 9];
        let k = kelly_multiplier(&pnls, &KellyConfig::default(), 0.5);
        assert!((k - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn kelly_positive_and_capped_with_edge() {
        let pnls: Vec<f64> = (0..20)
            .map(|i| if i % 5 == 0 { -10.0 } else { 20.0 })
            .collect();
        let k = kelly_multiplier(&pnls, &KellyConfig::default(), 0.5);
        // win rate 0.8, ratio 2.0 -> 0.7 * 0.25
        assert_relative_eq!(k, 0.175, epsilon = 1e-12);

        let capped = kelly_multiplier(&pnls, &KellyConfig::default(), 0.1);
        assert_relative_eq!(capped, 0.1);
    }

    #[test]
    fn kelly_without_losses_uses_win_rate() {
        let pnls = vec![5.0; 12];
        let k = kelly_multiplier(&pnls, &KellyConfig::default(), 1.0);
        assert_relative_eq!(k, 0.25);
    }

    #[test]
    fn kelly_only_reads_lookback_window() {
        let mut pnls = vec![-50.0; 30];
        pnls.extend(vec![5.0; 20]);
        let k = kelly_multiplier(&pnls, &KellyConfig::default(), 1.0);
        assert_relative_eq!(k, 0.25);
    }

    #[test]
    fn kelly_never_negative() {
        let pnls: Vec<f64> = (0..12).map(|i| if i < 2 { 1.0 } else { -10.0 }).collect();
        let k = kelly_multiplier(&pnls, &KellyConfig::default(), 1.0);
        assert!(k >= 0.0);
        assert!(k < f64::EPSILON);
    }

    #[test]
    fn steady_volatility_keeps_full_size() {
        let candles = candles_with_ranges(&[2.0; 60]);
        let mut cache = IndicatorCache::new();
        let m = volatility_multiplier(&mut cache, &candles, 59, &VolatilityConfig::default());
        assert_relative_eq!(m, 1.0);
    }

    #[test]
    fn volatility_spike_reduces_size_to_floor() {
        let mut ranges = vec![1.0; 59];
        ranges.push(200.0);
        let candles = candles_with_ranges(&ranges);
        let mut cache = IndicatorCache::new();
        let m = volatility_multiplier(&mut cache, &candles, 59, &VolatilityConfig::default());
        assert_relative_eq!(m, 0.5);
    }

    #[test]
    fn no_atr_means_no_adjustment() {
        let candles = candles_with_ranges(&[1.0; 5]);
        let mut cache = IndicatorCache::new();
        let m = volatility_multiplier(&mut cache, &candles, 4, &VolatilityConfig::default());
        assert_relative_eq!(m, 1.0);
    }

    #[test]
    fn fraction_is_bounded_by_caps() {
        let candles = candles_with_ranges(&[1.0; 5]);
        let mut cache = IndicatorCache::new();
        let sizer = RiskSizer::default();

        let b = sizer.size(1.0, 1.0, 2.0, &[], &mut cache, &candles, 4);
        assert_relative_eq!(b.fraction, 0.95);

        let b = sizer.size(-0.5, 0.8, 0.3, &[], &mut cache, &candles, 4);
        assert_relative_eq!(b.fraction, 0.3);
        assert_relative_eq!(b.signal_strength, 0.5);
        assert_relative_eq!(b.buy_notional(1000.0), 300.0);
        assert_relative_eq!(b.sell_amount(2.0), 0.6);
    }

    #[test]
    fn minimum_trade_value() {
        let sizer = RiskSizer::default();
        assert!(!sizer.meets_minimum(0.5));
        assert!(sizer.meets_minimum(1.0));
    }
}

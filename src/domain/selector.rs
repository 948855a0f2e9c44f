//! Regime-driven strategy selection.

use crate::domain::candle::Candle;
use crate::domain::indicator_cache::IndicatorCache;
use crate::domain::regime::{Regime, RegimeSignal};
use crate::domain::strategy::{Action, IndicatorReading, StrategyConfig, StrategySet};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.25;
pub const CONFIRMATION_LOOKBACK: usize = 5;

/// The configuration chosen for a step, tagged with the slot it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActiveStrategy<'a> {
    Bullish(&'a StrategyConfig),
    Bearish(&'a StrategyConfig),
    Neutral(&'a StrategyConfig),
}

impl<'a> ActiveStrategy<'a> {
    pub fn config(&self) -> &'a StrategyConfig {
        match *self {
            ActiveStrategy::Bullish(c) | ActiveStrategy::Bearish(c) | ActiveStrategy::Neutral(c) => c,
        }
    }

    pub fn slot(&self) -> Regime {
        match self {
            ActiveStrategy::Bullish(_) => Regime::Bullish,
            ActiveStrategy::Bearish(_) => Regime::Bearish,
            ActiveStrategy::Neutral(_) => Regime::Neutral,
        }
    }
}

impl StrategySet {
    /// Directional configs need `confidence >= threshold`; everything else
    /// runs the neutral config, or the bearish one when no neutral is set.
    pub fn select(&self, signal: &RegimeSignal, threshold: f64) -> ActiveStrategy<'_> {
        match signal.regime {
            Regime::Bullish if signal.confidence >= threshold => {
                ActiveStrategy::Bullish(&self.bullish)
            }
            Regime::Bearish if signal.confidence >= threshold => {
                ActiveStrategy::Bearish(&self.bearish)
            }
            _ => ActiveStrategy::Neutral(self.neutral.as_ref().unwrap_or(&self.bearish)),
        }
    }
}

/// Short-horizon price change agrees with the regime direction.
pub fn momentum_confirms(candles: &[Candle], index: usize, regime: Regime) -> bool {
    if regime == Regime::Neutral {
        return true;
    }
    let Some(past) = index
        .checked_sub(CONFIRMATION_LOOKBACK)
        .and_then(|i| candles.get(i))
    else {
        return false;
    };
    let Some(now) = candles.get(index) else {
        return false;
    };
    match regime {
        Regime::Bullish => now.close > past.close,
        Regime::Bearish => now.close < past.close,
        Regime::Neutral => true,
    }
}

#[derive(Debug, Clone)]
pub struct AdaptiveSignal<'a> {
    pub regime: RegimeSignal,
    pub active: ActiveStrategy<'a>,
    pub signal: f64,
    pub action: Action,
    pub momentum_confirmed: bool,
    pub readings: Vec<IndicatorReading>,
}

#[derive(Debug, Clone)]
pub struct StrategySelector {
    confidence_threshold: f64,
}

impl Default for StrategySelector {
    fn default() -> Self {
        StrategySelector {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl StrategySelector {
    pub fn new(confidence_threshold: f64) -> Self {
        StrategySelector {
            confidence_threshold,
        }
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    pub fn generate<'a>(
        &self,
        strategies: &'a StrategySet,
        regime: RegimeSignal,
        cache: &mut IndicatorCache,
        candles: &[Candle],
        index: usize,
    ) -> AdaptiveSignal<'a> {
        let active = strategies.select(&regime, self.confidence_threshold);
        let output = active.config().evaluate(cache, candles, index);
        let momentum_confirmed = momentum_confirms(candles, index, regime.regime);

        AdaptiveSignal {
            regime,
            active,
            signal: output.signal,
            action: output.action,
            momentum_confirmed,
            readings: output.readings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::candles_from_closes;
    use crate::domain::strategy::parse_indicator_list;
    use crate::domain::timeframe::Timeframe;

    fn config(name: &str) -> StrategyConfig {
        StrategyConfig {
            name: name.into(),
            indicators: parse_indicator_list("momentum:3:1").unwrap(),
            buy_threshold: 0.2,
            sell_threshold: -0.2,
            max_position_pct: 0.5,
            timeframe: Timeframe::H1,
        }
    }

    fn set(with_neutral: bool) -> StrategySet {
        StrategySet {
            bullish: config("bull"),
            bearish: config("bear"),
            neutral: with_neutral.then(|| config("flat")),
        }
    }

    fn regime(regime: Regime, confidence: f64) -> RegimeSignal {
        RegimeSignal {
            regime,
            confidence,
            ..RegimeSignal::neutral()
        }
    }

    #[test]
    fn confident_regimes_select_their_config() {
        let s = set(true);
        let bull = s.select(&regime(Regime::Bullish, 0.25), 0.25);
        assert_eq!(bull.slot(), Regime::Bullish);
        assert_eq!(bull.config().name, "bull");

        let bear = s.select(&regime(Regime::Bearish, 0.9), 0.25);
        assert_eq!(bear.config().name, "bear");
    }

    #[test]
    fn low_confidence_falls_to_neutral() {
        let s = set(true);
        let chosen = s.select(&regime(Regime::Bullish, 0.2), 0.25);
        assert_eq!(chosen.slot(), Regime::Neutral);
        assert_eq!(chosen.config().name, "flat");
    }

    #[test]
    fn missing_neutral_uses_bearish_config() {
        let s = set(false);
        let chosen = s.select(&regime(Regime::Neutral, 0.0), 0.25);
        assert!(matches!(chosen, ActiveStrategy::Neutral(_)));
        assert_eq!(chosen.config().name, "bear");
    }

    #[test]
    fn momentum_confirmation_checks_direction() {
        let up = candles_from_closes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert!(momentum_confirms(&up, 5, Regime::Bullish));
        assert!(!momentum_confirms(&up, 5, Regime::Bearish));
        assert!(momentum_confirms(&up, 5, Regime::Neutral));
        assert!(!momentum_confirms(&up, 3, Regime::Bullish));
    }

    #[test]
    fn generate_runs_selected_config() {
        let candles = candles_from_closes(&[100.0, 101.0, 102.0, 103.0, 104.0, 110.0]);
        let s = set(true);
        let mut cache = IndicatorCache::new();
        let out = StrategySelector::default().generate(
            &s,
            regime(Regime::Bullish, 0.8),
            &mut cache,
            &candles,
            5,
        );
        assert_eq!(out.active.config().name, "bull");
        assert_eq!(out.action, Action::Buy);
        assert!(out.momentum_confirmed);
        assert_eq!(out.readings.len(), 1);
    }
}

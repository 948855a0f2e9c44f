//! Strategy configuration and the weighted-indicator signal generator.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::candle::Candle;
use crate::domain::error::ParseError;
use crate::domain::indicator::IndicatorType;
use crate::domain::indicator_cache::IndicatorCache;
use crate::domain::timeframe::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
            Action::Hold => "hold",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalIndicator {
    SmaCross { fast: usize, slow: usize },
    EmaCross { fast: usize, slow: usize },
    Rsi { period: usize },
    Macd { fast: usize, slow: usize, signal: usize },
    Momentum { period: usize },
}

impl fmt::Display for SignalIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalIndicator::SmaCross { fast, slow } => write!(f, "sma_cross:{fast}:{slow}"),
            SignalIndicator::EmaCross { fast, slow } => write!(f, "ema_cross:{fast}:{slow}"),
            SignalIndicator::Rsi { period } => write!(f, "rsi:{period}"),
            SignalIndicator::Macd { fast, slow, signal } => {
                write!(f, "macd:{fast}:{slow}:{signal}")
            }
            SignalIndicator::Momentum { period } => write!(f, "momentum:{period}"),
        }
    }
}

impl SignalIndicator {
    /// Value in [-1, 1] at `index`; `None` while the underlying indicator warms up.
    pub fn value_at(
        &self,
        cache: &mut IndicatorCache,
        candles: &[Candle],
        index: usize,
    ) -> Option<f64> {
        let price = candles.get(index)?.close;
        let raw = match *self {
            SignalIndicator::SmaCross { fast, slow } => {
                let f = cache.value_at(candles, IndicatorType::Sma(fast), index)?;
                let s = cache.value_at(candles, IndicatorType::Sma(slow), index)?;
                ratio(f - s, s)? * 20.0
            }
            SignalIndicator::EmaCross { fast, slow } => {
                let f = cache.value_at(candles, IndicatorType::Ema(fast), index)?;
                let s = cache.value_at(candles, IndicatorType::Ema(slow), index)?;
                ratio(f - s, s)? * 20.0
            }
            SignalIndicator::Rsi { period } => {
                let rsi = cache.value_at(candles, IndicatorType::Rsi(period), index)?;
                (50.0 - rsi) / 20.0
            }
            SignalIndicator::Macd { fast, slow, signal } => {
                let (_, _, histogram) =
                    cache.macd_at(candles, IndicatorType::Macd { fast, slow, signal }, index)?;
                ratio(histogram, price)? * 200.0
            }
            SignalIndicator::Momentum { period } => {
                let past = candles.get(index.checked_sub(period)?)?.close;
                ratio(price - past, past)? * 10.0
            }
        };
        Some(raw.clamp(-1.0, 1.0))
    }
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    (denominator.abs() > f64::EPSILON).then(|| numerator / denominator)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedIndicator {
    pub indicator: SignalIndicator,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    pub indicators: Vec<WeightedIndicator>,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    pub max_position_pct: f64,
    pub timeframe: Timeframe,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorReading {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalOutput {
    pub signal: f64,
    pub action: Action,
    pub readings: Vec<IndicatorReading>,
}

impl StrategyConfig {
    /// Weighted mean of the available indicator values, mapped to an action.
    pub fn evaluate(
        &self,
        cache: &mut IndicatorCache,
        candles: &[Candle],
        index: usize,
    ) -> SignalOutput {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        let mut readings = Vec::with_capacity(self.indicators.len());

        for wi in &self.indicators {
            if let Some(value) = wi.indicator.value_at(cache, candles, index) {
                weighted += value * wi.weight;
                total_weight += wi.weight.abs();
                readings.push(IndicatorReading {
                    name: wi.indicator.to_string(),
                    value,
                });
            }
        }

        let signal = if total_weight > 0.0 {
            (weighted / total_weight).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        SignalOutput {
            signal,
            action: self.action_for(signal),
            readings,
        }
    }

    pub fn action_for(&self, signal: f64) -> Action {
        if signal >= self.buy_threshold {
            Action::Buy
        } else if signal <= self.sell_threshold {
            Action::Sell
        } else {
            Action::Hold
        }
    }
}

/// The regime-specific configurations saved for one tradable asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySet {
    pub bullish: StrategyConfig,
    pub bearish: StrategyConfig,
    pub neutral: Option<StrategyConfig>,
}

fn parse_period(field: &str, position: usize) -> Result<usize, ParseError> {
    match field.trim().parse::<usize>() {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(ParseError {
            message: format!("expected a positive period, found '{}'", field.trim()),
            position,
        }),
    }
}

fn parse_weight(field: &str, position: usize) -> Result<f64, ParseError> {
    field
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|w| w.is_finite())
        .ok_or_else(|| ParseError {
            message: format!("expected a numeric weight, found '{}'", field.trim()),
            position,
        })
}

/// Parse `name:param...:weight` entries separated by commas, e.g.
/// `sma_cross:20:50:1.0, rsi:14:0.5, macd:12:26:9:1`.
pub fn parse_indicator_list(input: &str) -> Result<Vec<WeightedIndicator>, ParseError> {
    let mut out = Vec::new();
    let mut offset = 0;

    for entry in input.split(',') {
        let position = offset + (entry.len() - entry.trim_start().len());
        offset += entry.len() + 1;
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let fields: Vec<&str> = entry.split(':').collect();
        let name = fields[0].trim().to_ascii_lowercase();
        let expected = match name.as_str() {
            "sma_cross" | "ema_cross" => 4,
            "rsi" | "momentum" => 3,
            "macd" => 5,
            _ => {
                return Err(ParseError {
                    message: format!("unknown indicator '{name}'"),
                    position,
                });
            }
        };
        if fields.len() != expected {
            return Err(ParseError {
                message: format!(
                    "{name} takes {} fields separated by ':', found {}",
                    expected,
                    fields.len()
                ),
                position,
            });
        }

        let indicator = match name.as_str() {
            "sma_cross" => SignalIndicator::SmaCross {
                fast: parse_period(fields[1], position)?,
                slow: parse_period(fields[2], position)?,
            },
            "ema_cross" => SignalIndicator::EmaCross {
                fast: parse_period(fields[1], position)?,
                slow: parse_period(fields[2], position)?,
            },
            "rsi" => SignalIndicator::Rsi {
                period: parse_period(fields[1], position)?,
            },
            "momentum" => SignalIndicator::Momentum {
                period: parse_period(fields[1], position)?,
            },
            _ => SignalIndicator::Macd {
                fast: parse_period(fields[1], position)?,
                slow: parse_period(fields[2], position)?,
                signal: parse_period(fields[3], position)?,
            },
        };
        let weight = parse_weight(fields[expected - 1], position)?;
        out.push(WeightedIndicator { indicator, weight });
    }

    if out.is_empty() {
        return Err(ParseError {
            message: "indicator list is empty".into(),
            position: 0,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::candles_from_closes;

    fn sample_config(name: &str) -> StrategyConfig {
        StrategyConfig {
            name: name.into(),
            indicators: parse_indicator_list("sma_cross:5:10:1.0, momentum:5:1.0").unwrap(),
            buy_threshold: 0.3,
            sell_threshold: -0.3,
            max_position_pct: 0.5,
            timeframe: Timeframe::H1,
        }
    }

    #[test]
    fn parses_all_indicator_kinds() {
        let list = parse_indicator_list(
            "sma_cross:20:50:1.0, ema_cross:12:26:0.5,rsi:14:2, macd:12:26:9:1, momentum:10:0.25",
        )
        .unwrap();
        assert_eq!(list.len(), 5);
        assert_eq!(
            list[0].indicator,
            SignalIndicator::SmaCross { fast: 20, slow: 50 }
        );
        assert_eq!(list[2].weight, 2.0);
        assert_eq!(
            list[3].indicator,
            SignalIndicator::Macd {
                fast: 12,
                slow: 26,
                signal: 9
            }
        );
        assert_eq!(list[4].indicator.to_string(), "momentum:10");
    }

    #[test]
    fn parse_errors_carry_entry_position() {
        let err = parse_indicator_list("rsi:14:1, bogus:3:1").unwrap_err();
        assert_eq!(err.position, 10);
        assert!(err.message.contains("bogus"));

        let err = parse_indicator_list("rsi:0:1").unwrap_err();
        assert!(err.message.contains("positive period"));

        let err = parse_indicator_list("macd:12:26:1").unwrap_err();
        assert!(err.message.contains("5 fields"));

        assert!(parse_indicator_list(" , ").is_err());
    }

    #[test]
    fn rising_prices_produce_buy() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 * 2.0).collect();
        let candles = candles_from_closes(&closes);
        let mut cache = IndicatorCache::new();
        let out = sample_config("up").evaluate(&mut cache, &candles, 29);
        assert!(out.signal > 0.3);
        assert_eq!(out.action, Action::Buy);
        assert_eq!(out.readings.len(), 2);
    }

    #[test]
    fn falling_prices_produce_sell() {
        let closes: Vec<f64> = (0..30).map(|i| 200.0 - i as f64 * 2.0).collect();
        let candles = candles_from_closes(&closes);
        let mut cache = IndicatorCache::new();
        let out = sample_config("down").evaluate(&mut cache, &candles, 29);
        assert_eq!(out.action, Action::Sell);
        assert!(out.signal >= -1.0);
    }

    #[test]
    fn warmup_yields_hold_with_no_readings() {
        let candles = candles_from_closes(&[100.0, 101.0, 102.0]);
        let mut cache = IndicatorCache::new();
        let out = sample_config("early").evaluate(&mut cache, &candles, 2);
        assert_eq!(out.signal, 0.0);
        assert_eq!(out.action, Action::Hold);
        assert!(out.readings.is_empty());
    }

    #[test]
    fn thresholds_are_inclusive() {
        let config = sample_config("t");
        assert_eq!(config.action_for(0.3), Action::Buy);
        assert_eq!(config.action_for(-0.3), Action::Sell);
        assert_eq!(config.action_for(0.29), Action::Hold);
    }

    #[test]
    fn strategy_set_serializes() {
        let set = StrategySet {
            bullish: sample_config("bull"),
            bearish: sample_config("bear"),
            neutral: None,
        };
        let json = serde_json::to_string(&set).unwrap();
        assert!(json.contains("\"kind\":\"sma_cross\""));
        let back: StrategySet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}

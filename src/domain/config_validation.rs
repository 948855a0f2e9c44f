//! Configuration loading and validation.
//!
//! Reads the INI sections `[backtest]`, `[risk]`, `[regime]`, `[data]` and
//! the per-regime strategy sections into domain configs, rejecting values
//! the engine cannot run with.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::backfill::RetryPolicy;
use crate::domain::backtest::BacktestConfig;
use crate::domain::candle::parse_timestamp;
use crate::domain::error::EngineError;
use crate::domain::execution::{CostConfig, ExecutionConfig};
use crate::domain::position::StopLossConfig;
use crate::domain::regime::{DEFAULT_WARMUP, RegimeConfig};
use crate::domain::selector::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::domain::sizing::{KellyConfig, SizingConfig, VolatilityConfig};
use crate::domain::strategy::{StrategyConfig, StrategySet, parse_indicator_list};
use crate::domain::timeframe::Timeframe;
use crate::ports::config_port::ConfigPort;

/// Minimum series length when `[data] min_candles` is absent.
pub const DEFAULT_MIN_CANDLES: usize = 100;

/// Where candles and strategy sets live, and how hard to try when fetching.
#[derive(Debug, Clone, PartialEq)]
pub struct DataConfig {
    pub csv_dir: Option<PathBuf>,
    pub store_path: Option<String>,
    pub strategy_dir: PathBuf,
    pub min_candles: usize,
    pub retry: RetryPolicy,
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> EngineError {
    EngineError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn missing(section: &str, key: &str) -> EngineError {
    EngineError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

fn required_string(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, EngineError> {
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(missing(section, key)),
    }
}

fn fraction(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
    allow_zero: bool,
) -> Result<f64, EngineError> {
    let value = config.get_double(section, key, default);
    let low_ok = if allow_zero { value >= 0.0 } else { value > 0.0 };
    if !low_ok || value > 1.0 {
        let range = if allow_zero { "[0, 1]" } else { "(0, 1]" };
        return Err(invalid(section, key, format!("{key} must be in {range}")));
    }
    Ok(value)
}

fn non_negative(config: &dyn ConfigPort, section: &str, key: &str, default: f64) -> Result<f64, EngineError> {
    let value = config.get_double(section, key, default);
    if value < 0.0 {
        return Err(invalid(section, key, format!("{key} must be non-negative")));
    }
    Ok(value)
}

fn count(config: &dyn ConfigPort, section: &str, key: &str, default: usize) -> Result<usize, EngineError> {
    let value = config.get_int(section, key, default as i64);
    if value < 1 {
        return Err(invalid(section, key, format!("{key} must be at least 1")));
    }
    Ok(value as usize)
}

fn timeframe(config: &dyn ConfigPort, section: &str, default: Timeframe) -> Result<Timeframe, EngineError> {
    match config.get_string(section, "timeframe") {
        Some(s) => s.parse().map_err(|reason: String| invalid(section, "timeframe", reason)),
        None => Ok(default),
    }
}

pub fn load_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, EngineError> {
    let symbol = required_string(config, "backtest", "symbol")?;
    let timeframe = timeframe(config, "backtest", Timeframe::H1)?;

    let initial_capital = config.get_double("backtest", "initial_capital", 10_000.0);
    if initial_capital <= 0.0 {
        return Err(invalid(
            "backtest",
            "initial_capital",
            "initial_capital must be positive",
        ));
    }

    Ok(BacktestConfig {
        symbol,
        timeframe,
        initial_capital,
        confidence_threshold: fraction(
            config,
            "backtest",
            "confidence_threshold",
            DEFAULT_CONFIDENCE_THRESHOLD,
            true,
        )?,
        require_momentum_confirmation: config.get_bool(
            "backtest",
            "require_momentum_confirmation",
            false,
        ),
        regime: load_regime_config(config)?,
        sizing: load_sizing_config(config)?,
        execution: load_execution_config(config)?,
    })
}

fn load_regime_config(config: &dyn ConfigPort) -> Result<RegimeConfig, EngineError> {
    let defaults = RegimeConfig::default();
    Ok(RegimeConfig {
        warmup: count(config, "regime", "warmup", DEFAULT_WARMUP)?,
        signal_threshold: fraction(config, "regime", "signal_threshold", defaults.signal_threshold, true)?,
        min_strength: fraction(config, "regime", "min_strength", defaults.min_strength, true)?,
    })
}

fn load_sizing_config(config: &dyn ConfigPort) -> Result<SizingConfig, EngineError> {
    let defaults = SizingConfig::default();
    let kelly = KellyConfig {
        enabled: config.get_bool("risk", "kelly_enabled", defaults.kelly.enabled),
        min_trades: count(config, "risk", "kelly_min_trades", defaults.kelly.min_trades)?,
        lookback: count(config, "risk", "kelly_lookback", defaults.kelly.lookback)?,
        fraction: fraction(config, "risk", "kelly_fraction", defaults.kelly.fraction, false)?,
    };
    let volatility = VolatilityConfig {
        enabled: config.get_bool("risk", "volatility_enabled", defaults.volatility.enabled),
        atr_period: count(config, "risk", "volatility_atr_period", defaults.volatility.atr_period)?,
        average_window: count(
            config,
            "risk",
            "volatility_window",
            defaults.volatility.average_window,
        )?,
        threshold: non_negative(config, "risk", "volatility_threshold", defaults.volatility.threshold)?,
        max_reduction: fraction(
            config,
            "risk",
            "volatility_max_reduction",
            defaults.volatility.max_reduction,
            true,
        )?,
    };
    if volatility.threshold <= 1.0 {
        return Err(invalid(
            "risk",
            "volatility_threshold",
            "volatility_threshold must be greater than 1",
        ));
    }

    Ok(SizingConfig {
        kelly,
        volatility,
        portfolio_cap: fraction(config, "risk", "portfolio_cap", defaults.portfolio_cap, false)?,
        min_trade_value: non_negative(config, "risk", "min_trade_value", defaults.min_trade_value)?,
    })
}

fn load_execution_config(config: &dyn ConfigPort) -> Result<ExecutionConfig, EngineError> {
    let cost_defaults = CostConfig::default();
    let stop_defaults = StopLossConfig::default();

    let stop_loss = StopLossConfig {
        enabled: config.get_bool("risk", "stop_loss_enabled", stop_defaults.enabled),
        trailing: config.get_bool("risk", "trailing_stop", stop_defaults.trailing),
        atr_multiplier: config.get_double("risk", "atr_multiplier", stop_defaults.atr_multiplier),
    };
    if stop_loss.atr_multiplier <= 0.0 {
        return Err(invalid(
            "risk",
            "atr_multiplier",
            "atr_multiplier must be positive",
        ));
    }

    Ok(ExecutionConfig {
        costs: CostConfig {
            enabled: config.get_bool("risk", "costs_enabled", cost_defaults.enabled),
            fee_pct: fraction(config, "risk", "fee_pct", cost_defaults.fee_pct, true)?,
            slippage_pct: fraction(config, "risk", "slippage_pct", cost_defaults.slippage_pct, true)?,
            volatility_scaled_slippage: config.get_bool(
                "risk",
                "volatility_scaled_slippage",
                cost_defaults.volatility_scaled_slippage,
            ),
        },
        stop_loss,
    })
}

fn load_strategy(
    config: &dyn ConfigPort,
    section: &str,
    default_timeframe: Timeframe,
) -> Result<StrategyConfig, EngineError> {
    let name = config
        .get_string(section, "name")
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| section.to_string());
    let indicators = parse_indicator_list(&required_string(config, section, "indicators")?)?;
    if indicators.is_empty() {
        return Err(invalid(section, "indicators", "at least one indicator is required"));
    }

    let buy_threshold = config.get_double(section, "buy_threshold", 0.3);
    let sell_threshold = config.get_double(section, "sell_threshold", -0.3);
    if buy_threshold <= sell_threshold {
        return Err(invalid(
            section,
            "buy_threshold",
            "buy_threshold must be greater than sell_threshold",
        ));
    }

    Ok(StrategyConfig {
        name,
        indicators,
        buy_threshold,
        sell_threshold,
        max_position_pct: fraction(config, section, "max_position_pct", 0.5, false)?,
        timeframe: timeframe(config, section, default_timeframe)?,
    })
}

/// Strategy set from `[bullish]`, `[bearish]` and optional `[neutral]`.
pub fn load_strategy_set(
    config: &dyn ConfigPort,
    default_timeframe: Timeframe,
) -> Result<StrategySet, EngineError> {
    let neutral = match config.get_string("neutral", "indicators") {
        Some(_) => Some(load_strategy(config, "neutral", default_timeframe)?),
        None => None,
    };
    Ok(StrategySet {
        bullish: load_strategy(config, "bullish", default_timeframe)?,
        bearish: load_strategy(config, "bearish", default_timeframe)?,
        neutral,
    })
}

pub fn load_data_config(config: &dyn ConfigPort) -> Result<DataConfig, EngineError> {
    let retry_defaults = RetryPolicy::default();
    let max_attempts = count(
        config,
        "data",
        "retry_attempts",
        retry_defaults.max_attempts as usize,
    )?;
    let base_delay_ms = config.get_int(
        "data",
        "retry_base_delay_ms",
        retry_defaults.base_delay.as_millis() as i64,
    );
    if base_delay_ms < 0 {
        return Err(invalid(
            "data",
            "retry_base_delay_ms",
            "retry_base_delay_ms must be non-negative",
        ));
    }

    Ok(DataConfig {
        csv_dir: config.get_string("data", "csv_dir").map(PathBuf::from),
        store_path: config.get_string("data", "store_path"),
        strategy_dir: config
            .get_string("data", "strategy_dir")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("strategies")),
        min_candles: count(config, "data", "min_candles", DEFAULT_MIN_CANDLES)?,
        retry: RetryPolicy {
            max_attempts: max_attempts as u32,
            base_delay: Duration::from_millis(base_delay_ms as u64),
            max_delay: retry_defaults.max_delay,
        },
    })
}

/// `[backtest] start` / `end` as epoch milliseconds, start strictly first.
pub fn load_run_window(config: &dyn ConfigPort) -> Result<(i64, i64), EngineError> {
    let parse = |key: &str| -> Result<i64, EngineError> {
        let raw = required_string(config, "backtest", key)?;
        parse_timestamp(&raw).ok_or_else(|| {
            invalid(
                "backtest",
                key,
                format!("invalid {key} '{raw}', expected YYYY-MM-DD or RFC 3339"),
            )
        })
    };
    let start = parse("start")?;
    let end = parse("end")?;
    if start >= end {
        return Err(invalid("backtest", "start", "start must be before end"));
    }
    Ok((start, end))
}

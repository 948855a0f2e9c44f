//! Backtest driver.
//!
//! Steps through a validated candle series one bar at a time: mark the
//! portfolio, classify the regime, run stop exits, then (only when no stop
//! fired) let the regime-selected strategy trade through the sizer.

use serde::Serialize;

use super::audit::{AuditTrail, EntryContext, ExitContext, TradeAudit};
use super::candle::{Candle, validate_series};
use super::error::EngineError;
use super::execution::{ExecutionConfig, ExecutionEngine};
use super::indicator::IndicatorType;
use super::indicator::atr::DEFAULT_ATR_PERIOD;
use super::indicator_cache::IndicatorCache;
use super::ledger::Trade;
use super::metrics::Metrics;
use super::portfolio::{Portfolio, PortfolioSnapshot};
use super::regime::{Regime, RegimeClassifier, RegimeConfig};
use super::selector::{DEFAULT_CONFIDENCE_THRESHOLD, StrategySelector};
use super::sizing::{RiskSizer, SizingConfig};
use super::strategy::{Action, StrategySet};
use super::timeframe::Timeframe;

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub initial_capital: f64,
    pub confidence_threshold: f64,
    pub require_momentum_confirmation: bool,
    pub regime: RegimeConfig,
    pub sizing: SizingConfig,
    pub execution: ExecutionConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            symbol: String::new(),
            timeframe: Timeframe::H1,
            initial_capital: 10_000.0,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            require_momentum_confirmation: false,
            regime: RegimeConfig::default(),
            sizing: SizingConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

/// Bars spent in each regime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegimeCounts {
    pub bullish: usize,
    pub bearish: usize,
    pub neutral: usize,
}

impl RegimeCounts {
    fn record(&mut self, regime: Regime) {
        match regime {
            Regime::Bullish => self.bullish += 1,
            Regime::Bearish => self.bearish += 1,
            Regime::Neutral => self.neutral += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub portfolio: Portfolio,
    pub trades: Vec<Trade>,
    pub audits: Vec<TradeAudit>,
    pub snapshots: Vec<PortfolioSnapshot>,
    pub metrics: Metrics,
    pub regimes: RegimeCounts,
    pub stop_exits: usize,
}

pub fn run_backtest(
    candles: &[Candle],
    strategies: &StrategySet,
    config: &BacktestConfig,
) -> Result<BacktestResult, EngineError> {
    if candles.is_empty() {
        return Err(EngineError::NoData {
            symbol: config.symbol.clone(),
            timeframe: config.timeframe.to_string(),
        });
    }
    validate_series(candles)?;

    let classifier = RegimeClassifier::new(config.regime.clone());
    let selector = StrategySelector::new(config.confidence_threshold);
    let sizer = RiskSizer::new(config.sizing.clone());
    let mut engine = ExecutionEngine::new(config.initial_capital, config.execution.clone());
    let mut cache = IndicatorCache::new();
    let mut trail = AuditTrail::new();
    let mut snapshots = Vec::with_capacity(candles.len());
    let mut regimes = RegimeCounts::default();
    let mut stop_exits = 0usize;
    let atr_type = IndicatorType::Atr(DEFAULT_ATR_PERIOD);

    tracing::info!(
        symbol = %config.symbol,
        timeframe = %config.timeframe,
        candles = candles.len(),
        "backtest started"
    );

    for (index, candle) in candles.iter().enumerate() {
        let price = candle.close;
        engine.mark(price);
        trail.observe(candle);

        let atr = cache.value_at(candles, atr_type, index).filter(|a| *a > 0.0);
        let regime = classifier.classify(&mut cache, candles, index)?;
        regimes.record(regime.regime);

        let exit = ExitContext {
            timestamp: candle.timestamp,
            index,
            price,
            regime: regime.regime,
        };

        let exits = engine.update_stops(candle.timestamp, price, atr);
        if !exits.is_empty() {
            stop_exits += exits.len();
            for fill in &exits {
                trail.close(fill, exit);
            }
            snapshots.push(engine.portfolio().snapshot(candle.timestamp));
            continue;
        }

        let confidence = regime.confidence;
        let adaptive = selector.generate(strategies, regime, &mut cache, candles, index);
        let action = if config.require_momentum_confirmation && !adaptive.momentum_confirmed {
            Action::Hold
        } else {
            adaptive.action
        };
        let active = adaptive.active.config();

        match action {
            Action::Buy => {
                let closed: Vec<f64> = engine.ledger().closed_pnls().collect();
                let sizing = sizer.size(
                    adaptive.signal,
                    confidence,
                    active.max_position_pct,
                    &closed,
                    &mut cache,
                    candles,
                    index,
                );
                let notional = sizing.buy_notional(engine.portfolio().cash_balance);
                if !sizer.meets_minimum(notional) {
                    tracing::debug!(index, notional, "buy below minimum trade value");
                } else if let Some(fill) = engine.buy(candle.timestamp, price, notional, atr) {
                    trail.open_lot(
                        fill.trade_id,
                        EntryContext {
                            timestamp: candle.timestamp,
                            index,
                            price,
                            regime: adaptive.regime.regime,
                            confidence,
                            strategy_name: active.name.clone(),
                            readings: adaptive.readings.clone(),
                            sizing,
                        },
                    );
                }
            }
            Action::Sell => {
                let closed: Vec<f64> = engine.ledger().closed_pnls().collect();
                let sizing = sizer.size(
                    adaptive.signal,
                    confidence,
                    active.max_position_pct,
                    &closed,
                    &mut cache,
                    candles,
                    index,
                );
                let amount = sizing.sell_amount(engine.portfolio().asset_balance);
                if !sizer.meets_minimum(amount * price) {
                    tracing::debug!(index, amount, "sell below minimum trade value");
                } else if let Some(fill) = engine.sell(candle.timestamp, price, amount, atr) {
                    trail.close(&fill, exit);
                }
            }
            Action::Hold => {}
        }

        snapshots.push(engine.portfolio().snapshot(candle.timestamp));
    }

    let trades = engine.ledger().trades().to_vec();
    let closed: Vec<f64> = engine.ledger().closed_pnls().collect();
    let audits = trail.into_records();
    let metrics = Metrics::compute(
        &snapshots,
        &closed,
        &audits,
        config.initial_capital,
        config.timeframe,
    );

    tracing::info!(
        trades = trades.len(),
        stop_exits,
        total_return = metrics.total_return,
        "backtest finished"
    );

    Ok(BacktestResult {
        portfolio: engine.portfolio().clone(),
        trades,
        audits,
        snapshots,
        metrics,
        regimes,
        stop_exits,
    })
}

#![allow(dead_code)]

use regimetrader::domain::candle::Candle;
use regimetrader::domain::error::{EngineError, ProviderError};
use regimetrader::domain::strategy::{StrategyConfig, StrategySet, parse_indicator_list};
use regimetrader::domain::timeframe::{HOUR_MS, Timeframe};
use regimetrader::ports::candle_port::{CandleProvider, CandleStore};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// 2024-01-01T00:00:00Z, aligned to every timeframe up to 1d.
pub const BASE: i64 = 1_704_067_200_000;
pub const H8: i64 = 8 * HOUR_MS;

/// Provider that serves a fixed candle set, unless a scripted response is
/// queued for the next call. Every requested window is recorded.
pub struct MockProvider {
    pub name: &'static str,
    pub candles: Vec<Candle>,
    pub scripted: RefCell<VecDeque<Result<Vec<Candle>, ProviderError>>>,
    pub calls: RefCell<Vec<(i64, i64)>>,
}

impl MockProvider {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self {
            name: "mock",
            candles,
            scripted: RefCell::new(VecDeque::new()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn then(self, response: Result<Vec<Candle>, ProviderError>) -> Self {
        self.scripted.borrow_mut().push_back(response);
        self
    }

    pub fn then_error(self, err: ProviderError) -> Self {
        self.then(Err(err))
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl CandleProvider for MockProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn fetch(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> Result<Vec<Candle>, ProviderError> {
        self.calls.borrow_mut().push((start, end));
        if let Some(response) = self.scripted.borrow_mut().pop_front() {
            return response;
        }
        Ok(self
            .candles
            .iter()
            .filter(|c| c.timestamp >= start && c.timestamp <= end)
            .copied()
            .collect())
    }
}

/// Provider that always fails with the same error.
pub struct FailingProvider(pub ProviderError);

impl CandleProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    fn fetch(&self, _: &str, _: Timeframe, _: i64, _: i64) -> Result<Vec<Candle>, ProviderError> {
        Err(self.0.clone())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub series: RefCell<HashMap<(String, Timeframe), BTreeMap<i64, Candle>>>,
    pub writes: RefCell<usize>,
}

impl MemoryStore {
    pub fn with_candles(symbol: &str, timeframe: Timeframe, candles: &[Candle]) -> Self {
        let store = Self::default();
        store.series.borrow_mut().insert(
            (symbol.to_string(), timeframe),
            candles.iter().map(|c| (c.timestamp, *c)).collect(),
        );
        store
    }

    pub fn len(&self, symbol: &str, timeframe: Timeframe) -> usize {
        self.series
            .borrow()
            .get(&(symbol.to_string(), timeframe))
            .map_or(0, BTreeMap::len)
    }
}

impl CandleStore for MemoryStore {
    fn read(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> Result<Vec<Candle>, EngineError> {
        Ok(self
            .series
            .borrow()
            .get(&(symbol.to_string(), timeframe))
            .map(|s| s.range(start..=end).map(|(_, c)| *c).collect())
            .unwrap_or_default())
    }

    fn write(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<usize, EngineError> {
        *self.writes.borrow_mut() += 1;
        let mut series = self.series.borrow_mut();
        let entry = series.entry((symbol.to_string(), timeframe)).or_default();
        for c in candles {
            entry.insert(c.timestamp, *c);
        }
        Ok(candles.len())
    }
}

pub fn candle(timestamp: i64, close: f64) -> Candle {
    Candle {
        timestamp,
        open: close,
        high: close * 1.002,
        low: close * 0.998,
        close,
        volume: 100.0,
    }
}

/// One candle per slot index, `BASE + slot * interval`.
pub fn slots(timeframe: Timeframe, slots: impl IntoIterator<Item = i64>) -> Vec<Candle> {
    slots
        .into_iter()
        .map(|s| candle(BASE + s * timeframe.interval_ms(), 100.0 + s as f64))
        .collect()
}

/// Flat-range candles (high == low == close) from `BASE`, one per interval.
pub fn candles_from_closes(timeframe: Timeframe, closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Candle {
            timestamp: BASE + i as i64 * timeframe.interval_ms(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
        })
        .collect()
}

/// `up` bars rising 1% each, then `down` bars falling `drop` each.
pub fn rise_then_fall(up: usize, down: usize, drop: f64) -> Vec<f64> {
    let mut closes: Vec<f64> = (0..up).map(|i| 100.0 * 1.01f64.powi(i as i32)).collect();
    let mut last = closes.last().copied().unwrap_or(100.0);
    for _ in 0..down {
        last *= 1.0 - drop;
        closes.push(last);
    }
    closes
}

pub fn momentum_strategy(name: &str, timeframe: Timeframe) -> StrategyConfig {
    StrategyConfig {
        name: name.to_string(),
        indicators: parse_indicator_list("momentum:5:1").unwrap(),
        buy_threshold: 0.05,
        sell_threshold: -0.05,
        max_position_pct: 0.5,
        timeframe,
    }
}

pub fn momentum_set(timeframe: Timeframe) -> StrategySet {
    StrategySet {
        bullish: momentum_strategy("bull-momentum", timeframe),
        bearish: momentum_strategy("bear-momentum", timeframe),
        neutral: None,
    }
}

//! In-process candle cache.

use crate::domain::candle::Candle;
use crate::domain::timeframe::Timeframe;
use crate::ports::candle_port::CandleCache;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

type SeriesKey = (String, Timeframe);

/// Candles per (symbol, timeframe), ordered by timestamp. Reads slice the
/// requested window out of the cached series.
#[derive(Default)]
pub struct MemoryCandleCache {
    series: Mutex<HashMap<SeriesKey, BTreeMap<i64, Candle>>>,
}

impl MemoryCandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached candles for a series.
    pub fn len(&self, symbol: &str, timeframe: Timeframe) -> usize {
        self.series
            .lock()
            .map(|s| s.get(&(symbol.to_string(), timeframe)).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }
}

impl CandleCache for MemoryCandleCache {
    fn get(&self, symbol: &str, timeframe: Timeframe, start: i64, end: i64) -> Option<Vec<Candle>> {
        let series = self.series.lock().ok()?;
        let cached = series.get(&(symbol.to_string(), timeframe))?;
        Some(cached.range(start..=end).map(|(_, c)| *c).collect())
    }

    fn merge(&self, symbol: &str, timeframe: Timeframe, candles: &[Candle]) {
        let Ok(mut series) = self.series.lock() else {
            tracing::warn!(symbol, "candle cache lock poisoned, merge dropped");
            return;
        };
        let entry = series.entry((symbol.to_string(), timeframe)).or_default();
        for c in candles {
            entry.insert(c.timestamp, *c);
        }
    }

    fn invalidate(&self, symbol: &str, timeframe: Timeframe) {
        if let Ok(mut series) = self.series.lock() {
            series.remove(&(symbol.to_string(), timeframe));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64, close: f64) -> Candle {
        Candle {
            timestamp: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn miss_on_unknown_series() {
        let cache = MemoryCandleCache::new();
        assert!(cache.get("BTC", Timeframe::H1, 0, 10).is_none());
    }

    #[test]
    fn merge_overwrites_and_get_slices_window() {
        let cache = MemoryCandleCache::new();
        cache.merge("BTC", Timeframe::H1, &[candle(1, 1.0), candle(2, 2.0), candle(3, 3.0)]);
        cache.merge("BTC", Timeframe::H1, &[candle(2, 20.0)]);

        let got = cache.get("BTC", Timeframe::H1, 2, 3).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].close, 20.0);
        assert_eq!(cache.len("BTC", Timeframe::H1), 3);
        assert!(cache.get("BTC", Timeframe::H4, 0, 10).is_none());
    }

    #[test]
    fn invalidate_drops_series() {
        let cache = MemoryCandleCache::new();
        cache.merge("BTC", Timeframe::H1, &[candle(1, 1.0)]);
        cache.invalidate("BTC", Timeframe::H1);
        assert!(cache.get("BTC", Timeframe::H1, 0, 10).is_none());
    }
}

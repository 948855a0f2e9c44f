//! Memoized indicator arrays for one candle series.
//!
//! The cache is owned by the caller and keyed by a [`SeriesVersion`]. Every
//! lookup compares the version of the series it is handed with the version
//! the cached arrays were built from; on mismatch all arrays are dropped
//! before anything is returned. A cache must never be shared between two
//! different series.

use std::collections::HashMap;

use crate::domain::candle::Candle;
use crate::domain::indicator::{IndicatorSeries, IndicatorType};

/// Identity token for a candle series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesVersion {
    pub len: usize,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
    pub last_close_bits: u64,
}

impl SeriesVersion {
    pub fn of(candles: &[Candle]) -> Self {
        SeriesVersion {
            len: candles.len(),
            first_timestamp: candles.first().map(|c| c.timestamp),
            last_timestamp: candles.last().map(|c| c.timestamp),
            last_close_bits: candles.last().map(|c| c.close.to_bits()).unwrap_or(0),
        }
    }
}

#[derive(Debug, Default)]
pub struct IndicatorCache {
    version: Option<SeriesVersion>,
    series: HashMap<IndicatorType, IndicatorSeries>,
    computations: usize,
}

impl IndicatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every cached array.
    pub fn invalidate(&mut self) {
        self.version = None;
        self.series.clear();
    }

    pub fn version(&self) -> Option<SeriesVersion> {
        self.version
    }

    /// Number of indicator arrays computed since creation.
    pub fn computations(&self) -> usize {
        self.computations
    }

    /// Return the indicator array for `candles`, computing it at most once
    /// per series version.
    pub fn get(&mut self, candles: &[Candle], indicator: IndicatorType) -> &IndicatorSeries {
        let version = SeriesVersion::of(candles);
        if self.version != Some(version) {
            if self.version.is_some() {
                tracing::trace!(len = version.len, "indicator cache invalidated by new series version");
            }
            self.series.clear();
            self.version = Some(version);
        }

        let computations = &mut self.computations;
        self.series.entry(indicator).or_insert_with(|| {
            *computations += 1;
            indicator.calculate(candles)
        })
    }

    /// Convenience for single-valued indicators.
    pub fn value_at(
        &mut self,
        candles: &[Candle],
        indicator: IndicatorType,
        index: usize,
    ) -> Option<f64> {
        self.get(candles, indicator).simple_at(index)
    }

    /// `(line, signal, histogram)` for a MACD indicator type.
    pub fn macd_at(
        &mut self,
        candles: &[Candle],
        indicator: IndicatorType,
        index: usize,
    ) -> Option<(f64, f64, f64)> {
        self.get(candles, indicator).macd_at(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::candles_from_closes;

    #[test]
    fn computes_once_per_version() {
        let candles = candles_from_closes(&[1.0, 2.0, 3.0, 4.0]);
        let mut cache = IndicatorCache::new();

        let a = cache.value_at(&candles, IndicatorType::Sma(2), 3);
        let b = cache.value_at(&candles, IndicatorType::Sma(2), 3);
        assert_eq!(a, b);
        assert_eq!(cache.computations(), 1);

        cache.value_at(&candles, IndicatorType::Ema(2), 3);
        assert_eq!(cache.computations(), 2);
    }

    #[test]
    fn longer_series_is_never_served_stale_values() {
        let short = candles_from_closes(&[1.0, 2.0, 3.0]);
        let long = candles_from_closes(&[1.0, 2.0, 3.0, 10.0]);
        let mut cache = IndicatorCache::new();

        assert_eq!(cache.value_at(&short, IndicatorType::Sma(2), 3), None);
        let v = cache.value_at(&long, IndicatorType::Sma(2), 3).unwrap();
        assert!((v - 6.5).abs() < f64::EPSILON);
        assert_eq!(cache.version().unwrap().len, 4);
    }

    #[test]
    fn changed_last_close_invalidates() {
        let mut candles = candles_from_closes(&[1.0, 2.0, 3.0]);
        let mut cache = IndicatorCache::new();
        let before = cache.value_at(&candles, IndicatorType::Sma(3), 2).unwrap();

        candles[2].close = 6.0;
        let after = cache.value_at(&candles, IndicatorType::Sma(3), 2).unwrap();
        assert!((before - 2.0).abs() < f64::EPSILON);
        assert!((after - 3.0).abs() < f64::EPSILON);
        assert_eq!(cache.computations(), 2);
    }

    #[test]
    fn explicit_invalidation_forces_recompute() {
        let candles = candles_from_closes(&[1.0, 2.0]);
        let mut cache = IndicatorCache::new();
        cache.get(&candles, IndicatorType::Sma(1));
        cache.invalidate();
        assert!(cache.version().is_none());
        cache.get(&candles, IndicatorType::Sma(1));
        assert_eq!(cache.computations(), 2);
    }
}

//! Candle source, durable store and fast cache ports.

use crate::domain::candle::Candle;
use crate::domain::error::{EngineError, ProviderError};
use crate::domain::timeframe::Timeframe;

/// A remote or local source of historical candles.
pub trait CandleProvider {
    fn name(&self) -> &str;

    /// Candles with `start <= timestamp <= end`, in any order.
    fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> Result<Vec<Candle>, ProviderError>;
}

impl<P: CandleProvider + ?Sized> CandleProvider for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> Result<Vec<Candle>, ProviderError> {
        (**self).fetch(symbol, timeframe, start, end)
    }
}

/// Durable candle storage.
pub trait CandleStore {
    fn read(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> Result<Vec<Candle>, EngineError>;

    /// Merge `candles` into the store; a stored candle with the same
    /// timestamp is replaced. Returns the number written.
    fn write(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<usize, EngineError>;
}

/// Fast in-process candle cache in front of a [`CandleStore`].
pub trait CandleCache {
    /// `None` when nothing is cached for the key.
    fn get(&self, symbol: &str, timeframe: Timeframe, start: i64, end: i64) -> Option<Vec<Candle>>;

    /// Merge `candles` into the cached series; incoming candles win.
    fn merge(&self, symbol: &str, timeframe: Timeframe, candles: &[Candle]);

    fn invalidate(&self, symbol: &str, timeframe: Timeframe);
}

//! Ordered provider fallback.

use crate::domain::candle::Candle;
use crate::domain::error::ProviderError;
use crate::domain::timeframe::Timeframe;
use crate::ports::candle_port::CandleProvider;

/// Tries each provider in order and returns the first success. When all of
/// them fail, every failure is reported together.
pub struct FallbackProvider {
    providers: Vec<Box<dyn CandleProvider>>,
}

impl FallbackProvider {
    pub fn new(providers: Vec<Box<dyn CandleProvider>>) -> Self {
        Self { providers }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl CandleProvider for FallbackProvider {
    fn name(&self) -> &str {
        "fallback"
    }

    fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> Result<Vec<Candle>, ProviderError> {
        let mut failures = Vec::new();

        for provider in &self.providers {
            match provider.fetch(symbol, timeframe, start, end) {
                Ok(candles) => return Ok(candles),
                Err(e) => {
                    tracing::debug!(provider = provider.name(), error = %e, "provider failed, trying next");
                    failures.push((provider.name().to_string(), e));
                }
            }
        }

        Err(ProviderError::AllFailed(failures))
    }
}

//! Targeted backfill and the data integrity pipeline.
//!
//! Missing timestamps are grouped into small batches, each fetched over the
//! narrowest window that covers it. Fetches go through a bounded exponential
//! backoff; what comes back is filtered to the needed periods, aligned,
//! repaired and merged into both the durable store and the fast cache.

use serde::Serialize;
use std::time::Duration;

use super::candle::{Candle, merge_candles, normalize_series};
use super::error::{EngineError, ProviderError};
use super::gaps::{DataQualityReport, MissingCandle, assess_quality, detect_gaps};
use super::timeframe::Timeframe;
use crate::ports::candle_port::{CandleCache, CandleProvider, CandleStore};

/// Consecutive missing timestamps at most this many intervals apart share a batch.
pub const BATCH_SPAN_INTERVALS: i64 = 2;
/// Fetched candles may sit this fraction of an interval away from a needed slot.
pub const MATCH_TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Wait before `attempt` (1-based); the first attempt never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Call `provider.fetch` until it succeeds, fails terminally or runs out of
/// attempts. The last error is returned on failure.
pub fn fetch_with_retry(
    provider: &dyn CandleProvider,
    policy: &RetryPolicy,
    symbol: &str,
    timeframe: Timeframe,
    start: i64,
    end: i64,
) -> Result<Vec<Candle>, ProviderError> {
    let mut last_error = ProviderError::Network("no attempts made".into());

    for attempt in 1..=policy.max_attempts.max(1) {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        match provider.fetch(symbol, timeframe, start, end) {
            Ok(candles) => return Ok(candles),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    provider = provider.name(),
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "candle fetch failed"
                );
                last_error = e;
            }
        }
    }

    Err(last_error)
}

/// One provider request covering a run of nearby missing timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchBatch {
    pub timestamps: Vec<i64>,
    pub start: i64,
    pub end: i64,
}

/// Group sorted missing timestamps into batches and compute each fetch window.
pub fn plan_batches(missing: &[MissingCandle], timeframe: Timeframe) -> Vec<FetchBatch> {
    let interval = timeframe.interval_ms();
    let mut groups: Vec<Vec<i64>> = Vec::new();

    for m in missing {
        let t = m.expected_timestamp;
        match groups.last_mut() {
            Some(group)
                if group
                    .last()
                    .is_some_and(|&prev| t - prev <= BATCH_SPAN_INTERVALS * interval) =>
            {
                group.push(t)
            }
            _ => groups.push(vec![t]),
        }
    }

    groups
        .into_iter()
        .filter_map(|timestamps| {
            let first = *timestamps.first()?;
            let last = *timestamps.last()?;
            Some(FetchBatch {
                start: timeframe.period_start(first),
                end: timeframe.period_start(last) + interval - 1,
                timestamps,
            })
        })
        .collect()
}

/// Keep fetched candles that land on a needed slot, snapped to that slot
/// for period-based timeframes, with OHLC repaired.
pub fn select_for_batch(fetched: &[Candle], batch: &FetchBatch, timeframe: Timeframe) -> Vec<Candle> {
    let tolerance = (timeframe.interval_ms() as f64 * MATCH_TOLERANCE) as i64;

    let selected = fetched
        .iter()
        .filter_map(|c| {
            let slot = batch
                .timestamps
                .iter()
                .copied()
                .find(|&t| (c.timestamp - t).abs() <= tolerance)?;
            let timestamp = if timeframe.is_period_based() {
                slot
            } else {
                c.timestamp
            };
            Some(Candle { timestamp, ..*c }.repaired())
        })
        .collect();

    normalize_series(selected)
}

/// True when `candles` (sorted, unique) hold every slot from the first one
/// at or after `start` through the slot containing `end`.
fn covers_window(candles: &[Candle], timeframe: Timeframe, start: i64, end: i64) -> bool {
    let (Some(first), Some(last)) = (candles.first(), candles.last()) else {
        return false;
    };
    let interval = timeframe.interval_ms();
    let aligned = timeframe.period_start(start);
    let first_slot = if aligned < start {
        aligned + interval
    } else {
        aligned
    };
    let last_slot = timeframe.period_start(end);
    if last_slot < first_slot {
        return false;
    }
    first.timestamp == first_slot
        && last.timestamp == last_slot
        && candles.len() as i64 == (last_slot - first_slot) / interval + 1
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub batches: usize,
    pub filled: usize,
    pub unavailable: usize,
    pub failed: usize,
    pub aborted: bool,
}

#[derive(Debug, Clone)]
pub struct EnsuredSeries {
    pub candles: Vec<Candle>,
    pub backfill: BackfillReport,
    pub quality: DataQualityReport,
}

pub struct DataIntegrityPipeline<'a> {
    provider: &'a dyn CandleProvider,
    store: &'a dyn CandleStore,
    cache: &'a dyn CandleCache,
    retry: RetryPolicy,
    min_candles: usize,
}

impl<'a> DataIntegrityPipeline<'a> {
    pub fn new(
        provider: &'a dyn CandleProvider,
        store: &'a dyn CandleStore,
        cache: &'a dyn CandleCache,
    ) -> Self {
        DataIntegrityPipeline {
            provider,
            store,
            cache,
            retry: RetryPolicy::default(),
            min_candles: 1,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_min_candles(mut self, min_candles: usize) -> Self {
        self.min_candles = min_candles;
        self
    }

    /// Read from the fast cache when it holds every slot of the window;
    /// otherwise read the durable store, merge and warm the cache.
    pub fn load(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> Result<Vec<Candle>, EngineError> {
        let cached = normalize_series(
            self.cache
                .get(symbol, timeframe, start, end)
                .unwrap_or_default(),
        );
        if covers_window(&cached, timeframe, start, end) {
            return Ok(cached);
        }

        let stored = normalize_series(self.store.read(symbol, timeframe, start, end)?);
        let merged = merge_candles(&cached, &stored);
        if !stored.is_empty() {
            self.cache.merge(symbol, timeframe, &stored);
        }
        Ok(merged)
    }

    /// Fetch and merge the missing candles, one batch at a time.
    pub fn backfill(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        missing: &[MissingCandle],
    ) -> Result<BackfillReport, EngineError> {
        let batches = plan_batches(missing, timeframe);
        let mut report = BackfillReport::default();

        for batch in &batches {
            report.batches += 1;
            let fetched = match fetch_with_retry(
                self.provider,
                &self.retry,
                symbol,
                timeframe,
                batch.start,
                batch.end,
            ) {
                Ok(fetched) => fetched,
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        symbol,
                        start = batch.start,
                        end = batch.end,
                        error = %e,
                        "backfill retries exhausted, stopping"
                    );
                    report.failed += 1;
                    report.aborted = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        symbol,
                        start = batch.start,
                        end = batch.end,
                        error = %e,
                        "backfill batch skipped"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            let selected = select_for_batch(&fetched, batch, timeframe);
            if selected.is_empty() {
                tracing::info!(
                    symbol,
                    start = batch.start,
                    end = batch.end,
                    "candles not yet available"
                );
                report.unavailable += 1;
                continue;
            }

            self.store.write(symbol, timeframe, &selected)?;
            self.cache.merge(symbol, timeframe, &selected);
            report.filled += selected.len();
        }

        tracing::info!(
            symbol,
            %timeframe,
            batches = report.batches,
            filled = report.filled,
            unavailable = report.unavailable,
            failed = report.failed,
            aborted = report.aborted,
            "backfill finished"
        );
        Ok(report)
    }

    /// Load, check, repair and re-check a series for `[start, end]`.
    pub fn ensure_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
        now: i64,
    ) -> Result<EnsuredSeries, EngineError> {
        let loaded = self.load(symbol, timeframe, start, end)?;
        let gaps = detect_gaps(&loaded, timeframe, start, end, now);

        let backfill = if gaps.missing.is_empty() {
            BackfillReport::default()
        } else {
            tracing::info!(
                symbol,
                %timeframe,
                gaps = gaps.gap_count,
                missing = gaps.missing.len(),
                "gaps detected"
            );
            self.backfill(symbol, timeframe, &gaps.missing)?
        };

        let candles = if backfill.filled > 0 {
            let reloaded = self.load(symbol, timeframe, start, end)?;
            merge_candles(&loaded, &reloaded)
        } else {
            loaded
        };
        let quality = assess_quality(&candles, timeframe, start, end, now, self.min_candles);

        Ok(EnsuredSeries {
            candles,
            backfill,
            quality,
        })
    }
}

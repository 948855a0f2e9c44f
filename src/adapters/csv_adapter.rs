//! CSV file candle provider.
//!
//! Reads `{symbol}_{timeframe}.csv` from a base directory, with columns
//! `timestamp,open,high,low,close,volume`. Timestamps may be epoch
//! milliseconds, RFC 3339 or `YYYY-MM-DD[ HH:MM:SS]` in UTC.

use crate::domain::candle::{Candle, parse_timestamp};
use crate::domain::error::ProviderError;
use crate::domain::timeframe::Timeframe;
use crate::ports::candle_port::CandleProvider;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
struct CandleRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

pub struct CsvCandleProvider {
    base_path: PathBuf,
}

impl CsvCandleProvider {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.base_path.join(format!("{}_{}.csv", symbol, timeframe))
    }
}

impl CandleProvider for CsvCandleProvider {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> Result<Vec<Candle>, ProviderError> {
        let path = self.csv_path(symbol, timeframe);
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ProviderError::Client {
                status: 404,
                reason: format!("{} not found", path.display()),
            },
            _ => ProviderError::Network(format!("failed to read {}: {}", path.display(), e)),
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut candles = Vec::new();

        for (line, result) in rdr.deserialize::<CandleRow>().enumerate() {
            let row = result.map_err(|e| ProviderError::Client {
                status: 422,
                reason: format!("CSV parse error: {}", e),
            })?;
            let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| ProviderError::Client {
                status: 422,
                reason: format!("invalid timestamp '{}' on row {}", row.timestamp, line + 1),
            })?;

            if timestamp < start || timestamp > end {
                continue;
            }

            candles.push(Candle {
                timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }

        candles.sort_by_key(|c| c.timestamp);
        Ok(candles)
    }
}

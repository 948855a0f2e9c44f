//! SQLite durable candle store.

use crate::domain::candle::Candle;
use crate::domain::error::EngineError;
use crate::domain::timeframe::Timeframe;
use crate::ports::candle_port::CandleStore;
use crate::ports::config_port::ConfigPort;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

pub struct SqliteCandleStore {
    pool: Pool<SqliteConnectionManager>,
}

fn query_err(e: rusqlite::Error) -> EngineError {
    EngineError::DatabaseQuery {
        reason: e.to_string(),
    }
}

impl SqliteCandleStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, EngineError> {
        let db_path =
            config
                .get_string("data", "store_path")
                .ok_or_else(|| EngineError::ConfigMissing {
                    section: "data".into(),
                    key: "store_path".into(),
                })?;

        let pool_size = config.get_int("data", "pool_size", 4).max(1) as u32;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool =
            Pool::builder()
                .max_size(pool_size)
                .build(manager)
                .map_err(|e: r2d2::Error| EngineError::Database {
                    reason: e.to_string(),
                })?;

        let store = Self { pool };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, EngineError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| EngineError::Database {
                reason: e.to_string(),
            })?;

        let store = Self { pool };
        store.initialize_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, EngineError> {
        self.pool.get().map_err(|e: r2d2::Error| EngineError::Database {
            reason: e.to_string(),
        })
    }

    pub fn initialize_schema(&self) -> Result<(), EngineError> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS candles (
                    symbol TEXT NOT NULL,
                    timeframe TEXT NOT NULL,
                    ts INTEGER NOT NULL,
                    open REAL NOT NULL,
                    high REAL NOT NULL,
                    low REAL NOT NULL,
                    close REAL NOT NULL,
                    volume REAL NOT NULL,
                    PRIMARY KEY (symbol, timeframe, ts)
                );",
            )
            .map_err(query_err)
    }

    /// First and last timestamp plus row count for a series.
    pub fn data_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(i64, i64, usize)>, EngineError> {
        let conn = self.conn()?;
        let (min, max, count): (Option<i64>, Option<i64>, i64) = conn
            .query_row(
                "SELECT MIN(ts), MAX(ts), COUNT(*) FROM candles WHERE symbol = ?1 AND timeframe = ?2",
                params![symbol, timeframe.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(query_err)?;

        match (min, max) {
            (Some(min), Some(max)) if count > 0 => Ok(Some((min, max, count as usize))),
            _ => Ok(None),
        }
    }
}

impl CandleStore for SqliteCandleStore {
    fn read(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> Result<Vec<Candle>, EngineError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT ts, open, high, low, close, volume
                 FROM candles
                 WHERE symbol = ?1 AND timeframe = ?2 AND ts >= ?3 AND ts <= ?4
                 ORDER BY ts ASC",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(params![symbol, timeframe.as_str(), start, end], |row| {
                Ok(Candle {
                    timestamp: row.get(0)?,
                    open: row.get(1)?,
                    high: row.get(2)?,
                    low: row.get(3)?,
                    close: row.get(4)?,
                    volume: row.get(5)?,
                })
            })
            .map_err(query_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn write(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<usize, EngineError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;

        for c in candles {
            tx.execute(
                "INSERT OR REPLACE INTO candles (symbol, timeframe, ts, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    symbol,
                    timeframe.as_str(),
                    c.timestamp,
                    c.open,
                    c.high,
                    c.low,
                    c.close,
                    c.volume
                ],
            )
            .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)?;
        tracing::debug!(symbol, %timeframe, rows = candles.len(), "candles stored");
        Ok(candles.len())
    }
}

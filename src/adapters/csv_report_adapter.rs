//! CSV report adapter implementing ReportPort.
//!
//! Writes `trades.csv`, `audits.csv`, `snapshots.csv` and `metrics.csv` into
//! the output directory.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::domain::audit::{Outcome, TradeAudit};
use crate::domain::backtest::BacktestResult;
use crate::domain::candle::format_timestamp;
use crate::domain::error::EngineError;
use crate::domain::ledger::TradeReason;
use crate::domain::regime::Regime;
use crate::ports::report_port::ReportPort;

/// Flat form of a [`TradeAudit`] for a CSV row.
#[derive(Debug, Serialize)]
struct AuditRow<'a> {
    sell_trade_id: u64,
    lot_id: u64,
    entry_time: String,
    exit_time: String,
    entry_price: f64,
    exit_price: f64,
    entry_regime: Regime,
    entry_confidence: f64,
    exit_regime: Regime,
    strategy: &'a str,
    readings: String,
    signal_strength: f64,
    kelly: f64,
    volatility: f64,
    fraction: f64,
    holding_bars: usize,
    holding_ms: i64,
    mfe_pct: f64,
    mae_pct: f64,
    pnl: f64,
    outcome: Outcome,
    exit_reason: TradeReason,
}

impl<'a> From<&'a TradeAudit> for AuditRow<'a> {
    fn from(a: &'a TradeAudit) -> Self {
        let readings = a
            .entry_readings
            .iter()
            .map(|r| format!("{}={:.4}", r.name, r.value))
            .collect::<Vec<_>>()
            .join(";");
        AuditRow {
            sell_trade_id: a.sell_trade_id,
            lot_id: a.lot_id,
            entry_time: format_timestamp(a.entry_timestamp),
            exit_time: format_timestamp(a.exit_timestamp),
            entry_price: a.entry_price,
            exit_price: a.exit_price,
            entry_regime: a.entry_regime,
            entry_confidence: a.entry_confidence,
            exit_regime: a.exit_regime,
            strategy: &a.strategy_name,
            readings,
            signal_strength: a.entry_sizing.signal_strength,
            kelly: a.entry_sizing.kelly,
            volatility: a.entry_sizing.volatility,
            fraction: a.entry_sizing.fraction,
            holding_bars: a.holding_bars,
            holding_ms: a.holding_ms,
            mfe_pct: a.mfe_pct,
            mae_pct: a.mae_pct,
            pnl: a.pnl,
            outcome: a.outcome,
            exit_reason: a.exit_reason,
        }
    }
}

fn csv_err(e: csv::Error) -> EngineError {
    match e.into_kind() {
        csv::ErrorKind::Io(io) => EngineError::Io(io),
        other => EngineError::Io(std::io::Error::other(format!("{other:?}"))),
    }
}

fn write_rows<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<(), EngineError> {
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    for row in rows {
        writer.serialize(row).map_err(csv_err)?;
    }
    writer.flush()?;
    Ok(())
}

pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CsvReportAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportPort for CsvReportAdapter {
    fn write(&self, result: &BacktestResult, output_dir: &Path) -> Result<(), EngineError> {
        fs::create_dir_all(output_dir)?;

        write_rows(&output_dir.join("trades.csv"), &result.trades)?;
        write_rows(
            &output_dir.join("audits.csv"),
            result.audits.iter().map(AuditRow::from),
        )?;
        write_rows(&output_dir.join("snapshots.csv"), &result.snapshots)?;
        write_rows(&output_dir.join("metrics.csv"), std::iter::once(&result.metrics))?;

        tracing::info!(
            dir = %output_dir.display(),
            trades = result.trades.len(),
            audits = result.audits.len(),
            "report written"
        );
        Ok(())
    }
}

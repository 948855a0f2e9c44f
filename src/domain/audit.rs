//! Per-trade audit records.
//!
//! Entry context is captured when a lot opens; price excursions are tracked
//! while it is held; one [`TradeAudit`] per consumed lot is emitted when a
//! sell closes all or part of it.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::candle::Candle;
use crate::domain::execution::SellFill;
use crate::domain::ledger::{TradeId, TradeReason};
use crate::domain::regime::Regime;
use crate::domain::sizing::SizingBreakdown;
use crate::domain::strategy::IndicatorReading;

const BREAKEVEN_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
    Breakeven,
}

impl Outcome {
    pub fn from_pnl(pnl: f64) -> Self {
        if pnl > BREAKEVEN_TOLERANCE {
            Outcome::Win
        } else if pnl < -BREAKEVEN_TOLERANCE {
            Outcome::Loss
        } else {
            Outcome::Breakeven
        }
    }
}

/// What was known when a lot was opened.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryContext {
    pub timestamp: i64,
    pub index: usize,
    pub price: f64,
    pub regime: Regime,
    pub confidence: f64,
    pub strategy_name: String,
    pub readings: Vec<IndicatorReading>,
    pub sizing: SizingBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeAudit {
    pub sell_trade_id: TradeId,
    pub lot_id: TradeId,
    pub entry_timestamp: i64,
    pub exit_timestamp: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_regime: Regime,
    pub entry_confidence: f64,
    pub exit_regime: Regime,
    pub strategy_name: String,
    pub entry_readings: Vec<IndicatorReading>,
    pub entry_sizing: SizingBreakdown,
    pub holding_bars: usize,
    pub holding_ms: i64,
    pub mfe_pct: f64,
    pub mae_pct: f64,
    pub pnl: f64,
    pub outcome: Outcome,
    pub exit_reason: TradeReason,
}

#[derive(Debug, Clone)]
struct HeldLot {
    entry: EntryContext,
    highest: f64,
    lowest: f64,
}

/// The exit side of an audit.
#[derive(Debug, Clone, Copy)]
pub struct ExitContext {
    pub timestamp: i64,
    pub index: usize,
    pub price: f64,
    pub regime: Regime,
}

#[derive(Debug, Clone, Default)]
pub struct AuditTrail {
    held: BTreeMap<TradeId, HeldLot>,
    records: Vec<TradeAudit>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[TradeAudit] {
        &self.records
    }

    pub fn into_records(self) -> Vec<TradeAudit> {
        self.records
    }

    pub fn open_lot(&mut self, lot_id: TradeId, entry: EntryContext) {
        let price = entry.price;
        self.held.insert(
            lot_id,
            HeldLot {
                entry,
                highest: price,
                lowest: price,
            },
        );
    }

    /// Widen the excursion range of every held lot with `candle`.
    pub fn observe(&mut self, candle: &Candle) {
        for lot in self.held.values_mut() {
            lot.highest = lot.highest.max(candle.high);
            lot.lowest = lot.lowest.min(candle.low);
        }
    }

    /// Record one audit per lot the sell consumed. P&L is split across lots
    /// by their share of the sold amount.
    pub fn close(&mut self, fill: &SellFill, exit: ExitContext) -> &[TradeAudit] {
        let first_new = self.records.len();

        for consumption in &fill.consumed {
            let Some(lot) = self.held.get(&consumption.lot_id) else {
                continue;
            };
            let share = if fill.amount > 0.0 {
                consumption.amount / fill.amount
            } else {
                0.0
            };
            let pnl = fill.net_proceeds * share - consumption.cost_basis;
            let entry = &lot.entry;
            let (mfe_pct, mae_pct) = if entry.price > 0.0 {
                (
                    ((lot.highest - entry.price) / entry.price * 100.0).max(0.0),
                    ((lot.lowest - entry.price) / entry.price * 100.0).min(0.0),
                )
            } else {
                (0.0, 0.0)
            };

            self.records.push(TradeAudit {
                sell_trade_id: fill.trade_id,
                lot_id: consumption.lot_id,
                entry_timestamp: entry.timestamp,
                exit_timestamp: exit.timestamp,
                entry_price: entry.price,
                exit_price: exit.price,
                entry_regime: entry.regime,
                entry_confidence: entry.confidence,
                exit_regime: exit.regime,
                strategy_name: entry.strategy_name.clone(),
                entry_readings: entry.readings.clone(),
                entry_sizing: entry.sizing,
                holding_bars: exit.index.saturating_sub(entry.index),
                holding_ms: exit.timestamp - entry.timestamp,
                mfe_pct,
                mae_pct,
                pnl,
                outcome: Outcome::from_pnl(pnl),
                exit_reason: fill.reason,
            });

            if consumption.closed {
                self.held.remove(&consumption.lot_id);
            }
        }

        &self.records[first_new..]
    }
}

//! Append-only trade ledger with FIFO lot accounting.
//!
//! Trade records never change once appended. What remains of each buy lot
//! is tracked separately in a [`LotState`] map indexed by the buy trade id,
//! so sells consume lots without touching the records they came from.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

pub type TradeId = u64;

/// Remaining amounts at or below this are treated as exhausted.
pub const DUST: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeType {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeReason {
    Signal,
    StopLoss,
}

impl fmt::Display for TradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TradeReason::Signal => "signal",
            TradeReason::StopLoss => "stop_loss",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub id: TradeId,
    pub trade_type: TradeType,
    pub timestamp: i64,
    pub price: f64,
    pub amount: f64,
    /// Gross notional in quote currency.
    pub usdc_amount: f64,
    /// Buy: total cash debited. Sell: cost basis of the lots consumed.
    pub cost_basis: f64,
    pub pnl: Option<f64>,
    pub fee: f64,
    pub slippage: f64,
    pub reason: TradeReason,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LotState {
    pub remaining_amount: f64,
    pub remaining_cost_basis: f64,
}

impl LotState {
    pub fn is_exhausted(&self) -> bool {
        self.remaining_amount <= DUST
    }
}

/// The share of one buy lot taken by a sell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LotConsumption {
    pub lot_id: TradeId,
    pub amount: f64,
    pub cost_basis: f64,
    pub closed: bool,
}

/// Cost-side fields shared by both trade directions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub timestamp: i64,
    pub price: f64,
    pub amount: f64,
    pub notional: f64,
    pub fee: f64,
    pub slippage: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TradeLedger {
    trades: Vec<Trade>,
    lots: BTreeMap<TradeId, LotState>,
    total_bought: f64,
    total_sold: f64,
}

impl TradeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Ids are assigned sequentially from 1.
    pub fn get(&self, id: TradeId) -> Option<&Trade> {
        let index = usize::try_from(id).ok()?.checked_sub(1)?;
        self.trades.get(index)
    }

    fn next_id(&self) -> TradeId {
        self.trades.len() as TradeId + 1
    }

    /// Append a buy and open its lot with `cost_basis` as the full basis.
    pub fn record_buy(&mut self, fill: Fill, cost_basis: f64) -> TradeId {
        let id = self.next_id();
        self.trades.push(Trade {
            id,
            trade_type: TradeType::Buy,
            timestamp: fill.timestamp,
            price: fill.price,
            amount: fill.amount,
            usdc_amount: fill.notional,
            cost_basis,
            pnl: None,
            fee: fill.fee,
            slippage: fill.slippage,
            reason: TradeReason::Signal,
        });
        self.lots.insert(
            id,
            LotState {
                remaining_amount: fill.amount,
                remaining_cost_basis: cost_basis,
            },
        );
        self.total_bought += fill.amount;
        id
    }

    pub fn record_sell(
        &mut self,
        fill: Fill,
        cost_basis: f64,
        pnl: f64,
        reason: TradeReason,
    ) -> TradeId {
        let id = self.next_id();
        self.trades.push(Trade {
            id,
            trade_type: TradeType::Sell,
            timestamp: fill.timestamp,
            price: fill.price,
            amount: fill.amount,
            usdc_amount: fill.notional,
            cost_basis,
            pnl: Some(pnl),
            fee: fill.fee,
            slippage: fill.slippage,
            reason,
        });
        id
    }

    pub fn lot(&self, id: TradeId) -> Option<LotState> {
        self.lots.get(&id).copied()
    }

    /// True once every unit of buy lot `id` has been sold.
    pub fn is_fully_sold(&self, id: TradeId) -> bool {
        self.lots.get(&id).is_some_and(LotState::is_exhausted)
    }

    /// Lots with units remaining, oldest first.
    pub fn open_lots(&self) -> impl Iterator<Item = (TradeId, LotState)> + '_ {
        self.lots
            .iter()
            .filter(|(_, lot)| !lot.is_exhausted())
            .map(|(id, lot)| (*id, *lot))
    }

    pub fn remaining_amount(&self) -> f64 {
        self.open_lots().map(|(_, lot)| lot.remaining_amount).sum()
    }

    pub fn total_bought(&self) -> f64 {
        self.total_bought
    }

    pub fn total_sold(&self) -> f64 {
        self.total_sold
    }

    /// Take up to `amount` units from the oldest open lots first.
    pub fn consume_fifo(&mut self, amount: f64) -> Vec<LotConsumption> {
        let mut left = amount;
        let mut consumed = Vec::new();

        for (&lot_id, lot) in self.lots.iter_mut() {
            if left <= DUST {
                break;
            }
            if lot.is_exhausted() {
                continue;
            }
            consumed.push(take_from_lot(lot_id, lot, left));
            left -= consumed.last().map_or(0.0, |c| c.amount);
        }

        self.total_sold += consumed.iter().map(|c| c.amount).sum::<f64>();
        consumed
    }

    /// Take everything left in one lot.
    pub fn consume_lot(&mut self, lot_id: TradeId) -> Option<LotConsumption> {
        let lot = self.lots.get_mut(&lot_id)?;
        if lot.is_exhausted() {
            return None;
        }
        let amount = lot.remaining_amount;
        let consumption = take_from_lot(lot_id, lot, amount);
        self.total_sold += consumption.amount;
        Some(consumption)
    }

    /// P&L of closed (sell) trades in ledger order.
    pub fn closed_pnls(&self) -> impl Iterator<Item = f64> + '_ {
        self.trades
            .iter()
            .filter(|t| t.trade_type == TradeType::Sell)
            .filter_map(|t| t.pnl)
    }
}

fn take_from_lot(lot_id: TradeId, lot: &mut LotState, wanted: f64) -> LotConsumption {
    let take = wanted.min(lot.remaining_amount);
    let share = take / lot.remaining_amount;
    let cost = lot.remaining_cost_basis * share;

    lot.remaining_amount -= take;
    lot.remaining_cost_basis -= cost;
    let closed = lot.remaining_amount <= DUST;
    if closed {
        lot.remaining_amount = 0.0;
        lot.remaining_cost_basis = 0.0;
    }

    LotConsumption {
        lot_id,
        amount: take,
        cost_basis: cost,
        closed,
    }
}

//! Order execution and accounting.
//!
//! The engine exclusively owns the portfolio, the trade ledger and the set
//! of open stop positions for one run. Buys open lots, sells consume lots
//! oldest-first, and trailing stops can force a lot out before any signal
//! trade is considered.

use std::collections::BTreeMap;

use crate::domain::ledger::{DUST, Fill, LotConsumption, TradeId, TradeLedger, TradeReason};
use crate::domain::portfolio::Portfolio;
use crate::domain::position::{LotPhase, OpenPosition, StopLossConfig};

/// Reference ATR% at which slippage starts to scale up.
const SLIPPAGE_BASE_ATR_PCT: f64 = 0.02;

#[derive(Debug, Clone, PartialEq)]
pub struct CostConfig {
    pub enabled: bool,
    pub fee_pct: f64,
    pub slippage_pct: f64,
    pub volatility_scaled_slippage: bool,
}

impl Default for CostConfig {
    fn default() -> Self {
        CostConfig {
            enabled: false,
            fee_pct: 0.001,
            slippage_pct: 0.0005,
            volatility_scaled_slippage: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionConfig {
    pub costs: CostConfig,
    pub stop_loss: StopLossConfig,
}

pub fn calculate_fee(notional: f64, config: &CostConfig) -> f64 {
    if config.enabled {
        notional * config.fee_pct
    } else {
        0.0
    }
}

/// Between 1 and 2, rising linearly once ATR% exceeds 2%.
pub fn slippage_multiplier(atr_pct: Option<f64>) -> f64 {
    match atr_pct {
        Some(pct) => (1.0 + (pct - SLIPPAGE_BASE_ATR_PCT) / SLIPPAGE_BASE_ATR_PCT).clamp(1.0, 2.0),
        None => 1.0,
    }
}

pub fn calculate_slippage(notional: f64, atr_pct: Option<f64>, config: &CostConfig) -> f64 {
    if !config.enabled {
        return 0.0;
    }
    let multiplier = if config.volatility_scaled_slippage {
        slippage_multiplier(atr_pct)
    } else {
        1.0
    };
    notional * config.slippage_pct * multiplier
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuyFill {
    pub trade_id: TradeId,
    pub amount: f64,
    pub notional: f64,
    pub total_cost: f64,
    pub stop_level: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SellFill {
    pub trade_id: TradeId,
    pub amount: f64,
    pub net_proceeds: f64,
    pub cost_basis: f64,
    pub pnl: f64,
    pub reason: TradeReason,
    pub consumed: Vec<LotConsumption>,
}

#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    config: ExecutionConfig,
    portfolio: Portfolio,
    ledger: TradeLedger,
    positions: BTreeMap<TradeId, OpenPosition>,
}

impl ExecutionEngine {
    pub fn new(initial_capital: f64, config: ExecutionConfig) -> Self {
        ExecutionEngine {
            config,
            portfolio: Portfolio::new(initial_capital),
            ledger: TradeLedger::new(),
            positions: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }

    pub fn position(&self, lot_id: TradeId) -> Option<&OpenPosition> {
        self.positions.get(&lot_id)
    }

    pub fn positions(&self) -> impl Iterator<Item = &OpenPosition> {
        self.positions.values()
    }

    pub fn mark(&mut self, price: f64) {
        self.portfolio.mark(price);
    }

    /// `None` for ids that are not buy lots.
    pub fn lot_phase(&self, lot_id: TradeId) -> Option<LotPhase> {
        let lot = self.ledger.lot(lot_id)?;
        if lot.is_exhausted() {
            return Some(LotPhase::Closed);
        }
        Some(
            self.positions
                .get(&lot_id)
                .map_or(LotPhase::Open, OpenPosition::phase),
        )
    }

    /// Spend `notional` of cash at `price`. A no-op when cash cannot cover
    /// notional plus costs.
    pub fn buy(
        &mut self,
        timestamp: i64,
        price: f64,
        notional: f64,
        atr: Option<f64>,
    ) -> Option<BuyFill> {
        if notional <= 0.0 || price <= 0.0 {
            return None;
        }
        let costs = &self.config.costs;
        let fee = calculate_fee(notional, costs);
        let slippage = calculate_slippage(notional, atr.map(|a| a / price), costs);
        let total_cost = notional + fee + slippage;

        if total_cost > self.portfolio.cash_balance {
            tracing::debug!(
                total_cost,
                cash = self.portfolio.cash_balance,
                "buy skipped: insufficient cash"
            );
            return None;
        }

        let amount = notional / price;
        let fill = Fill {
            timestamp,
            price,
            amount,
            notional,
            fee,
            slippage,
        };
        let trade_id = self.ledger.record_buy(fill, total_cost);

        self.portfolio.cash_balance -= total_cost;
        self.portfolio.asset_balance += amount;
        self.portfolio.trade_count += 1;
        self.portfolio.mark(price);

        let stop = &self.config.stop_loss;
        let stop_level = match atr {
            Some(atr) if stop.enabled && atr > 0.0 => {
                let position = OpenPosition::new(trade_id, price, atr, stop.atr_multiplier);
                let level = position.stop_level;
                self.positions.insert(trade_id, position);
                Some(level)
            }
            _ => None,
        };

        tracing::debug!(trade_id, price, amount, total_cost, ?stop_level, "buy filled");

        Some(BuyFill {
            trade_id,
            amount,
            notional,
            total_cost,
            stop_level,
        })
    }

    /// Sell `amount` units, matching the oldest lots first. A no-op when the
    /// asset balance cannot cover it.
    pub fn sell(
        &mut self,
        timestamp: i64,
        price: f64,
        amount: f64,
        atr: Option<f64>,
    ) -> Option<SellFill> {
        if amount <= DUST || price <= 0.0 {
            return None;
        }
        if amount > self.portfolio.asset_balance + DUST {
            tracing::debug!(
                amount,
                balance = self.portfolio.asset_balance,
                "sell skipped: insufficient asset balance"
            );
            return None;
        }

        let consumed = self.ledger.consume_fifo(amount);
        Some(self.settle_sell(timestamp, price, atr, consumed, TradeReason::Signal))
    }

    /// Trail every open stop and close the lots whose stop was hit.
    ///
    /// Without an ATR reading nothing is trailed or checked.
    pub fn update_stops(&mut self, timestamp: i64, price: f64, atr: Option<f64>) -> Vec<SellFill> {
        let stop = self.config.stop_loss.clone();
        let Some(atr) = atr.filter(|_| stop.enabled) else {
            return Vec::new();
        };

        let mut breached = Vec::new();
        for position in self.positions.values_mut() {
            if stop.trailing {
                position.trail(price, atr, stop.atr_multiplier);
            }
            if position.is_breached(price) {
                breached.push(position.lot_id);
            }
        }

        let mut exits = Vec::new();
        for lot_id in breached {
            let Some(consumption) = self.ledger.consume_lot(lot_id) else {
                self.positions.remove(&lot_id);
                continue;
            };
            let stop_level = self.positions.get(&lot_id).map(|p| p.stop_level);
            let fill = self.settle_sell(
                timestamp,
                price,
                Some(atr),
                vec![consumption],
                TradeReason::StopLoss,
            );
            tracing::info!(lot_id, price, ?stop_level, pnl = fill.pnl, "stop loss exit");
            exits.push(fill);
        }
        exits
    }

    fn settle_sell(
        &mut self,
        timestamp: i64,
        price: f64,
        atr: Option<f64>,
        consumed: Vec<LotConsumption>,
        reason: TradeReason,
    ) -> SellFill {
        let amount: f64 = consumed.iter().map(|c| c.amount).sum();
        let cost_basis: f64 = consumed.iter().map(|c| c.cost_basis).sum();

        let costs = &self.config.costs;
        let gross = amount * price;
        let fee = calculate_fee(gross, costs);
        let slippage = calculate_slippage(gross, atr.map(|a| a / price), costs);
        let net_proceeds = gross - fee - slippage;
        let pnl = net_proceeds - cost_basis;

        let fill = Fill {
            timestamp,
            price,
            amount,
            notional: gross,
            fee,
            slippage,
        };
        let trade_id = self.ledger.record_sell(fill, cost_basis, pnl, reason);

        for c in consumed.iter().filter(|c| c.closed) {
            self.positions.remove(&c.lot_id);
        }

        self.portfolio.cash_balance += net_proceeds;
        self.portfolio.asset_balance = self.ledger.remaining_amount();
        self.portfolio.trade_count += 1;
        if pnl > 0.0 {
            self.portfolio.win_count += 1;
        }
        self.portfolio.mark(price);

        tracing::debug!(trade_id, price, amount, pnl, %reason, "sell filled");

        SellFill {
            trade_id,
            amount,
            net_proceeds,
            cost_basis,
            pnl,
            reason,
            consumed,
        }
    }
}

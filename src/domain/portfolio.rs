//! Single-asset portfolio state.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash_balance: f64,
    pub asset_balance: f64,
    pub total_value: f64,
    pub trade_count: usize,
    pub win_count: usize,
    pub initial_capital: f64,
    pub last_price: f64,
    pub peak_value: f64,
}

/// Portfolio state at the end of one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSnapshot {
    pub timestamp: i64,
    pub price: f64,
    pub cash: f64,
    pub asset: f64,
    pub total_value: f64,
    pub drawdown_pct: f64,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Portfolio {
            cash_balance: initial_capital,
            asset_balance: 0.0,
            total_value: initial_capital,
            trade_count: 0,
            win_count: 0,
            initial_capital,
            last_price: 0.0,
            peak_value: initial_capital,
        }
    }

    /// Revalue at `price`; total value is always derived, never accumulated.
    pub fn mark(&mut self, price: f64) {
        self.last_price = price;
        self.revalue();
    }

    pub fn revalue(&mut self) {
        self.total_value = self.cash_balance + self.asset_balance * self.last_price;
        if self.total_value > self.peak_value {
            self.peak_value = self.total_value;
        }
    }

    pub fn total_return(&self) -> f64 {
        if self.initial_capital > 0.0 {
            (self.total_value - self.initial_capital) / self.initial_capital
        } else {
            0.0
        }
    }

    pub fn drawdown_pct(&self) -> f64 {
        if self.peak_value > 0.0 {
            ((self.peak_value - self.total_value) / self.peak_value * 100.0).max(0.0)
        } else {
            0.0
        }
    }

    pub fn snapshot(&self, timestamp: i64) -> PortfolioSnapshot {
        PortfolioSnapshot {
            timestamp,
            price: self.last_price,
            cash: self.cash_balance,
            asset: self.asset_balance,
            total_value: self.total_value,
            drawdown_pct: self.drawdown_pct(),
        }
    }
}

//! Performance metrics for a completed run.

use serde::Serialize;

use super::audit::TradeAudit;
use super::portfolio::PortfolioSnapshot;
use super::timeframe::{DAY_MS, Timeframe};

const DAYS_PER_YEAR: f64 = 365.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    pub max_drawdown_duration: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub trades_breakeven: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub avg_holding_bars: f64,
}

impl Metrics {
    /// `closed_pnls` holds one entry per sell trade; holding periods come
    /// from the per-lot audits.
    pub fn compute(
        snapshots: &[PortfolioSnapshot],
        closed_pnls: &[f64],
        audits: &[TradeAudit],
        initial_capital: f64,
        timeframe: Timeframe,
    ) -> Self {
        let final_value = snapshots
            .last()
            .map(|s| s.total_value)
            .unwrap_or(initial_capital);

        let total_return = if initial_capital > 0.0 {
            (final_value - initial_capital) / initial_capital
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_duration) = compute_drawdown(snapshots);
        let periods_per_year = DAYS_PER_YEAR * DAY_MS as f64 / timeframe.interval_ms() as f64;
        let (sharpe_ratio, sortino_ratio) = compute_risk_adjusted(snapshots, periods_per_year);

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut trades_breakeven = 0usize;
        let mut total_wins = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;

        for &pnl in closed_pnls {
            if pnl > 0.0 {
                trades_won += 1;
                total_wins += pnl;
                largest_win = largest_win.max(pnl);
            } else if pnl < 0.0 {
                trades_lost += 1;
                total_losses += pnl.abs();
                largest_loss = largest_loss.max(pnl.abs());
            } else {
                trades_breakeven += 1;
            }
        }

        let total_trades = closed_pnls.len();
        let win_rate = if total_trades > 0 {
            trades_won as f64 / total_trades as f64
        } else {
            0.0
        };

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_win = if trades_won > 0 {
            total_wins / trades_won as f64
        } else {
            0.0
        };

        let avg_loss = if trades_lost > 0 {
            total_losses / trades_lost as f64
        } else {
            0.0
        };

        let avg_holding_bars = if audits.is_empty() {
            0.0
        } else {
            audits.iter().map(|a| a.holding_bars as f64).sum::<f64>() / audits.len() as f64
        };

        Metrics {
            total_return,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            max_drawdown_duration,
            trades_won,
            trades_lost,
            trades_breakeven,
            win_rate,
            profit_factor,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            avg_holding_bars,
        }
    }
}

/// Largest peak-to-trough decline as a fraction, and the longest run of
/// steps spent below a peak.
fn compute_drawdown(snapshots: &[PortfolioSnapshot]) -> (f64, usize) {
    let Some(first) = snapshots.first() else {
        return (0.0, 0);
    };

    let mut peak = first.total_value;
    let mut max_dd = 0.0_f64;
    let mut max_duration = 0usize;
    let mut duration = 0usize;

    for snap in snapshots {
        if snap.total_value >= peak {
            peak = snap.total_value;
            duration = 0;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - snap.total_value) / peak);
            duration += 1;
            max_duration = max_duration.max(duration);
        }
    }

    (max_dd, max_duration)
}

fn compute_risk_adjusted(snapshots: &[PortfolioSnapshot], periods_per_year: f64) -> (f64, f64) {
    if snapshots.len() < 2 {
        return (0.0, 0.0);
    }

    let returns: Vec<f64> = snapshots
        .windows(2)
        .map(|w| {
            let prev = w[0].total_value;
            if prev > 0.0 {
                (w[1].total_value - prev) / prev
            } else {
                0.0
            }
        })
        .collect();

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    let annualizer = periods_per_year.sqrt();

    let sharpe = if stddev > 0.0 {
        mean / stddev * annualizer
    } else {
        0.0
    };

    let downside = returns
        .iter()
        .filter(|&&r| r < 0.0)
        .map(|r| r.powi(2))
        .sum::<f64>()
        / n;
    let downside_stddev = downside.sqrt();

    let sortino = if downside_stddev > 0.0 {
        mean / downside_stddev * annualizer
    } else {
        0.0
    };

    (sharpe, sortino)
}

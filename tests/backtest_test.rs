//! End-to-end backtest tests over synthetic series.
//!
//! Tests cover:
//! - Accounting identities across every step (value, FIFO conservation)
//! - Trailing stops closing lots when a rally reverses
//! - Audit records matching the sell trades they came from
//! - Report output from a real run

mod common;

use common::*;
use regimetrader::adapters::csv_report_adapter::CsvReportAdapter;
use regimetrader::domain::audit::Outcome;
use regimetrader::domain::backtest::{BacktestConfig, BacktestResult, run_backtest};
use regimetrader::domain::ledger::{TradeReason, TradeType};
use regimetrader::domain::timeframe::Timeframe;
use regimetrader::ports::report_port::ReportPort;

const TF: Timeframe = Timeframe::H8;

fn config() -> BacktestConfig {
    BacktestConfig {
        symbol: "BTC".into(),
        timeframe: TF,
        ..BacktestConfig::default()
    }
}

fn rally_and_crash() -> BacktestResult {
    let candles = candles_from_closes(TF, &rise_then_fall(120, 30, 0.03));
    run_backtest(&candles, &momentum_set(TF), &config()).unwrap()
}

mod accounting {
    use super::*;

    #[test]
    fn snapshots_track_every_step() {
        let closes = rise_then_fall(120, 30, 0.03);
        let candles = candles_from_closes(TF, &closes);
        let result = run_backtest(&candles, &momentum_set(TF), &config()).unwrap();

        assert_eq!(result.snapshots.len(), candles.len());
        for (snap, candle) in result.snapshots.iter().zip(&candles) {
            assert_eq!(snap.timestamp, candle.timestamp);
            let derived = snap.cash + snap.asset * candle.close;
            assert!((snap.total_value - derived).abs() < 1e-6 * derived.max(1.0));
            assert!(snap.cash >= -1e-9);
            assert!(snap.asset >= -1e-12);
        }
    }

    #[test]
    fn bought_units_equal_sold_plus_held() {
        let result = rally_and_crash();
        let bought: f64 = result
            .trades
            .iter()
            .filter(|t| t.trade_type == TradeType::Buy)
            .map(|t| t.amount)
            .sum();
        let sold: f64 = result
            .trades
            .iter()
            .filter(|t| t.trade_type == TradeType::Sell)
            .map(|t| t.amount)
            .sum();
        let held = result.portfolio.asset_balance;
        assert!((bought - sold - held).abs() < 1e-9 * bought.max(1.0));
    }

    #[test]
    fn trade_count_matches_ledger() {
        let result = rally_and_crash();
        assert_eq!(result.portfolio.trade_count, result.trades.len());
        for (i, trade) in result.trades.iter().enumerate() {
            assert_eq!(trade.id, i as u64 + 1);
        }
    }
}

mod stops {
    use super::*;

    #[test]
    fn crash_after_rally_triggers_stop_exits() {
        let result = rally_and_crash();
        assert!(result.stop_exits > 0);
        assert!(
            result
                .trades
                .iter()
                .any(|t| t.reason == TradeReason::StopLoss)
        );
    }

    #[test]
    fn stop_exit_preempts_signal_on_the_same_bar() {
        let closes = rise_then_fall(120, 30, 0.03);
        let candles = candles_from_closes(TF, &closes);
        let result = run_backtest(&candles, &momentum_set(TF), &config()).unwrap();

        let stop_times: Vec<i64> = result
            .trades
            .iter()
            .filter(|t| t.reason == TradeReason::StopLoss)
            .map(|t| t.timestamp)
            .collect();
        assert!(!stop_times.is_empty());

        // The momentum strategy is past its thresholds on at least one stop bar.
        let signalling = stop_times.iter().any(|&ts| {
            let i = ((ts - BASE) / TF.interval_ms()) as usize;
            i >= 5 && ((closes[i] - closes[i - 5]) / closes[i - 5] * 10.0).abs() >= 0.05
        });
        assert!(signalling);

        for trade in result.trades.iter().filter(|t| t.reason == TradeReason::Signal) {
            assert!(
                !stop_times.contains(&trade.timestamp),
                "signal trade {} shares a stop bar",
                trade.id
            );
        }
    }

    #[test]
    fn disabled_stops_never_fire() {
        let candles = candles_from_closes(TF, &rise_then_fall(120, 30, 0.03));
        let mut cfg = config();
        cfg.execution.stop_loss.enabled = false;
        let result = run_backtest(&candles, &momentum_set(TF), &cfg).unwrap();

        assert_eq!(result.stop_exits, 0);
        assert!(
            result
                .trades
                .iter()
                .all(|t| t.reason == TradeReason::Signal)
        );
    }
}

mod audits {
    use super::*;

    #[test]
    fn every_audit_points_at_a_sell() {
        let result = rally_and_crash();
        assert!(!result.audits.is_empty());

        for audit in &result.audits {
            let sell = result
                .trades
                .iter()
                .find(|t| t.id == audit.sell_trade_id)
                .unwrap();
            assert_eq!(sell.trade_type, TradeType::Sell);
            assert_eq!(sell.reason, audit.exit_reason);

            let lot = result.trades.iter().find(|t| t.id == audit.lot_id).unwrap();
            assert_eq!(lot.trade_type, TradeType::Buy);
            assert!(audit.exit_timestamp >= audit.entry_timestamp);
            assert!(audit.mfe_pct >= audit.mae_pct);
            assert_eq!(audit.outcome, Outcome::from_pnl(audit.pnl));
        }
    }

    #[test]
    fn audit_pnl_sums_to_realized_pnl() {
        let result = rally_and_crash();
        let realized: f64 = result.trades.iter().filter_map(|t| t.pnl).sum();
        let audited: f64 = result.audits.iter().map(|a| a.pnl).sum();
        assert!((realized - audited).abs() < 1e-6 * realized.abs().max(1.0));
    }
}

mod reporting {
    use super::*;

    #[test]
    fn report_files_round_out_a_run() {
        let result = rally_and_crash();
        let dir = tempfile::TempDir::new().unwrap();
        CsvReportAdapter::new().write(&result, dir.path()).unwrap();

        let audits = std::fs::read_to_string(dir.path().join("audits.csv")).unwrap();
        assert_eq!(audits.lines().count(), result.audits.len() + 1);
        assert!(audits.contains("stop_loss"));

        let metrics = std::fs::read_to_string(dir.path().join("metrics.csv")).unwrap();
        assert!(metrics.starts_with("total_return,"));
    }
}

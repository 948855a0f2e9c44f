//! Core domain types and logic.

pub mod candle;
pub mod timeframe;
pub mod error;
pub mod indicator;
pub mod indicator_cache;
pub mod regime;
pub mod strategy;
pub mod selector;
pub mod sizing;
pub mod ledger;
pub mod position;
pub mod portfolio;
pub mod execution;
pub mod audit;
pub mod metrics;
pub mod backtest;
pub mod gaps;
pub mod backfill;
pub mod config_validation;

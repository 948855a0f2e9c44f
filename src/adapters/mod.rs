//! Concrete adapter implementations for ports.

pub mod csv_adapter;
pub mod csv_report_adapter;
pub mod fallback_provider;
pub mod file_config_adapter;
pub mod json_strategy_store;
pub mod memory_cache;
#[cfg(feature = "sqlite")]
pub mod sqlite_adapter;

//! Port traits between the domain and the outside world.

pub mod candle_port;
pub mod config_port;
pub mod report_port;
pub mod strategy_port;

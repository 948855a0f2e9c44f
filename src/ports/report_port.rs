//! Report output port.

use std::path::Path;

use crate::domain::backtest::BacktestResult;
use crate::domain::error::EngineError;

/// Port for writing the outputs of a backtest run.
pub trait ReportPort {
    fn write(&self, result: &BacktestResult, output_dir: &Path) -> Result<(), EngineError>;
}

//! Strategy configuration store port.

use serde::{Deserialize, Serialize};

use crate::domain::error::EngineError;
use crate::domain::strategy::StrategySet;

/// A previously active strategy set and the time range it was live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedStrategySet {
    pub version: u32,
    pub set: StrategySet,
    pub activated_at: i64,
    pub archived_at: i64,
}

pub trait StrategyStore {
    /// The active set for `asset`, if one was ever saved.
    fn load(&self, asset: &str) -> Result<Option<StrategySet>, EngineError>;

    /// Make `set` active, archiving whatever was active before.
    fn save(&self, asset: &str, set: &StrategySet, now: i64) -> Result<(), EngineError>;

    /// Archived sets, oldest first.
    fn history(&self, asset: &str) -> Result<Vec<ArchivedStrategySet>, EngineError>;

    /// Re-activate an archived version; the current set is archived first.
    fn restore(&self, asset: &str, version: u32, now: i64) -> Result<StrategySet, EngineError>;
}

//! JSON-file strategy store, one file per asset.

use crate::domain::error::EngineError;
use crate::domain::strategy::StrategySet;
use crate::ports::strategy_port::{ArchivedStrategySet, StrategyStore};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActiveSet {
    version: u32,
    set: StrategySet,
    activated_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AssetStrategies {
    active: Option<ActiveSet>,
    #[serde(default)]
    history: Vec<ArchivedStrategySet>,
    #[serde(default)]
    next_version: u32,
}

impl AssetStrategies {
    fn activate(&mut self, set: StrategySet, now: i64) {
        if let Some(previous) = self.active.take() {
            self.history.push(ArchivedStrategySet {
                version: previous.version,
                set: previous.set,
                activated_at: previous.activated_at,
                archived_at: now,
            });
        }
        self.next_version += 1;
        self.active = Some(ActiveSet {
            version: self.next_version,
            set,
            activated_at: now,
        });
    }
}

pub struct JsonStrategyStore {
    base_path: PathBuf,
}

impl JsonStrategyStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn path(&self, asset: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", asset))
    }

    fn read(&self, asset: &str) -> Result<AssetStrategies, EngineError> {
        let path = self.path(asset);
        match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| EngineError::StrategyStore {
                reason: format!("{}: {}", path.display(), e),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(AssetStrategies::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, asset: &str, data: &AssetStrategies) -> Result<(), EngineError> {
        fs::create_dir_all(&self.base_path)?;
        let json = serde_json::to_string_pretty(data).map_err(|e| EngineError::StrategyStore {
            reason: e.to_string(),
        })?;
        let path = self.path(asset);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl StrategyStore for JsonStrategyStore {
    fn load(&self, asset: &str) -> Result<Option<StrategySet>, EngineError> {
        Ok(self.read(asset)?.active.map(|a| a.set))
    }

    fn save(&self, asset: &str, set: &StrategySet, now: i64) -> Result<(), EngineError> {
        let mut data = self.read(asset)?;
        data.activate(set.clone(), now);
        self.write(asset, &data)?;
        tracing::info!(asset, version = data.next_version, "strategy set saved");
        Ok(())
    }

    fn history(&self, asset: &str) -> Result<Vec<ArchivedStrategySet>, EngineError> {
        Ok(self.read(asset)?.history)
    }

    fn restore(&self, asset: &str, version: u32, now: i64) -> Result<StrategySet, EngineError> {
        let mut data = self.read(asset)?;
        let archived = data
            .history
            .iter()
            .find(|a| a.version == version)
            .map(|a| a.set.clone())
            .ok_or_else(|| EngineError::StrategyStore {
                reason: format!("no archived version {version} for {asset}"),
            })?;

        data.activate(archived.clone(), now);
        self.write(asset, &data)?;
        tracing::info!(asset, restored = version, version = data.next_version, "strategy set restored");
        Ok(archived)
    }
}

//! File-backed settings store
//!
//! The whole map is rewritten on every change. Writes go to a sibling
//! temporary file first and are renamed over the target so a crash never
//! leaves a half-written settings file behind.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{SettingsStore, StoreResult, StoredValue};

/// Settings persisted as a flat YAML map
pub struct YamlStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, StoredValue>>,
}

impl YamlStore {
    /// Open the store at `path`
    ///
    /// A missing file starts an empty store. A corrupt file is logged and
    /// replaced on the next write rather than blocking playback.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let values = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            match serde_yaml::from_str::<BTreeMap<String, StoredValue>>(&contents) {
                Ok(values) => values,
                Err(e) => {
                    log::warn!("YamlStore: Ignoring unreadable state file {:?}: {}", path, e);
                    BTreeMap::new()
                }
            }
        } else {
            log::info!("YamlStore: No state file at {:?}, starting empty", path);
            BTreeMap::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_locked(&self, values: &BTreeMap<String, StoredValue>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let yaml = serde_yaml::to_string(values)?;
        let tmp_path = self.path.with_extension("yaml.tmp");
        std::fs::write(&tmp_path, yaml)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl SettingsStore for YamlStore {
    fn get(&self, key: &str) -> Option<StoredValue> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn put(&self, key: &str, value: StoredValue) -> StoreResult<()> {
        let mut values = match self.values.lock() {
            Ok(values) => values,
            Err(poisoned) => poisoned.into_inner(),
        };
        values.insert(key.to_string(), value);
        self.write_locked(&values)
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut values = match self.values.lock() {
            Ok(values) => values,
            Err(poisoned) => poisoned.into_inner(),
        };
        if values.remove(key).is_some() {
            self.write_locked(&values)?;
        }
        Ok(())
    }
}

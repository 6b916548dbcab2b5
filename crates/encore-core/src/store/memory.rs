//! In-memory settings backend

use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{SettingsStore, StoreResult, StoredValue};

/// Settings kept in a map for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<BTreeMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.values.read().map(|values| values.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Option<StoredValue> {
        self.values.read().ok()?.get(key).cloned()
    }

    fn put(&self, key: &str, value: StoredValue) -> StoreResult<()> {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.to_string(), value);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        if let Ok(mut values) = self.values.write() {
            values.remove(key);
        }
        Ok(())
    }
}

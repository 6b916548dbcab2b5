//! Key-value persistence for engine state
//!
//! The engine persists three groups of values: the serialized playback queue
//! with its cursor, the repeat/shuffle flags, and the DSP chain. Everything
//! goes through the [`SettingsStore`] trait so embedders can plug any backend
//! in. Two backends ship with the crate:
//!
//! - [`MemoryStore`]: in-process map, used by tests and ephemeral sessions
//! - [`YamlStore`]: single YAML file rewritten on every change

mod memory;
mod yaml;

pub use memory::MemoryStore;
pub use yaml::YamlStore;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a settings backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Settings I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode settings: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to encode value: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for settings operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A single persisted value
///
/// Untagged so the YAML file stays readable (`repeatMode: true`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Ordered list of strings
    List(Vec<String>),
}

/// Generic key-value store
///
/// Implementations must be safe to call from the engine worker and from
/// caller threads at the same time.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<StoredValue>;

    fn put(&self, key: &str, value: StoredValue) -> StoreResult<()>;

    fn remove(&self, key: &str) -> StoreResult<()>;

    fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(StoredValue::String(value)) => Some(value),
            _ => None,
        }
    }

    fn put_string(&self, key: &str, value: &str) -> StoreResult<()> {
        self.put(key, StoredValue::String(value.to_string()))
    }

    fn get_string_list(&self, key: &str) -> Option<Vec<String>> {
        match self.get(key) {
            Some(StoredValue::List(values)) => Some(values),
            _ => None,
        }
    }

    fn put_string_list(&self, key: &str, values: &[String]) -> StoreResult<()> {
        self.put(key, StoredValue::List(values.to_vec()))
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(StoredValue::Bool(value)) => Some(value),
            _ => None,
        }
    }

    fn put_bool(&self, key: &str, value: bool) -> StoreResult<()> {
        self.put(key, StoredValue::Bool(value))
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(StoredValue::Int(value)) => Some(value),
            _ => None,
        }
    }

    fn put_int(&self, key: &str, value: i64) -> StoreResult<()> {
        self.put(key, StoredValue::Int(value))
    }

    fn get_float(&self, key: &str) -> Option<f64> {
        match self.get(key) {
            Some(StoredValue::Float(value)) => Some(value),
            // Whole numbers come back from YAML as ints
            Some(StoredValue::Int(value)) => Some(value as f64),
            _ => None,
        }
    }

    fn put_float(&self, key: &str, value: f64) -> StoreResult<()> {
        self.put(key, StoredValue::Float(value))
    }
}

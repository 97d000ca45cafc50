//! Durable key/value persistence for the sync layer.
//!
//! Every value is a string; structured data goes through the JSON wrappers in
//! [`JsonStore`]. Values are always read and written whole, one key at a time.
//! There is no cross-key atomicity.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Keys of the persisted local layout.
pub mod keys {
  /// Ordered array of pending changes
  pub const PENDING_SYNC_ITEMS: &str = "pending_sync_items";
  pub const OFFLINE_TRACTORS: &str = "offline_tractors";
  pub const OFFLINE_PREDICTIONS: &str = "offline_predictions";
  pub const OFFLINE_MAINTENANCE_RECORDS: &str = "offline_maintenance_records";
  pub const OFFLINE_USAGE_LOGS: &str = "offline_usage_logs";
  /// RFC 3339 timestamp of the last finished drain
  pub const LAST_SYNC_TIMESTAMP: &str = "last_sync_timestamp";
}

/// A string key/value store whose completed writes survive a restart.
pub trait KeyValueStore: Send + Sync {
  /// Read the value stored under `key`.
  fn get(&self, key: &str) -> Result<Option<String>>;

  /// Replace the value stored under `key`.
  fn set(&self, key: &str, value: &str) -> Result<()>;

  /// Delete `key`. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> Result<()>;
}

/// Store handle shared by the queue, the cache and the sync engine.
pub type SharedStore = Arc<dyn KeyValueStore>;

/// JSON convenience wrappers over any [`KeyValueStore`].
pub trait JsonStore: KeyValueStore {
  /// Read and parse a JSON value.
  ///
  /// A value that no longer parses is reported as absent and logged; corrupt
  /// local state is never fatal.
  fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    let raw = match self.get(key)? {
      Some(raw) => raw,
      None => return Ok(None),
    };

    match serde_json::from_str(&raw) {
      Ok(value) => Ok(Some(value)),
      Err(e) => {
        warn!(key, error = %e, "Ignoring unparsable stored value");
        Ok(None)
      }
    }
  }

  /// Serialize and store a JSON value.
  fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)
      .map_err(|e| eyre!("Failed to serialize value for {}: {}", key, e))?;
    self.set(key, &raw)
  }
}

impl<S: KeyValueStore + ?Sized> JsonStore for S {}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::Deserialize;

  #[derive(Debug, PartialEq, Serialize, Deserialize)]
  struct Sample {
    name: String,
    hours: f64,
  }

  #[test]
  fn test_json_roundtrip_through_store() {
    let store = MemoryStore::new();
    let sample = Sample {
      name: "MF-240".to_string(),
      hours: 1520.5,
    };

    store.set_json("sample", &sample).unwrap();

    let loaded: Option<Sample> = store.get_json("sample").unwrap();
    assert_eq!(loaded, Some(sample));
  }

  #[test]
  fn test_unparsable_json_is_absent() {
    let store = MemoryStore::new();
    store.set("sample", "{not json").unwrap();

    let loaded: Option<Sample> = store.get_json("sample").unwrap();
    assert!(loaded.is_none());
    // The raw value is left untouched for inspection
    assert_eq!(store.get("sample").unwrap().as_deref(), Some("{not json"));
  }

  #[test]
  fn test_json_through_shared_handle() {
    let store: SharedStore = Arc::new(MemoryStore::new());
    store.set_json("numbers", &vec![1, 2, 3]).unwrap();

    let numbers: Option<Vec<i32>> = store.get_json("numbers").unwrap();
    assert_eq!(numbers, Some(vec![1, 2, 3]));
  }
}

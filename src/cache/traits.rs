//! Core traits and types for the local cache.

use serde::{de::DeserializeOwned, Serialize};

/// Trait for entities mirrored in a cached collection.
///
/// Implementors provide a unique cache key, the tractor they belong to, and
/// the store key their collection lives under.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Unique identifier within the collection (record id, tractor id)
  fn cache_key(&self) -> &str;

  /// Tractor this entity belongs to
  fn tractor_id(&self) -> &str;

  /// Store key holding the whole collection (e.g. "offline_predictions")
  fn collection_key() -> &'static str;
}

/// Result of a refresh, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  /// Fresh data from the remote API.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  /// Cached data served because the remote could not be reached.
  pub fn offline(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
    }
  }

  pub fn is_offline(&self) -> bool {
    self.source == CacheSource::Offline
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Offline mode - network unavailable, serving cached data
  Offline,
}

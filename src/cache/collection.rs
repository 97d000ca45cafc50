//! A remote collection mirrored under a single store key.

use color_eyre::{eyre::eyre, Result};
use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Mutex;
use tracing::{debug, warn};

use super::traits::{CacheResult, Cacheable};
use crate::store::{JsonStore, SharedStore};

/// Locally durable mirror of a remote collection.
///
/// The whole collection is one JSON array. The remote is the source of truth:
/// a refresh overwrites what it covers, optimistic edits fill the gaps
/// between refreshes.
pub struct CachedCollection<T> {
  store: SharedStore,
  write_lock: Mutex<()>,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Cacheable> CachedCollection<T> {
  pub fn new(store: SharedStore) -> Self {
    Self {
      store,
      write_lock: Mutex::new(()),
      _marker: PhantomData,
    }
  }

  /// Every cached entity, in stored order.
  pub fn all(&self) -> Result<Vec<T>> {
    Ok(
      self
        .store
        .get_json::<Vec<T>>(T::collection_key())?
        .unwrap_or_default(),
    )
  }

  /// Cached entities belonging to one tractor.
  pub fn for_tractor(&self, tractor_id: &str) -> Result<Vec<T>> {
    Ok(
      self
        .all()?
        .into_iter()
        .filter(|e| e.tractor_id() == tractor_id)
        .collect(),
    )
  }

  pub fn get(&self, key: &str) -> Result<Option<T>> {
    Ok(self.all()?.into_iter().find(|e| e.cache_key() == key))
  }

  /// Overwrite the whole collection.
  pub fn replace_all(&self, entities: &[T]) -> Result<()> {
    self.modify(|items| *items = entities.to_vec())
  }

  /// Overwrite one tractor's entities, placeholders included, keeping the rest.
  pub fn replace_for_tractor(&self, tractor_id: &str, entities: &[T]) -> Result<()> {
    self.modify(|items| {
      items.retain(|e| e.tractor_id() != tractor_id);
      items.extend(entities.iter().cloned());
    })
  }

  /// Insert at the front (most recent), replacing any entity with the same key.
  pub fn insert_front(&self, entity: T) -> Result<()> {
    self.modify(|items| {
      items.retain(|e| e.cache_key() != entity.cache_key());
      items.insert(0, entity);
    })
  }

  /// Replace the entity with the same key in place, or append it.
  pub fn put(&self, entity: T) -> Result<()> {
    self.modify(|items| {
      match items.iter_mut().find(|e| e.cache_key() == entity.cache_key()) {
        Some(existing) => *existing = entity,
        None => items.push(entity),
      }
    })
  }

  /// Edit the entity with `key` in place. Returns whether it was found.
  pub fn update<F>(&self, key: &str, f: F) -> Result<bool>
  where
    F: FnOnce(&mut T),
  {
    self.modify(|items| match items.iter_mut().find(|e| e.cache_key() == key) {
      Some(existing) => {
        f(existing);
        true
      }
      None => false,
    })
  }

  /// Drop the entity with `key`. Returns whether it was found.
  pub fn remove(&self, key: &str) -> Result<bool> {
    self.modify(|items| {
      let before = items.len();
      items.retain(|e| e.cache_key() != key);
      items.len() != before
    })
  }

  /// Refresh from the remote, falling back to cached data.
  ///
  /// 1. When online, fetch from network
  /// 2. On success, overwrite the cached entities the fetch covers
  ///    (one tractor when `tractor_id` is given, otherwise everything)
  /// 3. When offline or on failure, return the cached entities (offline mode)
  pub async fn refresh<F, Fut, E>(
    &self,
    tractor_id: Option<&str>,
    online: bool,
    fetcher: F,
  ) -> Result<CacheResult<Vec<T>>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<Vec<T>, E>>,
    E: Display,
  {
    if online {
      match fetcher().await {
        Ok(data) => {
          match tractor_id {
            Some(id) => self.replace_for_tractor(id, &data)?,
            None => self.replace_all(&data)?,
          }
          debug!(
            collection = T::collection_key(),
            count = data.len(),
            "Refreshed cached collection"
          );
          return Ok(CacheResult::from_network(data));
        }
        Err(e) => {
          warn!(
            collection = T::collection_key(),
            error = %e,
            "Refresh failed, serving cached data"
          );
        }
      }
    }

    let cached = match tractor_id {
      Some(id) => self.for_tractor(id)?,
      None => self.all()?,
    };
    Ok(CacheResult::offline(cached))
  }

  /// Read-modify-write the whole collection under the write lock.
  fn modify<R, F>(&self, f: F) -> Result<R>
  where
    F: FnOnce(&mut Vec<T>) -> R,
  {
    let _guard = self
      .write_lock
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut items = self.all()?;
    let result = f(&mut items);
    self.store.set_json(T::collection_key(), &items)?;
    Ok(result)
  }
}

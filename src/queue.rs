//! Pending change queue.
//!
//! An ordered list of typed change records persisted as one JSON array under
//! [`keys::PENDING_SYNC_ITEMS`]. Records are appended, read, and removed by
//! id; they are never edited in place. Each mutation rewrites the whole
//! array, serialized by a queue-local lock so an enqueue racing a drain's
//! removal cannot drop either write.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::audio::AudioUploadPayload;
use crate::models::{MaintenanceUpdate, NewMaintenanceRecord, TractorUpdate, UsageLogEntry};
use crate::store::{keys, JsonStore, SharedStore};

/// A mutation destined for the remote API, with its strongly typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Change {
  AudioUpload(AudioUploadPayload),
  UsageLog(UsageLogEntry),
  MaintenanceRecord(NewMaintenanceRecord),
  MaintenanceUpdate(MaintenanceUpdate),
  TractorUpdate(TractorUpdate),
}

impl Change {
  /// Stable name of the variant, for logs and listings.
  pub fn kind(&self) -> &'static str {
    match self {
      Change::AudioUpload(_) => "AudioUpload",
      Change::UsageLog(_) => "UsageLog",
      Change::MaintenanceRecord(_) => "MaintenanceRecord",
      Change::MaintenanceUpdate(_) => "MaintenanceUpdate",
      Change::TractorUpdate(_) => "TractorUpdate",
    }
  }

  /// Tractor the change applies to.
  pub fn tractor_id(&self) -> &str {
    match self {
      Change::AudioUpload(p) => &p.tractor_id,
      Change::UsageLog(e) => &e.tractor_id,
      Change::MaintenanceRecord(r) => &r.tractor_id,
      Change::MaintenanceUpdate(u) => &u.tractor_id,
      Change::TractorUpdate(u) => &u.tractor_id,
    }
  }
}

/// A queued, unconfirmed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
  /// Unique, creation-ordered (UUIDv7)
  pub id: String,
  #[serde(rename = "createdAt")]
  pub created_at: DateTime<Utc>,
  #[serde(flatten)]
  pub change: Change,
}

/// Durable FIFO of pending changes.
pub struct PendingQueue {
  store: SharedStore,
  write_lock: Mutex<()>,
}

impl PendingQueue {
  pub fn new(store: SharedStore) -> Self {
    Self {
      store,
      write_lock: Mutex::new(()),
    }
  }

  /// Append a change under a freshly minted id and persist the full list.
  pub fn enqueue(&self, change: Change) -> Result<PendingChange> {
    let _guard = self
      .write_lock
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let record = PendingChange {
      id: Uuid::now_v7().to_string(),
      created_at: Utc::now(),
      change,
    };

    let mut records = self.load()?;
    records.push(record.clone());
    self.store.set_json(keys::PENDING_SYNC_ITEMS, &records)?;

    debug!(id = %record.id, kind = record.change.kind(), "Enqueued pending change");
    Ok(record)
  }

  /// All records in insertion order.
  pub fn all(&self) -> Result<Vec<PendingChange>> {
    self.load()
  }

  /// Look up a single record.
  pub fn get(&self, id: &str) -> Result<Option<PendingChange>> {
    Ok(self.load()?.into_iter().find(|r| r.id == id))
  }

  /// Whether any queued change targets this tractor.
  pub fn has_pending_for(&self, tractor_id: &str) -> Result<bool> {
    Ok(
      self
        .load()?
        .iter()
        .any(|r| r.change.tractor_id() == tractor_id),
    )
  }

  pub fn len(&self) -> Result<usize> {
    Ok(self.load()?.len())
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  /// Remove the record with `id`, persisting the remainder.
  ///
  /// Returns whether a record was removed. Removing an unknown id is a no-op.
  pub fn remove_by_id(&self, id: &str) -> Result<bool> {
    let _guard = self
      .write_lock
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let records = self.load()?;
    let before = records.len();
    let remaining: Vec<PendingChange> = records.into_iter().filter(|r| r.id != id).collect();

    if remaining.len() == before {
      return Ok(false);
    }

    self.store.set_json(keys::PENDING_SYNC_ITEMS, &remaining)?;
    debug!(id, remaining = remaining.len(), "Removed pending change");
    Ok(true)
  }

  fn load(&self) -> Result<Vec<PendingChange>> {
    Ok(
      self
        .store
        .get_json::<Vec<PendingChange>>(keys::PENDING_SYNC_ITEMS)?
        .unwrap_or_default(),
    )
  }
}

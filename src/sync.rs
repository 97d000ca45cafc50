//! Sync engine: drains the pending queue against the remote API.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connectivity::StatusHandle;
use crate::models::{AudioPrediction, MaintenanceRecord, Tractor, UsageLog};
use crate::queue::{Change, PendingQueue};
use crate::remote::{ApiError, RemoteApi};
use crate::store::{keys, JsonStore, SharedStore};

/// What the server returned for a delivered change.
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmed {
  Prediction(AudioPrediction),
  Maintenance(MaintenanceRecord),
  MaintenanceUpdated,
  Usage(UsageLog),
  Tractor(Tractor),
}

/// Outcome of one pass over the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub attempted: usize,
  pub succeeded: usize,
  pub failed: usize,
}

pub struct SyncEngine {
  api: Arc<dyn RemoteApi>,
  queue: Arc<PendingQueue>,
  store: SharedStore,
  status: StatusHandle,
  syncing: AtomicBool,
}

impl SyncEngine {
  pub fn new(
    api: Arc<dyn RemoteApi>,
    queue: Arc<PendingQueue>,
    store: SharedStore,
    status: StatusHandle,
  ) -> Self {
    Self {
      api,
      queue,
      store,
      status,
      syncing: AtomicBool::new(false),
    }
  }

  pub fn is_syncing(&self) -> bool {
    self.syncing.load(Ordering::Acquire)
  }

  /// Drain the queue once. Returns true if at least one change was delivered.
  ///
  /// A no-op returning false while offline or while another drain is running.
  pub async fn sync_pending_changes(&self) -> bool {
    matches!(self.drain().await, Some(report) if report.succeeded > 0)
  }

  /// Deliver every queued change in order, keeping the ones that fail.
  ///
  /// Returns `None` when the drain was skipped. Changes enqueued while the
  /// pass runs are left for the next drain.
  pub async fn drain(&self) -> Option<DrainReport> {
    if !self.status.current().is_online {
      debug!("Offline, skipping sync");
      return None;
    }

    // Claimed before the first await: a concurrent caller sees it set
    let _guard = match SyncGuard::acquire(self) {
      Some(guard) => guard,
      None => {
        debug!("Sync already in progress");
        return None;
      }
    };

    let snapshot = match self.queue.all() {
      Ok(records) => records,
      Err(e) => {
        warn!(error = %e, "Failed to read pending queue");
        return None;
      }
    };

    let mut report = DrainReport::default();

    for record in &snapshot {
      // Discarded by the user since the snapshot was taken
      match self.queue.get(&record.id) {
        Ok(Some(_)) => {}
        Ok(None) => {
          debug!(id = %record.id, "Change no longer queued, skipping");
          continue;
        }
        Err(e) => {
          warn!(id = %record.id, error = %e, "Failed to read pending queue");
          continue;
        }
      }

      report.attempted += 1;

      match self.dispatch(&record.change).await {
        Ok(_) => {
          report.succeeded += 1;
          if let Err(e) = self.queue.remove_by_id(&record.id) {
            warn!(id = %record.id, error = %e, "Delivered change could not be removed");
          }
        }
        Err(e) => {
          report.failed += 1;
          warn!(
            id = %record.id,
            kind = record.change.kind(),
            transient = e.is_transient(),
            error = %e,
            "Failed to sync change, keeping it queued"
          );
        }
      }

      self.refresh_or_warn();
    }

    if let Err(e) = self.store.set_json(keys::LAST_SYNC_TIMESTAMP, &Utc::now()) {
      warn!(error = %e, "Failed to record sync time");
    }
    self.refresh_or_warn();

    info!(
      attempted = report.attempted,
      succeeded = report.succeeded,
      failed = report.failed,
      "Sync finished"
    );

    Some(report)
  }

  /// Send one change to its endpoint.
  pub async fn dispatch(&self, change: &Change) -> Result<Confirmed, ApiError> {
    match change {
      Change::AudioUpload(payload) => {
        let request = payload.to_request()?;
        let prediction = self.api.upload_audio(&request).await?;
        Ok(Confirmed::Prediction(prediction))
      }
      Change::UsageLog(entry) => Ok(Confirmed::Usage(self.api.log_usage(entry).await?)),
      Change::MaintenanceRecord(record) => Ok(Confirmed::Maintenance(
        self.api.create_maintenance(record).await?,
      )),
      Change::MaintenanceUpdate(update) => {
        self.api.update_maintenance(update).await?;
        Ok(Confirmed::MaintenanceUpdated)
      }
      Change::TractorUpdate(update) => {
        Ok(Confirmed::Tractor(self.api.update_tractor(update).await?))
      }
    }
  }

  /// Re-read the queue length and publish it.
  pub fn refresh_pending_count(&self) -> Result<usize> {
    let count = self.queue.len()?;
    self.status.set_pending_count(count);
    Ok(count)
  }

  /// When the last drain finished, if ever.
  pub fn last_sync(&self) -> Result<Option<DateTime<Utc>>> {
    self.store.get_json(keys::LAST_SYNC_TIMESTAMP)
  }

  fn refresh_or_warn(&self) {
    if let Err(e) = self.refresh_pending_count() {
      warn!(error = %e, "Failed to read pending queue");
    }
  }
}

/// Holds the syncing flag for the length of a drain.
struct SyncGuard<'a> {
  engine: &'a SyncEngine,
}

impl<'a> SyncGuard<'a> {
  fn acquire(engine: &'a SyncEngine) -> Option<Self> {
    engine
      .syncing
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()?;
    engine.status.set_syncing(true);
    Some(Self { engine })
  }
}

impl Drop for SyncGuard<'_> {
  fn drop(&mut self) {
    self.engine.syncing.store(false, Ordering::Release);
    self.engine.status.set_syncing(false);
  }
}

//! Sync service: the single entry point the app talks to.
//!
//! Owns the store, the pending queue, the local cache, the sync engine and
//! the connectivity monitor. Every user action that changes remote data goes
//! through here and is either delivered right away or queued for later.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::audio::AudioBlob;
use crate::cache::{CacheResult, LocalCache};
use crate::config::Config;
use crate::connectivity::{ConnectivityMonitor, ConnectivityState, MonitorTask, StatusHandle};
use crate::models::{
  AudioPrediction, MaintenanceRecord, MaintenanceUpdate, NewMaintenanceRecord, Tractor,
  TractorUpdate, UsageHours, UsageLog, UsageLogEntry,
};
use crate::queue::{Change, PendingChange, PendingQueue};
use crate::remote::{HttpApi, RemoteApi};
use crate::store::{SharedStore, SqliteStore};
use crate::sync::{Confirmed, DrainReport, SyncEngine};

/// Outcome of submitting a change.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission<T> {
  /// Delivered; the server's copy
  Synced(T),
  /// Queued for the next drain
  Queued {
    change_id: String,
    /// Why direct delivery failed, if it was attempted
    warning: Option<String>,
  },
}

impl<T> Submission<T> {
  pub fn is_synced(&self) -> bool {
    matches!(self, Submission::Synced(_))
  }

  fn try_map<U>(self, f: impl FnOnce(T) -> Option<U>) -> Result<Submission<U>> {
    match self {
      Submission::Synced(value) => f(value)
        .map(Submission::Synced)
        .ok_or_else(|| eyre!("Server confirmed a different kind of change")),
      Submission::Queued { change_id, warning } => Ok(Submission::Queued { change_id, warning }),
    }
  }
}

/// Cached history of one tractor.
#[derive(Debug, Clone)]
pub struct TractorHistory {
  pub predictions: CacheResult<Vec<AudioPrediction>>,
  pub maintenance: CacheResult<Vec<MaintenanceRecord>>,
  pub usage: CacheResult<Vec<UsageLog>>,
}

pub struct SyncService {
  api: Arc<dyn RemoteApi>,
  queue: Arc<PendingQueue>,
  cache: LocalCache,
  engine: Arc<SyncEngine>,
  monitor: Arc<ConnectivityMonitor>,
  status: StatusHandle,
}

impl SyncService {
  pub fn new(api: Arc<dyn RemoteApi>, store: SharedStore, interval: Duration) -> Result<Self> {
    let status = StatusHandle::new();
    let queue = Arc::new(PendingQueue::new(Arc::clone(&store)));
    let cache = LocalCache::new(Arc::clone(&store));
    let engine = Arc::new(SyncEngine::new(
      Arc::clone(&api),
      Arc::clone(&queue),
      store,
      status.clone(),
    ));
    let monitor = Arc::new(ConnectivityMonitor::new(
      Arc::clone(&api),
      Arc::clone(&engine),
      status.clone(),
      interval,
    ));

    // Publish what survived the last run
    engine.refresh_pending_count()?;

    Ok(Self {
      api,
      queue,
      cache,
      engine,
      monitor,
      status,
    })
  }

  /// Wire up the HTTP client and the SQLite store described by `config`.
  pub fn from_config(config: &Config) -> Result<Self> {
    let api = HttpApi::new(&config.api, Config::get_api_token())?;
    let store = match &config.storage.path {
      Some(path) => SqliteStore::open(path)?,
      None => SqliteStore::open_default()?,
    };
    Self::new(Arc::new(api), Arc::new(store), config.monitor.interval())
  }

  // --------------------------------------------------------------------------
  // Submissions
  // --------------------------------------------------------------------------

  /// Upload a recording for classification.
  pub async fn record_audio(
    &self,
    blob: AudioBlob,
    tractor_id: &str,
    tractor_hours: Option<f64>,
  ) -> Result<Submission<AudioPrediction>> {
    if blob.is_empty() {
      return Err(eyre!("Audio recording is empty"));
    }

    let request = blob.into_request(tractor_id, tractor_hours);

    // Sent by reference so the bytes can still be queued on failure
    let warning = if self.can_deliver_directly(tractor_id)? {
      match self.api.upload_audio(&request).await {
        Ok(prediction) => {
          self.cache.predictions().insert_front(prediction.clone())?;
          return Ok(Submission::Synced(prediction));
        }
        Err(e) => {
          warn!(tractor_id, error = %e, "Audio upload failed, queueing it");
          Some(e.to_string())
        }
      }
    } else {
      None
    };

    self
      .enqueue(Change::AudioUpload(request.into_payload()), warning)?
      .try_map(|_| None)
  }

  pub async fn log_usage(&self, entry: UsageLogEntry) -> Result<Submission<UsageLog>> {
    match entry.hours {
      UsageHours::HoursOperated(hours) | UsageHours::EndHours(hours) if hours < 0.0 => {
        return Err(eyre!("Engine hours cannot be negative: {}", hours));
      }
      _ => {}
    }

    self
      .submit(Change::UsageLog(entry))
      .await?
      .try_map(|confirmed| match confirmed {
        Confirmed::Usage(log) => Some(log),
        _ => None,
      })
  }

  pub async fn record_maintenance(
    &self,
    record: NewMaintenanceRecord,
  ) -> Result<Submission<MaintenanceRecord>> {
    if record.task_name.trim().is_empty() {
      return Err(eyre!("Maintenance task name is required"));
    }

    self
      .submit(Change::MaintenanceRecord(record))
      .await?
      .try_map(|confirmed| match confirmed {
        Confirmed::Maintenance(record) => Some(record),
        _ => None,
      })
  }

  pub async fn update_maintenance(&self, update: MaintenanceUpdate) -> Result<Submission<()>> {
    self
      .submit(Change::MaintenanceUpdate(update))
      .await?
      .try_map(|confirmed| match confirmed {
        Confirmed::MaintenanceUpdated => Some(()),
        _ => None,
      })
  }

  pub async fn update_tractor(&self, update: TractorUpdate) -> Result<Submission<Tractor>> {
    if update.fields.is_empty() {
      return Err(eyre!("Nothing to update for tractor {}", update.tractor_id));
    }

    self
      .submit(Change::TractorUpdate(update))
      .await?
      .try_map(|confirmed| match confirmed {
        Confirmed::Tractor(tractor) => Some(tractor),
        _ => None,
      })
  }

  /// Deliver directly when online, otherwise (or on failure) queue.
  async fn submit(&self, change: Change) -> Result<Submission<Confirmed>> {
    let warning = if self.can_deliver_directly(change.tractor_id())? {
      match self.engine.dispatch(&change).await {
        Ok(confirmed) => {
          self.cache.apply_confirmed(&change, &confirmed)?;
          return Ok(Submission::Synced(confirmed));
        }
        Err(e) => {
          warn!(
            kind = change.kind(),
            tractor_id = change.tractor_id(),
            error = %e,
            "Direct submission failed, queueing change"
          );
          Some(e.to_string())
        }
      }
    } else {
      None
    };

    self.enqueue(change, warning)
  }

  /// Online, and nothing older for the same tractor is still waiting.
  ///
  /// A change queued behind an earlier one keeps its place so the server
  /// applies them in the order they were made.
  fn can_deliver_directly(&self, tractor_id: &str) -> Result<bool> {
    if !self.is_online() {
      return Ok(false);
    }
    if self.queue.has_pending_for(tractor_id)? {
      debug!(tractor_id, "Earlier changes still queued, queueing behind them");
      return Ok(false);
    }
    Ok(true)
  }

  fn enqueue(&self, change: Change, warning: Option<String>) -> Result<Submission<Confirmed>> {
    let record = self.queue.enqueue(change)?;
    self.cache.apply_pending(&record)?;
    let pending = self.engine.refresh_pending_count()?;

    info!(
      id = %record.id,
      kind = record.change.kind(),
      pending,
      "Change queued for sync"
    );

    Ok(Submission::Queued {
      change_id: record.id,
      warning,
    })
  }

  // --------------------------------------------------------------------------
  // Sync and status
  // --------------------------------------------------------------------------

  /// Drain the queue now. `None` when offline or a drain is already running.
  pub async fn sync_now(&self) -> Option<DrainReport> {
    self.engine.drain().await
  }

  /// Probe the backend now, draining on reconnect.
  pub async fn check_connectivity(&self) -> bool {
    self.monitor.check().await
  }

  pub fn status(&self) -> ConnectivityState {
    self.status.current()
  }

  pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
    self.status.subscribe()
  }

  pub fn is_online(&self) -> bool {
    self.status.current().is_online
  }

  pub fn pending_changes(&self) -> Result<Vec<PendingChange>> {
    self.queue.all()
  }

  /// Drop a queued change the user gave up on, with its placeholder.
  pub fn discard_change(&self, id: &str) -> Result<bool> {
    let record = match self.queue.get(id)? {
      Some(record) => record,
      None => return Ok(false),
    };

    let removed = self.queue.remove_by_id(id)?;
    if removed {
      self.cache.discard_pending(&record)?;
      info!(id, kind = record.change.kind(), "Discarded pending change");
    }
    self.engine.refresh_pending_count()?;
    Ok(removed)
  }

  pub fn last_sync(&self) -> Result<Option<DateTime<Utc>>> {
    self.engine.last_sync()
  }

  /// Start periodic probing in the background.
  pub fn start_monitor(&self) -> MonitorTask {
    Arc::clone(&self.monitor).spawn()
  }

  // --------------------------------------------------------------------------
  // Reads
  // --------------------------------------------------------------------------

  /// Fetch the tractor list, falling back to the cache.
  pub async fn refresh_tractors(&self) -> Result<CacheResult<Vec<Tractor>>> {
    self
      .cache
      .tractors()
      .refresh(None, self.is_online(), || self.api.list_tractors())
      .await
  }

  /// Fetch one tractor's predictions, maintenance and usage history.
  pub async fn refresh_tractor(&self, tractor_id: &str) -> Result<TractorHistory> {
    let online = self.is_online();

    let predictions = self
      .cache
      .predictions()
      .refresh(Some(tractor_id), online, || self.api.list_predictions(tractor_id))
      .await?;
    let maintenance = self
      .cache
      .maintenance()
      .refresh(Some(tractor_id), online, || self.api.list_maintenance(tractor_id))
      .await?;
    let usage = self
      .cache
      .usage()
      .refresh(Some(tractor_id), online, || self.api.list_usage(tractor_id))
      .await?;

    Ok(TractorHistory {
      predictions,
      maintenance,
      usage,
    })
  }

  pub fn tractors(&self) -> Result<Vec<Tractor>> {
    self.cache.tractors().all()
  }

  pub fn predictions(&self, tractor_id: &str) -> Result<Vec<AudioPrediction>> {
    self.cache.predictions().for_tractor(tractor_id)
  }

  pub fn maintenance_records(&self, tractor_id: &str) -> Result<Vec<MaintenanceRecord>> {
    self.cache.maintenance().for_tractor(tractor_id)
  }

  pub fn usage_logs(&self, tractor_id: &str) -> Result<Vec<UsageLog>> {
    self.cache.usage().for_tractor(tractor_id)
  }
}

//! Local cache mutator: keeps the cached collections in step with changes
//! the user makes, before and after the server confirms them.

use color_eyre::Result;
use std::sync::Arc;
use tracing::debug;

use super::collection::CachedCollection;
use super::traits::Cacheable;
use crate::models::{
  AudioPrediction, MaintenanceRecord, MaintenanceUpdate, PredictionClass, Tractor, TractorUpdate,
  UsageHours, UsageLog, UsageLogEntry,
};
use crate::queue::{Change, PendingChange};
use crate::store::{keys, SharedStore};
use crate::sync::Confirmed;

// ============================================================================
// Cacheable implementations
// ============================================================================

impl Cacheable for Tractor {
  fn cache_key(&self) -> &str {
    &self.tractor_id
  }

  fn tractor_id(&self) -> &str {
    &self.tractor_id
  }

  fn collection_key() -> &'static str {
    keys::OFFLINE_TRACTORS
  }
}

impl Cacheable for AudioPrediction {
  fn cache_key(&self) -> &str {
    &self.id
  }

  fn tractor_id(&self) -> &str {
    &self.tractor_id
  }

  fn collection_key() -> &'static str {
    keys::OFFLINE_PREDICTIONS
  }
}

impl Cacheable for MaintenanceRecord {
  fn cache_key(&self) -> &str {
    &self.id
  }

  fn tractor_id(&self) -> &str {
    &self.tractor_id
  }

  fn collection_key() -> &'static str {
    keys::OFFLINE_MAINTENANCE_RECORDS
  }
}

impl Cacheable for UsageLog {
  fn cache_key(&self) -> &str {
    &self.id
  }

  fn tractor_id(&self) -> &str {
    &self.tractor_id
  }

  fn collection_key() -> &'static str {
    keys::OFFLINE_USAGE_LOGS
  }
}

// ============================================================================
// Local cache
// ============================================================================

/// Id given to the optimistic copy of a queued change.
pub fn placeholder_id(change_id: &str) -> String {
  format!("pending-{}", change_id)
}

/// The cached domain collections.
pub struct LocalCache {
  tractors: CachedCollection<Tractor>,
  predictions: CachedCollection<AudioPrediction>,
  maintenance: CachedCollection<MaintenanceRecord>,
  usage: CachedCollection<UsageLog>,
}

impl LocalCache {
  pub fn new(store: SharedStore) -> Self {
    Self {
      tractors: CachedCollection::new(Arc::clone(&store)),
      predictions: CachedCollection::new(Arc::clone(&store)),
      maintenance: CachedCollection::new(Arc::clone(&store)),
      usage: CachedCollection::new(store),
    }
  }

  pub fn tractors(&self) -> &CachedCollection<Tractor> {
    &self.tractors
  }

  pub fn predictions(&self) -> &CachedCollection<AudioPrediction> {
    &self.predictions
  }

  pub fn maintenance(&self) -> &CachedCollection<MaintenanceRecord> {
    &self.maintenance
  }

  pub fn usage(&self) -> &CachedCollection<UsageLog> {
    &self.usage
  }

  /// Apply the optimistic copy of a queued change.
  ///
  /// Creations become placeholders keyed `pending-<changeId>`; edits patch the
  /// cached entity in place. Placeholders are left alone once the change is
  /// delivered; the next refresh of that tractor replaces them.
  pub fn apply_pending(&self, record: &PendingChange) -> Result<()> {
    let placeholder = placeholder_id(&record.id);

    match &record.change {
      Change::AudioUpload(payload) => self.predictions.insert_front(AudioPrediction {
        id: placeholder,
        tractor_id: payload.tractor_id.clone(),
        prediction_class: PredictionClass::Unknown,
        confidence: 0.0,
        anomaly_score: None,
        file_path: None,
        recorded_at: Some(payload.recorded_at.to_rfc3339()),
        pending: true,
      }),
      Change::UsageLog(entry) => {
        self.usage.insert_front(usage_placeholder(placeholder, entry))?;
        self.advance_engine_hours(entry)
      }
      Change::MaintenanceRecord(new) => self.maintenance.insert_front(MaintenanceRecord {
        id: placeholder,
        tractor_id: new.tractor_id.clone(),
        task_name: new.task_name.clone(),
        description: new.description.clone(),
        completion_date: Some(new.completion_date.to_rfc3339()),
        completion_hours: new.completion_hours,
        actual_time_minutes: Some(new.actual_time_minutes),
        actual_cost_rwf: new.actual_cost_rwf,
        service_location: new.service_location.clone(),
        service_provider: new.service_provider.clone(),
        notes: new.notes.clone(),
        performed_by: new.performed_by.clone(),
        parts_used: new.parts_used.clone(),
        created_at: Some(record.created_at.to_rfc3339()),
        pending: true,
      }),
      Change::MaintenanceUpdate(update) => self.patch_maintenance(update),
      Change::TractorUpdate(update) => self.patch_tractor(update),
    }
  }

  /// Drop the placeholder of a discarded change.
  ///
  /// In-place edits cannot be rolled back; they last until the next refresh.
  pub fn discard_pending(&self, record: &PendingChange) -> Result<()> {
    let placeholder = placeholder_id(&record.id);
    match &record.change {
      Change::AudioUpload(_) => self.predictions.remove(&placeholder)?,
      Change::UsageLog(_) => self.usage.remove(&placeholder)?,
      Change::MaintenanceRecord(_) => self.maintenance.remove(&placeholder)?,
      Change::MaintenanceUpdate(_) | Change::TractorUpdate(_) => false,
    };
    Ok(())
  }

  /// Store what the server returned for a change delivered directly.
  pub fn apply_confirmed(&self, change: &Change, confirmed: &Confirmed) -> Result<()> {
    match (change, confirmed) {
      (_, Confirmed::Prediction(prediction)) => self.predictions.insert_front(prediction.clone()),
      (_, Confirmed::Maintenance(record)) => self.maintenance.insert_front(record.clone()),
      (Change::UsageLog(entry), Confirmed::Usage(log)) => {
        self.usage.insert_front(log.clone())?;
        self.advance_engine_hours(entry)
      }
      (_, Confirmed::Usage(log)) => self.usage.insert_front(log.clone()),
      (Change::MaintenanceUpdate(update), Confirmed::MaintenanceUpdated) => {
        self.patch_maintenance(update)
      }
      (_, Confirmed::MaintenanceUpdated) => Ok(()),
      (_, Confirmed::Tractor(tractor)) => self.tractors.put(tractor.clone()),
    }
  }

  fn patch_maintenance(&self, update: &MaintenanceUpdate) -> Result<()> {
    let found = self
      .maintenance
      .update(&update.record_id, |record| update.fields.apply_to(record))?;
    if !found {
      debug!(record_id = %update.record_id, "Maintenance record not cached, nothing to patch");
    }
    Ok(())
  }

  fn patch_tractor(&self, update: &TractorUpdate) -> Result<()> {
    let found = self
      .tractors
      .update(&update.tractor_id, |tractor| update.fields.apply_to(tractor))?;
    if !found {
      debug!(tractor_id = %update.tractor_id, "Tractor not cached, nothing to patch");
    }
    Ok(())
  }

  /// Move the cached hour meter forward by a usage log. Never moves it back.
  fn advance_engine_hours(&self, entry: &UsageLogEntry) -> Result<()> {
    self.tractors.update(&entry.tractor_id, |tractor| match entry.hours {
      UsageHours::EndHours(end) => tractor.engine_hours = tractor.engine_hours.max(end),
      UsageHours::HoursOperated(hours) if hours > 0.0 => tractor.engine_hours += hours,
      UsageHours::HoursOperated(_) => {}
    })?;
    Ok(())
  }
}

fn usage_placeholder(id: String, entry: &UsageLogEntry) -> UsageLog {
  let (end_hours, hours_used) = match entry.hours {
    UsageHours::EndHours(end) => (Some(end), None),
    UsageHours::HoursOperated(hours) => (None, Some(hours)),
  };

  UsageLog {
    id,
    tractor_id: entry.tractor_id.clone(),
    date: Some(entry.date.to_string()),
    start_hours: None,
    end_hours,
    hours_used,
    notes: entry.notes.clone(),
    operator_name: entry.operator_name.clone(),
    location: entry.location.clone(),
    pending: true,
  }
}

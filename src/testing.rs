//! In-process fakes and fixtures shared by the unit tests.

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::Map;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::audio::AudioUploadRequest;
use crate::models::{
  AudioPrediction, MaintenanceRecord, MaintenanceUpdate, NewMaintenanceRecord, PredictionClass,
  Tractor, TractorUpdate, UsageHours, UsageLog, UsageLogEntry,
};
use crate::remote::{ApiError, RemoteApi};

pub fn tractor(tractor_id: &str, engine_hours: f64) -> Tractor {
  Tractor {
    tractor_id: tractor_id.to_string(),
    model: "MF_240".to_string(),
    make: "Massey Ferguson".to_string(),
    engine_hours,
    usage_intensity: None,
    health_status: None,
    baseline_status: None,
    extra: Map::new(),
  }
}

pub fn usage_entry(tractor_id: &str, hours: UsageHours) -> UsageLogEntry {
  UsageLogEntry {
    tractor_id: tractor_id.to_string(),
    hours,
    date: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
    notes: None,
    operator_name: None,
    location: None,
  }
}

pub fn maintenance_record(tractor_id: &str) -> NewMaintenanceRecord {
  NewMaintenanceRecord {
    tractor_id: tractor_id.to_string(),
    task_name: "Oil change".to_string(),
    description: "Engine oil and filter".to_string(),
    completion_date: Utc.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap(),
    completion_hours: 1500.0,
    actual_time_minutes: 45,
    actual_cost_rwf: Some(35_000),
    service_location: None,
    service_provider: None,
    notes: None,
    performed_by: None,
    parts_used: vec!["oil filter".to_string()],
  }
}

/// Lets a test pause the first request the fake receives.
#[derive(Default)]
pub struct Gate {
  /// Notified once the request is in flight
  pub entered: Notify,
  /// Notify to let the request complete
  pub release: Notify,
}

/// Scriptable [`RemoteApi`] that records every call it receives.
pub struct FakeApi {
  healthy: AtomicBool,
  fail_all: AtomicBool,
  failing: Mutex<HashSet<String>>,
  calls: Mutex<Vec<String>>,
  uploads: Mutex<Vec<AudioUploadRequest>>,
  tractors: Mutex<Vec<Tractor>>,
  gate: Mutex<Option<Arc<Gate>>>,
  next_id: AtomicUsize,
  health_checks: AtomicUsize,
}

impl FakeApi {
  pub fn new() -> Self {
    Self {
      healthy: AtomicBool::new(true),
      fail_all: AtomicBool::new(false),
      failing: Mutex::new(HashSet::new()),
      calls: Mutex::new(Vec::new()),
      uploads: Mutex::new(Vec::new()),
      tractors: Mutex::new(Vec::new()),
      gate: Mutex::new(None),
      next_id: AtomicUsize::new(1),
      health_checks: AtomicUsize::new(0),
    }
  }

  pub fn set_healthy(&self, healthy: bool) {
    self.healthy.store(healthy, Ordering::SeqCst);
  }

  /// Fail every request as a network error (the probe is unaffected).
  pub fn fail_all(&self, fail: bool) {
    self.fail_all.store(fail, Ordering::SeqCst);
  }

  /// Reject every request about this tractor with a 422.
  pub fn fail_tractor(&self, tractor_id: &str) {
    self.failing.lock().unwrap().insert(tractor_id.to_string());
  }

  pub fn clear_failures(&self) {
    self.failing.lock().unwrap().clear();
    self.fail_all(false);
  }

  pub fn set_tractors(&self, tractors: Vec<Tractor>) {
    *self.tractors.lock().unwrap() = tractors;
  }

  /// Pause the next request until the returned gate is released.
  pub fn hold_requests(&self) -> Arc<Gate> {
    let gate = Arc::new(Gate::default());
    *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
    gate
  }

  /// Calls received so far, as `method:tractor_id`.
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  /// The server-side copy of a tractor.
  pub fn stored_tractor(&self, tractor_id: &str) -> Option<Tractor> {
    self
      .tractors
      .lock()
      .unwrap()
      .iter()
      .find(|t| t.tractor_id == tractor_id)
      .cloned()
  }

  /// Health probes received so far.
  pub fn health_checks(&self) -> usize {
    self.health_checks.load(Ordering::SeqCst)
  }

  /// Audio upload requests received so far.
  pub fn uploads(&self) -> Vec<AudioUploadRequest> {
    self.uploads.lock().unwrap().clone()
  }

  fn next_id(&self, prefix: &str) -> String {
    format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
  }

  async fn begin(&self, method: &str, tractor_id: &str) -> Result<(), ApiError> {
    self
      .calls
      .lock()
      .unwrap()
      .push(format!("{}:{}", method, tractor_id));

    let gate = self.gate.lock().unwrap().take();
    if let Some(gate) = gate {
      gate.entered.notify_one();
      gate.release.notified().await;
    }

    if self.fail_all.load(Ordering::SeqCst) {
      return Err(ApiError::Network("connection reset".to_string()));
    }
    if self.failing.lock().unwrap().contains(tractor_id) {
      return Err(ApiError::Rejected {
        status: 422,
        body: "validation failed".to_string(),
      });
    }
    Ok(())
  }
}

#[async_trait]
impl RemoteApi for FakeApi {
  async fn health(&self) -> Result<(), ApiError> {
    self.health_checks.fetch_add(1, Ordering::SeqCst);
    if self.healthy.load(Ordering::SeqCst) {
      Ok(())
    } else {
      Err(ApiError::Network("timed out".to_string()))
    }
  }

  async fn upload_audio(&self, request: &AudioUploadRequest) -> Result<AudioPrediction, ApiError> {
    self.begin("upload_audio", &request.tractor_id).await?;
    self.uploads.lock().unwrap().push(request.clone());

    Ok(AudioPrediction {
      id: self.next_id("prediction"),
      tractor_id: request.tractor_id.clone(),
      prediction_class: PredictionClass::Normal,
      confidence: 0.93,
      anomaly_score: Some(0.07),
      file_path: Some(request.filename.clone()),
      recorded_at: Some(request.recorded_at.to_rfc3339()),
      pending: false,
    })
  }

  async fn create_maintenance(
    &self,
    record: &NewMaintenanceRecord,
  ) -> Result<MaintenanceRecord, ApiError> {
    self.begin("create_maintenance", &record.tractor_id).await?;

    Ok(MaintenanceRecord {
      id: self.next_id("maintenance"),
      tractor_id: record.tractor_id.clone(),
      task_name: record.task_name.clone(),
      description: record.description.clone(),
      completion_date: Some(record.completion_date.to_rfc3339()),
      completion_hours: record.completion_hours,
      actual_time_minutes: Some(record.actual_time_minutes),
      actual_cost_rwf: record.actual_cost_rwf,
      service_location: record.service_location.clone(),
      service_provider: record.service_provider.clone(),
      notes: record.notes.clone(),
      performed_by: record.performed_by.clone(),
      parts_used: record.parts_used.clone(),
      created_at: None,
      pending: false,
    })
  }

  async fn update_maintenance(&self, update: &MaintenanceUpdate) -> Result<(), ApiError> {
    self.begin("update_maintenance", &update.tractor_id).await
  }

  async fn log_usage(&self, entry: &UsageLogEntry) -> Result<UsageLog, ApiError> {
    self.begin("log_usage", &entry.tractor_id).await?;

    let (end_hours, hours_used) = match entry.hours {
      UsageHours::EndHours(end) => (Some(end), None),
      UsageHours::HoursOperated(hours) => (None, Some(hours)),
    };
    Ok(UsageLog {
      id: self.next_id("usage"),
      tractor_id: entry.tractor_id.clone(),
      date: Some(entry.date.to_string()),
      start_hours: None,
      end_hours,
      hours_used,
      notes: entry.notes.clone(),
      operator_name: entry.operator_name.clone(),
      location: entry.location.clone(),
      pending: false,
    })
  }

  async fn update_tractor(&self, update: &TractorUpdate) -> Result<Tractor, ApiError> {
    self.begin("update_tractor", &update.tractor_id).await?;

    let mut tractors = self.tractors.lock().unwrap();
    let index = match tractors
      .iter()
      .position(|t| t.tractor_id == update.tractor_id)
    {
      Some(index) => index,
      None => {
        tractors.push(tractor(&update.tractor_id, 0.0));
        tractors.len() - 1
      }
    };
    update.fields.apply_to(&mut tractors[index]);
    Ok(tractors[index].clone())
  }

  async fn list_tractors(&self) -> Result<Vec<Tractor>, ApiError> {
    self.begin("list_tractors", "*").await?;
    Ok(self.tractors.lock().unwrap().clone())
  }

  async fn list_predictions(&self, tractor_id: &str) -> Result<Vec<AudioPrediction>, ApiError> {
    self.begin("list_predictions", tractor_id).await?;
    Ok(Vec::new())
  }

  async fn list_maintenance(&self, tractor_id: &str) -> Result<Vec<MaintenanceRecord>, ApiError> {
    self.begin("list_maintenance", tractor_id).await?;
    Ok(Vec::new())
  }

  async fn list_usage(&self, tractor_id: &str) -> Result<Vec<UsageLog>, ApiError> {
    self.begin("list_usage", tractor_id).await?;
    Ok(Vec::new())
  }
}

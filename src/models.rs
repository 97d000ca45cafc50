//! Domain types shared by the cache, the queue and the remote API.
//!
//! Resource types mirror the backend's responses and are what the local
//! cache stores. Request types are the exact JSON bodies the backend accepts;
//! they double as the payloads of queued changes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Remote resources (cached locally)
// ============================================================================

/// A tractor owned by the current user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tractor {
  pub tractor_id: String,
  #[serde(default)]
  pub model: String,
  #[serde(default)]
  pub make: String,
  #[serde(default)]
  pub engine_hours: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub usage_intensity: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub health_status: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub baseline_status: Option<String>,
  /// Backend fields this client does not interpret (id, purchase_date, ...)
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// Classification returned by the audio model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionClass {
  Normal,
  Abnormal,
  /// Not classified yet, or a class this client does not know
  #[default]
  #[serde(other)]
  Unknown,
}

/// Result of classifying one audio recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioPrediction {
  pub id: String,
  pub tractor_id: String,
  #[serde(default)]
  pub prediction_class: PredictionClass,
  #[serde(default)]
  pub confidence: f64,
  #[serde(default)]
  pub anomaly_score: Option<f64>,
  #[serde(default)]
  pub file_path: Option<String>,
  #[serde(default)]
  pub recorded_at: Option<String>,
  /// Set on optimistic placeholders that the server has not confirmed
  #[serde(default)]
  pub pending: bool,
}

/// A completed maintenance task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceRecord {
  pub id: String,
  pub tractor_id: String,
  pub task_name: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub completion_date: Option<String>,
  #[serde(default)]
  pub completion_hours: f64,
  #[serde(default)]
  pub actual_time_minutes: Option<u32>,
  #[serde(default)]
  pub actual_cost_rwf: Option<u64>,
  #[serde(default)]
  pub service_location: Option<String>,
  #[serde(default)]
  pub service_provider: Option<String>,
  #[serde(default)]
  pub notes: Option<String>,
  #[serde(default)]
  pub performed_by: Option<String>,
  #[serde(default)]
  pub parts_used: Vec<String>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub pending: bool,
}

/// One day of logged tractor usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLog {
  pub id: String,
  pub tractor_id: String,
  #[serde(default)]
  pub date: Option<String>,
  #[serde(default)]
  pub start_hours: Option<f64>,
  #[serde(default)]
  pub end_hours: Option<f64>,
  #[serde(default)]
  pub hours_used: Option<f64>,
  #[serde(default)]
  pub notes: Option<String>,
  #[serde(default)]
  pub operator_name: Option<String>,
  #[serde(default)]
  pub location: Option<String>,
  #[serde(default)]
  pub pending: bool,
}

// ============================================================================
// Requests (also the payloads of queued changes)
// ============================================================================

/// How a usage log reports engine hours.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageHours {
  /// Hours worked during the day
  HoursOperated(f64),
  /// Engine hour meter reading at the end of the day
  EndHours(f64),
}

/// A usage log for `POST /usage-tracking/{tractorId}/log`.
///
/// `tractor_id` travels in the path; every other field is the JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLogEntry {
  pub tractor_id: String,
  #[serde(flatten)]
  pub hours: UsageHours,
  pub date: NaiveDate,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub operator_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub location: Option<String>,
}

/// Body of `POST /maintenance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMaintenanceRecord {
  pub tractor_id: String,
  pub task_name: String,
  pub description: String,
  pub completion_date: DateTime<Utc>,
  pub completion_hours: f64,
  pub actual_time_minutes: u32,
  pub actual_cost_rwf: Option<u64>,
  pub service_location: Option<String>,
  pub service_provider: Option<String>,
  pub notes: Option<String>,
  pub performed_by: Option<String>,
  #[serde(default)]
  pub parts_used: Vec<String>,
}

/// Partial field update of a maintenance record. Absent fields are untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenancePatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completion_hours: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub actual_time_minutes: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub actual_cost_rwf: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub service_location: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub service_provider: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub performed_by: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parts_used: Option<Vec<String>>,
}

impl MaintenancePatch {
  /// Copy every present field onto `record`.
  pub fn apply_to(&self, record: &mut MaintenanceRecord) {
    if let Some(description) = &self.description {
      record.description = description.clone();
    }
    if let Some(hours) = self.completion_hours {
      record.completion_hours = hours;
    }
    if let Some(minutes) = self.actual_time_minutes {
      record.actual_time_minutes = Some(minutes);
    }
    if let Some(cost) = self.actual_cost_rwf {
      record.actual_cost_rwf = Some(cost);
    }
    if let Some(location) = &self.service_location {
      record.service_location = Some(location.clone());
    }
    if let Some(provider) = &self.service_provider {
      record.service_provider = Some(provider.clone());
    }
    if let Some(notes) = &self.notes {
      record.notes = Some(notes.clone());
    }
    if let Some(performed_by) = &self.performed_by {
      record.performed_by = Some(performed_by.clone());
    }
    if let Some(parts) = &self.parts_used {
      record.parts_used = parts.clone();
    }
  }
}

/// Edit of an existing maintenance record, sent as `PUT /maintenance/{recordId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceUpdate {
  pub record_id: String,
  pub tractor_id: String,
  pub fields: MaintenancePatch,
}

/// Partial field update of a tractor. Absent fields are untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TractorPatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub engine_hours: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub usage_intensity: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub health_status: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub model: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub make: Option<String>,
}

impl TractorPatch {
  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }

  /// Copy every present field onto `tractor`.
  pub fn apply_to(&self, tractor: &mut Tractor) {
    if let Some(hours) = self.engine_hours {
      tractor.engine_hours = hours;
    }
    if let Some(intensity) = &self.usage_intensity {
      tractor.usage_intensity = Some(intensity.clone());
    }
    if let Some(health) = &self.health_status {
      tractor.health_status = Some(health.clone());
    }
    if let Some(model) = &self.model {
      tractor.model = model.clone();
    }
    if let Some(make) = &self.make {
      tractor.make = make.clone();
    }
  }
}

/// Edit of a tractor, sent as `PUT /tractors/{tractorId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TractorUpdate {
  pub tractor_id: String,
  pub fields: TractorPatch,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_usage_entry_flattens_hours() {
    let entry = UsageLogEntry {
      tractor_id: "MF-240-01".to_string(),
      hours: UsageHours::EndHours(1530.0),
      date: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
      notes: Some("Ploughing".to_string()),
      operator_name: None,
      location: None,
    };

    let value = serde_json::to_value(&entry).unwrap();
    assert_eq!(
      value,
      json!({
        "tractor_id": "MF-240-01",
        "end_hours": 1530.0,
        "date": "2024-03-09",
        "notes": "Ploughing"
      })
    );

    let back: UsageLogEntry = serde_json::from_value(value).unwrap();
    assert_eq!(back, entry);
  }

  #[test]
  fn test_hours_operated_body_shape() {
    let entry = UsageLogEntry {
      tractor_id: "MF-240-01".to_string(),
      hours: UsageHours::HoursOperated(6.5),
      date: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
      notes: None,
      operator_name: Some("Jean".to_string()),
      location: Some("Musanze".to_string()),
    };

    let value = serde_json::to_value(&entry).unwrap();
    assert_eq!(value["hours_operated"], json!(6.5));
    assert_eq!(value["operator_name"], json!("Jean"));
    assert!(value.get("end_hours").is_none());
  }

  #[test]
  fn test_tractor_keeps_unknown_fields() {
    let raw = json!({
      "id": "65f0c1",
      "tractor_id": "MF-240-01",
      "model": "MF_240",
      "make": "Massey Ferguson",
      "engine_hours": 1520.5,
      "purchase_date": "2019-05-01T00:00:00"
    });

    let tractor: Tractor = serde_json::from_value(raw.clone()).unwrap();
    assert_eq!(tractor.engine_hours, 1520.5);
    assert_eq!(tractor.extra["purchase_date"], raw["purchase_date"]);
    assert_eq!(serde_json::to_value(&tractor).unwrap()["id"], json!("65f0c1"));
  }

  #[test]
  fn test_unrecognized_prediction_class_is_unknown() {
    let prediction: AudioPrediction = serde_json::from_value(json!({
      "id": "p1",
      "tractor_id": "MF-240-01",
      "prediction_class": "needs_review",
      "confidence": 0.4
    }))
    .unwrap();

    assert_eq!(prediction.prediction_class, PredictionClass::Unknown);
    assert!(!prediction.pending);
  }

  #[test]
  fn test_tractor_patch_only_touches_present_fields() {
    let mut tractor: Tractor = serde_json::from_value(json!({
      "tractor_id": "MF-240-01",
      "model": "MF_240",
      "engine_hours": 100.0,
      "health_status": "good"
    }))
    .unwrap();

    let patch = TractorPatch {
      engine_hours: Some(120.0),
      ..Default::default()
    };
    patch.apply_to(&mut tractor);

    assert_eq!(tractor.engine_hours, 120.0);
    assert_eq!(tractor.health_status.as_deref(), Some("good"));
    assert_eq!(serde_json::to_value(&patch).unwrap(), json!({ "engine_hours": 120.0 }));
  }
}

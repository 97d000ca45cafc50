//! Serde types for request bodies and response envelopes that differ from
//! the domain types.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{AudioPrediction, UsageHours, UsageLogEntry};

/// JSON body of a usage log; the tractor id goes in the path instead.
#[derive(Debug, Serialize)]
pub struct ApiUsageLogBody<'a> {
  #[serde(flatten)]
  pub hours: UsageHours,
  pub date: NaiveDate,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notes: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub operator_name: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub location: Option<&'a str>,
}

impl<'a> From<&'a UsageLogEntry> for ApiUsageLogBody<'a> {
  fn from(entry: &'a UsageLogEntry) -> Self {
    Self {
      hours: entry.hours,
      date: entry.date,
      notes: entry.notes.as_deref(),
      operator_name: entry.operator_name.as_deref(),
      location: entry.location.as_deref(),
    }
  }
}

/// Paginated prediction listing.
#[derive(Debug, Deserialize)]
pub struct ApiPredictionList {
  pub predictions: Vec<AudioPrediction>,
}

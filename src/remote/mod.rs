//! Remote TractorCare API.
//!
//! [`RemoteApi`] is the seam between the sync layer and the backend: one
//! method per endpoint, typed in and out. [`HttpApi`] is the production
//! implementation; tests substitute an in-process fake.

mod api_types;
mod http;

pub use http::HttpApi;

use async_trait::async_trait;

use crate::audio::{AudioUploadRequest, PayloadError};
use crate::models::{
  AudioPrediction, MaintenanceRecord, MaintenanceUpdate, NewMaintenanceRecord, Tractor,
  TractorUpdate, UsageLog, UsageLogEntry,
};

/// Failure of a single remote call.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  /// Timeout, refused connection or other transport failure
  #[error("network error: {0}")]
  Network(String),

  /// The server answered with a non-success status
  #[error("server rejected request ({status}): {body}")]
  Rejected { status: u16, body: String },

  /// The server answered but the body was not what we expected
  #[error("unexpected response: {0}")]
  Decode(String),

  /// A queued payload could not be turned back into a request
  #[error("invalid payload: {0}")]
  Payload(#[from] PayloadError),
}

impl ApiError {
  /// Whether the failure says nothing about the request itself.
  pub fn is_transient(&self) -> bool {
    matches!(self, ApiError::Network(_))
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_decode() {
      ApiError::Decode(e.to_string())
    } else {
      ApiError::Network(e.to_string())
    }
  }
}

/// Endpoints of the backend consumed by the sync layer.
#[async_trait]
pub trait RemoteApi: Send + Sync {
  /// `GET /health`; `Ok` only on status 200.
  async fn health(&self) -> Result<(), ApiError>;

  /// `POST /audio/upload` with the recording as multipart field `file`.
  async fn upload_audio(&self, request: &AudioUploadRequest) -> Result<AudioPrediction, ApiError>;

  /// `POST /maintenance`
  async fn create_maintenance(
    &self,
    record: &NewMaintenanceRecord,
  ) -> Result<MaintenanceRecord, ApiError>;

  /// `PUT /maintenance/{recordId}`
  async fn update_maintenance(&self, update: &MaintenanceUpdate) -> Result<(), ApiError>;

  /// `POST /usage-tracking/{tractorId}/log`
  async fn log_usage(&self, entry: &UsageLogEntry) -> Result<UsageLog, ApiError>;

  /// `PUT /tractors/{tractorId}`
  async fn update_tractor(&self, update: &TractorUpdate) -> Result<Tractor, ApiError>;

  /// `GET /tractors`
  async fn list_tractors(&self) -> Result<Vec<Tractor>, ApiError>;

  /// `GET /audio/{tractorId}/predictions`
  async fn list_predictions(&self, tractor_id: &str) -> Result<Vec<AudioPrediction>, ApiError>;

  /// `GET /maintenance/{tractorId}/records`
  async fn list_maintenance(&self, tractor_id: &str) -> Result<Vec<MaintenanceRecord>, ApiError>;

  /// `GET /usage-tracking/{tractorId}/history`
  async fn list_usage(&self, tractor_id: &str) -> Result<Vec<UsageLog>, ApiError>;
}

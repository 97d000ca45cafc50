//! `reqwest` implementation of [`RemoteApi`].

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::api_types::{ApiPredictionList, ApiUsageLogBody};
use super::{ApiError, RemoteApi};
use crate::audio::AudioUploadRequest;
use crate::config::ApiConfig;
use crate::models::{
  AudioPrediction, MaintenanceRecord, MaintenanceUpdate, NewMaintenanceRecord, Tractor,
  TractorUpdate, UsageLog, UsageLogEntry,
};

/// HTTP client for the TractorCare backend.
#[derive(Clone)]
pub struct HttpApi {
  client: reqwest::Client,
  base_url: Url,
  token: Option<String>,
  probe_timeout: Duration,
}

impl HttpApi {
  pub fn new(config: &ApiConfig, token: Option<String>) -> Result<Self> {
    let base_url = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid API base URL {}: {}", config.base_url, e))?;

    if base_url.cannot_be_a_base() {
      return Err(eyre!("API base URL cannot have paths: {}", config.base_url));
    }

    // Bounds every request; the probe sets its own, shorter timeout
    let client = reqwest::Client::builder()
      .timeout(config.request_timeout())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      token,
      probe_timeout: config.probe_timeout(),
    })
  }

  /// Build an endpoint URL from path segments, escaping each one.
  fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| ApiError::Network(format!("invalid base URL {}", self.base_url)))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, ApiError> {
    let url = self.endpoint(segments)?;
    let builder = self.client.request(method, url);
    Ok(match &self.token {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    })
  }

  async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, ApiError> {
    let response = check_status(builder.send().await?).await?;
    response
      .json::<T>()
      .await
      .map_err(|e| ApiError::Decode(e.to_string()))
  }

  async fn send_empty(builder: RequestBuilder) -> Result<(), ApiError> {
    check_status(builder.send().await?).await?;
    Ok(())
  }
}

/// Turn a non-success status into [`ApiError::Rejected`].
async fn check_status(response: Response) -> Result<Response, ApiError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  let body = response.text().await.unwrap_or_default();
  Err(ApiError::Rejected {
    status: status.as_u16(),
    body,
  })
}

#[async_trait]
impl RemoteApi for HttpApi {
  async fn health(&self) -> Result<(), ApiError> {
    let response = self
      .request(Method::GET, &["health"])?
      .timeout(self.probe_timeout)
      .send()
      .await?;

    if response.status() == StatusCode::OK {
      Ok(())
    } else {
      Err(ApiError::Rejected {
        status: response.status().as_u16(),
        body: String::new(),
      })
    }
  }

  async fn upload_audio(&self, request: &AudioUploadRequest) -> Result<AudioPrediction, ApiError> {
    let mut query = vec![("tractor_id", request.tractor_id.clone())];
    if let Some(hours) = request.tractor_hours {
      query.push(("tractor_hours", hours.to_string()));
    }

    let part = Part::bytes(request.bytes.clone())
      .file_name(request.filename.clone())
      .mime_str(request.mime_type())
      .map_err(|e| ApiError::Decode(e.to_string()))?;
    let form = Form::new().part("file", part);

    debug!(
      tractor_id = %request.tractor_id,
      bytes = request.bytes.len(),
      "Uploading audio"
    );

    Self::send_json(
      self
        .request(Method::POST, &["audio", "upload"])?
        .query(&query)
        .multipart(form),
    )
    .await
  }

  async fn create_maintenance(
    &self,
    record: &NewMaintenanceRecord,
  ) -> Result<MaintenanceRecord, ApiError> {
    Self::send_json(self.request(Method::POST, &["maintenance"])?.json(record)).await
  }

  async fn update_maintenance(&self, update: &MaintenanceUpdate) -> Result<(), ApiError> {
    Self::send_empty(
      self
        .request(Method::PUT, &["maintenance", &update.record_id])?
        .json(&update.fields),
    )
    .await
  }

  async fn log_usage(&self, entry: &UsageLogEntry) -> Result<UsageLog, ApiError> {
    Self::send_json(
      self
        .request(Method::POST, &["usage-tracking", &entry.tractor_id, "log"])?
        .json(&ApiUsageLogBody::from(entry)),
    )
    .await
  }

  async fn update_tractor(&self, update: &TractorUpdate) -> Result<Tractor, ApiError> {
    Self::send_json(
      self
        .request(Method::PUT, &["tractors", &update.tractor_id])?
        .json(&update.fields),
    )
    .await
  }

  async fn list_tractors(&self) -> Result<Vec<Tractor>, ApiError> {
    Self::send_json(self.request(Method::GET, &["tractors"])?).await
  }

  async fn list_predictions(&self, tractor_id: &str) -> Result<Vec<AudioPrediction>, ApiError> {
    let list: ApiPredictionList =
      Self::send_json(self.request(Method::GET, &["audio", tractor_id, "predictions"])?).await?;
    Ok(list.predictions)
  }

  async fn list_maintenance(&self, tractor_id: &str) -> Result<Vec<MaintenanceRecord>, ApiError> {
    Self::send_json(self.request(Method::GET, &["maintenance", tractor_id, "records"])?).await
  }

  async fn list_usage(&self, tractor_id: &str) -> Result<Vec<UsageLog>, ApiError> {
    Self::send_json(self.request(Method::GET, &["usage-tracking", tractor_id, "history"])?).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn api(base_url: &str) -> HttpApi {
    let config = ApiConfig {
      base_url: base_url.to_string(),
      probe_timeout_secs: 6,
      request_timeout_secs: 60,
    };
    HttpApi::new(&config, None).unwrap()
  }

  #[test]
  fn test_endpoint_joins_segments() {
    let nested = api("https://api.example.com/v1/");
    let url = nested.endpoint(&["usage-tracking", "MF-240-01", "log"]).unwrap();
    assert_eq!(url.as_str(), "https://api.example.com/v1/usage-tracking/MF-240-01/log");

    let root = api("https://api.example.com");
    assert_eq!(
      root.endpoint(&["health"]).unwrap().as_str(),
      "https://api.example.com/health"
    );
  }

  #[test]
  fn test_endpoint_escapes_segments() {
    let root = api("https://api.example.com");
    let url = root.endpoint(&["tractors", "MF 240/01"]).unwrap();
    assert_eq!(url.as_str(), "https://api.example.com/tractors/MF%20240%2F01");
  }

  #[test]
  fn test_rejects_invalid_base_url() {
    let config = ApiConfig {
      base_url: "not a url".to_string(),
      probe_timeout_secs: 6,
      request_timeout_secs: 60,
    };
    assert!(HttpApi::new(&config, None).is_err());
  }

  #[tokio::test]
  async fn test_unreachable_server_is_network_error() {
    // Port 9 (discard) on localhost is not expected to accept connections
    let unreachable = api("http://127.0.0.1:9");
    let err = unreachable.health().await.unwrap_err();
    assert!(err.is_transient());
  }
}

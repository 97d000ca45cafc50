//! Recorded audio and its two transport shapes.
//!
//! An [`AudioBlob`] is owned by the action that recorded it. It becomes an
//! [`AudioUploadRequest`] (raw bytes, sent as multipart) and, if that cannot
//! be delivered right away, is consumed into an [`AudioUploadPayload`] whose
//! bytes are base64 so they survive string-only persistence.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Error decoding a persisted audio payload back into bytes.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
  #[error("audio payload is not valid base64: {0}")]
  Base64(#[from] base64::DecodeError),

  #[error("audio payload checksum mismatch (expected {expected}, got {actual})")]
  ChecksumMismatch { expected: String, actual: String },
}

/// Raw recorded bytes plus the filename they will be uploaded under.
#[derive(Debug)]
pub struct AudioBlob {
  bytes: Vec<u8>,
  filename: String,
  recorded_at: DateTime<Utc>,
}

impl AudioBlob {
  /// Wrap freshly recorded bytes under a generated filename.
  pub fn new(bytes: Vec<u8>) -> Self {
    let recorded_at = Utc::now();
    let filename = format!("recording_{}.wav", recorded_at.timestamp_millis());
    Self {
      bytes,
      filename,
      recorded_at,
    }
  }

  /// Wrap bytes under an explicit filename.
  pub fn with_filename(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
    Self {
      bytes,
      filename: filename.into(),
      recorded_at: Utc::now(),
    }
  }

  /// Read a recording from disk, keeping its filename.
  pub async fn from_file(path: &Path) -> Result<Self> {
    let bytes = tokio::fs::read(path)
      .await
      .map_err(|e| eyre!("Failed to read audio file {}: {}", path.display(), e))?;

    let filename = path
      .file_name()
      .and_then(|n| n.to_str())
      .map(String::from)
      .ok_or_else(|| eyre!("Audio path has no file name: {}", path.display()))?;

    Ok(Self::with_filename(bytes, filename))
  }

  pub fn filename(&self) -> &str {
    &self.filename
  }

  pub fn len(&self) -> usize {
    self.bytes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bytes.is_empty()
  }

  /// Attach upload parameters, consuming the blob.
  pub fn into_request(self, tractor_id: &str, tractor_hours: Option<f64>) -> AudioUploadRequest {
    AudioUploadRequest {
      tractor_id: tractor_id.to_string(),
      tractor_hours,
      filename: self.filename,
      recorded_at: self.recorded_at,
      bytes: self.bytes,
    }
  }
}

/// Everything `POST /audio/upload` needs, with the audio as raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioUploadRequest {
  pub tractor_id: String,
  pub tractor_hours: Option<f64>,
  pub filename: String,
  pub recorded_at: DateTime<Utc>,
  pub bytes: Vec<u8>,
}

impl AudioUploadRequest {
  /// Encode for the pending queue, consuming the raw bytes.
  pub fn into_payload(self) -> AudioUploadPayload {
    AudioUploadPayload {
      sha256: sha256_hex(&self.bytes),
      audio_base64: STANDARD.encode(&self.bytes),
      tractor_id: self.tractor_id,
      tractor_hours: self.tractor_hours,
      filename: self.filename,
      recorded_at: self.recorded_at,
    }
  }

  /// MIME type derived from the filename extension.
  pub fn mime_type(&self) -> &'static str {
    let extension = Path::new(&self.filename)
      .extension()
      .and_then(|e| e.to_str())
      .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
      Some("wav") => "audio/wav",
      Some("flac") => "audio/flac",
      Some("mp3") => "audio/mpeg",
      Some("ogg") => "audio/ogg",
      Some("m4a") => "audio/mp4",
      _ => "application/octet-stream",
    }
  }
}

/// Queued form of an audio upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioUploadPayload {
  pub tractor_id: String,
  pub tractor_hours: Option<f64>,
  pub filename: String,
  pub recorded_at: DateTime<Utc>,
  pub audio_base64: String,
  /// Hex SHA-256 of the raw bytes
  pub sha256: String,
}

impl AudioUploadPayload {
  /// Decode back into an upload request, verifying the bytes are intact.
  pub fn to_request(&self) -> Result<AudioUploadRequest, PayloadError> {
    let bytes = STANDARD.decode(&self.audio_base64)?;

    let actual = sha256_hex(&bytes);
    if actual != self.sha256 {
      return Err(PayloadError::ChecksumMismatch {
        expected: self.sha256.clone(),
        actual,
      });
    }

    Ok(AudioUploadRequest {
      tractor_id: self.tractor_id.clone(),
      tractor_hours: self.tractor_hours,
      filename: self.filename.clone(),
      recorded_at: self.recorded_at,
      bytes,
    })
  }
}

fn sha256_hex(bytes: &[u8]) -> String {
  hex::encode(Sha256::digest(bytes))
}

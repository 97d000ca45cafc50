use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub monitor: MonitorConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the TractorCare backend, e.g. "https://api.tractorcare.rw"
  pub base_url: String,
  /// Timeout of the connectivity probe (clamped to 5..=8 seconds)
  #[serde(default = "default_probe_timeout")]
  pub probe_timeout_secs: u64,
  /// Timeout of every other request
  #[serde(default = "default_request_timeout")]
  pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
  /// Seconds between connectivity probes (clamped to 15..=30)
  #[serde(default = "default_interval")]
  pub interval_secs: u64,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      interval_secs: default_interval(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Store location (defaults to $XDG_DATA_HOME/tractorsync/store.db)
  pub path: Option<PathBuf>,
}

fn default_probe_timeout() -> u64 {
  6
}

fn default_request_timeout() -> u64 {
  60
}

fn default_interval() -> u64 {
  20
}

impl ApiConfig {
  pub fn probe_timeout(&self) -> Duration {
    Duration::from_secs(self.probe_timeout_secs.clamp(5, 8))
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs.max(1))
  }
}

impl MonitorConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs.clamp(15, 30))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tractorsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tractorsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/tractorsync/config.yaml\n\
                 with at least `api.base_url` set."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tractorsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tractorsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Get the API token from environment variables, if any.
  ///
  /// Checks TRACTORSYNC_TOKEN first, then TRACTORCARE_API_TOKEN as fallback.
  /// Requests are sent unauthenticated when neither is set.
  pub fn get_api_token() -> Option<String> {
    std::env::var("TRACTORSYNC_TOKEN")
      .or_else(|_| std::env::var("TRACTORCARE_API_TOKEN"))
      .ok()
      .filter(|t| !t.is_empty())
  }
}

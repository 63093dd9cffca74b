//! Application configuration with persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::jellyfin::SavedSession;

const CONFIG_DIR_NAME: &str = "jellycli";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("No configuration directory available on this system")]
  NoConfigDir,
  #[error("Config I/O failed for {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Config file {path} is not valid JSON: {source}")]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error("Invalid configuration: {0}")]
  Invalid(String),
}

/// Extra player arguments, written either as one shell-style string or as a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtraArgs {
  Line(String),
  List(Vec<serde_json::Value>),
}

impl Default for ExtraArgs {
  fn default() -> Self {
    ExtraArgs::List(Vec::new())
  }
}

impl ExtraArgs {
  /// Expand into an argument vector. An unparsable line yields no arguments.
  pub fn to_args(&self) -> Vec<String> {
    match self {
      ExtraArgs::Line(line) => shell_words::split(line).unwrap_or_else(|e| {
        log::warn!("Ignoring unparsable mpvArgs {:?}: {}", line, e);
        Vec::new()
      }),
      ExtraArgs::List(values) => values
        .iter()
        .map(|v| match v {
          serde_json::Value::String(s) => s.clone(),
          other => other.to_string(),
        })
        .collect(),
    }
  }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
  /// Last server URL used for login.
  #[serde(default)]
  pub server_url: Option<String>,

  /// Device name reported to Jellyfin.
  #[serde(default = "default_device_name")]
  pub device_name: String,

  /// Full player command line replacing mpv resolution (shell-style).
  #[serde(default)]
  pub mpv_command: Option<String>,

  /// Additional MPV command-line arguments.
  #[serde(default)]
  pub mpv_args: ExtraArgs,

  /// Treat the player as sandboxed (no reliable IPC) or not, instead of
  /// deciding from how it was found.
  #[serde(default)]
  pub mpv_sandboxed: Option<bool>,

  /// Progress reporting interval in seconds.
  #[serde(default = "default_progress_interval")]
  pub progress_interval: u32,

  /// Saved login.
  #[serde(default)]
  pub session: Option<SavedSession>,
}

fn default_device_name() -> String {
  "jellycli".to_string()
}

fn default_progress_interval() -> u32 {
  5
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      server_url: None,
      device_name: default_device_name(),
      mpv_command: None,
      mpv_args: ExtraArgs::default(),
      mpv_sandboxed: None,
      progress_interval: default_progress_interval(),
      session: None,
    }
  }
}

impl AppConfig {
  /// Default location: `<config dir>/jellycli/config.json`.
  pub fn default_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
      .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
      .ok_or(ConfigError::NoConfigDir)
  }

  /// Load from `path`; a missing file yields the defaults.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let text = match std::fs::read_to_string(path) {
      Ok(text) => text,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        log::info!("No config at {}, using defaults", path.display());
        return Ok(Self::default());
      }
      Err(source) => {
        return Err(ConfigError::Io {
          path: path.to_path_buf(),
          source,
        })
      }
    };

    let config: AppConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
      path: path.to_path_buf(),
      source,
    })?;
    config.validate().map_err(ConfigError::Invalid)?;
    Ok(config)
  }

  /// Write to `path`, creating parent directories as needed.
  pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    };
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let text = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Json {
      path: path.to_path_buf(),
      source,
    })?;
    std::fs::write(path, text).map_err(io_err)
  }

  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), String> {
    if self.device_name.trim().is_empty() {
      return Err("Device name cannot be empty".to_string());
    }
    if self.progress_interval < 1 || self.progress_interval > 60 {
      return Err("Progress interval must be between 1 and 60 seconds".to_string());
    }
    Ok(())
  }
}

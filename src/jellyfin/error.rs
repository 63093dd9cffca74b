//! Jellyfin error types.

use thiserror::Error;

/// Errors that can occur when interacting with Jellyfin.
#[derive(Debug, Error)]
pub enum JellyfinError {
  #[error("HTTP request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("HTTP error: {0}")]
  HttpError(String),

  #[error("Authentication failed: {0}")]
  AuthFailed(String),

  #[error("Not connected to server")]
  NotConnected,

  #[error("Invalid server URL: {0}")]
  InvalidUrl(String),
}

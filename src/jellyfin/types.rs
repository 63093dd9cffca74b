//! Jellyfin API types.
//!
//! These types mirror the Jellyfin API responses and requests.

use serde::{Deserialize, Serialize};

/// Authentication response from Jellyfin.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthResponse {
  pub user: User,
  pub access_token: String,
}

/// Jellyfin user information.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct User {
  pub id: String,
  pub name: String,
}

/// Public server information; only the display name is used.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerInfo {
  pub server_name: String,
}

/// Credentials for authentication.
#[derive(Debug, Clone)]
pub struct Credentials {
  pub server_url: String,
  pub username: String,
  pub password: String,
}

/// Per-user state of an item (watched flag, resume point).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserData {
  #[serde(default)]
  pub played: bool,
  #[serde(default)]
  pub play_count: Option<i32>,
  #[serde(default)]
  pub playback_position_ticks: Option<i64>,
  /// Older servers and some plugins report the resume point under this name.
  #[serde(default)]
  pub resume_position_ticks: Option<i64>,
}

impl UserData {
  /// Resume point in ticks, 0 when the item should start from the beginning.
  pub fn resume_ticks(&self) -> i64 {
    self
      .playback_position_ticks
      .filter(|t| *t > 0)
      .or(self.resume_position_ticks)
      .unwrap_or(0)
      .max(0)
  }
}

/// Media item (movie, episode, etc.).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MediaItem {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub series_name: Option<String>,
  #[serde(default)]
  pub index_number: Option<i32>,
  #[serde(default)]
  pub parent_index_number: Option<i32>,
  #[serde(default)]
  pub run_time_ticks: Option<i64>,
  #[serde(default)]
  pub user_data: Option<UserData>,
}

impl MediaItem {
  /// Resume point carried by the item itself (0 when absent).
  pub fn resume_ticks(&self) -> i64 {
    self.user_data.as_ref().map(UserData::resume_ticks).unwrap_or(0)
  }

  /// "Series - Name" when the item belongs to a series, otherwise the name.
  pub fn display_name(&self) -> String {
    match &self.series_name {
      Some(series) => format!("{} - {}", series, self.name),
      None => self.name.clone(),
    }
  }

  /// Season/episode label such as `S01E02`, when both numbers are known.
  pub fn episode_label(&self) -> Option<String> {
    match (self.parent_index_number, self.index_number) {
      (Some(season), Some(episode)) => Some(format!("S{:02}E{:02}", season, episode)),
      _ => None,
    }
  }
}

/// Paged item list as returned by the `/Items`-style endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemsResponse {
  #[serde(default)]
  pub items: Vec<MediaItem>,
}

/// Media source for playback.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MediaSource {
  #[serde(default)]
  pub id: Option<String>,
  #[serde(default)]
  pub direct_stream_url: Option<String>,
  #[serde(default)]
  pub transcoding_url: Option<String>,
}

/// Playback info request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackInfoRequest {
  pub user_id: String,
  pub auto_open_live_stream: bool,
}

/// Playback info response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackInfoResponse {
  #[serde(default)]
  pub media_sources: Vec<MediaSource>,
  #[serde(default)]
  pub play_session_id: Option<String>,
}

/// How the stream reaches the player, as reported to Jellyfin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlayMethod {
  DirectStream,
  Transcode,
}

/// Playback start info (sent to Jellyfin when playback starts).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackStartInfo {
  pub item_id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub media_source_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub play_session_id: Option<String>,
  pub position_ticks: i64,
  pub is_paused: bool,
  pub play_method: PlayMethod,
  pub can_seek: bool,
}

/// Playback progress info (sent periodically to Jellyfin).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackProgressInfo {
  pub item_id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub media_source_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub play_session_id: Option<String>,
  pub position_ticks: i64,
  pub is_paused: bool,
  pub play_method: PlayMethod,
  pub can_seek: bool,
}

/// Playback stop info (sent when playback ends).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackStopInfo {
  pub item_id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub media_source_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub play_session_id: Option<String>,
  pub position_ticks: i64,
}

/// Ticks conversion helpers (1 tick = 100 nanoseconds).
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Convert seconds to ticks, rounding to the nearest tick.
/// Negative and non-finite inputs map to 0.
pub fn seconds_to_ticks(seconds: f64) -> i64 {
  if !seconds.is_finite() || seconds <= 0.0 {
    return 0;
  }
  (seconds * TICKS_PER_SECOND as f64).round() as i64
}

/// Convert ticks to seconds.
pub fn ticks_to_seconds(ticks: i64) -> f64 {
  ticks as f64 / TICKS_PER_SECOND as f64
}

/// Saved session data for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSession {
  pub server_url: String,
  pub access_token: String,
  pub user_id: String,
  pub user_name: String,
  pub server_name: Option<String>,
  pub device_id: Option<String>,
}

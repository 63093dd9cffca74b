//! Jellyfin HTTP client for REST API calls.

use parking_lot::RwLock;
use reqwest::{header, Client, Response};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::error::JellyfinError;
use super::types::*;

/// Device info for Jellyfin client identification.
const DEFAULT_DEVICE_NAME: &str = "jellycli";
const DEVICE_ID_PREFIX: &str = "jellycli-";
const CLIENT_NAME: &str = "JellyCLI";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Every call to the server is bounded by this timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How many items the continue-watching row asks for.
const RESUME_LIMIT: u32 = 30;

/// Jellyfin HTTP API client.
pub struct JellyfinClient {
  http: Client,
  state: Arc<RwLock<ClientState>>,
}

/// Internal connection state.
struct ClientState {
  server_url: Option<String>,
  access_token: Option<String>,
  user_id: Option<String>,
  user_name: Option<String>,
  server_name: Option<String>,
  device_id: String,
  device_name: String,
}

impl JellyfinClient {
  /// Create a new Jellyfin client.
  pub fn new() -> Self {
    let device_id = format!("{}{}", DEVICE_ID_PREFIX, Uuid::new_v4());

    Self {
      http: Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .expect("Failed to create HTTP client"),
      state: Arc::new(RwLock::new(ClientState {
        server_url: None,
        access_token: None,
        user_id: None,
        user_name: None,
        server_name: None,
        device_id,
        device_name: DEFAULT_DEVICE_NAME.to_string(),
      })),
    }
  }

  /// Set the device name reported to the server.
  pub fn set_device_name(&self, name: String) {
    self.state.write().device_name = name;
  }

  /// Build authorization header value.
  fn auth_header(&self, token: Option<&str>) -> String {
    let state = self.state.read();
    let mut header = format!(
      r#"MediaBrowser Client="{}", Device="{}", DeviceId="{}", Version="{}""#,
      CLIENT_NAME, state.device_name, state.device_id, CLIENT_VERSION
    );
    if let Some(token) = token {
      header.push_str(&format!(r#", Token="{}""#, token));
    }
    header
  }

  /// Authenticate with Jellyfin server.
  pub async fn authenticate(&self, creds: &Credentials) -> Result<AuthResponse, JellyfinError> {
    let server_url = normalize_server_url(&creds.server_url)?;
    let url = format!("{}/Users/AuthenticateByName", server_url);

    let body = serde_json::json!({
      "Username": creds.username,
      "Pw": creds.password
    });

    let response = self
      .http
      .post(&url)
      .header(header::CONTENT_TYPE, "application/json")
      .header("X-Emby-Authorization", self.auth_header(None))
      .json(&body)
      .send()
      .await?;

    if !response.status().is_success() {
      let status = response.status();
      let text = response.text().await.unwrap_or_default();
      return Err(JellyfinError::AuthFailed(format!(
        "HTTP {}: {}",
        status, text
      )));
    }

    let auth: AuthResponse = response.json().await?;

    {
      let mut state = self.state.write();
      state.server_url = Some(server_url);
      state.access_token = Some(auth.access_token.clone());
      state.user_id = Some(auth.user.id.clone());
      state.user_name = Some(auth.user.name.clone());
    }

    self.fetch_server_info().await.ok();

    Ok(auth)
  }

  /// Fetch server public info.
  async fn fetch_server_info(&self) -> Result<ServerInfo, JellyfinError> {
    let server_url = self.server_url()?;
    let url = format!("{}/System/Info/Public", server_url);

    let response = self.http.get(&url).send().await?;
    let info: ServerInfo = check_status(response).await?.json().await?;

    self.state.write().server_name = Some(info.server_name.clone());

    Ok(info)
  }

  /// Disconnect from server.
  fn disconnect(&self) {
    let mut state = self.state.write();
    state.server_url = None;
    state.access_token = None;
    state.user_id = None;
    state.user_name = None;
    state.server_name = None;
  }

  /// Adopt saved session data without contacting the server.
  pub fn set_session(&self, session: &SavedSession) {
    let mut state = self.state.write();
    state.server_url = Some(session.server_url.trim_end_matches('/').to_string());
    state.access_token = Some(session.access_token.clone());
    state.user_id = Some(session.user_id.clone());
    state.user_name = Some(session.user_name.clone());
    state.server_name = session.server_name.clone();
    if let Some(saved_device_id) = &session.device_id {
      state.device_id = saved_device_id.clone();
    }
  }

  /// Restore a session from saved data.
  ///
  /// The token is validated against `/Users/Me`; on failure the state is cleared.
  pub async fn restore_session(&self, session: &SavedSession) -> Result<(), JellyfinError> {
    self.set_session(session);

    match self.get::<User>("/Users/Me").await {
      Ok(user) => {
        let mut state = self.state.write();
        state.user_id = Some(user.id);
        state.user_name = Some(user.name);
        Ok(())
      }
      Err(e) => {
        self.disconnect();
        Err(JellyfinError::AuthFailed(format!(
          "Session validation failed: {}",
          e
        )))
      }
    }
  }

  /// Get current session data for persistence.
  pub fn get_saved_session(&self) -> Option<SavedSession> {
    let state = self.state.read();
    if let (Some(server_url), Some(access_token), Some(user_id), Some(user_name)) = (
      state.server_url.clone(),
      state.access_token.clone(),
      state.user_id.clone(),
      state.user_name.clone(),
    ) {
      Some(SavedSession {
        server_url,
        access_token,
        user_id,
        user_name,
        server_name: state.server_name.clone(),
        device_id: Some(state.device_id.clone()),
      })
    } else {
      None
    }
  }

  /// Display name of the connected server, if known.
  pub fn server_name(&self) -> Option<String> {
    self.state.read().server_name.clone()
  }

  /// Get server URL or error if not connected.
  pub fn server_url(&self) -> Result<String, JellyfinError> {
    self
      .state
      .read()
      .server_url
      .clone()
      .ok_or(JellyfinError::NotConnected)
  }

  /// Get access token or error if not connected.
  pub fn access_token(&self) -> Result<String, JellyfinError> {
    self
      .state
      .read()
      .access_token
      .clone()
      .ok_or(JellyfinError::NotConnected)
  }

  /// Get user ID or error if not connected.
  pub fn user_id(&self) -> Result<String, JellyfinError> {
    self
      .state
      .read()
      .user_id
      .clone()
      .ok_or(JellyfinError::NotConnected)
  }

  /// Make an authenticated GET request.
  async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, JellyfinError> {
    let server_url = self.server_url()?;
    let token = self.access_token()?;
    let url = format!("{}{}", server_url, path);

    let response = self
      .http
      .get(&url)
      .header("X-Emby-Authorization", self.auth_header(Some(&token)))
      .send()
      .await?;

    Ok(check_status(response).await?.json().await?)
  }

  /// Make an authenticated POST request.
  async fn post<T: serde::de::DeserializeOwned, B: serde::Serialize>(
    &self,
    path: &str,
    body: &B,
  ) -> Result<T, JellyfinError> {
    let server_url = self.server_url()?;
    let token = self.access_token()?;
    let url = format!("{}{}", server_url, path);

    let response = self
      .http
      .post(&url)
      .header(header::CONTENT_TYPE, "application/json")
      .header("X-Emby-Authorization", self.auth_header(Some(&token)))
      .json(body)
      .send()
      .await?;

    Ok(check_status(response).await?.json().await?)
  }

  /// Make an authenticated POST request without expecting a response body.
  async fn post_empty<B: serde::Serialize + std::fmt::Debug>(
    &self,
    path: &str,
    body: &B,
  ) -> Result<(), JellyfinError> {
    let server_url = self.server_url()?;
    let token = self.access_token()?;
    let url = format!("{}{}", server_url, path);

    log::debug!("POST {} with body: {:?}", path, body);

    let response = self
      .http
      .post(&url)
      .header(header::CONTENT_TYPE, "application/json")
      .header("X-Emby-Authorization", self.auth_header(Some(&token)))
      .json(body)
      .send()
      .await?;

    check_status(response).await?;
    Ok(())
  }

  /// Get media item by ID, including the user data that carries the resume point.
  pub async fn get_item(&self, item_id: &str) -> Result<MediaItem, JellyfinError> {
    let user_id = self.user_id()?;
    self
      .get(&format!("/Users/{}/Items/{}?Fields=UserData", user_id, item_id))
      .await
  }

  /// Items the user has started but not finished.
  pub async fn get_resume_items(&self) -> Result<Vec<MediaItem>, JellyfinError> {
    let user_id = self.user_id()?;
    let response: ItemsResponse = self
      .get(&format!(
        "/Users/{}/Items/Resume?Limit={}&Fields=UserData",
        user_id, RESUME_LIMIT
      ))
      .await?;
    Ok(response.items)
  }

  /// Get playback info for a media item.
  ///
  /// Live streams are never opened automatically; the player opens the URL itself.
  pub async fn get_playback_info(&self, item_id: &str) -> Result<PlaybackInfoResponse, JellyfinError> {
    let user_id = self.user_id()?;
    let path = format!("/Items/{}/PlaybackInfo", item_id);

    let request = PlaybackInfoRequest {
      user_id,
      auto_open_live_stream: false,
    };

    self.post(&path, &request).await
  }

  /// Report playback started.
  pub async fn report_playback_start(&self, info: &PlaybackStartInfo) -> Result<(), JellyfinError> {
    self.post_empty("/Sessions/Playing", info).await
  }

  /// Report playback progress.
  pub async fn report_playback_progress(
    &self,
    info: &PlaybackProgressInfo,
  ) -> Result<(), JellyfinError> {
    self.post_empty("/Sessions/Playing/Progress", info).await
  }

  /// Report playback stopped.
  pub async fn report_playback_stop(&self, info: &PlaybackStopInfo) -> Result<(), JellyfinError> {
    self.post_empty("/Sessions/Playing/Stopped", info).await
  }
}

impl Default for JellyfinClient {
  fn default() -> Self {
    Self::new()
  }
}

/// Trim trailing slashes and require an http(s) scheme.
fn normalize_server_url(raw: &str) -> Result<String, JellyfinError> {
  let server_url = raw.trim().trim_end_matches('/').to_string();
  if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
    return Err(JellyfinError::InvalidUrl(
      "URL must start with http:// or https://".to_string(),
    ));
  }
  Ok(server_url)
}

/// Turn a non-2xx response into an error carrying the body text.
async fn check_status(response: Response) -> Result<Response, JellyfinError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  let url = response.url().path().to_string();
  let body = response.text().await.unwrap_or_default();
  log::error!("{} failed with status {}: {}", url, status, body);
  Err(JellyfinError::HttpError(format!("HTTP {} - {}", status, body)))
}

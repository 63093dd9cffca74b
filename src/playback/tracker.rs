//! Playback session coordinator.
//!
//! One `PlaybackTracker` exists per play action. `start` launches MPV and tells
//! Jellyfin playback began; afterwards the host drives the session through
//! `on_progress_tick` and `on_liveness_tick` until it is torn down, which
//! happens exactly once.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::jellyfin::{
  seconds_to_ticks, ticks_to_seconds, JellyfinClient, MediaItem, PlayMethod,
  PlaybackInfoResponse, PlaybackProgressInfo, PlaybackStartInfo, PlaybackStopInfo,
};
use crate::mpv::ipc;
use crate::mpv::process::{self, LaunchOptions};
use crate::mpv::PlayerProcess;

use super::host::{PlaybackHost, StatusMessage, TimerHandle, TrackerTick};
use super::phase::{Lifecycle, PauseEdge, Phase, Teardown};
use super::policy::{settle, CallSite};
use super::stream::{build_stream_url, redact_url, StreamRequest};

/// Time thresholds used by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
  /// Period of the progress report timer.
  pub progress_interval: Duration,
  /// Period of the liveness timer.
  pub liveness_interval: Duration,
  /// How long to wait for the control socket after launch.
  pub ready_timeout: Duration,
  /// Poll slice while waiting for the control socket.
  pub ready_poll: Duration,
  /// An exit this soon after launch is treated as a launch failure worth explaining.
  pub exit_grace: Duration,
  /// After this, stderr is no longer kept.
  pub stderr_window: Duration,
}

impl Default for Timings {
  fn default() -> Self {
    Self {
      progress_interval: Duration::from_secs(5),
      liveness_interval: Duration::from_secs(1),
      ready_timeout: Duration::from_secs(5),
      ready_poll: Duration::from_millis(50),
      exit_grace: Duration::from_secs(2),
      stderr_window: Duration::from_secs(5),
    }
  }
}

impl Timings {
  pub fn from_config(config: &AppConfig) -> Self {
    Self {
      progress_interval: Duration::from_secs(u64::from(config.progress_interval)),
      ..Self::default()
    }
  }
}

/// Player settings read once per session.
#[derive(Debug, Clone, Default)]
pub struct PlayerSettings {
  pub command_override: Option<String>,
  pub extra_args: Vec<String>,
  /// Force the sandboxed (or plain) treatment of the resolved player.
  pub sandboxed: Option<bool>,
}

impl PlayerSettings {
  pub fn from_config(config: &AppConfig) -> Self {
    Self {
      command_override: config.mpv_command.clone(),
      extra_args: config.mpv_args.to_args(),
      sandboxed: config.mpv_sandboxed,
    }
  }
}

/// Result of `PlaybackTracker::start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
  /// Player ready, timers running.
  Playing,
  /// Player launched but its control socket is unreachable; progress sync is limited.
  PlayingDegraded,
  /// Nothing is playing. The session is already torn down.
  Failed,
}

enum Readiness {
  Ready,
  Exited,
  TimedOut,
}

pub struct PlaybackTracker {
  client: Arc<JellyfinClient>,
  host: Arc<dyn PlaybackHost>,
  item: MediaItem,
  settings: PlayerSettings,
  timings: Timings,
  ipc_path: PathBuf,
  process: Option<PlayerProcess>,
  lifecycle: Lifecycle,
  pause: PauseEdge,
  timers: Vec<TimerHandle>,
  resume_ticks: i64,
  last_position_ticks: i64,
  play_session_id: Option<String>,
  media_source_id: Option<String>,
  play_method: PlayMethod,
  stream_url: Option<String>,
  sandboxed: bool,
  ipc_available: bool,
}

impl PlaybackTracker {
  pub fn new(
    client: Arc<JellyfinClient>,
    host: Arc<dyn PlaybackHost>,
    item: MediaItem,
    settings: PlayerSettings,
  ) -> Self {
    Self {
      client,
      host,
      item,
      settings,
      timings: Timings::default(),
      ipc_path: ipc::ipc_path(),
      process: None,
      lifecycle: Lifecycle::new(),
      pause: PauseEdge::default(),
      timers: Vec::new(),
      resume_ticks: 0,
      last_position_ticks: 0,
      play_session_id: None,
      media_source_id: None,
      play_method: PlayMethod::DirectStream,
      stream_url: None,
      sandboxed: false,
      ipc_available: false,
    }
  }

  pub fn with_timings(mut self, timings: Timings) -> Self {
    self.timings = timings;
    self
  }

  /// Use a specific control socket address instead of a generated one.
  pub fn with_ipc_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.ipc_path = path.into();
    self
  }

  pub fn phase(&self) -> Phase {
    self.lifecycle.phase()
  }

  pub fn item(&self) -> &MediaItem {
    &self.item
  }

  pub fn resume_ticks(&self) -> i64 {
    self.resume_ticks
  }

  pub fn last_position_ticks(&self) -> i64 {
    self.last_position_ticks
  }

  pub fn play_session_id(&self) -> Option<&str> {
    self.play_session_id.as_deref()
  }

  pub fn media_source_id(&self) -> Option<&str> {
    self.media_source_id.as_deref()
  }

  pub fn play_method(&self) -> PlayMethod {
    self.play_method
  }

  pub fn ipc_path(&self) -> &Path {
    &self.ipc_path
  }

  pub fn is_sandboxed(&self) -> bool {
    self.sandboxed
  }

  pub fn ipc_available(&self) -> bool {
    self.ipc_available
  }

  /// Pid of the player this session still holds.
  pub fn player_pid(&self) -> Option<u32> {
    self.process.as_ref().and_then(|p| p.id())
  }

  /// Whether the player's stderr is still being kept.
  pub fn holds_stderr(&self) -> bool {
    self.process.as_ref().is_some_and(|p| p.has_stderr())
  }

  /// The URL handed to the player, once built.
  pub fn stream_url(&self) -> Option<&str> {
    self.stream_url.as_deref()
  }

  /// Launch the player and begin the session.
  ///
  /// Every failure is reported through the host's status line; on `Failed`
  /// the session has already been torn down without a "stop" report.
  pub async fn start(&mut self) -> StartOutcome {
    if self.lifecycle.phase() != Phase::AwaitingReady {
      log::warn!("start() called on a session in phase {:?}", self.lifecycle.phase());
      return StartOutcome::Failed;
    }

    let (server_url, token) = match (self.client.server_url(), self.client.access_token()) {
      (Ok(url), Ok(token)) => (url, token),
      (Err(e), _) | (_, Err(e)) => {
        log::error!("Cannot start playback: {}", e);
        self.host.show_status(StatusMessage::error("Not connected to a Jellyfin server"));
        self.stop(Teardown::NonFinal).await;
        return StartOutcome::Failed;
      }
    };

    self.resume_ticks = self.resolve_resume_ticks().await;
    self.last_position_ticks = self.resume_ticks;

    let info = settle(
      CallSite::PlaybackInfo,
      self.client.get_playback_info(&self.item.id).await,
    )
    .unwrap_or_default();
    let PlaybackInfoResponse {
      media_sources,
      play_session_id,
    } = info;
    let source = media_sources.into_iter().next();
    self.play_session_id = play_session_id;
    self.media_source_id = source.as_ref().and_then(|s| s.id.clone());

    let stream = build_stream_url(
      &StreamRequest {
        server_url: &server_url,
        item_id: &self.item.id,
        token: &token,
        resume_ticks: self.resume_ticks,
        media_source_id: self.media_source_id.as_deref(),
        play_session_id: self.play_session_id.as_deref(),
      },
      source.as_ref(),
    );
    let stream = match stream {
      Ok(stream) => stream,
      Err(e) => {
        log::error!("Could not build stream URL: {}", e);
        self.host.show_status(StatusMessage::error(format!("Invalid stream URL: {}", e)));
        self.stop(Teardown::NonFinal).await;
        return StartOutcome::Failed;
      }
    };
    log::info!(
      "Stream for {} ({:?}): {}",
      self.item.id,
      stream.play_method,
      redact_url(&stream.url)
    );
    self.play_method = stream.play_method;

    let mut command = match process::resolve_player(self.settings.command_override.as_deref()).await {
      Ok(command) => command,
      Err(e) => {
        settle::<(), _>(CallSite::ResolvePlayer, Err(&e));
        self.host.show_status(StatusMessage::error(e.to_string()));
        self.stop(Teardown::NonFinal).await;
        return StartOutcome::Failed;
      }
    };
    if let Some(sandboxed) = self.settings.sandboxed {
      command.sandboxed = sandboxed;
    }
    self.sandboxed = command.sandboxed;

    if !process::display_available() {
      self.host.show_status(StatusMessage::warning(
        "No DISPLAY or WAYLAND_DISPLAY set; mpv may not be able to open a window",
      ));
    }

    let args = process::build_args(&LaunchOptions {
      ipc_path: &self.ipc_path,
      start_seconds: Some(ticks_to_seconds(self.resume_ticks)),
      token: &token,
      extra_args: &self.settings.extra_args,
      url: &stream.url,
    });
    self.stream_url = Some(stream.url);

    match process::spawn_player(&command, &args) {
      Ok(player) => {
        log::info!("MPV started with pid {:?}", player.id());
        self.process = Some(player);
      }
      Err(e) => {
        settle::<(), _>(CallSite::LaunchPlayer, Err(&e));
        self.host.show_status(StatusMessage::error(e.to_string()));
        self.stop(Teardown::NonFinal).await;
        return StartOutcome::Failed;
      }
    }

    let degraded = match self.wait_until_ready().await {
      Readiness::Ready => {
        self.ipc_available = true;
        false
      }
      Readiness::TimedOut if self.sandboxed => {
        log::warn!(
          "{} timed out, continuing without IPC",
          CallSite::ReadinessWait { sandboxed: true }
        );
        self.ipc_available = false;
        self.host.show_status(StatusMessage::info(
          "Playing via sandboxed mpv (limited progress sync).",
        ));
        true
      }
      outcome => {
        self.abort_launch(matches!(outcome, Readiness::TimedOut)).await;
        return StartOutcome::Failed;
      }
    };

    self.lifecycle.mark_running();
    self.report_start().await;

    self.timers.push(
      self
        .host
        .set_interval(self.timings.progress_interval, TrackerTick::Progress),
    );
    self.timers.push(
      self
        .host
        .set_interval(self.timings.liveness_interval, TrackerTick::Liveness),
    );

    let title = self.item.display_name();
    match self.item.episode_label() {
      Some(label) => log::info!("Now playing {} ({})", title, label),
      None => log::info!("Now playing {}", title),
    }
    self
      .host
      .show_status(StatusMessage::success(format!("Now playing: {}", title)));

    if degraded {
      StartOutcome::PlayingDegraded
    } else {
      StartOutcome::Playing
    }
  }

  /// Resume point from the item, or from one item lookup when the item has none.
  async fn resolve_resume_ticks(&mut self) -> i64 {
    let ticks = self.item.resume_ticks();
    if ticks > 0 {
      return ticks;
    }
    match settle(CallSite::FetchItem, self.client.get_item(&self.item.id).await) {
      Some(fresh) => {
        let ticks = fresh.resume_ticks();
        if fresh.user_data.is_some() {
          self.item.user_data = fresh.user_data;
        }
        ticks
      }
      None => 0,
    }
  }

  async fn wait_until_ready(&mut self) -> Readiness {
    loop {
      if ipc::is_ready(&self.ipc_path).await {
        return Readiness::Ready;
      }
      let Some(player) = self.process.as_mut() else {
        return Readiness::Exited;
      };
      if player.has_exited() {
        return Readiness::Exited;
      }
      if player.elapsed() >= self.timings.ready_timeout {
        return Readiness::TimedOut;
      }
      tokio::time::sleep(self.timings.ready_poll).await;
    }
  }

  /// The player never became usable: explain why and tear down without "start".
  async fn abort_launch(&mut self, still_running: bool) {
    let site = CallSite::ReadinessWait {
      sandboxed: self.sandboxed,
    };
    let mut detail = None;
    if let Some(player) = self.process.as_mut() {
      if still_running {
        log::warn!("{} timed out, killing mpv", site);
        player.kill().await;
      } else {
        log::warn!("mpv exited before its control socket came up");
      }
      detail = player.last_stderr_line().await;
    }

    let message = match detail {
      Some(line) => format!("mpv failed to start. Details: {}", line),
      None => "mpv failed to start.".to_string(),
    };
    self.host.show_status(StatusMessage::error(message));
    self.stop(Teardown::NonFinal).await;
  }

  /// Whether the session is running with a live player.
  fn player_alive(&mut self) -> bool {
    if !self.lifecycle.is_running() {
      return false;
    }
    match self.process.as_mut() {
      Some(player) => !player.has_exited(),
      None => false,
    }
  }

  /// Read the position; keep the last value when the read fails or is zero.
  async fn refresh_position(&mut self) {
    if !self.ipc_available {
      return;
    }
    let reading = settle(CallSite::PropertyRead, ipc::get_time_pos(&self.ipc_path).await);
    if let Some(seconds) = reading {
      let ticks = seconds_to_ticks(seconds);
      if ticks > 0 {
        self.last_position_ticks = ticks;
      }
    }
  }

  async fn read_pause(&self) -> Option<bool> {
    settle(CallSite::PropertyRead, ipc::get_pause(&self.ipc_path).await)
  }

  fn progress_info(&self, is_paused: bool) -> PlaybackProgressInfo {
    PlaybackProgressInfo {
      item_id: self.item.id.clone(),
      media_source_id: self.media_source_id.clone(),
      play_session_id: self.play_session_id.clone(),
      position_ticks: self.last_position_ticks,
      is_paused,
      play_method: self.play_method,
      can_seek: true,
    }
  }

  async fn report_start(&mut self) {
    let info = PlaybackStartInfo {
      item_id: self.item.id.clone(),
      media_source_id: self.media_source_id.clone(),
      play_session_id: self.play_session_id.clone(),
      position_ticks: self.resume_ticks,
      is_paused: false,
      play_method: self.play_method,
      can_seek: true,
    };
    self.lifecycle.record_start_attempt();
    settle(
      CallSite::ReportStart,
      self.client.report_playback_start(&info).await,
    );
  }

  async fn send_progress(&self, is_paused: bool) {
    let info = self.progress_info(is_paused);
    log::debug!(
      "Progress {} at {} ticks (paused: {})",
      info.item_id,
      info.position_ticks,
      is_paused
    );
    settle(
      CallSite::ReportProgress,
      self.client.report_playback_progress(&info).await,
    );
  }

  /// Periodic progress report.
  pub async fn on_progress_tick(&mut self) {
    if !self.player_alive() {
      return;
    }
    let paused = if self.ipc_available {
      self.refresh_position().await;
      self.read_pause().await
    } else {
      None
    };
    self.send_progress(paused.unwrap_or(false)).await;
  }

  /// Immediate progress report with an explicit pause flag.
  pub async fn push_progress(&mut self, paused: bool) {
    if !self.lifecycle.is_running() || self.process.is_none() {
      return;
    }
    self.refresh_position().await;
    self.send_progress(paused).await;
  }

  /// Exit detection, stderr housekeeping, and pause-edge detection.
  pub async fn on_liveness_tick(&mut self) {
    if !self.lifecycle.is_running() {
      return;
    }

    let exited = match self.process.as_mut() {
      Some(player) => player.has_exited(),
      None => true,
    };

    if exited {
      if let Some(player) = self.process.as_mut() {
        if player.elapsed() < self.timings.exit_grace {
          if let Some(line) = player.last_stderr_line().await {
            self
              .host
              .show_status(StatusMessage::error(format!("mpv exited: {}", line)));
          }
        }
      }
      log::info!("MPV exited, finishing session for {}", self.item.id);
      self.stop(Teardown::Final).await;
      return;
    }

    if let Some(player) = self.process.as_mut() {
      if player.has_stderr() && player.elapsed() > self.timings.stderr_window {
        player.release_stderr();
      }
    }

    if self.ipc_available {
      let reading = self.read_pause().await;
      if let Some(paused) = self.pause.observe(reading) {
        log::info!("Pause toggled: {}", paused);
        self.push_progress(paused).await;
      }
    }
  }

  /// Tear the session down. Only the first call has any effect.
  ///
  /// `Teardown::Final` reports "stop" when a "start" was attempted;
  /// `Teardown::NonFinal` leaves the player running and reports nothing.
  pub async fn stop(&mut self, kind: Teardown) {
    let Some(plan) = self.lifecycle.begin_teardown(kind) else {
      log::debug!("Session for {} already stopped", self.item.id);
      return;
    };

    for handle in self.timers.drain(..) {
      self.host.cancel_interval(handle);
    }

    if plan.send_stop {
      let info = PlaybackStopInfo {
        item_id: self.item.id.clone(),
        media_source_id: self.media_source_id.clone(),
        play_session_id: self.play_session_id.clone(),
        position_ticks: self.last_position_ticks,
      };
      log::info!(
        "Reporting stop for {} at {} ticks",
        info.item_id,
        info.position_ticks
      );
      settle(
        CallSite::ReportStop,
        self.client.report_playback_stop(&info).await,
      );
    }

    self.host.refresh_continue_watching();

    let socket_unused = match self.process.as_mut() {
      Some(player) => {
        player.release_stderr();
        player.has_exited()
      }
      None => true,
    };
    if socket_unused {
      ipc::cleanup_ipc(&self.ipc_path);
    }
    self.process = None;
  }

  /// Stop playback on request: ask MPV to quit, kill it if it lingers, then
  /// finish the session.
  pub async fn stop_playback(&mut self) {
    if self.lifecycle.phase() == Phase::Stopped {
      return;
    }

    if self.ipc_available {
      self.refresh_position().await;
      ipc::send_quit(&self.ipc_path).await;
    }

    if let Some(player) = self.process.as_mut() {
      let deadline = tokio::time::Instant::now() + self.timings.exit_grace;
      while !player.has_exited() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(self.timings.ready_poll).await;
      }
      if !player.has_exited() {
        player.kill().await;
      }
    }

    self.stop(Teardown::Final).await;
  }
}

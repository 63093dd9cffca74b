#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use jellycli::jellyfin::{JellyfinClient, MediaItem, SavedSession, UserData};
use jellycli::playback::{
  Phase, PlaybackHost, PlaybackTracker, PlayerSettings, StartOutcome, StatusLevel,
  StatusMessage, Teardown, TimerHandle, Timings, TrackerTick,
};
use mockito::{Matcher, Mock, Server, ServerGuard};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

#[derive(Default)]
struct RecordingHost {
  next_handle: AtomicU64,
  timers: Mutex<Vec<(TimerHandle, Duration, TrackerTick)>>,
  cancelled: Mutex<Vec<TimerHandle>>,
  statuses: Mutex<Vec<StatusMessage>>,
  refreshes: AtomicUsize,
}

impl RecordingHost {
  fn errors(&self) -> Vec<String> {
    self
      .statuses
      .lock()
      .iter()
      .filter(|s| s.level == StatusLevel::Error)
      .map(|s| s.text.clone())
      .collect()
  }

  fn has_status(&self, text: &str) -> bool {
    self.statuses.lock().iter().any(|s| s.text == text)
  }
}

impl PlaybackHost for RecordingHost {
  fn set_interval(&self, every: Duration, tick: TrackerTick) -> TimerHandle {
    let handle = TimerHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
    self.timers.lock().push((handle, every, tick));
    handle
  }

  fn cancel_interval(&self, handle: TimerHandle) {
    self.cancelled.lock().push(handle);
  }

  fn show_status(&self, status: StatusMessage) {
    self.statuses.lock().push(status);
  }

  fn refresh_continue_watching(&self) {
    self.refreshes.fetch_add(1, Ordering::SeqCst);
  }
}

fn connected_client(server: &ServerGuard) -> Arc<JellyfinClient> {
  let client = JellyfinClient::new();
  client.set_session(&SavedSession {
    server_url: server.url(),
    access_token: "tok".to_string(),
    user_id: "u1".to_string(),
    user_name: "tester".to_string(),
    server_name: None,
    device_id: None,
  });
  Arc::new(client)
}

fn item(resume_ticks: Option<i64>) -> MediaItem {
  MediaItem {
    id: "item1".to_string(),
    name: "Pilot".to_string(),
    series_name: Some("Show".to_string()),
    index_number: Some(1),
    parent_index_number: Some(1),
    run_time_ticks: Some(30_000_000_000),
    user_data: resume_ticks.map(|t| UserData {
      playback_position_ticks: Some(t),
      ..UserData::default()
    }),
  }
}

/// A fake player: `script` runs under `sh`, MPV's arguments become `$@`.
fn fake_player(script: &str) -> PlayerSettings {
  PlayerSettings {
    command_override: Some(format!("sh -c '{}' fakempv", script)),
    ..PlayerSettings::default()
  }
}

fn quick_timings() -> Timings {
  Timings {
    ready_timeout: Duration::from_millis(600),
    exit_grace: Duration::from_millis(300),
    ..Timings::default()
  }
}

/// Answers `get_property` like MPV: `time-pos` is fixed, `pause` follows the
/// script (`None` answers with an error) and then repeats its last entry.
fn fake_ipc(listener: UnixListener, time_pos: f64, pauses: Vec<Option<bool>>) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut pauses = pauses.into_iter();
    let mut last = None;
    loop {
      let Ok((stream, _)) = listener.accept().await else {
        return;
      };
      let (read, mut write) = stream.into_split();
      let mut lines = BufReader::new(read).lines();
      let Ok(Some(line)) = lines.next_line().await else {
        continue;
      };
      let request: Value = serde_json::from_str(&line).unwrap();
      let id = request["request_id"].clone();
      let reply = match request["command"][1].as_str() {
        Some("time-pos") => json!({"data": time_pos, "error": "success", "request_id": id}),
        Some("pause") => {
          last = pauses.next().unwrap_or(last);
          match last {
            Some(paused) => json!({"data": paused, "error": "success", "request_id": id}),
            None => json!({"error": "property unavailable", "request_id": id}),
          }
        }
        _ => json!({"error": "success", "request_id": id}),
      };
      let _ = write.write_all(format!("{}\n", reply).as_bytes()).await;
    }
  })
}

async fn mock_report(server: &mut ServerGuard, path: &str, hits: usize) -> Mock {
  server
    .mock("POST", path)
    .with_status(204)
    .expect(hits)
    .create_async()
    .await
}

async fn wait_for_file(path: &Path) -> String {
  let deadline = Instant::now() + Duration::from_secs(3);
  loop {
    if let Ok(text) = std::fs::read_to_string(path) {
      if text.ends_with('\n') {
        return text;
      }
    }
    assert!(Instant::now() < deadline, "player never wrote {}", path.display());
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
}

fn socket_path(dir: &tempfile::TempDir) -> PathBuf {
  dir.path().join("mpv.sock")
}

#[tokio::test]
async fn test_resume_fallback_fetches_item_once() {
  let mut server = Server::new_async().await;
  let item_fetch = server
    .mock("GET", "/Users/u1/Items/item1")
    .match_query(Matcher::Any)
    .with_status(500)
    .expect(1)
    .create_async()
    .await;
  let _info = server
    .mock("POST", "/Items/item1/PlaybackInfo")
    .with_status(500)
    .create_async()
    .await;
  let start = mock_report(&mut server, "/Sessions/Playing", 1).await;

  let dir = tempfile::tempdir().unwrap();
  let _listener = UnixListener::bind(socket_path(&dir)).unwrap();
  let host = Arc::new(RecordingHost::default());
  let mut tracker = PlaybackTracker::new(
    connected_client(&server),
    host.clone(),
    item(None),
    fake_player("exec sleep 5"),
  )
  .with_timings(quick_timings())
  .with_ipc_path(socket_path(&dir));

  assert_eq!(tracker.start().await, StartOutcome::Playing);
  assert_eq!(tracker.resume_ticks(), 0);
  assert_eq!(tracker.last_position_ticks(), 0);

  item_fetch.assert_async().await;
  start.assert_async().await;
  tracker.stop_playback().await;
}

#[tokio::test]
async fn test_resume_from_user_data_skips_fetch() {
  let mut server = Server::new_async().await;
  let item_fetch = server
    .mock("GET", "/Users/u1/Items/item1")
    .match_query(Matcher::Any)
    .expect(0)
    .create_async()
    .await;
  let _info = server
    .mock("POST", "/Items/item1/PlaybackInfo")
    .match_body(Matcher::Json(json!({"UserId": "u1", "AutoOpenLiveStream": false})))
    .with_status(200)
    .with_header("content-type", "application/json")
    .with_body(
      json!({
        "PlaySessionId": "ps1",
        "MediaSources": [{"Id": "ms1", "Container": "mkv"}]
      })
      .to_string(),
    )
    .create_async()
    .await;
  let start = server
    .mock("POST", "/Sessions/Playing")
    .match_body(Matcher::PartialJson(json!({
      "ItemId": "item1",
      "PositionTicks": 37_500_000,
      "IsPaused": false,
      "CanSeek": true,
      "PlayMethod": "DirectStream",
      "MediaSourceId": "ms1",
      "PlaySessionId": "ps1"
    })))
    .with_status(204)
    .expect(1)
    .create_async()
    .await;

  let dir = tempfile::tempdir().unwrap();
  let args_file = dir.path().join("args.txt");
  let _listener = UnixListener::bind(socket_path(&dir)).unwrap();
  let host = Arc::new(RecordingHost::default());
  let script = format!(
    "printf \"%s\\n\" \"$@\" > {}; exec sleep 5",
    args_file.display()
  );
  let mut tracker = PlaybackTracker::new(
    connected_client(&server),
    host.clone(),
    item(Some(37_500_000)),
    fake_player(&script),
  )
  .with_timings(quick_timings())
  .with_ipc_path(socket_path(&dir));

  assert_eq!(tracker.start().await, StartOutcome::Playing);
  assert_eq!(tracker.resume_ticks(), 37_500_000);
  assert_eq!(tracker.play_session_id(), Some("ps1"));
  assert_eq!(tracker.media_source_id(), Some("ms1"));

  let args = wait_for_file(&args_file).await;
  let args: Vec<&str> = args.lines().collect();
  assert!(args.contains(&"--start=3.750"));
  assert!(args.contains(&"--hr-seek=yes"));
  let url = args.last().unwrap();
  assert!(url.contains("StartTimeTicks=37500000"));
  assert!(url.contains("MediaSourceId=ms1"));
  assert!(url.contains("PlaySessionId=ps1"));
  assert!(host.has_status("Now playing: Show - Pilot"));

  item_fetch.assert_async().await;
  start.assert_async().await;
  tracker.stop_playback().await;
}

#[tokio::test]
async fn test_playback_info_failure_uses_fallback_url() {
  let mut server = Server::new_async().await;
  let _info = server
    .mock("POST", "/Items/item1/PlaybackInfo")
    .with_status(503)
    .create_async()
    .await;
  let start = server
    .mock("POST", "/Sessions/Playing")
    .match_body(Matcher::PartialJson(json!({"ItemId": "item1"})))
    .with_status(204)
    .expect(1)
    .create_async()
    .await;

  let dir = tempfile::tempdir().unwrap();
  let _listener = UnixListener::bind(socket_path(&dir)).unwrap();
  let host = Arc::new(RecordingHost::default());
  let mut tracker = PlaybackTracker::new(
    connected_client(&server),
    host.clone(),
    item(Some(37_500_000)),
    fake_player("exec sleep 5"),
  )
  .with_timings(quick_timings())
  .with_ipc_path(socket_path(&dir));

  assert_eq!(tracker.start().await, StartOutcome::Playing);
  let url = tracker.stream_url().unwrap().to_string();
  assert!(url.starts_with(&format!("{}/Videos/item1/stream?Static=true", server.url())));
  assert!(url.contains("StartTimeTicks=37500000"));
  assert!(url.contains("api_key=tok"));
  assert!(!url.contains("MediaSourceId"));
  assert!(!url.contains("PlaySessionId"));
  assert_eq!(tracker.play_session_id(), None);
  assert!(host.errors().is_empty());

  start.assert_async().await;
  tracker.stop_playback().await;
}

#[tokio::test]
async fn test_never_ready_player_sends_no_start() {
  let mut server = Server::new_async().await;
  let _info = server
    .mock("POST", "/Items/item1/PlaybackInfo")
    .with_status(500)
    .create_async()
    .await;
  let start = mock_report(&mut server, "/Sessions/Playing", 0).await;
  let stop = mock_report(&mut server, "/Sessions/Playing/Stopped", 0).await;

  let dir = tempfile::tempdir().unwrap();
  let host = Arc::new(RecordingHost::default());
  let mut tracker = PlaybackTracker::new(
    connected_client(&server),
    host.clone(),
    item(Some(10)),
    fake_player("echo \"cannot open display\" >&2; exec sleep 30"),
  )
  .with_timings(quick_timings())
  .with_ipc_path(socket_path(&dir));

  assert_eq!(tracker.start().await, StartOutcome::Failed);
  assert_eq!(tracker.phase(), Phase::Stopped);
  assert!(!tracker.is_sandboxed());
  assert_eq!(
    host.errors(),
    vec!["mpv failed to start. Details: cannot open display".to_string()]
  );
  assert!(host.timers.lock().is_empty());

  tracker.stop(Teardown::Final).await;
  start.assert_async().await;
  stop.assert_async().await;
}

#[tokio::test]
async fn test_early_exit_before_ready_surfaces_stderr() {
  let mut server = Server::new_async().await;
  let start = mock_report(&mut server, "/Sessions/Playing", 0).await;

  let dir = tempfile::tempdir().unwrap();
  let host = Arc::new(RecordingHost::default());
  let mut tracker = PlaybackTracker::new(
    connected_client(&server),
    host.clone(),
    item(Some(10)),
    fake_player("echo \"[file] no such file\" >&2; exit 2"),
  )
  .with_timings(quick_timings())
  .with_ipc_path(socket_path(&dir));

  assert_eq!(tracker.start().await, StartOutcome::Failed);
  assert_eq!(
    host.errors(),
    vec!["mpv failed to start. Details: [file] no such file".to_string()]
  );
  start.assert_async().await;
}

#[tokio::test]
async fn test_quick_exit_surfaces_stderr_and_stops_once() {
  let mut server = Server::new_async().await;
  let start = mock_report(&mut server, "/Sessions/Playing", 1).await;
  let stop = server
    .mock("POST", "/Sessions/Playing/Stopped")
    .match_body(Matcher::PartialJson(json!({"ItemId": "item1", "PositionTicks": 10})))
    .with_status(204)
    .expect(1)
    .create_async()
    .await;

  let dir = tempfile::tempdir().unwrap();
  let _listener = UnixListener::bind(socket_path(&dir)).unwrap();
  let host = Arc::new(RecordingHost::default());
  let mut tracker = PlaybackTracker::new(
    connected_client(&server),
    host.clone(),
    item(Some(10)),
    fake_player("echo \"[vo] failed to initialize\" >&2; sleep 0.3; exit 1"),
  )
  .with_timings(Timings {
    exit_grace: Duration::from_secs(5),
    ..quick_timings()
  })
  .with_ipc_path(socket_path(&dir));

  assert_eq!(tracker.start().await, StartOutcome::Playing);

  let deadline = Instant::now() + Duration::from_secs(5);
  while tracker.phase() != Phase::Stopped {
    assert!(Instant::now() < deadline, "exit was never noticed");
    tokio::time::sleep(Duration::from_millis(100)).await;
    tracker.on_liveness_tick().await;
  }

  assert!(host.has_status("mpv exited: [vo] failed to initialize"));
  assert_eq!(host.refreshes.load(Ordering::SeqCst), 1);

  // Further ticks and stops do nothing.
  tracker.on_liveness_tick().await;
  tracker.on_progress_tick().await;
  tracker.stop(Teardown::Final).await;

  start.assert_async().await;
  stop.assert_async().await;
  assert_eq!(host.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_double_stop_reports_once_and_cancels_timers_once() {
  let mut server = Server::new_async().await;
  let _start = mock_report(&mut server, "/Sessions/Playing", 1).await;
  let stop = mock_report(&mut server, "/Sessions/Playing/Stopped", 1).await;

  let dir = tempfile::tempdir().unwrap();
  let listener = UnixListener::bind(socket_path(&dir)).unwrap();
  let _ipc = fake_ipc(listener, 42.0, vec![Some(false)]);
  let host = Arc::new(RecordingHost::default());
  let mut tracker = PlaybackTracker::new(
    connected_client(&server),
    host.clone(),
    item(Some(10)),
    fake_player("exec sleep 5"),
  )
  .with_timings(quick_timings())
  .with_ipc_path(socket_path(&dir));

  assert_eq!(tracker.start().await, StartOutcome::Playing);
  {
    let timers = host.timers.lock();
    assert_eq!(timers.len(), 2);
    assert!(timers.contains(&(TimerHandle(1), Duration::from_secs(5), TrackerTick::Progress)));
    assert!(timers.contains(&(TimerHandle(2), Duration::from_secs(1), TrackerTick::Liveness)));
  }

  tracker.stop_playback().await;
  tracker.stop(Teardown::Final).await;
  tracker.stop(Teardown::NonFinal).await;

  assert_eq!(tracker.phase(), Phase::Stopped);
  assert_eq!(tracker.last_position_ticks(), 420_000_000);
  assert_eq!(host.cancelled.lock().len(), 2);
  assert_eq!(host.refreshes.load(Ordering::SeqCst), 1);
  stop.assert_async().await;
}

#[tokio::test]
async fn test_pause_transitions_push_progress_twice() {
  let mut server = Server::new_async().await;
  let _start = mock_report(&mut server, "/Sessions/Playing", 1).await;
  let progress = server
    .mock("POST", "/Sessions/Playing/Progress")
    .match_body(Matcher::PartialJson(json!({
      "ItemId": "item1",
      "PositionTicks": 125_000_000
    })))
    .with_status(204)
    .expect(2)
    .create_async()
    .await;

  let dir = tempfile::tempdir().unwrap();
  let listener = UnixListener::bind(socket_path(&dir)).unwrap();
  let _ipc = fake_ipc(
    listener,
    12.5,
    vec![None, Some(false), Some(false), Some(true), Some(true), Some(false)],
  );
  let host = Arc::new(RecordingHost::default());
  let mut tracker = PlaybackTracker::new(
    connected_client(&server),
    host.clone(),
    item(Some(10)),
    fake_player("exec sleep 5"),
  )
  .with_timings(quick_timings())
  .with_ipc_path(socket_path(&dir));

  assert_eq!(tracker.start().await, StartOutcome::Playing);
  for _ in 0..6 {
    tracker.on_liveness_tick().await;
  }

  progress.assert_async().await;
  tracker.stop_playback().await;
}

#[tokio::test]
async fn test_progress_tick_keeps_position_on_failed_read() {
  let mut server = Server::new_async().await;
  let _start = mock_report(&mut server, "/Sessions/Playing", 1).await;
  let progress = server
    .mock("POST", "/Sessions/Playing/Progress")
    .match_body(Matcher::PartialJson(json!({
      "PositionTicks": 37_500_000,
      "IsPaused": false
    })))
    .with_status(500)
    .expect(1)
    .create_async()
    .await;

  let dir = tempfile::tempdir().unwrap();
  // Bound but never answered: every property read times out.
  let _listener = UnixListener::bind(socket_path(&dir)).unwrap();
  let host = Arc::new(RecordingHost::default());
  let mut tracker = PlaybackTracker::new(
    connected_client(&server),
    host.clone(),
    item(Some(37_500_000)),
    fake_player("exec sleep 5"),
  )
  .with_timings(quick_timings())
  .with_ipc_path(socket_path(&dir));

  assert_eq!(tracker.start().await, StartOutcome::Playing);
  tracker.on_progress_tick().await;

  assert_eq!(tracker.last_position_ticks(), 37_500_000);
  assert!(host.errors().is_empty());
  progress.assert_async().await;
  tracker.stop_playback().await;
}

#[tokio::test]
async fn test_sandboxed_player_without_socket_plays_degraded() {
  let mut server = Server::new_async().await;
  let start = mock_report(&mut server, "/Sessions/Playing", 1).await;
  let progress = server
    .mock("POST", "/Sessions/Playing/Progress")
    .match_body(Matcher::PartialJson(json!({
      "PositionTicks": 37_500_000,
      "IsPaused": false
    })))
    .with_status(204)
    .expect(1)
    .create_async()
    .await;

  let dir = tempfile::tempdir().unwrap();
  let host = Arc::new(RecordingHost::default());
  let mut tracker = PlaybackTracker::new(
    connected_client(&server),
    host.clone(),
    item(Some(37_500_000)),
    PlayerSettings {
      sandboxed: Some(true),
      ..fake_player("exec sleep 5")
    },
  )
  .with_timings(quick_timings())
  .with_ipc_path(socket_path(&dir));

  assert_eq!(tracker.start().await, StartOutcome::PlayingDegraded);
  assert_eq!(tracker.phase(), Phase::Running);
  assert!(tracker.is_sandboxed());
  assert!(!tracker.ipc_available());
  assert!(host.errors().is_empty());
  assert!(host.has_status("Playing via sandboxed mpv (limited progress sync)."));
  assert_eq!(host.timers.lock().len(), 2);

  // A socket showing up later is never consulted.
  let listener = UnixListener::bind(socket_path(&dir)).unwrap();
  let accepted = Arc::new(AtomicUsize::new(0));
  let counter = accepted.clone();
  let _ipc = tokio::spawn(async move {
    while listener.accept().await.is_ok() {
      counter.fetch_add(1, Ordering::SeqCst);
    }
  });

  tracker.on_progress_tick().await;
  tracker.on_liveness_tick().await;
  tracker.stop_playback().await;
  tokio::time::sleep(Duration::from_millis(100)).await;

  assert_eq!(accepted.load(Ordering::SeqCst), 0);
  assert_eq!(tracker.last_position_ticks(), 37_500_000);
  start.assert_async().await;
  progress.assert_async().await;
}

#[tokio::test]
async fn test_stderr_released_after_window() {
  let mut server = Server::new_async().await;
  let _start = mock_report(&mut server, "/Sessions/Playing", 1).await;

  let dir = tempfile::tempdir().unwrap();
  let listener = UnixListener::bind(socket_path(&dir)).unwrap();
  let _ipc = fake_ipc(listener, 1.0, vec![Some(false)]);
  let host = Arc::new(RecordingHost::default());
  let mut tracker = PlaybackTracker::new(
    connected_client(&server),
    host.clone(),
    item(Some(10)),
    fake_player("exec sleep 5"),
  )
  .with_timings(Timings {
    stderr_window: Duration::from_secs(1),
    ..quick_timings()
  })
  .with_ipc_path(socket_path(&dir));

  assert_eq!(tracker.start().await, StartOutcome::Playing);
  tracker.on_liveness_tick().await;
  assert!(tracker.holds_stderr());

  tokio::time::sleep(Duration::from_millis(1100)).await;
  tracker.on_liveness_tick().await;
  assert!(!tracker.holds_stderr());
  assert_eq!(tracker.phase(), Phase::Running);

  tracker.stop_playback().await;
}

#[tokio::test]
async fn test_non_final_teardown_leaves_player_running() {
  let mut server = Server::new_async().await;
  let _start = mock_report(&mut server, "/Sessions/Playing", 1).await;
  let stop = mock_report(&mut server, "/Sessions/Playing/Stopped", 0).await;

  let dir = tempfile::tempdir().unwrap();
  let listener = UnixListener::bind(socket_path(&dir)).unwrap();
  let _ipc = fake_ipc(listener, 1.0, vec![Some(false)]);
  let host = Arc::new(RecordingHost::default());
  let mut tracker = PlaybackTracker::new(
    connected_client(&server),
    host.clone(),
    item(Some(10)),
    fake_player("exec sleep 5"),
  )
  .with_timings(quick_timings())
  .with_ipc_path(socket_path(&dir));

  assert_eq!(tracker.start().await, StartOutcome::Playing);
  let pid = tracker.player_pid().unwrap().to_string();

  tracker.stop(Teardown::NonFinal).await;
  tracker.stop(Teardown::Final).await;

  assert_eq!(tracker.phase(), Phase::Stopped);
  assert_eq!(tracker.player_pid(), None);
  assert_eq!(host.cancelled.lock().len(), 2);
  assert_eq!(host.refreshes.load(Ordering::SeqCst), 1);
  assert!(socket_path(&dir).exists());
  let alive = std::process::Command::new("kill")
    .args(["-0", &pid])
    .status()
    .unwrap();
  assert!(alive.success(), "player {} was stopped", pid);
  stop.assert_async().await;

  let _ = std::process::Command::new("kill").arg(&pid).status();
}

#[tokio::test]
async fn test_unresolvable_player_is_fatal() {
  let server = Server::new_async().await;
  let dir = tempfile::tempdir().unwrap();
  let host = Arc::new(RecordingHost::default());
  let mut tracker = PlaybackTracker::new(
    connected_client(&server),
    host.clone(),
    item(Some(10)),
    PlayerSettings {
      command_override: Some("/nonexistent/jellycli-test-player".to_string()),
      ..PlayerSettings::default()
    },
  )
  .with_timings(quick_timings())
  .with_ipc_path(socket_path(&dir));

  assert_eq!(tracker.start().await, StartOutcome::Failed);
  assert_eq!(tracker.phase(), Phase::Stopped);
  assert_eq!(host.errors().len(), 1);
  assert!(host.errors()[0].starts_with("Failed to launch mpv"));
}

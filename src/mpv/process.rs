//! MPV executable resolution, argument building, and process ownership.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};

/// Flatpak application id of the sandboxed MPV build.
const FLATPAK_MPV: &str = "io.mpv.Mpv";

/// How long `flatpak info` may take before we stop waiting for it.
const FLATPAK_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// How long draining the error stream may take.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

/// How long to wait for the process to go away after a kill.
const KILL_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("mpv not found; install mpv or Flatpak io.mpv.Mpv")]
  NotFound,
  #[error("Failed to launch mpv: {0}")]
  SpawnFailed(#[from] std::io::Error),
}

/// The resolved command prefix used to start the player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerCommand {
  pub program: PathBuf,
  pub args: Vec<String>,
  /// Runs inside a sandbox that may hide the control socket from us.
  pub sandboxed: bool,
}

impl PlayerCommand {
  fn native(program: PathBuf) -> Self {
    Self {
      program,
      args: Vec::new(),
      sandboxed: false,
    }
  }
}

/// Find MPV executable in common locations.
pub fn find_mpv() -> Option<PathBuf> {
  if let Ok(path) = which::which("mpv") {
    return Some(path);
  }

  #[cfg(windows)]
  {
    let common_paths = [
      r"C:\Program Files\mpv\mpv.exe",
      r"C:\Program Files (x86)\mpv\mpv.exe",
      r"C:\mpv\mpv.exe",
    ];
    for path in common_paths {
      let p = PathBuf::from(path);
      if p.exists() {
        return Some(p);
      }
    }
  }

  #[cfg(target_os = "macos")]
  {
    let common_paths = [
      "/usr/local/bin/mpv",
      "/opt/homebrew/bin/mpv",
      "/Applications/mpv.app/Contents/MacOS/mpv",
    ];
    for path in common_paths {
      let p = PathBuf::from(path);
      if p.exists() {
        return Some(p);
      }
    }
  }

  None
}

/// Parse a user-supplied command line override into a command.
///
/// Unbalanced quotes fall back to treating the whole string as the program.
pub fn parse_override(command_line: &str) -> Option<PlayerCommand> {
  let trimmed = command_line.trim();
  if trimmed.is_empty() {
    return None;
  }
  let mut words = shell_words::split(trimmed).unwrap_or_else(|e| {
    log::warn!("Could not parse mpv command override ({}), using it verbatim", e);
    vec![trimmed.to_string()]
  });
  if words.is_empty() {
    return None;
  }
  let program = PathBuf::from(words.remove(0));
  Some(PlayerCommand {
    program,
    args: words,
    sandboxed: false,
  })
}

/// Whether `flatpak info` thinks the MPV app is installed.
///
/// A probe that cannot run or answer in time counts as "maybe", and we try anyway.
async fn flatpak_has_mpv(flatpak: &Path) -> bool {
  let probe = Command::new(flatpak)
    .args(["info", FLATPAK_MPV])
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .kill_on_drop(true)
    .status();

  match tokio::time::timeout(FLATPAK_PROBE_TIMEOUT, probe).await {
    Ok(Ok(status)) => status.success(),
    Ok(Err(e)) => {
      log::debug!("flatpak probe failed to run: {}", e);
      true
    }
    Err(_) => {
      log::debug!("flatpak probe timed out");
      true
    }
  }
}

/// Resolve how to start the player: override, then native MPV, then Flatpak.
pub async fn resolve_player(override_command: Option<&str>) -> Result<PlayerCommand, ProcessError> {
  if let Some(cmd) = override_command.and_then(parse_override) {
    log::info!("Using configured mpv command: {:?} {:?}", cmd.program, cmd.args);
    return Ok(cmd);
  }

  if let Some(path) = find_mpv() {
    return Ok(PlayerCommand::native(path));
  }

  if let Ok(flatpak) = which::which("flatpak") {
    if flatpak_has_mpv(&flatpak).await {
      log::info!("Native mpv not found, using Flatpak {}", FLATPAK_MPV);
      return Ok(PlayerCommand {
        program: flatpak,
        args: vec!["run".to_string(), FLATPAK_MPV.to_string()],
        sandboxed: true,
      });
    }
  }

  Err(ProcessError::NotFound)
}

/// Everything that goes on the player command line after the program prefix.
#[derive(Debug, Clone)]
pub struct LaunchOptions<'a> {
  pub ipc_path: &'a Path,
  pub start_seconds: Option<f64>,
  pub token: &'a str,
  pub extra_args: &'a [String],
  pub url: &'a str,
}

/// Build the MPV argument vector. The stream URL is always last.
pub fn build_args(opts: &LaunchOptions<'_>) -> Vec<String> {
  let mut args = vec![
    "--really-quiet".to_string(),
    "--no-terminal".to_string(),
    "--player-operation-mode=pseudo-gui".to_string(),
    "--force-window=yes".to_string(),
    format!("--input-ipc-server={}", opts.ipc_path.display()),
  ];

  if let Some(start) = opts.start_seconds.filter(|s| *s > 0.0) {
    args.push("--hr-seek=yes".to_string());
    args.push(format!("--start={:.3}", start));
  }

  // Jellyfin's own header, plus the Emby name older servers still expect.
  args.push(format!("--http-header-fields=X-MediaBrowser-Token: {}", opts.token));
  args.push(format!("--http-header-fields=X-Emby-Token: {}", opts.token));

  args.extend(opts.extra_args.iter().cloned());
  args.push(opts.url.to_string());
  args
}

/// Whether a graphical session is available for the player window.
pub fn display_available() -> bool {
  #[cfg(all(unix, not(target_os = "macos")))]
  {
    std::env::var_os("DISPLAY").is_some() || std::env::var_os("WAYLAND_DISPLAY").is_some()
  }
  #[cfg(not(all(unix, not(target_os = "macos"))))]
  {
    true
  }
}

/// A launched player and the error stream captured for early diagnostics.
pub struct PlayerProcess {
  child: Child,
  stderr: Option<ChildStderr>,
  started_at: Instant,
}

impl PlayerProcess {
  /// Time since launch.
  pub fn elapsed(&self) -> Duration {
    self.started_at.elapsed()
  }

  /// OS process id while the process is alive.
  pub fn id(&self) -> Option<u32> {
    self.child.id()
  }

  /// Non-blocking exit check.
  pub fn has_exited(&mut self) -> bool {
    match self.child.try_wait() {
      Ok(Some(status)) => {
        log::debug!("mpv exited with: {}", status);
        true
      }
      Ok(None) => false,
      Err(e) => {
        log::warn!("Could not poll mpv process: {}", e);
        false
      }
    }
  }

  /// Whether the error stream is still held.
  pub fn has_stderr(&self) -> bool {
    self.stderr.is_some()
  }

  /// Close the error stream without reading it.
  pub fn release_stderr(&mut self) {
    if self.stderr.take().is_some() {
      log::debug!("Released mpv stderr pipe");
    }
  }

  /// Drain what is left of the error stream, release it, and return the last
  /// non-empty line.
  pub async fn last_stderr_line(&mut self) -> Option<String> {
    let mut pipe = self.stderr.take()?;
    let mut data = Vec::new();
    match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, pipe.read_to_end(&mut data)).await {
      Ok(Ok(_)) => {}
      Ok(Err(e)) => log::debug!("Reading mpv stderr failed: {}", e),
      Err(_) => log::debug!("Reading mpv stderr timed out"),
    }
    last_non_empty_line(&String::from_utf8_lossy(&data))
  }

  /// Kill the player and reap it.
  pub async fn kill(&mut self) {
    if let Err(e) = self.child.start_kill() {
      log::debug!("kill() failed: {}", e);
    }
    match tokio::time::timeout(KILL_WAIT_TIMEOUT, self.child.wait()).await {
      Ok(Ok(status)) => log::info!("MPV process exited with: {}", status),
      Ok(Err(e)) => log::error!("wait() failed: {}", e),
      Err(_) => log::warn!("MPV did not exit after kill"),
    }
  }
}

/// Last line of `text` that is not blank, trimmed.
pub fn last_non_empty_line(text: &str) -> Option<String> {
  text
    .lines()
    .map(str::trim)
    .filter(|l| !l.is_empty())
    .last()
    .map(str::to_string)
}

/// Spawn the player with stdout discarded and stderr captured.
///
/// On Unix the player gets its own process group, so terminal signals aimed
/// at us (Ctrl-C) do not reach it.
pub fn spawn_player(cmd: &PlayerCommand, args: &[String]) -> Result<PlayerProcess, ProcessError> {
  log::info!(
    "Spawning MPV: {:?} {:?} (sandboxed: {})",
    cmd.program,
    cmd.args,
    cmd.sandboxed
  );

  let mut command = Command::new(&cmd.program);
  command
    .args(&cmd.args)
    .args(args)
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::piped())
    .kill_on_drop(false);
  #[cfg(unix)]
  command.process_group(0);

  let mut child = command.spawn()?;

  let stderr = child.stderr.take();
  Ok(PlayerProcess {
    child,
    stderr,
    started_at: Instant::now(),
  })
}

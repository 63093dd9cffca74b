//! Terminal host for playback sessions, plus the bits of terminal input the
//! commands need.

use std::io::{BufRead, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use tokio::sync::mpsc;

use crate::jellyfin::{ticks_to_seconds, MediaItem};
use crate::playback::{
  PlaybackHost, StatusLevel, StatusMessage, TimerHandle, TimerRegistry, TrackerTick,
};

/// How often the cooperative loop checks for due ticks.
pub const LOOP_RESOLUTION: Duration = Duration::from_millis(100);

/// A `PlaybackHost` that prints status lines and keeps timers for the `play` loop.
#[derive(Default)]
pub struct CliHost {
  timers: TimerRegistry,
  refresh_requested: AtomicBool,
}

impl CliHost {
  pub fn new() -> Self {
    Self::default()
  }

  /// Ticks due now, in the order they fell due.
  pub fn due_ticks(&self) -> Vec<TrackerTick> {
    self.timers.due(Instant::now())
  }

  pub fn active_timers(&self) -> usize {
    self.timers.active()
  }

  /// Whether a continue-watching refresh was requested since the last call.
  pub fn take_refresh_request(&self) -> bool {
    self.refresh_requested.swap(false, Ordering::SeqCst)
  }
}

impl PlaybackHost for CliHost {
  fn set_interval(&self, every: Duration, tick: TrackerTick) -> TimerHandle {
    let handle = self.timers.add(every, tick);
    log::debug!("Timer {:?} every {:?} for {:?}", handle, every, tick);
    handle
  }

  fn cancel_interval(&self, handle: TimerHandle) {
    if !self.timers.remove(handle) {
      log::debug!("Timer {:?} was not active", handle);
    }
  }

  fn show_status(&self, status: StatusMessage) {
    if to_stderr(status.level) {
      eprintln!("{}", status);
    } else {
      println!("{}", status);
    }
  }

  fn refresh_continue_watching(&self) {
    self.refresh_requested.store(true, Ordering::SeqCst);
  }
}

/// Problems go to stderr so stdout stays clean for listings.
fn to_stderr(level: StatusLevel) -> bool {
  matches!(level, StatusLevel::Error | StatusLevel::Warning)
}

/// A command typed while something plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
  /// Stop playback and close the player.
  Quit,
}

pub fn parse_control(line: &str) -> Option<Control> {
  match line.trim().to_ascii_lowercase().as_str() {
    "q" | "quit" | "stop" => Some(Control::Quit),
    _ => None,
  }
}

/// Forward controls typed on stdin. The reader thread ends with stdin.
pub fn spawn_control_reader() -> mpsc::UnboundedReceiver<Control> {
  let (tx, rx) = mpsc::unbounded_channel();
  std::thread::spawn(move || {
    for line in std::io::stdin().lock().lines() {
      let Ok(line) = line else {
        break;
      };
      match parse_control(&line) {
        Some(control) => {
          if tx.send(control).is_err() {
            break;
          }
        }
        None => log::debug!("Ignoring input {:?}", line),
      }
    }
  });
  rx
}

/// Effect of one key press on a password being typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordKey {
  Continue,
  Done,
  Cancel,
}

pub fn apply_password_key(password: &mut String, key: &KeyEvent) -> PasswordKey {
  if key.kind == KeyEventKind::Release {
    return PasswordKey::Continue;
  }
  match key.code {
    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => PasswordKey::Cancel,
    KeyCode::Esc => PasswordKey::Cancel,
    KeyCode::Enter => PasswordKey::Done,
    KeyCode::Backspace => {
      password.pop();
      PasswordKey::Continue
    }
    KeyCode::Char(c) => {
      password.push(c);
      PasswordKey::Continue
    }
    _ => PasswordKey::Continue,
  }
}

/// Prompt for a password on stderr. On a terminal nothing typed is echoed;
/// otherwise one line is read from stdin.
pub fn read_password() -> Result<String, String> {
  eprint!("Password: ");
  let _ = std::io::stderr().flush();

  if !std::io::stdin().is_terminal() {
    let mut line = String::new();
    std::io::stdin()
      .lock()
      .read_line(&mut line)
      .map_err(|e| format!("Could not read password: {}", e))?;
    return Ok(line.trim_end_matches(['\r', '\n']).to_string());
  }

  terminal::enable_raw_mode().map_err(|e| format!("Could not read password: {}", e))?;
  let result = read_hidden();
  if let Err(e) = terminal::disable_raw_mode() {
    log::warn!("Could not restore terminal mode: {}", e);
  }
  eprintln!();
  result
}

fn read_hidden() -> Result<String, String> {
  let mut password = String::new();
  loop {
    let event = event::read().map_err(|e| format!("Could not read password: {}", e))?;
    let Event::Key(key) = event else {
      continue;
    };
    match apply_password_key(&mut password, &key) {
      PasswordKey::Continue => {}
      PasswordKey::Done => return Ok(password),
      PasswordKey::Cancel => return Err("Login cancelled".to_string()),
    }
  }
}

/// `mm:ss` or `h:mm:ss`.
pub fn format_position(ticks: i64) -> String {
  let total = ticks_to_seconds(ticks.max(0)) as u64;
  let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
  if h > 0 {
    format!("{}:{:02}:{:02}", h, m, s)
  } else {
    format!("{:02}:{:02}", m, s)
  }
}

/// One line of the continue-watching list.
pub fn resume_line(item: &MediaItem) -> String {
  let mut line = format!("{}  {}", item.id, item.display_name());
  if let Some(label) = item.episode_label() {
    line.push_str(&format!(" ({})", label));
  }
  let position = format_position(item.resume_ticks());
  match item.run_time_ticks.filter(|t| *t > 0) {
    Some(total) => line.push_str(&format!("  [{} / {}]", position, format_position(total))),
    None => line.push_str(&format!("  [{}]", position)),
  }
  line
}

//! What the hosting UI provides to a playback session.
//!
//! The host owns the event loop. It schedules recurring ticks, shows short
//! status lines, and refreshes whatever "continue watching" view it has. The
//! tracker never spawns work of its own; the host calls back into it.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Which tracker entry point a timer drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerTick {
  /// `PlaybackTracker::on_progress_tick`
  Progress,
  /// `PlaybackTracker::on_liveness_tick`
  Liveness,
}

/// Opaque id of a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
  Info,
  Success,
  Warning,
  Error,
}

/// A transient line for the host's status area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
  pub level: StatusLevel,
  pub text: String,
}

impl StatusMessage {
  pub fn info(text: impl Into<String>) -> Self {
    Self {
      level: StatusLevel::Info,
      text: text.into(),
    }
  }

  pub fn success(text: impl Into<String>) -> Self {
    Self {
      level: StatusLevel::Success,
      text: text.into(),
    }
  }

  pub fn warning(text: impl Into<String>) -> Self {
    Self {
      level: StatusLevel::Warning,
      text: text.into(),
    }
  }

  pub fn error(text: impl Into<String>) -> Self {
    Self {
      level: StatusLevel::Error,
      text: text.into(),
    }
  }
}

impl fmt::Display for StatusMessage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let tag = match self.level {
      StatusLevel::Info => "info",
      StatusLevel::Success => "ok",
      StatusLevel::Warning => "warn",
      StatusLevel::Error => "error",
    };
    write!(f, "[{}] {}", tag, self.text)
  }
}

/// Capabilities a playback session needs from its host.
pub trait PlaybackHost: Send + Sync {
  /// Start invoking `tick` every `every` until cancelled.
  fn set_interval(&self, every: Duration, tick: TrackerTick) -> TimerHandle;

  /// Stop a timer. Unknown or already cancelled handles are ignored.
  fn cancel_interval(&self, handle: TimerHandle);

  /// Show a transient status line.
  fn show_status(&self, status: StatusMessage);

  /// Re-fetch anything that displays resume points.
  fn refresh_continue_watching(&self);
}

struct Timer {
  tick: TrackerTick,
  every: Duration,
  next_due: Instant,
}

/// Recurring-timer bookkeeping for a cooperative loop.
///
/// The loop asks for `due` ticks on each turn and dispatches them in order.
#[derive(Default)]
pub struct TimerRegistry {
  inner: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
  next_id: u64,
  timers: HashMap<TimerHandle, Timer>,
}

impl TimerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a timer whose first tick is one period from now.
  pub fn add(&self, every: Duration, tick: TrackerTick) -> TimerHandle {
    let mut state = self.inner.lock();
    state.next_id += 1;
    let handle = TimerHandle(state.next_id);
    state.timers.insert(
      handle,
      Timer {
        tick,
        every,
        next_due: Instant::now() + every,
      },
    );
    handle
  }

  /// Remove a timer. Returns whether it was active.
  pub fn remove(&self, handle: TimerHandle) -> bool {
    self.inner.lock().timers.remove(&handle).is_some()
  }

  /// Number of active timers.
  pub fn active(&self) -> usize {
    self.inner.lock().timers.len()
  }

  /// Ticks due at `now`, each rescheduled one period later.
  ///
  /// A timer that fell behind fires once, not once per missed period.
  pub fn due(&self, now: Instant) -> Vec<TrackerTick> {
    let mut state = self.inner.lock();
    let mut due: Vec<(Instant, TrackerTick)> = Vec::new();
    for timer in state.timers.values_mut() {
      if timer.next_due <= now {
        due.push((timer.next_due, timer.tick));
        timer.next_due = now + timer.every;
      }
    }
    due.sort_by_key(|(at, _)| *at);
    due.into_iter().map(|(_, tick)| tick).collect()
  }
}

//! Session lifecycle and pause-edge detection.

/// Where a playback session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  /// Created, player not yet confirmed ready.
  AwaitingReady,
  /// Player ready, timers registered.
  Running,
  /// Torn down. Terminal.
  Stopped,
}

/// Why a session is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
  /// Playback ended (player exited or was stopped): report "stop".
  Final,
  /// The host went away while the player may still be playing: no "stop".
  NonFinal,
}

/// What a teardown has to do, decided once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownPlan {
  pub send_stop: bool,
}

/// Phase plus the bookkeeping the reporting rules depend on.
#[derive(Debug)]
pub struct Lifecycle {
  phase: Phase,
  start_attempted: bool,
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self::new()
  }
}

impl Lifecycle {
  pub fn new() -> Self {
    Self {
      phase: Phase::AwaitingReady,
      start_attempted: false,
    }
  }

  pub fn phase(&self) -> Phase {
    self.phase
  }

  pub fn is_running(&self) -> bool {
    self.phase == Phase::Running
  }

  pub fn start_attempted(&self) -> bool {
    self.start_attempted
  }

  /// `AwaitingReady -> Running`. Any other starting phase is left alone.
  pub fn mark_running(&mut self) -> bool {
    if self.phase == Phase::AwaitingReady {
      self.phase = Phase::Running;
      true
    } else {
      false
    }
  }

  /// Note that a "start" report went out (whether or not it arrived).
  pub fn record_start_attempt(&mut self) {
    self.start_attempted = true;
  }

  /// Enter `Stopped`. Only the first call gets a plan; later calls get `None`.
  pub fn begin_teardown(&mut self, kind: Teardown) -> Option<TeardownPlan> {
    if self.phase == Phase::Stopped {
      return None;
    }
    self.phase = Phase::Stopped;
    Some(TeardownPlan {
      send_stop: kind == Teardown::Final && self.start_attempted,
    })
  }
}

/// Tracks the player's pause flag and reports changes.
#[derive(Debug, Default)]
pub struct PauseEdge {
  last: Option<bool>,
}

impl PauseEdge {
  pub fn last(&self) -> Option<bool> {
    self.last
  }

  /// Feed one reading. Returns the new value when it differs from the last
  /// known one. Unknown readings and the first known reading report nothing.
  pub fn observe(&mut self, reading: Option<bool>) -> Option<bool> {
    let paused = reading?;
    match self.last.replace(paused) {
      Some(previous) if previous != paused => Some(paused),
      _ => None,
    }
  }
}

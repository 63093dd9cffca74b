//! Failure policy for every external call a playback session makes.

use std::fmt;

/// What a failure at a call site means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPolicy {
  /// The session cannot start. Surface an error, launch nothing.
  Fatal,
  /// Tear the launched player session down (non-final) and surface stderr.
  Abort,
  /// Continue with a fallback value, possibly with a notice.
  Degrade,
  /// Log and carry on. The user never sees it.
  Silent,
}

/// Every external interaction of a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSite {
  ResolvePlayer,
  LaunchPlayer,
  ReadinessWait { sandboxed: bool },
  FetchItem,
  PlaybackInfo,
  ReportStart,
  ReportProgress,
  ReportStop,
  PropertyRead,
}

impl CallSite {
  pub const fn policy(self) -> CallPolicy {
    match self {
      CallSite::ResolvePlayer | CallSite::LaunchPlayer => CallPolicy::Fatal,
      CallSite::ReadinessWait { sandboxed: true } => CallPolicy::Degrade,
      CallSite::ReadinessWait { sandboxed: false } => CallPolicy::Abort,
      CallSite::FetchItem | CallSite::PlaybackInfo => CallPolicy::Degrade,
      CallSite::ReportStart
      | CallSite::ReportProgress
      | CallSite::ReportStop
      | CallSite::PropertyRead => CallPolicy::Silent,
    }
  }
}

impl fmt::Display for CallSite {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      CallSite::ResolvePlayer => "resolve player",
      CallSite::LaunchPlayer => "launch player",
      CallSite::ReadinessWait { .. } => "wait for player",
      CallSite::FetchItem => "fetch item detail",
      CallSite::PlaybackInfo => "request playback info",
      CallSite::ReportStart => "report playback start",
      CallSite::ReportProgress => "report playback progress",
      CallSite::ReportStop => "report playback stop",
      CallSite::PropertyRead => "read player property",
    };
    f.write_str(name)
  }
}

/// Log a failure according to its site's policy and turn it into `None`.
///
/// Only for sites whose failures do not end the session; the fatal and abort
/// paths have their own user-visible handling.
pub fn settle<T, E: fmt::Display>(site: CallSite, result: Result<T, E>) -> Option<T> {
  match result {
    Ok(value) => Some(value),
    Err(e) => {
      match site.policy() {
        CallPolicy::Silent if site == CallSite::PropertyRead => {
          log::debug!("{} failed: {}", site, e)
        }
        CallPolicy::Silent => log::warn!("{} failed (ignored): {}", site, e),
        CallPolicy::Degrade => log::warn!("{} failed, using fallback: {}", site, e),
        CallPolicy::Fatal | CallPolicy::Abort => log::error!("{} failed: {}", site, e),
      }
      None
    }
  }
}

//! Playback session coordination.
//!
//! - `tracker.rs` - the per-item session: launch, reports, liveness, teardown
//! - `host.rs` - what the UI shell provides (timers, status line, refresh)
//! - `phase.rs` - lifecycle states and pause-edge detection
//! - `policy.rs` - failure policy per external call
//! - `stream.rs` - stream URL selection

pub mod host;
mod phase;
mod policy;
mod stream;
mod tracker;

pub use host::{PlaybackHost, StatusLevel, StatusMessage, TimerHandle, TimerRegistry, TrackerTick};
pub use phase::{Lifecycle, PauseEdge, Phase, Teardown, TeardownPlan};
pub use policy::{settle, CallPolicy, CallSite};
pub use stream::{build_stream_url, redact_url, StreamRequest, StreamUrl};
pub use tracker::{PlaybackTracker, PlayerSettings, StartOutcome, Timings};

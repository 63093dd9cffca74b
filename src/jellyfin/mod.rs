//! Jellyfin API client module.
//!
//! Handles authentication, item lookup, and playback reporting.

mod client;
mod error;
mod types;

pub use client::{JellyfinClient, REQUEST_TIMEOUT};
pub use error::JellyfinError;
pub use types::*;

//! MPV module - spawns the external MPV player and queries it over JSON IPC.
//!
//! Architecture:
//! - `process.rs` - MPV binary resolution, argument building, and process ownership
//! - `ipc.rs` - One-shot IPC exchanges (Unix sockets, Named Pipes on Windows)
//! - `protocol.rs` - JSON command/response types and serialization

pub mod ipc;
pub mod process;
mod protocol;

pub use process::{PlayerCommand, PlayerProcess, ProcessError};
pub use protocol::{MpvCommand, MpvResponse};

//! One-shot IPC exchanges with a running MPV.
//!
//! Every call opens its own connection, sends a single command, and reads the
//! reply under a short timeout. A failed read is an error, never a zero or
//! `false` reading; callers settle it as "no new information".

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use super::protocol::{MpvCommand, MpvResponse};

/// Upper bound for one property exchange.
pub const PROPERTY_TIMEOUT: Duration = Duration::from_millis(300);

/// Upper bound for a readiness probe.
const PROBE_TIMEOUT: Duration = Duration::from_millis(200);

const READ_CHUNK: usize = 4096;

#[derive(Error, Debug)]
pub enum IpcError {
  #[error("Connection failed: {0}")]
  ConnectionFailed(#[source] std::io::Error),
  #[error("I/O failed: {0}")]
  Io(#[from] std::io::Error),
  #[error("Encoding failed: {0}")]
  Encode(#[from] serde_json::Error),
  #[error("Command timeout")]
  Timeout,
  #[error("No usable reply for {0}")]
  NoAnswer(&'static str),
}

/// A fresh, process-unique control channel address for one playback session.
pub fn ipc_path() -> PathBuf {
  #[cfg(windows)]
  {
    PathBuf::from(format!(r"\\.\pipe\jellycli-mpv-{}", Uuid::new_v4().simple()))
  }
  #[cfg(not(windows))]
  {
    std::env::temp_dir().join(format!("jellycli-mpv-{}.sock", Uuid::new_v4().simple()))
  }
}

/// Remove a leftover socket file. Windows named pipes vanish on their own.
pub fn cleanup_ipc(path: &Path) {
  #[cfg(not(windows))]
  {
    let _ = std::fs::remove_file(path);
  }
  #[cfg(windows)]
  {
    let _ = path;
  }
}

#[cfg(not(windows))]
async fn connect(path: &Path) -> Result<tokio::net::UnixStream, IpcError> {
  tokio::net::UnixStream::connect(path)
    .await
    .map_err(IpcError::ConnectionFailed)
}

#[cfg(windows)]
async fn connect(
  path: &Path,
) -> Result<tokio::net::windows::named_pipe::NamedPipeClient, IpcError> {
  tokio::net::windows::named_pipe::ClientOptions::new()
    .open(path)
    .map_err(IpcError::ConnectionFailed)
}

/// Whether MPV accepts connections on its control channel yet.
pub async fn is_ready(path: &Path) -> bool {
  matches!(tokio::time::timeout(PROBE_TIMEOUT, connect(path)).await, Ok(Ok(_)))
}

/// Write one command and collect bytes until a line ends or the peer closes.
async fn exchange<S>(stream: &mut S, cmd: &MpvCommand) -> Result<Vec<u8>, IpcError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  stream.write_all(&cmd.to_line()?).await?;
  stream.flush().await?;

  let mut data = Vec::new();
  let mut chunk = [0u8; READ_CHUNK];
  loop {
    let n = stream.read(&mut chunk).await?;
    if n == 0 {
      break;
    }
    data.extend_from_slice(&chunk[..n]);
    if chunk[..n].contains(&b'\n') {
      break;
    }
  }
  Ok(data)
}

async fn request(path: &Path, cmd: &MpvCommand) -> Result<Vec<u8>, IpcError> {
  let attempt = async {
    let mut stream = connect(path).await?;
    exchange(&mut stream, cmd).await
  };
  tokio::time::timeout(PROPERTY_TIMEOUT, attempt)
    .await
    .map_err(|_| IpcError::Timeout)?
}

/// Read a property. A reply without matching data is `NoAnswer`.
pub async fn get_property(path: &Path, name: &'static str) -> Result<serde_json::Value, IpcError> {
  let cmd = MpvCommand::get_property(name);
  let raw = request(path, &cmd).await?;
  MpvResponse::from_last_line(&raw, cmd.request_id)
    .and_then(|r| r.data)
    .ok_or(IpcError::NoAnswer(name))
}

/// Current playback position in seconds.
pub async fn get_time_pos(path: &Path) -> Result<f64, IpcError> {
  get_property(path, "time-pos")
    .await?
    .as_f64()
    .ok_or(IpcError::NoAnswer("time-pos"))
}

/// Current pause flag.
pub async fn get_pause(path: &Path) -> Result<bool, IpcError> {
  get_property(path, "pause")
    .await?
    .as_bool()
    .ok_or(IpcError::NoAnswer("pause"))
}

/// Ask MPV to quit. Best effort: the reply is not awaited.
pub async fn send_quit(path: &Path) {
  let cmd = MpvCommand::quit();
  let attempt = async {
    let mut stream = connect(path).await?;
    stream.write_all(&cmd.to_line()?).await?;
    stream.flush().await?;
    Ok::<_, IpcError>(())
  };
  match tokio::time::timeout(PROPERTY_TIMEOUT, attempt).await {
    Ok(Ok(())) => log::info!("Sent quit to MPV"),
    Ok(Err(e)) => log::debug!("IPC quit failed: {}", e),
    Err(_) => log::debug!("IPC quit timed out"),
  }
}

//! Command handlers behind the CLI subcommands.

use std::path::Path;
use std::sync::Arc;

use crate::cli::{self, CliHost, Control, LOOP_RESOLUTION};
use crate::config::AppConfig;
use crate::jellyfin::{Credentials, JellyfinClient};
use crate::playback::{
  Phase, PlaybackHost, PlaybackTracker, PlayerSettings, StartOutcome, StatusMessage, Teardown,
  Timings, TrackerTick,
};

/// Log in with a password and persist the session.
pub async fn login(
  config_path: &Path,
  server_url: Option<String>,
  username: String,
  password: Option<String>,
) -> Result<(), String> {
  let mut config = AppConfig::load(config_path).map_err(|e| e.to_string())?;
  let server_url = server_url
    .or_else(|| config.server_url.clone())
    .ok_or("No server URL given and none saved; pass --server")?;
  let password = match password {
    Some(password) => password,
    None => cli::read_password()?,
  };

  let client = JellyfinClient::new();
  client.set_device_name(config.device_name.clone());
  let auth = client
    .authenticate(&Credentials {
      server_url: server_url.clone(),
      username,
      password,
    })
    .await
    .map_err(|e| e.to_string())?;

  config.server_url = Some(server_url);
  config.session = client.get_saved_session();
  config.save(config_path).map_err(|e| e.to_string())?;

  match client.server_name() {
    Some(name) => println!("Logged in as {} on {}", auth.user.name, name),
    None => println!("Logged in as {}", auth.user.name),
  }
  Ok(())
}

/// Forget the saved session.
pub fn logout(config_path: &Path) -> Result<(), String> {
  let mut config = AppConfig::load(config_path).map_err(|e| e.to_string())?;
  if config.session.take().is_none() {
    println!("Not logged in");
    return Ok(());
  }
  config.save(config_path).map_err(|e| e.to_string())?;
  println!("Logged out");
  Ok(())
}

/// List the continue-watching items.
pub async fn resume(config_path: &Path) -> Result<(), String> {
  let config = AppConfig::load(config_path).map_err(|e| e.to_string())?;
  let client = connect(&config).await?;
  print_continue_watching(&client).await
}

/// Play one item until MPV exits, the user quits it (`q`), or Ctrl-C leaves
/// it playing on its own.
pub async fn play(config_path: &Path, item_id: &str) -> Result<(), String> {
  let config = AppConfig::load(config_path).map_err(|e| e.to_string())?;
  let client = connect(&config).await?;
  let item = client.get_item(item_id).await.map_err(|e| e.to_string())?;

  let host = Arc::new(CliHost::new());
  let mut tracker = PlaybackTracker::new(
    client.clone(),
    host.clone() as Arc<dyn PlaybackHost>,
    item,
    PlayerSettings::from_config(&config),
  )
  .with_timings(Timings::from_config(&config));

  if tracker.start().await == StartOutcome::Failed {
    return Err("Playback did not start".to_string());
  }

  host.show_status(StatusMessage::info(
    "Type q and Enter to stop playback; Ctrl-C leaves mpv playing",
  ));

  let mut poll = tokio::time::interval(LOOP_RESOLUTION);
  let mut controls = cli::spawn_control_reader();
  let ctrl_c = tokio::signal::ctrl_c();
  tokio::pin!(ctrl_c);

  loop {
    tokio::select! {
      _ = &mut ctrl_c => {
        host.show_status(StatusMessage::info("Leaving mpv running; progress sync stopped"));
        tracker.stop(Teardown::NonFinal).await;
        break;
      }
      Some(control) = controls.recv() => match control {
        Control::Quit => {
          host.show_status(StatusMessage::info("Stopping playback"));
          tracker.stop_playback().await;
          break;
        }
      },
      _ = poll.tick() => {
        for tick in host.due_ticks() {
          match tick {
            TrackerTick::Progress => tracker.on_progress_tick().await,
            TrackerTick::Liveness => tracker.on_liveness_tick().await,
          }
        }
        if tracker.phase() == Phase::Stopped {
          break;
        }
      }
    }
  }

  if host.take_refresh_request() {
    if let Err(e) = print_continue_watching(&client).await {
      log::warn!("Could not refresh continue watching: {}", e);
    }
  }
  Ok(())
}

/// Restore the saved session into a fresh client.
async fn connect(config: &AppConfig) -> Result<Arc<JellyfinClient>, String> {
  let session = config
    .session
    .as_ref()
    .ok_or("Not logged in; run `jellycli login` first")?;
  let client = JellyfinClient::new();
  client.set_device_name(config.device_name.clone());
  client
    .restore_session(session)
    .await
    .map_err(|e| e.to_string())?;
  Ok(Arc::new(client))
}

async fn print_continue_watching(client: &JellyfinClient) -> Result<(), String> {
  let items = client.get_resume_items().await.map_err(|e| e.to_string())?;
  if items.is_empty() {
    println!("Nothing to continue");
    return Ok(());
  }
  println!("Continue watching:");
  for item in &items {
    println!("  {}", cli::resume_line(item));
  }
  Ok(())
}

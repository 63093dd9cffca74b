use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

pub mod cli;
mod command;
pub mod config;
pub mod jellyfin;
pub mod mpv;
pub mod playback;

pub use config::AppConfig;

/// Terminal Jellyfin client that plays through mpv.
#[derive(Parser, Debug)]
#[command(name = "jellycli", version, about)]
struct Args {
  /// Config file (defaults to <config dir>/jellycli/config.json)
  #[arg(long, global = true, env = "JELLYCLI_CONFIG")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
  /// Log in with a username and password and save the session
  Login {
    /// Server URL, e.g. http://media.local:8096
    #[arg(long)]
    server: Option<String>,
    #[arg(long, short)]
    username: String,
    /// Prompted for (without echo) when omitted
    #[arg(long, env = "JELLYCLI_PASSWORD", hide_env_values = true)]
    password: Option<String>,
  },
  /// Forget the saved session
  Logout,
  /// List items in progress
  Resume,
  /// Play an item in mpv and sync progress until it exits
  Play {
    item_id: String,
  },
}

pub fn run() -> ExitCode {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("jellycli=info")),
    )
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  let config_path = match args.config {
    Some(path) => Ok(path),
    None => AppConfig::default_path(),
  };
  let config_path = match config_path {
    Ok(path) => path,
    Err(e) => {
      eprintln!("{}", e);
      return ExitCode::FAILURE;
    }
  };

  let runtime = match tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
  {
    Ok(runtime) => runtime,
    Err(e) => {
      eprintln!("Failed to start runtime: {}", e);
      return ExitCode::FAILURE;
    }
  };

  let result = runtime.block_on(async {
    match args.command {
      Commands::Login {
        server,
        username,
        password,
      } => command::login(&config_path, server, username, password).await,
      Commands::Logout => command::logout(&config_path),
      Commands::Resume => command::resume(&config_path).await,
      Commands::Play { item_id } => command::play(&config_path, &item_id).await,
    }
  });

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      eprintln!("Error: {}", e);
      ExitCode::FAILURE
    }
  }
}

//! Savesync
//!
//! Launches a game against the freshest copy of its save data and keeps
//! every configured save location updated while it runs.

#![forbid(unsafe_code)]

mod commands;
mod settings;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use savesync_core::{FileConfig, LogConfig, init_logging};
use settings::Settings;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Parser)]
#[command(name = "savesync")]
#[command(author, version, about = "Launch a game against the freshest copy of its saves")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    launch: LaunchArgs,

    /// Config file (default: <config dir>/savesync/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error, quiet
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the game (default)
    Launch(LaunchArgs),

    /// Remove the game installation and the bundled rclone binary
    ///
    /// The rclone config file is kept.
    Clean {
        /// Installation directory to remove
        #[arg(long)]
        install_path: Option<PathBuf>,
    },

    /// Run the rclone configuration wizard
    Auth {
        /// rclone binary
        #[arg(long)]
        rclone: Option<PathBuf>,

        /// rclone config file
        #[arg(long)]
        rclone_config: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct LaunchArgs {
    /// Save location: path[|interval_seconds[|sync_on_exit]]. Repeatable;
    /// the first one is the primary.
    #[arg(long = "target", value_name = "SPEC")]
    pub targets: Vec<String>,

    /// Sync every target on exit unless its spec says otherwise
    #[arg(long)]
    pub sync_on_exit: bool,

    /// Game executable
    #[arg(long)]
    pub executable: Option<PathBuf>,

    /// Argument passed to the game. Repeatable.
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Game installation directory, used as its working directory
    #[arg(long)]
    pub install_path: Option<PathBuf>,

    /// The game's real save directory
    #[arg(long)]
    pub data_path: Option<PathBuf>,

    /// Home directory the save directory lives under
    #[arg(long = "home")]
    pub home_dir: Option<PathBuf>,

    /// Swap the real save directory instead of sandboxing the game
    #[arg(long)]
    pub no_isolate: bool,

    /// Quiet period before watch-mode targets are synced
    #[arg(long, value_name = "MS")]
    pub debounce_ms: Option<u64>,

    /// Instance lock file
    #[arg(long, value_name = "FILE")]
    pub lock_file: Option<PathBuf>,

    /// rclone binary
    #[arg(long)]
    pub rclone: Option<PathBuf>,

    /// rclone config file
    #[arg(long, value_name = "FILE")]
    pub rclone_config: Option<PathBuf>,

    /// Retries passed to rclone copies
    #[arg(long, value_name = "N")]
    pub rclone_retries: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(FileConfig::default_path);
    let file = match &config_path {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let default_level = file.log_level.clone().unwrap_or_else(|| "info".to_string());
    let mut log_config = LogConfig::from_env(&default_level);
    if let Some(level) = &cli.log_level {
        log_config = log_config.with_level(level.to_ascii_lowercase());
    }
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;
    if let Some(path) = &config_path {
        debug!("Config file: {}", path.display());
    }

    let quiet = matches!(log_config.level.as_str(), "quiet" | "off");
    match cli.command.unwrap_or(Commands::Launch(cli.launch)) {
        Commands::Launch(args) => {
            let settings = Settings::resolve(file, &args, quiet)?;
            commands::launch(&settings, CancellationToken::new()).await
        }
        Commands::Clean { install_path } => {
            let args = LaunchArgs {
                install_path,
                ..LaunchArgs::default()
            };
            let settings = Settings::resolve(file, &args, quiet)?;
            commands::clean(&settings)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Auth {
            rclone,
            rclone_config,
        } => {
            let args = LaunchArgs {
                rclone,
                rclone_config,
                ..LaunchArgs::default()
            };
            let settings = Settings::resolve(file, &args, quiet)?;
            commands::auth(&settings).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

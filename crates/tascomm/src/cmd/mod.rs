use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod game;
pub mod studio;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a headless studio and print the game's playback state.
    Studio(StudioArgs),
    /// Run a simulated game that publishes advancing playback state.
    Game(GameArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Studio(args) => studio::run(args, format),
        Command::Game(args) => game::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct StudioArgs {
    /// Socket path to bind.
    #[arg(env = "TASCOMM_SOCKET")]
    pub socket: PathBuf,
    /// TAS file announced to the game.
    #[arg(long = "path", value_name = "FILE")]
    pub tas_path: Option<String>,
    /// Exit after printing N snapshots.
    #[arg(long)]
    pub count: Option<usize>,
    /// Ask the game once the link is ready, as KIND or KIND:ARG (e.g.
    /// `mod-info`, `setting-value:"CenterCamera"`).
    #[arg(long, value_name = "QUERY")]
    pub query: Option<String>,
    /// Give up when not done within this time (e.g. 30s, 500ms).
    #[arg(long)]
    pub timeout: Option<String>,
    /// Drop the link when the game says nothing for this long.
    #[arg(long, default_value = "10s")]
    pub idle_timeout: String,
}

#[derive(Args, Debug)]
pub struct GameArgs {
    /// Socket path to connect to.
    #[arg(env = "TASCOMM_SOCKET")]
    pub socket: PathBuf,
    /// Snapshots published per second.
    #[arg(long, default_value = "60")]
    pub fps: u32,
    /// Exit after publishing N snapshots. Runs until interrupted when unset.
    #[arg(long)]
    pub frames: Option<u32>,
    /// Version announced to the studio.
    #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
    pub game_version: String,
    /// Oldest studio version accepted.
    #[arg(long, default_value = "0.1")]
    pub min_studio_version: String,
    /// Level name reported in every snapshot.
    #[arg(long, default_value = "1A")]
    pub level: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Run `on_interrupt` on Ctrl-C.
pub fn install_ctrlc_handler(on_interrupt: impl FnMut() + Send + 'static) -> CliResult<()> {
    ctrlc::set_handler(on_interrupt)
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

//! Desktop pet parameter engine host.
//!
//! Drives a rigged character's parameters headlessly: idle motion, breathing, recorded
//! expressions and audio-driven lip sync, with speech played through CPAL.
//!
//! ## Modes
//! - `run`: JSON-lines commands on stdin, JSON-lines events on stdout.
//! - `say`: speak WAV files with lip sync, then exit.
//! - `play-expression`: play one recorded track and exit once the pose has settled.
//!
//! Logs go to stderr so stdout stays machine-readable.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pet::cli::{Args, Command};
use pet::config::PetConfig;
use pet::runtime::{self, RuntimeOptions};

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,pet=info,pet_engine=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let cfg = PetConfig::from_args(&args)?;
    let opts = RuntimeOptions {
        headless: args.headless,
        frames: args.frames.clone(),
    };
    let shutdown = runtime::install_shutdown_handler()?;

    match args.command() {
        Command::Run => runtime::run_commands(&cfg, &opts, shutdown),
        Command::Say { files, expression } => {
            runtime::run_say(&cfg, &opts, &files, expression.as_deref(), shutdown)
        }
        Command::PlayExpression { name } => {
            runtime::run_play_expression(&cfg, &opts, &name, shutdown)
        }
    }
}

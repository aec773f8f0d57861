use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pet", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Path to the pet config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Drain speech on a timer instead of opening an output device
    #[arg(long)]
    pub headless: bool,

    /// Speech operating sample rate in Hz (the device rate wins when they differ)
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Samples per output block (one loudness update per block)
    #[arg(long)]
    pub block_frames: Option<usize>,

    /// Seed for idle behavior, for reproducible runs
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write every blended parameter frame as JSON lines to this file ("-" for stdout)
    #[arg(long)]
    pub frames: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Read JSON-lines commands from stdin and report events on stdout (default)
    Run,

    /// Speak WAV files in order with lip sync
    Say {
        /// WAV files to play
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Expression to show while speaking
        #[arg(long)]
        expression: Option<String>,
    },

    /// Play a recorded expression track and exit when the pose has settled
    PlayExpression {
        /// Registered expression name
        name: String,
    },
}

impl Args {
    pub fn command(&self) -> Command {
        self.cmd.clone().unwrap_or(Command::Run)
    }
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::UserId;

#[derive(Debug, Parser)]
#[command(
    name = "snd-live",
    about = "Real-time chat and notification delivery client"
)]
pub struct Cli {
    /// Path to config file (default: ./config.toml, then the user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Identity to act as (overrides [session] identity)
    #[arg(short, long, global = true)]
    pub identity: Option<UserId>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Open a live session and log events until Ctrl-C
    Listen,
    /// Feed recorded frames (one JSON object per line) through the router
    Replay {
        /// JSON lines file of raw push frames
        frames: PathBuf,
    },
}

impl Cli {
    pub fn command_or_default(&self) -> Command {
        self.command.clone().unwrap_or(Command::Listen)
    }
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "session-demo", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Optional session config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a video through simulated engines and walk through the presentation modes
    Play {
        /// Source URL handed to the engine
        url: String,

        /// Simulated media duration in milliseconds
        #[arg(long, default_value_t = 20_000)]
        duration_ms: u64,

        /// Cast to a simulated receiver halfway through
        #[arg(long)]
        cast: bool,

        /// Title shown in logs and sent to the receiver
        #[arg(long)]
        title: Option<String>,
    },
}

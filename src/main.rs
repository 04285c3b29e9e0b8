// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "omxcam")]
#[command(about = "Camera-to-H.264 capture through an OpenMAX-style media core")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record H.264 video
    Record {
        /// Recording duration in seconds
        #[arg(short, long, default_value = "3")]
        duration: u64,

        /// Output file path (default: video_TIMESTAMP.h264)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// JSON config file; absent keys keep their defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the default configuration as JSON
    Defaults,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=omxcam=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Record {
            duration,
            output,
            config,
        } => cli::record(duration, output, config),
        Commands::Defaults => cli::print_defaults(),
    }
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vintagecast")]
#[command(author, version, about = "Background transcoding and thumbnailing for vintage media devices")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the background workers until interrupted
    Serve {
        /// Media root to serve and crawl (overrides config)
        media_root: Option<PathBuf>,
    },

    /// Transcode every video in a folder for the device, then exit
    Batch {
        /// Folder whose videos should be transcoded
        #[arg(required = true)]
        folder: PathBuf,
    },

    /// Delete every cached artifact and the cache index
    Purge,

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render a job described by a JSON payload file
    Render {
        /// Path to the job payload (JSON)
        #[arg(short, long)]
        job: PathBuf,

        /// Disable the terminal progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Probe GPU encoder availability and print the result
    Probe,

    /// Write a default configuration file
    InitConfig {
        /// Destination path
        #[arg(short, long, default_value = "config.toml")]
        path: PathBuf,
    },
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "callwatch")]
#[command(
    about = "Records calls of communication clients automatically",
    long_about = None
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use this configuration file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum CliCommand {
    /// Show current recordings of the running service
    Status,
    /// Start recording the first matching client right away
    Start,
    /// Stop every recording right away
    Stop,
    /// Make the running service re-read its configuration file
    Reload,
    /// Dump audio devices and sessions as the service sees them
    Sessions,
    /// Print version information
    Version,
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// smc_fand: temperature-driven fan control daemon for Mac SMC hardware
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file path (default: standard locations, then built-in defaults)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Target temperature in °C, overrides the config file
    #[arg(short = 't', long = "target", global = true)]
    pub target: Option<f32>,

    /// Log per-tick detail
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Detach from the terminal (run only)
    #[arg(short = 'd', long = "daemonize", global = true)]
    pub daemonize: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Run the control loop until stopped (default)
    Run,
    /// Sample once and print the snapshot as JSON
    Status,
    /// Force one fan to a fixed speed
    SetSpeed {
        /// Fan index, starting at 0
        fan: usize,
        rpm: u32,
    },
    /// Hand every fan back to automatic control
    Auto,
}

impl Cli {
    pub fn action(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run)
    }
}

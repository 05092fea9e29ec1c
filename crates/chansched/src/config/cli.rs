use clap::{Parser, Subcommand};

use crate::config::daemon::DaemonArgs;
use crate::config::sim::SimulateArgs;

#[derive(Parser)]
#[command(about, long_about = None, version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the channel allocation daemon
    Daemon(Box<DaemonArgs>),
    /// Run the offline closed-loop fairness simulation
    Simulate(SimulateArgs),
}

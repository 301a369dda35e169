//! Commandline argument parser using clap for ArduFSM

use crate::config::SessionConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
/// Arguments of the `ardufsm` binary.
pub struct ArduArgs {
    #[command(subcommand)]
    /// Which task to perform: a real session, a simulated one, or printing
    /// a configuration template
    pub command: CommandTask,

    /// Rig configuration file, in ron. Defaults apply if absent
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Serial port of the rig, overriding the configuration file
    #[arg(short, long)]
    pub port: Option<String>,

    /// Baud rate, overriding the configuration file
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Where to log device output, overriding the configuration file
    #[arg(short, long)]
    pub logfile: Option<PathBuf>,
}

#[derive(Debug, Subcommand, Clone)]
/// What `ardufsm` should do.
pub enum CommandTask {
    /// Run a session against a rig
    #[command(about)]
    Run(RunCommand),

    /// Run a session against a simulated rig
    #[command(about)]
    Simulate(SimulateCommand),

    /// Print the effective configuration as ron and exit
    #[command(about)]
    PrintConfig,
}

#[derive(Debug, Args, Clone)]
/// Options for a session against a rig.
pub struct RunCommand {
    /// Stop after this many trials instead of showing the session monitor
    #[arg(long)]
    pub headless: Option<usize>,

    /// Print device output to stdout (headless only)
    #[arg(long)]
    pub echo: bool,
}

#[derive(Debug, Args, Clone)]
/// Options for a session against the simulated rig.
pub struct SimulateCommand {
    /// Number of trials to run
    #[arg(short = 'n', long, default_value_t = 50)]
    pub trials: usize,

    /// Probability that the simulated animal chooses correctly
    #[arg(long, default_value_t = 0.8)]
    pub hit_rate: f64,

    /// Device reads between the release of a trial and its outcome
    #[arg(long, default_value_t = 5)]
    pub reads_per_trial: u32,

    /// Seed for the simulated animal
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print device output to stdout
    #[arg(long)]
    pub echo: bool,
}

impl ArduArgs {
    /// Apply the commandline overrides to `config`.
    pub fn apply(&self, config: &mut SessionConfig) {
        if let Some(port) = &self.port {
            config.serial_port = Some(port.clone());
        }
        if let Some(baud) = self.baud {
            config.baud_rate = baud;
        }
        if let Some(logfile) = &self.logfile {
            config.logfile = Some(logfile.clone());
        }
    }
}

/// Arguments of the offline `monitor` binary.
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct MonitorArgs {
    /// Session logfile to summarize
    pub logfile: PathBuf,

    /// Also print one row per trial
    #[arg(short, long)]
    pub trials: bool,
}

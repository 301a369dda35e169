use ardufsm::{
    args::{ArduArgs, CommandTask, RunCommand, SimulateCommand},
    config::SessionConfig,
    device::{available_ports, Device},
    dummy_device::DummyDevice,
    error::{ArduError, Result},
    gui::{device_selector, monitor_session},
    session::Session,
};
use clap::Parser;
use log::{error, info};
use std::{
    io,
    process::ExitCode,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

// Example:
// RUST_LOG=info cargo run --bin ardufsm -- --config config/rig_L1.ron run
// cargo run --bin ardufsm -- simulate -n 20 --hit-rate 0.7

fn main() -> ExitCode {
    env_logger::init();
    let args = ArduArgs::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("ardufsm: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &ArduArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None if matches!(args.command, CommandTask::Simulate(_)) => SessionConfig::simulation(),
        None => SessionConfig::default(),
    };
    args.apply(&mut config);

    match &args.command {
        CommandTask::Run(cmd) => run_rig(&config, cmd),
        CommandTask::Simulate(cmd) => simulate(&config, cmd),
        CommandTask::PrintConfig => {
            println!("{}", config.to_ron()?);
            Ok(())
        }
    }
}

fn run_rig(config: &SessionConfig, cmd: &RunCommand) -> Result<()> {
    let port = match &config.serial_port {
        Some(port) => port.clone(),
        None => match device_selector(available_ports()?)? {
            Some(port) => port.to_string_lossy().into_owned(),
            None => {
                info!("No device selected");
                return Ok(());
            }
        },
    };

    let session = Session::open(config, &port)?;
    info!("Logging to {}", session.chatter().log_path().display());
    match cmd.headless {
        Some(n_trials) => finish_headless(session.with_echo(cmd.echo), n_trials),
        None => finish_monitored(session),
    }
}

fn simulate(config: &SessionConfig, cmd: &SimulateCommand) -> Result<()> {
    let mut device = DummyDevice::new(cmd.hit_rate, cmd.reads_per_trial);
    if let Some(seed) = cmd.seed {
        device = device.with_seed(seed);
    }

    let session = Session::with_device(device, config)?.with_echo(cmd.echo);
    info!("Simulating {} trials", cmd.trials);
    finish_headless(session, cmd.trials)
}

fn finish_headless<D: Device>(mut session: Session<D>, n_trials: usize) -> Result<()> {
    // Ctrl+C ends the run and falls through to the normal teardown
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .map_err(|e| ArduError::Io(io::Error::new(io::ErrorKind::Other, e)))?;

    session.run_until(n_trials, &interrupted)?;
    println!("{}", session.trial_matrix().performance());
    println!("Log: {}", session.chatter().log_path().display());
    session.close()
}

fn finish_monitored<D: Device + 'static>(session: Session<D>) -> Result<()> {
    let mut session = monitor_session(session)?;
    println!("{}", session.trial_matrix().performance());
    session.close()
}

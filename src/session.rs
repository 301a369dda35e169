//! One behavioral session: a transport, an orchestrator, and the trial matrix
//! they produce.
//!
//! The device and logfile are released exactly once, by [Session::close] or
//! when the session is dropped, whichever comes first.

use crate::chatter::Chatter;
use crate::config::SessionConfig;
use crate::device::Device;
use crate::error::Result;
use crate::trial_matrix::{Performance, TrialMatrix};
use crate::trial_setter::{SetterState, TrialSetter};
use log::{info, warn};
use serial2::SerialPort;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::Receiver,
    },
};

/// What a UI needs to show about a running session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    /// Rows in the trial matrix, including the running one
    pub n_trials: usize,
    /// Rows with an outcome
    pub n_completed: usize,
    /// -1 before the first release
    pub last_released_trial: i64,
    /// As of the last poll
    pub setter_state: SetterState,
    /// The active policy
    pub scheduler_name: String,
    /// See [Scheduler::status](crate::scheduler::Scheduler::status)
    pub scheduler_status: String,
    /// The last few lines from the device, oldest first
    pub recent_lines: Vec<String>,
    /// Counts over completed trials
    pub performance: Performance,
    /// The session logfile
    pub log_path: PathBuf,
}

/// A running session on one device.
pub struct Session<D: Device> {
    chatter: Chatter<D>,
    trial_setter: TrialSetter,
    trial_matrix: TrialMatrix,
    echo: bool,
}

impl Session<SerialPort> {
    /// Open `port` with the settings in `config`.
    pub fn open(config: &SessionConfig, port: &str) -> Result<Self> {
        let trial_setter = TrialSetter::new(config.params_table()?, config.build_scheduler()?)?;
        let chatter = Chatter::open(
            port,
            config.baud_rate,
            config.read_timeout(),
            config.settle(),
            config.log_path(),
        )?;
        Ok(Session::new(chatter, trial_setter))
    }
}

impl<D: Device> Session<D> {
    /// Put an open chatter and a trial setter to work together.
    pub fn new(chatter: Chatter<D>, trial_setter: TrialSetter) -> Self {
        Session {
            chatter,
            trial_setter,
            trial_matrix: TrialMatrix::default(),
            echo: false,
        }
    }

    /// A session on an already opened device.
    pub fn with_device(device: D, config: &SessionConfig) -> Result<Self> {
        let trial_setter = TrialSetter::new(config.params_table()?, config.build_scheduler()?)?;
        let chatter = Chatter::new(device, config.log_path())?;
        Ok(Session::new(chatter, trial_setter))
    }

    /// Print every device line to stdout as it arrives.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Lines received on `user_input` go straight to the device.
    pub fn set_user_input(&mut self, user_input: Receiver<String>) {
        self.chatter.set_user_input(user_input);
    }

    /// Relay lines, then let the trial setter act on the updated log.
    pub fn poll(&mut self) -> Result<&TrialMatrix> {
        self.chatter.poll(self.echo)?;

        let mut commands = Vec::new();
        self.trial_matrix = self
            .trial_setter
            .update(self.chatter.lines(), &mut commands)?;
        for cmd in commands {
            self.chatter.queue_write(cmd);
        }
        Ok(&self.trial_matrix)
    }

    /// Poll until `max_trials` trials have finished.
    pub fn run_headless(&mut self, max_trials: usize) -> Result<&TrialMatrix> {
        self.run_until(max_trials, &AtomicBool::new(false))
    }

    /// Poll until `max_trials` trials have finished or `stop` is set, e.g.
    /// from an interrupt handler. The session stays open either way.
    pub fn run_until(&mut self, max_trials: usize, stop: &AtomicBool) -> Result<&TrialMatrix> {
        while self.n_completed() < max_trials {
            if stop.load(Ordering::SeqCst) {
                info!("Interrupted after {} trials", self.n_completed());
                return Ok(&self.trial_matrix);
            }
            self.poll()?;
        }
        info!("Finished {} trials", max_trials);
        Ok(&self.trial_matrix)
    }

    fn n_completed(&self) -> usize {
        self.trial_matrix.iter().filter(|t| t.is_complete()).count()
    }

    /// A snapshot for display, with the last `n_recent_lines` device lines.
    pub fn status(&self, n_recent_lines: usize) -> SessionStatus {
        let lines = self.chatter.lines();
        let scheduler = self.trial_setter.scheduler();
        SessionStatus {
            n_trials: self.trial_matrix.len(),
            n_completed: self.n_completed(),
            last_released_trial: self.trial_setter.last_released_trial(),
            setter_state: self.trial_setter.state(),
            scheduler_name: scheduler.name().to_owned(),
            scheduler_status: scheduler.status(),
            recent_lines: lines[lines.len().saturating_sub(n_recent_lines)..].to_vec(),
            performance: self.trial_matrix.performance(),
            log_path: self.chatter.log_path().to_path_buf(),
        }
    }

    /// The matrix as of the last poll.
    pub fn trial_matrix(&self) -> &TrialMatrix {
        &self.trial_matrix
    }

    /// The transport, for its lines and logfile.
    pub fn chatter(&self) -> &Chatter<D> {
        &self.chatter
    }

    /// The orchestrator, for its state and scheduler.
    pub fn trial_setter(&self) -> &TrialSetter {
        &self.trial_setter
    }

    /// For swapping the scheduler or changing parameters mid-session.
    pub fn trial_setter_mut(&mut self) -> &mut TrialSetter {
        &mut self.trial_setter
    }

    /// Release the device and flush the logfile.
    pub fn close(&mut self) -> Result<()> {
        self.chatter.close()
    }
}

impl<D: Device> Drop for Session<D> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close session cleanly: {}", e);
        }
    }
}

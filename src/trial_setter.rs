//! Decides, on every poll, whether the next trial's parameters should be sent
//! and the trial released.
//!
//! The only state kept between polls is the index of the last trial we
//! released and whether the initial parameters have gone out. Everything
//! else is re-derived from the log.

use crate::error::{ArduError, Result};
use crate::params::ParamsTable;
use crate::scheduler::{ParameterSet, Scheduler};
use crate::trial_matrix::TrialMatrix;
use crate::trial_speak;
use log::{debug, info};

/// Where the session stands, as seen by the last [TrialSetter::update].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetterState {
    /// Nothing parseable from the device yet
    AwaitingBoot,
    /// Released a trial during this update
    Released,
    /// The current trial is running
    InFlight,
    /// Released, and the device has not started it yet
    AwaitingStart,
}

/// Sends parameters and releases trials as the log says the device is ready.
pub struct TrialSetter {
    params_table: ParamsTable,
    scheduler: Box<dyn Scheduler>,
    last_released_trial: i64,
    initial_params_sent: bool,
    state: SetterState,
}

impl TrialSetter {
    /// Fails if any parameter sent on init has not been defined.
    pub fn new(params_table: ParamsTable, scheduler: Box<dyn Scheduler>) -> Result<Self> {
        params_table.validate_for_session()?;
        Ok(TrialSetter {
            params_table,
            scheduler,
            last_released_trial: -1,
            initial_params_sent: false,
            state: SetterState::AwaitingBoot,
        })
    }

    /// Rebuild the trial matrix from `lines` and push whatever commands the
    /// session needs next onto `sink`, in send order.
    pub fn update<S: AsRef<str>>(
        &mut self,
        lines: &[S],
        sink: &mut Vec<String>,
    ) -> Result<TrialMatrix> {
        let trial_matrix = TrialMatrix::build(lines)?;

        let booted = !trial_matrix.is_empty()
            || lines
                .iter()
                .any(|l| trial_speak::parse_line(l.as_ref()).is_some());
        if !booted {
            self.state = SetterState::AwaitingBoot;
            return Ok(trial_matrix);
        }

        if !self.initial_params_sent {
            let commands = self.params_table.initial_commands()?;
            info!("Device is up, sending {} initial parameters", commands.len());
            for cmd in commands {
                sink.push(cmd);
            }
            self.initial_params_sent = true;
        }

        let current_trial = trial_matrix.len() as i64 - 1;
        if self.last_released_trial == -1 && current_trial == -1 {
            let params = self.scheduler.choose_params_first_trial(&trial_matrix)?;
            self.release(params, sink)?;
        } else if self.last_released_trial == current_trial {
            let complete = trial_matrix.last().map_or(false, |t| t.is_complete());
            if complete {
                let params = self.scheduler.choose_params(&trial_matrix)?;
                self.release(params, sink)?;
            } else {
                self.state = SetterState::InFlight;
            }
        } else if self.last_released_trial == current_trial + 1 {
            self.state = SetterState::AwaitingStart;
        } else if self.last_released_trial < current_trial {
            return Err(ArduError::violation(format!(
                "trial {} started but only {} was released",
                current_trial, self.last_released_trial
            )));
        } else {
            return Err(ArduError::violation(format!(
                "released trial {} while the device is on trial {}",
                self.last_released_trial, current_trial
            )));
        }

        Ok(trial_matrix)
    }

    /// Queue `SET` for every parameter and then `RELEASE_TRL`. Nothing is
    /// queued if any value cannot be encoded or a must-define parameter is
    /// still undefined.
    fn release(&mut self, params: ParameterSet, sink: &mut Vec<String>) -> Result<()> {
        self.params_table.check_defined(&params)?;
        let mut commands = Vec::with_capacity(params.len() + 1);
        for (name, &value) in &params {
            if self.params_table.get(name).is_none() {
                return Err(ArduError::Config(format!(
                    "scheduler {} chose unknown parameter {}",
                    self.scheduler.name(),
                    name
                )));
            }
            commands.push(trial_speak::format_set(name, value)?);
        }

        for (name, &value) in &params {
            self.params_table.set_current(name, value)?;
        }
        for cmd in commands {
            sink.push(cmd);
        }
        sink.push(trial_speak::format_release().to_owned());

        self.last_released_trial += 1;
        self.state = SetterState::Released;
        info!(
            "Releasing trial {} ({} {}): {:?}",
            self.last_released_trial,
            self.scheduler.name(),
            self.scheduler.status(),
            params
        );
        Ok(())
    }

    /// Index of the last trial released, -1 before the first.
    pub fn last_released_trial(&self) -> i64 {
        self.last_released_trial
    }

    /// Whether the send-on-init parameters have gone out.
    pub fn initial_params_sent(&self) -> bool {
        self.initial_params_sent
    }

    /// The state after the last [TrialSetter::update].
    pub fn state(&self) -> SetterState {
        self.state
    }

    /// The table with the values last sent.
    pub fn params_table(&self) -> &ParamsTable {
        &self.params_table
    }

    /// For changing parameter values between trials.
    pub fn params_table_mut(&mut self) -> &mut ParamsTable {
        &mut self.params_table
    }

    /// The active policy.
    pub fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler.as_ref()
    }

    /// Swap the active policy. Takes effect from the next release.
    pub fn set_scheduler(&mut self, scheduler: Box<dyn Scheduler>) {
        debug!(
            "Replacing scheduler {} with {}",
            self.scheduler.name(),
            scheduler.name()
        );
        self.scheduler = scheduler;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TrialType;
    use crate::trial_matrix::Side;
    use std::collections::BTreeMap;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    struct Counting {
        calls: Arc<AtomicUsize>,
        params: ParameterSet,
    }

    impl Scheduler for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn trial_types(&self) -> &[TrialType] {
            &[]
        }

        fn choose_params(&mut self, _trial_matrix: &TrialMatrix) -> Result<ParameterSet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.params.clone())
        }
    }

    fn rig_table() -> ParamsTable {
        let mut table = ParamsTable::standard();
        let overrides: BTreeMap<String, i64> = [
            ("STPSPD", 30),
            ("2PSTP", 2),
            ("SRVTT", 2000),
            ("RD_L", 60),
            ("RD_R", 50),
            ("STPHAL", 3),
            ("HALPOS", 150),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect();
        table.apply_overrides(&overrides).unwrap();
        table
    }

    fn setter(params: ParameterSet) -> (TrialSetter, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = Counting {
            calls: calls.clone(),
            params,
        };
        (
            TrialSetter::new(rig_table(), Box::new(scheduler)).unwrap(),
            calls,
        )
    }

    fn left_trial() -> ParameterSet {
        ParameterSet::from([
            ("RWSD".to_owned(), Side::Left.code()),
            ("SRVPOS".to_owned(), 1150),
            ("STPPOS".to_owned(), 50),
            ("ISRND".to_owned(), 2),
        ])
    }

    fn strs(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn waits_for_boot() {
        let (mut setter, calls) = setter(left_trial());
        let mut sent = Vec::new();
        setter.update(&strs(&[]), &mut sent).unwrap();
        setter.update(&strs(&["garbage"]), &mut sent).unwrap();
        assert!(sent.is_empty());
        assert_eq!(setter.state(), SetterState::AwaitingBoot);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn first_release_sends_initial_params_then_trial() {
        let (mut setter, calls) = setter(left_trial());
        let mut sent = Vec::new();
        setter.update(&strs(&["0 ST_CHG 0 1"]), &mut sent).unwrap();

        assert!(setter.initial_params_sent());
        assert_eq!(setter.last_released_trial(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sent.contains(&"SET RD_L 60".to_owned()));
        assert_eq!(sent.last().unwrap(), "RELEASE_TRL");
        let rwsd = sent.iter().position(|c| c == "SET RWSD 1").unwrap();
        let rd_l = sent.iter().position(|c| c == "SET RD_L 60").unwrap();
        assert!(rd_l < rwsd);
        assert_eq!(setter.params_table().get("RWSD").unwrap().current_value, Some(1));
    }

    #[test]
    fn incomplete_trial_is_left_alone() {
        let (mut setter, calls) = setter(left_trial());
        let mut sent = Vec::new();
        let mut lines = strs(&["0 ST_CHG 0 1"]);
        setter.update(&lines, &mut sent).unwrap();

        // released, not yet started
        sent.clear();
        setter.update(&lines, &mut sent).unwrap();
        assert_eq!(setter.state(), SetterState::AwaitingStart);

        lines.extend(strs(&["100 TRL_START", "100 TRLP RWSD 1", "110 TRL_RELEASED"]));
        for _ in 0..3 {
            let tm = setter.update(&lines, &mut sent).unwrap();
            assert_eq!(tm.len(), 1);
        }
        assert!(sent.is_empty());
        assert_eq!(setter.state(), SetterState::InFlight);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn complete_trial_releases_exactly_one_more() {
        let (mut setter, calls) = setter(left_trial());
        let mut sent = Vec::new();
        let mut lines = strs(&["0 ST_CHG 0 1"]);
        setter.update(&lines, &mut sent).unwrap();
        lines.extend(strs(&[
            "100 TRL_START",
            "100 TRLP RWSD 1",
            "110 TRL_RELEASED",
            "900 TRLR RESP 1",
            "900 TRLR OUTC 1",
        ]));

        sent.clear();
        setter.update(&lines, &mut sent).unwrap();
        assert_eq!(setter.last_released_trial(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sent.len(), 5);
        assert_eq!(sent.iter().filter(|c| *c == "RELEASE_TRL").count(), 1);

        // same log again: released ahead, waiting for the device
        sent.clear();
        setter.update(&lines, &mut sent).unwrap();
        assert!(sent.is_empty());
        assert_eq!(setter.last_released_trial(), 1);
    }

    #[test]
    fn unreleased_trial_is_a_violation() {
        let (mut setter, _) = setter(left_trial());
        let lines = strs(&["0 TRL_START", "5 TRL_RELEASED"]);
        assert!(matches!(
            setter.update(&lines, &mut Vec::new()),
            Err(ArduError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn released_too_far_ahead_is_a_violation() {
        let (mut setter, _) = setter(left_trial());
        let mut sent = Vec::new();
        let lines = strs(&["0 ST_CHG 0 1"]);
        setter.update(&lines, &mut sent).unwrap();
        setter.last_released_trial = 2;
        assert!(matches!(
            setter.update(&lines, &mut sent),
            Err(ArduError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn zero_from_scheduler_sends_nothing() {
        let mut params = left_trial();
        params.insert("SRVPOS".to_owned(), 0);
        let (mut setter, _) = setter(params);
        let mut sent = Vec::new();
        assert!(matches!(
            setter.update(&strs(&["0 ST_CHG 0 1"]), &mut sent),
            Err(ArduError::InvalidParameterValue { .. })
        ));
        assert!(!sent.iter().any(|c| c == "RELEASE_TRL"));
        assert_eq!(setter.last_released_trial(), -1);
    }

    #[test]
    fn missing_must_define_from_scheduler_sends_nothing() {
        let params = ParameterSet::from([("RWSD".to_owned(), Side::Left.code())]);
        let (mut setter, _) = setter(params);
        let mut sent = Vec::new();
        match setter.update(&strs(&["0 ST_CHG 0 1"]), &mut sent) {
            Err(ArduError::InvalidParameterValue { param, .. }) => {
                assert!(param == "SRVPOS" || param == "STPPOS")
            }
            other => panic!("released anyway: {:?}", other.map(|_| ())),
        }
        assert!(!sent.iter().any(|c| c == "RELEASE_TRL"));
        assert!(!sent.iter().any(|c| c == "SET RWSD 1"));
        assert_eq!(setter.last_released_trial(), -1);
        assert_eq!(setter.params_table().get("STPPOS").unwrap().current_value, None);
    }

    #[test]
    fn unset_rig_params_are_refused_up_front() {
        let scheduler = Counting {
            calls: Arc::new(AtomicUsize::new(0)),
            params: left_trial(),
        };
        assert!(TrialSetter::new(ParamsTable::standard(), Box::new(scheduler)).is_err());
    }
}

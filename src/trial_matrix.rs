//! Folds a session log into one row per trial.
//!
//! The matrix is rebuilt from the whole log on every poll. Sessions are a few
//! hundred trials, so this is cheap, and it means a row can never drift from
//! what the log says. An incremental builder could replace [TrialMatrix::build]
//! without the trial setter noticing.

use crate::error::{ArduError, Result};
use crate::trial_speak::{self, BoolParam};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    fs,
    path::Path,
};

/// Result columns that always exist, even before any trial has reported
/// them.
pub const ALWAYS_PRESENT: [&str; 2] = ["resp", "outc"];

/// Short wire names and the names they are displayed under.
const LONG_NAMES: [(&str, &str); 5] = [
    ("rwsd", "rewside"),
    ("resp", "choice"),
    ("outc", "outcome"),
    ("srvpos", "servo_pos"),
    ("stppos", "stepper_pos"),
];

/// The long name for a wire name, e.g. `rwsd` becomes `rewside`.
pub fn long_name(short: &str) -> &str {
    LONG_NAMES
        .iter()
        .find(|(s, _)| *s == short)
        .map(|(_, l)| *l)
        .unwrap_or(short)
}

fn short_name(long: &str) -> &str {
    LONG_NAMES
        .iter()
        .find(|(_, l)| *l == long)
        .map(|(s, _)| *s)
        .unwrap_or(long)
}

/// The side a reward is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Wire code 1
    Left,
    /// Wire code 2
    Right,
}

impl Side {
    /// The integer sent as `RWSD`.
    pub fn code(self) -> i64 {
        match self {
            Side::Left => trial_speak::LEFT,
            Side::Right => trial_speak::RIGHT,
        }
    }

    /// Inverse of [Side::code].
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            trial_speak::LEFT => Some(Side::Left),
            trial_speak::RIGHT => Some(Side::Right),
            _ => None,
        }
    }

    /// The other side.
    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// What the animal did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Choice {
    /// Wire code 1
    Left,
    /// Wire code 2
    Right,
    /// No response in the window
    Nogo,
}

impl Choice {
    /// Decode a `RESP` value.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            trial_speak::LEFT => Some(Choice::Left),
            trial_speak::RIGHT => Some(Choice::Right),
            trial_speak::NOGO => Some(Choice::Nogo),
            _ => None,
        }
    }

    /// The side chosen, if the animal chose one.
    pub fn side(self) -> Option<Side> {
        match self {
            Choice::Left => Some(Side::Left),
            Choice::Right => Some(Side::Right),
            Choice::Nogo => None,
        }
    }
}

/// How the trial ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Chose the rewarded side
    Hit,
    /// Chose the other side
    Error,
    /// Neither, e.g. no response
    Spoil,
}

impl Outcome {
    /// Decode an `OUTC` value.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            trial_speak::HIT => Some(Outcome::Hit),
            trial_speak::ERROR => Some(Outcome::Error),
            trial_speak::SPOIL => Some(Outcome::Spoil),
            _ => None,
        }
    }
}

/// One row of the matrix.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Trial {
    /// Seconds, from `TRL_START`
    pub start_time: f64,
    /// Seconds, from `TRL_RELEASED`; `None` until the device releases it
    pub release_time: Option<f64>,
    /// `TRLP` values keyed by lower-cased wire name
    pub params: BTreeMap<String, i64>,
    /// `TRLR` values keyed by lower-cased wire name
    pub results: BTreeMap<String, i64>,
}

impl Trial {
    /// Release time minus start time.
    pub fn duration(&self) -> Option<f64> {
        self.release_time.map(|release| release - self.start_time)
    }

    /// A parameter or result by wire name. Results shadow parameters.
    pub fn raw(&self, short: &str) -> Option<i64> {
        self.results
            .get(short)
            .or_else(|| self.params.get(short))
            .copied()
    }

    /// Any column, by long or short name, as a float.
    pub fn value(&self, column: &str) -> Option<f64> {
        match column {
            "start_time" => Some(self.start_time),
            "release_time" => self.release_time,
            "duration" => self.duration(),
            other => self.raw(short_name(other)).map(|v| v as f64),
        }
    }

    /// `RWSD`, translated.
    pub fn rewside(&self) -> Option<Side> {
        self.raw("rwsd").and_then(Side::from_code)
    }

    /// `RESP`, translated. `None` while the trial is running.
    pub fn choice(&self) -> Option<Choice> {
        self.raw("resp").and_then(Choice::from_code)
    }

    /// `OUTC`, translated. `None` while the trial is running.
    pub fn outcome(&self) -> Option<Outcome> {
        self.raw("outc").and_then(Outcome::from_code)
    }

    /// Whether the scheduler marked this trial random (`ISRND` was YES).
    pub fn is_random(&self) -> bool {
        self.raw("isrnd").and_then(BoolParam::from_code) == Some(BoolParam::Yes)
    }

    /// A trial is complete once the device has reported its outcome, which
    /// it does last. Anything else on the last row means "pending".
    pub fn is_complete(&self) -> bool {
        self.results.contains_key("outc")
    }
}

/// Counts of how trials ended.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Performance {
    /// Trials with an outcome
    pub completed: usize,
    /// Chose the rewarded side
    pub hits: usize,
    /// Chose the other side
    pub errors: usize,
    /// Neither
    pub spoils: usize,
    /// Hits over hits plus errors
    pub fraction_correct: Option<f64>,
    /// The same, counting only trials the scheduler marked random
    pub unforced_fraction_correct: Option<f64>,
}

impl fmt::Display for Performance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let pct = |frac: Option<f64>| match frac {
            Some(v) => format!("{:.0}%", 100.0 * v),
            None => "-".to_owned(),
        };
        write!(
            f,
            "{} trials: {} hits, {} errors, {} spoils; {} correct, {} unforced",
            self.completed,
            self.hits,
            self.errors,
            self.spoils,
            pct(self.fraction_correct),
            pct(self.unforced_fraction_correct)
        )
    }
}

fn fraction(hits: usize, total: usize) -> Option<f64> {
    (total > 0).then(|| hits as f64 / total as f64)
}

/// Every trial of a session, in order. Anything before the first `TRL_START`
/// is setup and is not part of the matrix.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrialMatrix {
    trials: Vec<Trial>,
}

impl TrialMatrix {
    /// Build the matrix from every line the device has sent so far.
    ///
    /// Empty input and setup-only input give an empty matrix. The last row may
    /// have no release time and no results. Two `TRL_RELEASED` lines in one
    /// trial, or trials whose start times go backwards, are protocol
    /// violations.
    pub fn build<S: AsRef<str>>(log_lines: &[S]) -> Result<Self> {
        let mut trials: Vec<Trial> = Vec::new();

        for (n, group) in trial_speak::split_into_trials(log_lines)
            .into_iter()
            .enumerate()
            .skip(1)
        {
            let timing = trial_speak::extract_timing(group)?;
            let start_time = timing.start.ok_or_else(|| {
                ArduError::violation(format!("trial {} has no {}", n - 1, trial_speak::TRIAL_START))
            })?;

            if let Some(previous) = trials.last() {
                if start_time < previous.start_time {
                    return Err(ArduError::violation(format!(
                        "trial {} starts at {}s, before trial {} at {}s",
                        n - 1,
                        start_time,
                        n - 2,
                        previous.start_time
                    )));
                }
            }

            trials.push(Trial {
                start_time,
                release_time: timing.release,
                params: trial_speak::extract_parameters(group),
                results: trial_speak::extract_results(group),
            });
        }

        Ok(TrialMatrix { trials })
    }

    /// Wrap already-built rows.
    pub fn from_trials(trials: Vec<Trial>) -> Self {
        TrialMatrix { trials }
    }

    /// Number of trials, including the running one.
    pub fn len(&self) -> usize {
        self.trials.len()
    }

    /// Whether no trial has started yet.
    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    /// Every trial, oldest first.
    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    /// Trials, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Trial> {
        self.trials.iter()
    }

    /// The current trial, if any.
    pub fn last(&self) -> Option<&Trial> {
        self.trials.last()
    }

    /// The last `n` trials, or all of them if there are fewer.
    pub fn recent(&self, n: usize) -> &[Trial] {
        &self.trials[self.trials.len().saturating_sub(n)..]
    }

    /// Timing columns first, then every parameter and result name seen so
    /// far (sorted, long names), always including choice and outcome.
    pub fn columns(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = ALWAYS_PRESENT
            .iter()
            .map(|s| long_name(s).to_owned())
            .collect();
        names.extend(
            self.trials
                .iter()
                .flat_map(|t| t.params.keys().chain(t.results.keys()))
                .map(|s| long_name(s).to_owned()),
        );

        ["start_time", "release_time", "duration"]
            .into_iter()
            .map(str::to_owned)
            .chain(names)
            .collect()
    }

    /// `(hits, hits + errors)` per reward side, over completed trials.
    pub fn count_hits_by_side(&self) -> BTreeMap<Side, (usize, usize)> {
        count_hits_by_side(&self.trials)
    }

    /// Summary counts for display.
    pub fn performance(&self) -> Performance {
        let mut perf = Performance::default();
        let (mut random_hits, mut random_total) = (0, 0);
        for trial in self.trials.iter().filter(|t| t.is_complete()) {
            perf.completed += 1;
            match trial.outcome() {
                Some(Outcome::Hit) => perf.hits += 1,
                Some(Outcome::Error) => perf.errors += 1,
                Some(Outcome::Spoil) => perf.spoils += 1,
                None => {}
            }
            if trial.is_random() {
                match trial.outcome() {
                    Some(Outcome::Hit) => {
                        random_hits += 1;
                        random_total += 1;
                    }
                    Some(Outcome::Error) => random_total += 1,
                    _ => {}
                }
            }
        }
        perf.fraction_correct = fraction(perf.hits, perf.hits + perf.errors);
        perf.unforced_fraction_correct = fraction(random_hits, random_total);
        perf
    }
}

/// `(hits, hits + errors)` per reward side.
pub fn count_hits_by_side(trials: &[Trial]) -> BTreeMap<Side, (usize, usize)> {
    let mut counts = BTreeMap::new();
    for trial in trials {
        let (Some(side), Some(outcome)) = (trial.rewside(), trial.outcome()) else {
            continue;
        };
        let entry = counts.entry(side).or_insert((0, 0));
        match outcome {
            Outcome::Hit => {
                entry.0 += 1;
                entry.1 += 1;
            }
            Outcome::Error => entry.1 += 1,
            Outcome::Spoil => {}
        }
    }
    counts
}

/// Read a session logfile for offline analysis.
pub fn read_log_lines(path: impl AsRef<Path>) -> Result<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::to_owned)
        .collect())
}

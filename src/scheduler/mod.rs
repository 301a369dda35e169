//! Schedulers choose the parameters of the next trial from the history so far.
//!
//! Every policy implements [Scheduler]. A policy may keep its own state (the
//! auto scheduler remembers when it last switched, and every policy owns its
//! random number generator), but it never does I/O and never looks at
//! anything except the trial matrix it is handed.
//!
//! Policies work in sides and trial-type rows. The returned [ParameterSet] is
//! already in wire form: upper-case abbreviations to nonzero integers.

mod auto;
mod simple;

pub use auto::{Auto, AutoConfig, AutoState};
pub use simple::{ForcedAlternation, ForcedSide, RandomStim, SessionStarter};

use crate::error::{ArduError, Result};
use crate::trial_matrix::{Side, TrialMatrix};
use crate::trial_speak::BoolParam;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Wire name to value, for one trial.
pub type ParameterSet = BTreeMap<String, i64>;

/// One row of the trial-type table: a stimulus position and the side that
/// will be rewarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialType {
    /// Shown in logs only
    pub name: String,
    /// The side the animal must choose
    pub rewside: Side,
    /// Servo position
    pub srvpos: i64,
    /// Stepper position
    pub stppos: i64,
}

impl TrialType {
    /// The parameters that describe this trial type on the wire.
    pub fn params(&self, is_random: bool) -> ParameterSet {
        ParameterSet::from([
            ("RWSD".to_owned(), self.rewside.code()),
            ("SRVPOS".to_owned(), self.srvpos),
            ("STPPOS".to_owned(), self.stppos),
            ("ISRND".to_owned(), BoolParam::from(is_random).code()),
        ])
    }
}

/// The capability every scheduling policy provides.
pub trait Scheduler: Send {
    /// Short human-readable name, shown in the UI.
    fn name(&self) -> &str;

    /// Whatever the policy wants to say about its current decision.
    fn status(&self) -> String {
        String::new()
    }

    /// The full table this policy was built with, even if it only ever picks
    /// from part of it.
    fn trial_types(&self) -> &[TrialType];

    /// Parameters for the trial after the last row of `trial_matrix`.
    fn choose_params(&mut self, trial_matrix: &TrialMatrix) -> Result<ParameterSet>;

    /// Parameters for the very first trial. The matrix is empty.
    fn choose_params_first_trial(&mut self, trial_matrix: &TrialMatrix) -> Result<ParameterSet> {
        self.choose_params(trial_matrix)
    }
}

/// Which policy a session starts with. Deserialized from the rig file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SchedulerKind {
    /// Switch sides after every correct choice
    ForcedAlternation,
    /// Uniformly random rows
    RandomStim,
    /// Always the given side
    ForcedSide(Side),
    /// Forced alternation over the easiest positions
    SessionStarter {
        #[serde(default)]
        /// Use the farthest servo position instead of the closest
        reverse_srvpos: bool,
    },
    /// Pick one of the others from the animal's biases
    Auto(AutoConfig),
}

impl Default for SchedulerKind {
    fn default() -> Self {
        SchedulerKind::Auto(AutoConfig::default())
    }
}

impl SchedulerKind {
    /// Construct the policy over `trial_types`.
    pub fn build(&self, trial_types: Vec<TrialType>) -> Result<Box<dyn Scheduler>> {
        Ok(match self {
            SchedulerKind::ForcedAlternation => Box::new(ForcedAlternation::new(trial_types)?),
            SchedulerKind::RandomStim => Box::new(RandomStim::new(trial_types)?),
            SchedulerKind::ForcedSide(side) => Box::new(ForcedSide::new(trial_types, *side)?),
            SchedulerKind::SessionStarter { reverse_srvpos } => {
                Box::new(SessionStarter::new(trial_types, *reverse_srvpos)?)
            }
            SchedulerKind::Auto(config) => Box::new(Auto::new(trial_types, config.clone())?),
        })
    }
}

pub(crate) fn new_rng() -> StdRng {
    StdRng::from_entropy()
}

/// Fails unless the table has at least one row for each side.
pub(crate) fn check_trial_types(trial_types: &[TrialType]) -> Result<()> {
    for side in [Side::Left, Side::Right] {
        if !trial_types.iter().any(|t| t.rewside == side) {
            return Err(ArduError::Config(format!("no trial types with rewside {}", side)));
        }
    }
    Ok(())
}

/// Pick uniformly among the rows of `candidates` that satisfy `keep`.
pub(crate) fn pick<'a>(
    rng: &mut StdRng,
    candidates: impl Iterator<Item = &'a TrialType>,
    keep: impl Fn(&TrialType) -> bool,
) -> Result<&'a TrialType> {
    let matching: Vec<&TrialType> = candidates.filter(|t| keep(*t)).collect();
    matching
        .choose(rng)
        .copied()
        .ok_or_else(|| ArduError::Config("no trial types match the requested side".to_owned()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::trial_matrix::Trial;

    pub fn two_positions() -> Vec<TrialType> {
        vec![
            TrialType {
                name: "CV-L-1150-050".to_owned(),
                rewside: Side::Left,
                srvpos: 1150,
                stppos: 50,
            },
            TrialType {
                name: "CC-R-1150-150".to_owned(),
                rewside: Side::Right,
                srvpos: 1150,
                stppos: 150,
            },
            TrialType {
                name: "CV-L-1175-050".to_owned(),
                rewside: Side::Left,
                srvpos: 1175,
                stppos: 50,
            },
            TrialType {
                name: "CC-R-1175-150".to_owned(),
                rewside: Side::Right,
                srvpos: 1175,
                stppos: 150,
            },
        ]
    }

    /// A finished trial.
    pub fn done(rewside: Side, choice: Side, is_random: bool) -> Trial {
        let outcome = if rewside == choice { 1 } else { 2 };
        Trial {
            params: BTreeMap::from([
                ("rwsd".to_owned(), rewside.code()),
                ("isrnd".to_owned(), BoolParam::from(is_random).code()),
            ]),
            results: BTreeMap::from([
                ("resp".to_owned(), choice.code()),
                ("outc".to_owned(), outcome),
            ]),
            ..Default::default()
        }
    }
}

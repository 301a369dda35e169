use super::{
    ForcedAlternation, ForcedSide, ParameterSet, RandomStim, Scheduler, SessionStarter, TrialType,
};
use crate::anova::{run_anova, AnovaResult};
use crate::error::Result;
use crate::trial_matrix::{Side, TrialMatrix};
use log::info;
use serde::{Deserialize, Serialize};

/// Trial-count thresholds of the auto scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoConfig {
    /// Trials run by the session starter
    pub n_trials_session_starter: usize,
    /// Trials before the adaptive checks begin
    pub n_trials_forced_alt: usize,
    /// Minimum trials between two adaptive decisions
    pub n_trials_sticky: usize,
    /// Size of the window the checks look at
    pub n_trials_recent_win: usize,
    /// Random trials needed in the window before trusting the ANOVA
    pub n_trials_recent_random_thresh: usize,
    /// Per-side accuracy difference that counts as a side bias
    pub side_bias_threshold: f64,
    /// The session starter uses the largest servo position instead of the
    /// smallest
    pub reverse_srvpos: bool,
}

impl Default for AutoConfig {
    fn default() -> Self {
        AutoConfig {
            n_trials_session_starter: 8,
            n_trials_forced_alt: 45,
            n_trials_sticky: 6,
            n_trials_recent_win: 32,
            n_trials_recent_random_thresh: 8,
            side_bias_threshold: 0.25,
            reverse_srvpos: false,
        }
    }
}

impl AutoConfig {
    /// Short thresholds for trying things out on the bench.
    pub fn debug() -> Self {
        AutoConfig {
            n_trials_session_starter: 2,
            n_trials_forced_alt: 5,
            n_trials_sticky: 3,
            n_trials_recent_win: 10,
            n_trials_recent_random_thresh: 2,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Which phase of the session the auto scheduler is in.
pub enum AutoState {
    /// Session starter trials
    Starting,
    /// Forced alternation trials
    ForcedAltWarmup,
    /// Choosing a sub-policy from recent performance
    Adaptive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubPolicy {
    SessionStarter,
    ForcedAlternation,
    RandomStim,
    ForcedSide,
}

/// The outcome of one adaptive evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Decision {
    /// Not enough random trials in the window
    RandomCheck,
    /// The model could not be fit
    AnovaFailed,
    /// Significant tendency to repeat the previous choice
    AntiStay,
    /// Force the weaker side
    AntiSide(Side),
    Good,
}

impl Decision {
    fn policy(self) -> SubPolicy {
        match self {
            Decision::AntiStay => SubPolicy::ForcedAlternation,
            Decision::AntiSide(_) => SubPolicy::ForcedSide,
            Decision::RandomCheck | Decision::AnovaFailed | Decision::Good => SubPolicy::RandomStim,
        }
    }

    fn code(self) -> &'static str {
        match self {
            Decision::RandomCheck => "randchk",
            Decision::AnovaFailed => "an_none",
            Decision::AntiStay => "antistay",
            Decision::AntiSide(_) => "antiside",
            Decision::Good => "good",
        }
    }
}

fn classify(
    too_few_random: bool,
    anova: Option<&AnovaResult>,
    sideperf_diff: f64,
    side_bias_threshold: f64,
) -> Decision {
    if too_few_random {
        return Decision::RandomCheck;
    }
    let Some(anova) = anova else {
        return Decision::AnovaFailed;
    };
    if anova.p_prevchoice < 0.05 && anova.fit_prevchoice > 0.0 {
        Decision::AntiStay
    } else if sideperf_diff > side_bias_threshold {
        Decision::AntiSide(Side::Left)
    } else if sideperf_diff < -side_bias_threshold {
        Decision::AntiSide(Side::Right)
    } else {
        Decision::Good
    }
}

/// Right-side accuracy minus left-side accuracy, 0 unless both sides have
/// been scored.
fn sideperf_diff(trial_matrix: &TrialMatrix) -> f64 {
    let counts = trial_matrix.count_hits_by_side();
    let accuracy = |side| match counts.get(&side) {
        Some(&(hits, total)) if total > 0 => Some(hits as f64 / total as f64),
        _ => None,
    };
    match (accuracy(Side::Left), accuracy(Side::Right)) {
        (Some(left), Some(right)) => right - left,
        _ => 0.0,
    }
}

/// Starts with the session starter, warms up with forced alternation, then
/// keeps switching between the other policies to correct whichever bias
/// the animal shows.
#[derive(Debug)]
pub struct Auto {
    config: AutoConfig,
    session_starter: SessionStarter,
    forced_alternation: ForcedAlternation,
    random_stim: RandomStim,
    forced_side: ForcedSide,
    state: AutoState,
    current: SubPolicy,
    last_changed_trial: usize,
    status: String,
}

impl Auto {
    /// Fails if the trial types do not cover both sides.
    pub fn new(trial_types: Vec<TrialType>, config: AutoConfig) -> Result<Self> {
        Ok(Auto {
            session_starter: SessionStarter::new(trial_types.clone(), config.reverse_srvpos)?,
            forced_alternation: ForcedAlternation::new(trial_types.clone())?,
            random_stim: RandomStim::new(trial_types.clone())?,
            forced_side: ForcedSide::new(trial_types, Side::Left)?,
            config,
            state: AutoState::Starting,
            current: SubPolicy::SessionStarter,
            last_changed_trial: 0,
            status: String::new(),
        })
    }

    /// Seed every sub-policy, for tests.
    pub fn with_seed(self, seed: u64) -> Self {
        Auto {
            session_starter: self.session_starter.with_seed(seed),
            forced_alternation: self.forced_alternation.with_seed(seed + 1),
            random_stim: self.random_stim.with_seed(seed + 2),
            forced_side: self.forced_side.with_seed(seed + 3),
            ..self
        }
    }

    /// The phase chosen by the last call.
    pub fn state(&self) -> AutoState {
        self.state
    }

    /// Trial index of the last adaptive decision.
    pub fn last_changed_trial(&self) -> usize {
        self.last_changed_trial
    }

    /// The policy that chose, or will choose, the next trial.
    pub fn current(&self) -> &dyn Scheduler {
        match self.current {
            SubPolicy::SessionStarter => &self.session_starter,
            SubPolicy::ForcedAlternation => &self.forced_alternation,
            SubPolicy::RandomStim => &self.random_stim,
            SubPolicy::ForcedSide => &self.forced_side,
        }
    }

    fn current_mut(&mut self) -> &mut dyn Scheduler {
        match self.current {
            SubPolicy::SessionStarter => &mut self.session_starter,
            SubPolicy::ForcedAlternation => &mut self.forced_alternation,
            SubPolicy::RandomStim => &mut self.random_stim,
            SubPolicy::ForcedSide => &mut self.forced_side,
        }
    }

    fn adapt(&mut self, trial_matrix: &TrialMatrix) {
        let this_trial = trial_matrix.len();
        if this_trial < self.last_changed_trial + self.config.n_trials_sticky {
            return;
        }

        // only a full window can show too few random trials
        let recents = trial_matrix.recent(self.config.n_trials_recent_win);
        let n_random = recents.iter().filter(|t| t.is_random()).count();
        let too_few_random = recents.len() == self.config.n_trials_recent_win
            && n_random < self.config.n_trials_recent_random_thresh;
        let anova = if too_few_random { None } else { run_anova(recents) };

        let decision = classify(
            too_few_random,
            anova.as_ref(),
            sideperf_diff(trial_matrix),
            self.config.side_bias_threshold,
        );
        if let Decision::AntiSide(side) = decision {
            self.forced_side.set_side(side);
        }

        let policy = decision.policy();
        if policy != self.current {
            info!(
                "auto scheduler switching from {} to {:?} at trial {} ({})",
                self.current().name(),
                policy,
                this_trial,
                decision.code()
            );
        }
        self.current = policy;
        self.last_changed_trial = this_trial;
        self.status = format!("{}{}", decision.code(), this_trial);
    }
}

impl Scheduler for Auto {
    fn name(&self) -> &str {
        "auto"
    }

    fn status(&self) -> String {
        self.status.clone()
    }

    fn trial_types(&self) -> &[TrialType] {
        self.random_stim.trial_types()
    }

    fn choose_params(&mut self, trial_matrix: &TrialMatrix) -> Result<ParameterSet> {
        let n_trials = trial_matrix.len();
        if n_trials < self.config.n_trials_session_starter {
            self.state = AutoState::Starting;
            self.current = SubPolicy::SessionStarter;
            self.status = "start".to_owned();
        } else if n_trials < self.config.n_trials_forced_alt {
            self.state = AutoState::ForcedAltWarmup;
            self.current = SubPolicy::ForcedAlternation;
            self.status = "start2".to_owned();
        } else {
            self.state = AutoState::Adaptive;
            self.adapt(trial_matrix);
        }

        self.current_mut().choose_params(trial_matrix)
    }
}

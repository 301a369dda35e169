use super::{check_trial_types, new_rng, pick, ParameterSet, Scheduler, TrialType};
use crate::error::{ArduError, Result};
use crate::trial_matrix::{Choice, Side, Trial, TrialMatrix};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// The side to force after `last`: switch after a correct choice, stay
/// otherwise.
pub(crate) fn alternation_side(last: &Trial) -> Side {
    match (last.rewside(), last.choice().and_then(Choice::side)) {
        (Some(rewside), Some(choice)) if choice == rewside => rewside.opposite(),
        (Some(rewside), _) => rewside,
        (None, _) => Side::Left,
    }
}

/// Stay on the rewarded side until the animal gets it right, then switch.
#[derive(Debug)]
pub struct ForcedAlternation {
    trial_types: Vec<TrialType>,
    /// Indices into `trial_types` this instance may pick from; all if `None`
    allowed: Option<Vec<usize>>,
    last_side: Option<Side>,
    rng: StdRng,
}

impl ForcedAlternation {
    /// Fails if the trial types do not cover both sides.
    pub fn new(trial_types: Vec<TrialType>) -> Result<Self> {
        check_trial_types(&trial_types)?;
        Ok(ForcedAlternation {
            trial_types,
            allowed: None,
            last_side: None,
            rng: new_rng(),
        })
    }

    /// Reproducible choices, for tests and simulation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }
}

impl Scheduler for ForcedAlternation {
    fn name(&self) -> &str {
        "forced alternation"
    }

    fn status(&self) -> String {
        self.last_side.map(|s| s.to_string()).unwrap_or_default()
    }

    fn trial_types(&self) -> &[TrialType] {
        &self.trial_types
    }

    fn choose_params(&mut self, trial_matrix: &TrialMatrix) -> Result<ParameterSet> {
        // first trial: either side
        let side = trial_matrix.last().map(alternation_side);

        let ForcedAlternation {
            trial_types,
            allowed,
            last_side,
            rng,
        } = self;
        let candidates = trial_types
            .iter()
            .enumerate()
            .filter(|(i, _)| allowed.as_ref().map_or(true, |a| a.contains(i)))
            .map(|(_, t)| t);
        let chosen = pick(rng, candidates, |t| side.map_or(true, |s| t.rewside == s))?;

        *last_side = Some(chosen.rewside);
        Ok(chosen.params(false))
    }
}

/// Forced alternation restricted to the easiest stimulus on each side, for
/// the first trials of a session.
#[derive(Debug)]
pub struct SessionStarter {
    inner: ForcedAlternation,
}

impl SessionStarter {
    /// The easiest stimulus is the one with the smallest servo position, or
    /// the largest if `reverse_srvpos`.
    pub fn new(trial_types: Vec<TrialType>, reverse_srvpos: bool) -> Result<Self> {
        let mut inner = ForcedAlternation::new(trial_types)?;

        let mut allowed = Vec::new();
        for side in [Side::Left, Side::Right] {
            let rows = inner
                .trial_types
                .iter()
                .enumerate()
                .filter(|(_, t)| t.rewside == side);
            let easiest = if reverse_srvpos {
                rows.max_by_key(|(_, t)| t.srvpos)
            } else {
                rows.min_by_key(|(_, t)| t.srvpos)
            };
            let (i, _) = easiest
                .ok_or_else(|| ArduError::Config(format!("no trial types with rewside {}", side)))?;
            allowed.push(i);
        }
        inner.allowed = Some(allowed);

        Ok(SessionStarter { inner })
    }

    /// Seed the random picks.
    pub fn with_seed(self, seed: u64) -> Self {
        SessionStarter {
            inner: self.inner.with_seed(seed),
        }
    }
}

impl Scheduler for SessionStarter {
    fn name(&self) -> &str {
        "session starter"
    }

    fn status(&self) -> String {
        self.inner.status()
    }

    fn trial_types(&self) -> &[TrialType] {
        self.inner.trial_types()
    }

    fn choose_params(&mut self, trial_matrix: &TrialMatrix) -> Result<ParameterSet> {
        self.inner.choose_params(trial_matrix)
    }
}

/// Every row equally likely, regardless of history.
#[derive(Debug)]
pub struct RandomStim {
    trial_types: Vec<TrialType>,
    last_side: Option<Side>,
    rng: StdRng,
}

impl RandomStim {
    /// Fails if the trial types do not cover both sides.
    pub fn new(trial_types: Vec<TrialType>) -> Result<Self> {
        check_trial_types(&trial_types)?;
        Ok(RandomStim {
            trial_types,
            last_side: None,
            rng: new_rng(),
        })
    }

    /// Seed the random picks.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }
}

impl Scheduler for RandomStim {
    fn name(&self) -> &str {
        "random stim"
    }

    fn status(&self) -> String {
        self.last_side.map(|s| s.to_string()).unwrap_or_default()
    }

    fn trial_types(&self) -> &[TrialType] {
        &self.trial_types
    }

    fn choose_params(&mut self, _trial_matrix: &TrialMatrix) -> Result<ParameterSet> {
        let idx = self.rng.gen_range(0..self.trial_types.len());
        let chosen = &self.trial_types[idx];
        self.last_side = Some(chosen.rewside);
        Ok(chosen.params(true))
    }
}

/// Always the same side. The side can be changed between trials.
#[derive(Debug)]
pub struct ForcedSide {
    trial_types: Vec<TrialType>,
    side: Side,
    rng: StdRng,
}

impl ForcedSide {
    /// Fails if the trial types do not cover both sides, so that the side
    /// can be changed later.
    pub fn new(trial_types: Vec<TrialType>, side: Side) -> Result<Self> {
        check_trial_types(&trial_types)?;
        Ok(ForcedSide {
            trial_types,
            side,
            rng: new_rng(),
        })
    }

    /// Seed the random picks.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// The side every trial is rewarded on.
    pub fn side(&self) -> Side {
        self.side
    }

    /// Change the side from the next trial on.
    pub fn set_side(&mut self, side: Side) {
        self.side = side;
    }
}

impl Scheduler for ForcedSide {
    fn name(&self) -> &str {
        "forced side"
    }

    fn status(&self) -> String {
        self.side.to_string()
    }

    fn trial_types(&self) -> &[TrialType] {
        &self.trial_types
    }

    fn choose_params(&mut self, _trial_matrix: &TrialMatrix) -> Result<ParameterSet> {
        let side = self.side;
        Ok(pick(&mut self.rng, self.trial_types.iter(), |t| t.rewside == side)?.params(false))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn rwsd(params: &ParameterSet) -> Side {
        Side::from_code(params["RWSD"]).unwrap()
    }

    #[test]
    fn alternation_switches_only_after_a_hit() {
        let mut sched = ForcedAlternation::new(two_positions()).unwrap().with_seed(7);

        let hit_left = TrialMatrix::from_trials(vec![done(Side::Left, Side::Left, false)]);
        assert_eq!(rwsd(&sched.choose_params(&hit_left).unwrap()), Side::Right);

        let miss_left = TrialMatrix::from_trials(vec![done(Side::Left, Side::Right, false)]);
        assert_eq!(rwsd(&sched.choose_params(&miss_left).unwrap()), Side::Left);

        let hit_right = TrialMatrix::from_trials(vec![
            done(Side::Left, Side::Right, false),
            done(Side::Right, Side::Right, false),
        ]);
        let params = sched.choose_params(&hit_right).unwrap();
        assert_eq!(rwsd(&params), Side::Left);
        assert_eq!(params["ISRND"], 2);
        assert_eq!(sched.status(), "left");
    }

    #[test]
    fn unfinished_previous_trial_repeats_its_side() {
        let mut sched = ForcedAlternation::new(two_positions()).unwrap();
        let mut pending = done(Side::Right, Side::Right, false);
        pending.results.clear();
        let tm = TrialMatrix::from_trials(vec![pending]);
        assert_eq!(rwsd(&sched.choose_params(&tm).unwrap()), Side::Right);
    }

    #[test]
    fn session_starter_uses_easiest_rows() {
        for (reverse, srvpos) in [(false, 1150), (true, 1175)] {
            let mut sched = SessionStarter::new(two_positions(), reverse)
                .unwrap()
                .with_seed(3);
            let mut tm = TrialMatrix::default();
            for _ in 0..20 {
                let params = sched.choose_params(&tm).unwrap();
                assert_eq!(params["SRVPOS"], srvpos);
                let side = rwsd(&params);
                let mut trials = tm.trials().to_vec();
                trials.push(done(side, side, false));
                tm = TrialMatrix::from_trials(trials);
            }
        }
    }

    #[test]
    fn random_stim_marks_trials_random_and_covers_both_sides() {
        let mut sched = RandomStim::new(two_positions()).unwrap().with_seed(11);
        let sides: Vec<Side> = (0..50)
            .map(|_| {
                let params = sched.choose_params(&TrialMatrix::default()).unwrap();
                assert_eq!(params["ISRND"], 3);
                rwsd(&params)
            })
            .collect();
        assert!(sides.contains(&Side::Left));
        assert!(sides.contains(&Side::Right));
    }

    #[test]
    fn forced_side_follows_its_side() {
        let mut sched = ForcedSide::new(two_positions(), Side::Right).unwrap();
        let tm = TrialMatrix::from_trials(vec![done(Side::Right, Side::Right, false)]);
        for _ in 0..10 {
            assert_eq!(rwsd(&sched.choose_params(&tm).unwrap()), Side::Right);
        }
        sched.set_side(Side::Left);
        assert_eq!(rwsd(&sched.choose_params(&tm).unwrap()), Side::Left);
        assert_eq!(sched.status(), "left");
    }
}

//! Linear model of `choice ~ rewside + prevchoice`, used by the auto
//! scheduler to look for stay and side biases.
//!
//! Sides are coded left = 0, right = 1. A trial only counts if it has a
//! reward side, a left/right choice, and a previous trial with a left/right
//! choice. With one degree of freedom per factor the F test of each factor is
//! the square of its t test, so the p-values below are the two-factor ANOVA
//! p-values.

use crate::trial_matrix::{Side, Trial};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Coefficients and two-sided p-values of the fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnovaResult {
    /// Number of trials used
    pub n: usize,
    /// Predicted choice (0 left, 1 right) for a left reward after a left choice
    pub fit_intercept: f64,
    /// How much a right reward side moves the choice rightwards
    pub fit_rewside: f64,
    /// How much a previous right choice moves the choice rightwards
    pub fit_prevchoice: f64,
    /// Two-sided p-value of `fit_rewside`
    pub p_rewside: f64,
    /// Two-sided p-value of `fit_prevchoice`
    pub p_prevchoice: f64,
}

fn code(side: Side) -> f64 {
    match side {
        Side::Left => 0.0,
        Side::Right => 1.0,
    }
}

/// `(rewside, prevchoice, choice)` for every usable trial.
pub fn numericate(trials: &[Trial]) -> Vec<[f64; 3]> {
    trials
        .windows(2)
        .filter_map(|w| {
            let prevchoice = w[0].choice()?.side()?;
            let rewside = w[1].rewside()?;
            let choice = w[1].choice()?.side()?;
            Some([code(rewside), code(prevchoice), code(choice)])
        })
        .collect()
}

/// Fit the model. `None` when there are too few trials, the design is
/// singular (e.g. the animal never switched sides), or the fit is perfect.
pub fn run_anova(trials: &[Trial]) -> Option<AnovaResult> {
    let rows = numericate(trials);
    let n = rows.len();
    if n < 4 {
        return None;
    }

    let mut xtx = [[0.0; 3]; 3];
    let mut xty = [0.0; 3];
    for row in &rows {
        let x = [1.0, row[0], row[1]];
        for i in 0..3 {
            for j in 0..3 {
                xtx[i][j] += x[i] * x[j];
            }
            xty[i] += x[i] * row[2];
        }
    }

    let inv = invert3(xtx)?;
    let beta: Vec<f64> = (0..3)
        .map(|i| (0..3).map(|j| inv[i][j] * xty[j]).sum())
        .collect();

    let rss: f64 = rows
        .iter()
        .map(|row| {
            let predicted = beta[0] + beta[1] * row[0] + beta[2] * row[1];
            (row[2] - predicted).powi(2)
        })
        .sum();
    let df = (n - 3) as f64;
    let sigma2 = rss / df;
    if sigma2 <= 1e-12 {
        return None;
    }

    let p_value = |i: usize| {
        let se = (sigma2 * inv[i][i]).sqrt();
        students_t_two_sided(beta[i] / se, df)
    };
    let p_rewside = p_value(1)?;
    let p_prevchoice = p_value(2)?;

    Some(AnovaResult {
        n,
        fit_intercept: beta[0],
        fit_rewside: beta[1],
        fit_prevchoice: beta[2],
        p_rewside,
        p_prevchoice,
    })
}

/// Gauss-Jordan with partial pivoting.
fn invert3(m: [[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let mut a = m;
    let mut inv = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    for col in 0..3 {
        let pivot = (col..3).max_by(|&r1, &r2| a[r1][col].abs().total_cmp(&a[r2][col].abs()))?;
        if a[pivot][col].abs() < 1e-9 {
            return None;
        }
        a.swap(col, pivot);
        inv.swap(col, pivot);

        let scale = a[col][col];
        for j in 0..3 {
            a[col][j] /= scale;
            inv[col][j] /= scale;
        }
        for row in (0..3).filter(|&r| r != col) {
            let factor = a[row][col];
            for j in 0..3 {
                a[row][j] -= factor * a[col][j];
                inv[row][j] -= factor * inv[col][j];
            }
        }
    }
    Some(inv)
}

/// P(|T| > |t|) for Student's t with `df` degrees of freedom. `None` if
/// `df` is not positive.
pub fn students_t_two_sided(t: f64, df: f64) -> Option<f64> {
    if !t.is_finite() {
        return Some(0.0);
    }
    let dist = StudentsT::new(0.0, 1.0, df).ok()?;
    Some(2.0 * (1.0 - dist.cdf(t.abs())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn trial(rewside: i64, choice: i64) -> Trial {
        Trial {
            params: BTreeMap::from([("rwsd".to_owned(), rewside)]),
            results: BTreeMap::from([("resp".to_owned(), choice)]),
            ..Default::default()
        }
    }

    #[test]
    fn t_distribution_tails() {
        let p = |t, df| students_t_two_sided(t, df).unwrap();
        assert!((p(0.0, 10.0) - 1.0).abs() < 1e-12);
        // Cauchy: P(|T| > 1) = 1/2
        assert!((p(1.0, 1.0) - 0.5).abs() < 1e-9);
        assert!((p(-1.0, 1.0) - 0.5).abs() < 1e-9);
        assert!((p(1.96, 1000.0) - 0.0503).abs() < 0.001);
        assert!((p(2.228, 10.0) - 0.05).abs() < 0.001);
        assert_eq!(students_t_two_sided(1.0, 0.0), None);
    }

    #[test]
    fn stay_bias_is_detected() {
        // choices in runs of four, reward side alternating every trial
        let trials: Vec<Trial> = (0..48)
            .map(|i| {
                let rewside = if i % 2 == 0 { 1 } else { 2 };
                let choice = if (i / 4) % 2 == 0 { 1 } else { 2 };
                trial(rewside, choice)
            })
            .collect();
        let res = run_anova(&trials).unwrap();
        assert_eq!(res.n, 47);
        assert!(res.fit_prevchoice > 0.0);
        assert!(res.p_prevchoice < 0.05);
        assert!(res.p_rewside > 0.05);
    }

    #[test]
    fn singular_design_fails() {
        let trials: Vec<Trial> = (0..20).map(|i| trial(1 + i % 2, 1)).collect();
        assert_eq!(run_anova(&trials), None);
        assert_eq!(run_anova(&trials[..3]), None);
    }

    #[test]
    fn incomplete_trials_are_skipped() {
        let mut trials = vec![trial(1, 1), trial(2, 2)];
        trials.push(Trial::default());
        assert_eq!(numericate(&trials), vec![[1.0, 0.0, 1.0]]);
    }
}

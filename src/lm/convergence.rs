//! Stopping rules shared by the local minimisers, and the record they return.

use crate::error::{RelaxError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a minimiser stopped, or that it has not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceStatus {
    Running,
    /// The last accepted step moved no parameter by more than `xtol`.
    SmallStep,
    /// Chi-squared changed by less than `ftol`, relative to its value.
    SmallChi2Change,
    /// The gradient norm fell under `gtol`.
    SmallGradient,
    IterationLimit,
    /// Chi-squared became NaN or infinite.
    NonFinite,
}

impl ConvergenceStatus {
    pub fn is_terminated(&self) -> bool {
        *self != Self::Running
    }

    /// Only the three tolerance tests count as convergence.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::SmallStep | Self::SmallChi2Change | Self::SmallGradient)
    }
}

impl fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Running => "still iterating",
            Self::SmallStep => "converged on the parameter step",
            Self::SmallChi2Change => "converged on the chi-squared change",
            Self::SmallGradient => "converged on the gradient",
            Self::IterationLimit => "iteration limit reached",
            Self::NonFinite => "chi-squared is not finite",
        };
        f.write_str(text)
    }
}

/// One accepted step, as seen by the stopping rules.
#[derive(Debug, Clone, Copy)]
pub struct StepSummary<'a> {
    pub from: &'a Array1<f64>,
    pub to: &'a Array1<f64>,
    pub chi2_before: f64,
    pub chi2_after: f64,
    pub gradient_norm: f64,
    /// Accepted steps so far, this one included.
    pub iterations: usize,
}

impl StepSummary<'_> {
    /// Largest per-parameter move, measured against `max(|x|, 1)`.
    pub fn largest_move(&self) -> f64 {
        self.from
            .iter()
            .zip(self.to.iter())
            .fold(0.0, |acc, (old, new)| acc.max((new - old).abs() / old.abs().max(1.0)))
    }

    /// Drop in chi-squared, relative to its value before the step.
    pub fn chi2_drop(&self) -> f64 {
        (self.chi2_before - self.chi2_after).abs() / self.chi2_before.max(1e-10)
    }
}

/// Tolerances and the iteration cap for a local minimisation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceCriteria {
    pub xtol: f64,
    pub ftol: f64,
    pub gtol: f64,
    pub max_iterations: usize,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self::new(1e-8, 1e-8, 1e-8, 100)
    }
}

impl ConvergenceCriteria {
    pub fn new(xtol: f64, ftol: f64, gtol: f64, max_iterations: usize) -> Self {
        Self { xtol, ftol, gtol, max_iterations }
    }

    /// Classify an accepted step.
    ///
    /// The tolerance tests run before the iteration cap, so a step that both
    /// converges and exhausts the budget is reported as converged.
    pub fn check(&self, step: &StepSummary<'_>) -> ConvergenceStatus {
        if !step.chi2_after.is_finite() {
            ConvergenceStatus::NonFinite
        } else if step.gradient_norm < self.gtol {
            ConvergenceStatus::SmallGradient
        } else if step.largest_move() < self.xtol {
            ConvergenceStatus::SmallStep
        } else if step.chi2_drop() < self.ftol {
            ConvergenceStatus::SmallChi2Change
        } else if step.iterations >= self.max_iterations {
            ConvergenceStatus::IterationLimit
        } else {
            ConvergenceStatus::Running
        }
    }
}

/// What a local minimiser hands back.
#[derive(Debug, Clone)]
pub struct MinimizeResult {
    /// Best point found, in the problem's (scaled) coordinates.
    pub params: Array1<f64>,
    /// Weighted residuals at `params`.
    pub residuals: Array1<f64>,
    /// Chi-squared at `params`.
    pub cost: f64,
    pub iterations: usize,
    pub func_evals: usize,
    pub grad_evals: usize,
    pub status: ConvergenceStatus,
    pub success: bool,
    pub message: String,
    /// Jacobian at `params`, when the run was asked for it.
    pub jacobian: Option<Array2<f64>>,
}

impl MinimizeResult {
    /// Turn a run that stopped without converging into a
    /// [`RelaxError::ConvergenceFailure`] carrying the best point.
    pub fn into_converged(self) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        Err(RelaxError::ConvergenceFailure {
            params: self.params,
            chi2: self.cost,
            iterations: self.iterations,
            func_evals: self.func_evals,
            grad_evals: self.grad_evals,
            reason: self.message,
        })
    }
}

impl fmt::Display for MinimizeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} iterations (chi2 = {:.6e}, {} function / {} jacobian calls) at {}",
            self.message, self.iterations, self.cost, self.func_evals, self.grad_evals, self.params
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn classify(from: &Array1<f64>, to: &Array1<f64>, chi2: (f64, f64), grad: f64, iter: usize) -> ConvergenceStatus {
        ConvergenceCriteria::default().check(&StepSummary {
            from,
            to,
            chi2_before: chi2.0,
            chi2_after: chi2.1,
            gradient_norm: grad,
            iterations: iter,
        })
    }

    #[test]
    fn test_each_stopping_rule() {
        let start = array![12.0, 0.9, 1500.0];
        let far = array![11.0, 0.8, 1400.0];
        let near = array![12.0 + 1e-8, 0.9, 1500.0 + 1e-7];

        assert_eq!(classify(&start, &near, (4.0, 3.0), 1.0, 3), ConvergenceStatus::SmallStep);
        assert_eq!(
            classify(&start, &far, (4.0, 4.0 - 1e-9), 1.0, 3),
            ConvergenceStatus::SmallChi2Change
        );
        assert_eq!(classify(&start, &far, (4.0, 3.0), 1e-10, 3), ConvergenceStatus::SmallGradient);
        assert_eq!(classify(&start, &far, (4.0, 3.0), 1.0, 100), ConvergenceStatus::IterationLimit);
        assert_eq!(classify(&start, &far, (4.0, 3.0), 1.0, 3), ConvergenceStatus::Running);
        assert_eq!(classify(&start, &far, (4.0, f64::INFINITY), 1.0, 3), ConvergenceStatus::NonFinite);
    }

    #[test]
    fn test_moves_are_relative_above_one() {
        let from = array![1e4, 0.5];
        let to = array![1e4 + 1.0, 0.5 + 1e-3];
        let step = StepSummary {
            from: &from,
            to: &to,
            chi2_before: 1.0,
            chi2_after: 0.5,
            gradient_norm: 1.0,
            iterations: 1,
        };
        assert!((step.largest_move() - 1e-3).abs() < 1e-15);
        assert!((step.chi2_drop() - 0.5).abs() < 1e-15);
    }

    #[test]
    fn test_convergence_wins_over_iteration_cap() {
        let x = array![1.0];
        let criteria = ConvergenceCriteria::new(1e-8, 1e-8, 1e-8, 10);
        let step = StepSummary {
            from: &x,
            to: &x,
            chi2_before: 1.0,
            chi2_after: 1.0,
            gradient_norm: 1.0,
            iterations: 10,
        };
        assert_eq!(criteria.check(&step), ConvergenceStatus::SmallStep);
    }

    #[test]
    fn test_failed_run_becomes_an_error() {
        let result = MinimizeResult {
            params: array![1.0, 2.0],
            residuals: array![0.5],
            cost: 0.25,
            iterations: 100,
            func_evals: 140,
            grad_evals: 100,
            status: ConvergenceStatus::IterationLimit,
            success: false,
            message: ConvergenceStatus::IterationLimit.to_string(),
            jacobian: None,
        };
        assert!(!result.status.is_converged());
        assert!(result.status.is_terminated());
        match result.into_converged() {
            Err(RelaxError::ConvergenceFailure { chi2, iterations, reason, .. }) => {
                assert_eq!(chi2, 0.25);
                assert_eq!(iterations, 100);
                assert_eq!(reason, "iteration limit reached");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

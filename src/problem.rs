//! The least-squares interface seen by the minimisers and the grid search.
//!
//! Dispersion clusters, model-free spins and exponential curves all implement
//! [`Problem`]; [`crate::target::ScaledProblem`] wraps one to expose the
//! diagonally scaled parameter space.

use crate::error::Result;
use ndarray::{Array1, Array2};

/// A weighted nonlinear least-squares target.
///
/// Residuals are `(back_calc - data) / error`, so the sum of their squares is
/// chi-squared.
pub trait Problem {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>>;

    fn parameter_count(&self) -> usize;

    fn residual_count(&self) -> usize;

    /// `d residual_i / d param_j`. Numerical unless overridden.
    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>>
    where
        Self: Sized,
    {
        crate::utils::finite_difference::jacobian(self, params, None)
    }

    /// Whether [`Problem::jacobian`] is a closed form.
    fn has_custom_jacobian(&self) -> bool {
        false
    }

    fn eval_cost(&self, params: &Array1<f64>) -> Result<f64> {
        Ok(self.eval(params)?.iter().map(|r| r * r).sum())
    }
}

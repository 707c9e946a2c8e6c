//! Numerical Jacobians for targets without closed-form derivatives.
//!
//! Parameters often sit on a physical boundary (pA = 1, kex = 0), so a column
//! whose forward perturbation leaves the model's domain is taken from the
//! backward difference instead.

use crate::error::{RelaxError, Result};
use crate::problem::Problem;
use ndarray::{Array1, Array2};

const REL_STEP: f64 = 1e-8;

/// Perturbation for a parameter currently at `value`.
fn perturbation(value: f64, rel: f64) -> f64 {
    let magnitude = value.abs();
    if magnitude > rel {
        magnitude * rel
    } else {
        rel
    }
}

/// Jacobian of the residuals by one-sided differences, `J[i, j] = dr_i / dx_j`.
///
/// `rel_step` defaults to 1e-8 of the parameter magnitude (absolute for
/// parameters smaller than the step itself).
pub fn jacobian(problem: &dyn Problem, params: &Array1<f64>, rel_step: Option<f64>) -> Result<Array2<f64>> {
    let rel = rel_step.unwrap_or(REL_STEP);
    let base = problem.eval(params)?;
    if base.len() != problem.residual_count() {
        return Err(RelaxError::DimensionMismatch(format!(
            "problem declares {} residuals but evaluated {}",
            problem.residual_count(),
            base.len()
        )));
    }

    let mut jac = Array2::zeros((base.len(), params.len()));
    let mut shifted = params.clone();
    for (j, mut column) in jac.columns_mut().into_iter().enumerate() {
        let h = perturbation(params[j], rel);
        shifted[j] = params[j] + h;
        let (moved, signed_h) = match problem.eval(&shifted) {
            Ok(r) => (r, h),
            Err(_) => {
                shifted[j] = params[j] - h;
                (problem.eval(&shifted)?, -h)
            }
        };
        shifted[j] = params[j];
        column.assign(&((&moved - &base) / signed_h));
    }
    Ok(jac)
}

//! Implementation of the Levenberg-Marquardt algorithm.
//!
//! The damped normal equations `(JᵀJ + λI) δ = -Jᵀr` are solved with a
//! Cholesky decomposition, falling back to QR when the damped matrix is not
//! numerically positive definite. Linear inequality constraints are handled
//! with an active set: variables pinned at a bound with the gradient pushing
//! outwards are frozen, the remaining step is shortened by a ratio test, and
//! components along blocking constraint rows are projected out.

use nalgebra::{linalg::Cholesky, DMatrix, DVector};
use ndarray::{Array1, Array2};
use tracing::{debug, trace};

use crate::error::{RelaxError, Result};
use crate::parameters::LinearConstraints;
use crate::problem::Problem;

use super::config::{DecompositionMethod, LmConfig};
use super::convergence::{ConvergenceStatus, MinimizeResult, StepSummary};
use super::damping::{gain_ratio, Damping};

/// Slack below which a constraint row counts as active.
const ACTIVE_TOL: f64 = 1e-10;

/// Step fraction below which a blocking row is projected out of the step.
const BLOCKED_STEP: f64 = 1e-12;

/// The Levenberg-Marquardt optimizer.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    config: LmConfig,
}

impl LevenbergMarquardt {
    /// Create a new Levenberg-Marquardt optimizer with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new Levenberg-Marquardt optimizer with the given configuration.
    pub fn with_config(config: LmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    /// Minimize the chi-squared value of an unconstrained problem.
    ///
    /// # Arguments
    ///
    /// * `problem` - The problem to solve
    /// * `initial_params` - Initial guess for the parameter values
    ///
    /// # Returns
    ///
    /// * The result of the optimization. Hitting the iteration cap is not an
    ///   error here; see [`MinimizeResult::into_converged`].
    pub fn minimize<P: Problem>(
        &self,
        problem: &P,
        initial_params: Array1<f64>,
    ) -> Result<MinimizeResult> {
        self.run(problem, initial_params, None)
    }

    /// Minimize the chi-squared value subject to `A x >= b`.
    ///
    /// The starting point is clamped onto the single-parameter rows first.
    /// Every accepted iterate stays feasible.
    pub fn minimize_constrained<P: Problem>(
        &self,
        problem: &P,
        initial_params: Array1<f64>,
        constraints: &LinearConstraints,
    ) -> Result<MinimizeResult> {
        if constraints.n_params() != problem.parameter_count() {
            return Err(RelaxError::DimensionMismatch(format!(
                "Constraints on {} parameters for a problem with {}",
                constraints.n_params(),
                problem.parameter_count()
            )));
        }
        if constraints.is_empty() {
            return self.run(problem, initial_params, None);
        }
        self.run(problem, initial_params, Some(constraints))
    }

    fn run<P: Problem>(
        &self,
        problem: &P,
        initial_params: Array1<f64>,
        constraints: Option<&LinearConstraints>,
    ) -> Result<MinimizeResult> {
        let n_params = problem.parameter_count();
        if initial_params.len() != n_params {
            return Err(RelaxError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                n_params,
                initial_params.len()
            )));
        }

        let mut params = match constraints {
            Some(c) => c.snap(&initial_params),
            None => initial_params,
        };
        let mut residuals = problem.eval(&params)?;
        let mut cost = sum_of_squares(&residuals);
        if !cost.is_finite() {
            return Err(RelaxError::InvalidParameter(format!(
                "Chi-squared is not finite at the starting point {:?}",
                params
            )));
        }

        let criteria = self.config.criteria();
        let mut damping = Damping::from_config(&self.config);
        let mut func_evals = 1;
        let mut grad_evals = 0;
        let mut iterations = 0;
        let mut message = String::new();

        let status = 'outer: loop {
            let jac = problem.jacobian(&params)?;
            grad_evals += 1;
            let gradient = jac.t().dot(&residuals);
            let jtj = jac.t().dot(&jac);
            let free = free_variables(constraints, &params, &gradient);

            let gradient_norm = gradient
                .iter()
                .zip(&free)
                .filter(|(_, &f)| f)
                .fold(0.0_f64, |acc, (g, _)| acc.max(g.abs()));
            if gradient_norm < self.config.gtol {
                break ConvergenceStatus::SmallGradient;
            }
            if iterations >= self.config.max_iterations {
                break ConvergenceStatus::IterationLimit;
            }

            loop {
                let step = match self.solve_step(&jtj, &gradient, &free, damping.lambda) {
                    Some(step) => step,
                    None => {
                        damping.raise();
                        if damping.is_saturated() {
                            return Err(RelaxError::SingularSystem(format!(
                                "Damped normal equations could not be solved (lambda = {:.1e})",
                                damping.lambda
                            )));
                        }
                        continue;
                    }
                };

                let new_params = match constraints {
                    Some(c) => c.snap(&(&params + &feasible_step(c, &params, step))),
                    None => &params + &step,
                };
                let step = &new_params - &params;
                let predicted = -(2.0 * gradient.dot(&step) + step.dot(&jtj.dot(&step)));

                // Points outside a closed form's domain count as rejected steps.
                let (new_residuals, new_cost) = match problem.eval(&new_params) {
                    Ok(r) => {
                        let c = sum_of_squares(&r);
                        (Some(r), c)
                    }
                    Err(RelaxError::DomainError { .. }) => (None, f64::INFINITY),
                    Err(e) => return Err(e),
                };
                func_evals += 1;

                let ratio = gain_ratio(cost, new_cost, predicted);
                let accepted = new_cost.is_finite() && damping.judge(ratio);
                if !new_cost.is_finite() {
                    damping.raise();
                }

                if let (true, Some(new_residuals)) = (accepted, new_residuals) {
                    iterations += 1;
                    let status = criteria.check(&StepSummary {
                        from: &params,
                        to: &new_params,
                        chi2_before: cost,
                        chi2_after: new_cost,
                        gradient_norm,
                        iterations,
                    });
                    trace!(iterations, chi2 = new_cost, lambda = damping.lambda, "LM step accepted");
                    params = new_params;
                    residuals = new_residuals;
                    cost = new_cost;
                    if status.is_terminated() {
                        break 'outer status;
                    }
                    continue 'outer;
                }

                if damping.is_saturated() {
                    // Steps of size |g|/lambda_max no longer move the parameters.
                    message = "no step reduces chi-squared".to_string();
                    break 'outer ConvergenceStatus::SmallStep;
                }
            }
        };

        let jacobian = if self.config.calc_jacobian {
            grad_evals += 1;
            Some(problem.jacobian(&params)?)
        } else {
            None
        };
        if message.is_empty() {
            message = status.to_string();
        }
        debug!(
            iterations,
            func_evals,
            grad_evals,
            chi2 = cost,
            status = ?status,
            "Levenberg-Marquardt terminated"
        );

        Ok(MinimizeResult {
            params,
            residuals,
            cost,
            iterations,
            func_evals,
            grad_evals,
            status,
            success: status.is_converged(),
            message,
            jacobian,
        })
    }

    /// Solve the damped normal equations over the free variables.
    fn solve_step(
        &self,
        jtj: &Array2<f64>,
        gradient: &Array1<f64>,
        free: &[bool],
        lambda: f64,
    ) -> Option<Array1<f64>> {
        let index: Vec<usize> = (0..free.len()).filter(|&i| free[i]).collect();
        let mut step = Array1::zeros(free.len());
        if index.is_empty() {
            return Some(step);
        }

        let m = index.len();
        let a = DMatrix::from_fn(m, m, |r, c| {
            jtj[[index[r], index[c]]] + if r == c { lambda } else { 0.0 }
        });
        let b = DVector::from_fn(m, |r, _| -gradient[index[r]]);

        let cholesky = || Cholesky::new(a.clone()).map(|chol| chol.solve(&b));
        let qr = || a.clone().qr().solve(&b);
        let solution = match self.config.decomposition_method {
            DecompositionMethod::Cholesky => cholesky(),
            DecompositionMethod::QR => qr(),
            DecompositionMethod::Auto => cholesky().or_else(qr),
        }?;
        if solution.iter().any(|v| !v.is_finite()) {
            return None;
        }
        for (k, &i) in index.iter().enumerate() {
            step[i] = solution[k];
        }
        Some(step)
    }
}

fn sum_of_squares(residuals: &Array1<f64>) -> f64 {
    residuals.iter().map(|r| r.powi(2)).sum()
}

/// Variables not pinned at an active bound by a gradient pointing outwards.
fn free_variables(
    constraints: Option<&LinearConstraints>,
    params: &Array1<f64>,
    gradient: &Array1<f64>,
) -> Vec<bool> {
    let mut free = vec![true; params.len()];
    let constraints = match constraints {
        Some(c) => c,
        None => return free,
    };
    for row_index in constraints.active(params, ACTIVE_TOL) {
        let row = constraints.a.row(row_index);
        let mut nonzero = row.iter().enumerate().filter(|(_, &c)| c != 0.0);
        if let (Some((j, &c)), None) = (nonzero.next(), nonzero.next()) {
            // Descent moves along -g; leaving the bound means c * (-g) < 0.
            if -c * gradient[j] < 0.0 {
                free[j] = false;
            }
        }
    }
    free
}

/// Shorten `step` so that `params + step` stays feasible.
///
/// A row blocking the step at zero length is projected out of the step and
/// the ratio test is repeated, so the step slides along the constraint face.
fn feasible_step(
    constraints: &LinearConstraints,
    params: &Array1<f64>,
    mut step: Array1<f64>,
) -> Array1<f64> {
    let mut basis: Vec<Array1<f64>> = Vec::new();
    for _ in 0..=constraints.n_constraints() {
        let (alpha, blocking) = constraints.max_step(params, &step);
        let row_index = match blocking {
            Some(i) if alpha <= BLOCKED_STEP => i,
            _ => return step * alpha,
        };

        let mut normal = constraints.a.row(row_index).to_owned();
        for q in &basis {
            let overlap = normal.dot(q);
            normal.scaled_add(-overlap, q);
        }
        let norm = normal.dot(&normal).sqrt();
        if norm < 1e-12 {
            break;
        }
        normal /= norm;
        let along = step.dot(&normal);
        step.scaled_add(-along, &normal);
        basis.push(normal);
    }
    Array1::zeros(params.len())
}

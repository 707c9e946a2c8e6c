//! Nelder-Mead downhill simplex.
//!
//! A derivative-free alternative to Levenberg-Marquardt. Vertices outside the
//! feasible region, or outside a closed form's domain, get an infinite cost
//! and are therefore never kept as an improvement.

use ndarray::Array1;
use std::cell::Cell;
use tracing::debug;

use crate::error::{RelaxError, Result};
use crate::parameters::constraints::FEASIBILITY_TOL;
use crate::parameters::LinearConstraints;
use crate::problem::Problem;

use super::config::SimplexConfig;
use super::convergence::{ConvergenceStatus, MinimizeResult};

/// The Nelder-Mead minimiser.
#[derive(Debug, Clone, Default)]
pub struct NelderMead {
    config: SimplexConfig,
}

struct Simplex<'a, P: Problem> {
    problem: &'a P,
    constraints: Option<&'a LinearConstraints>,
    func_evals: Cell<usize>,
}

impl<'a, P: Problem> Simplex<'a, P> {
    fn cost(&self, x: &Array1<f64>) -> Result<f64> {
        if let Some(c) = self.constraints {
            if !c.is_feasible(x, FEASIBILITY_TOL) {
                return Ok(f64::INFINITY);
            }
        }
        self.func_evals.set(self.func_evals.get() + 1);
        match self.problem.eval_cost(x) {
            Ok(cost) if cost.is_finite() => Ok(cost),
            Ok(_) | Err(RelaxError::DomainError { .. }) => Ok(f64::INFINITY),
            Err(e) => Err(e),
        }
    }
}

impl NelderMead {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SimplexConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimplexConfig {
        &self.config
    }

    /// Minimize the chi-squared value, optionally subject to `A x >= b`.
    ///
    /// The initial simplex places one vertex `initial_step` along each axis
    /// from the start, stepping backwards when the forward vertex is
    /// infeasible.
    pub fn minimize<P: Problem>(
        &self,
        problem: &P,
        initial_params: Array1<f64>,
        constraints: Option<&LinearConstraints>,
    ) -> Result<MinimizeResult> {
        self.config.validate().map_err(RelaxError::InvalidConfig)?;
        let n = problem.parameter_count();
        if initial_params.len() != n {
            return Err(RelaxError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                n,
                initial_params.len()
            )));
        }
        if let Some(c) = constraints {
            if c.n_params() != n {
                return Err(RelaxError::DimensionMismatch(format!(
                    "Constraints on {} parameters for a problem with {}",
                    c.n_params(),
                    n
                )));
            }
        }

        let start = match constraints {
            Some(c) => c.snap(&initial_params),
            None => initial_params,
        };
        let simplex = Simplex {
            problem,
            constraints,
            func_evals: Cell::new(0),
        };

        let start_cost = simplex.cost(&start)?;
        if !start_cost.is_finite() {
            return Err(RelaxError::InvalidParameter(format!(
                "The simplex starting point {:?} is infeasible",
                start
            )));
        }
        let mut vertices = vec![start.clone()];
        let mut costs = vec![start_cost];
        for i in 0..n {
            let mut vertex = start.clone();
            vertex[i] += self.config.initial_step;
            let mut cost = simplex.cost(&vertex)?;
            if !cost.is_finite() {
                vertex[i] = start[i] - self.config.initial_step;
                cost = simplex.cost(&vertex)?;
            }
            vertices.push(vertex);
            costs.push(cost);
        }

        let SimplexConfig {
            alpha,
            gamma,
            rho,
            sigma,
            ..
        } = self.config;

        let mut iterations = 0;
        let status = loop {
            let mut order: Vec<usize> = (0..=n).collect();
            order.sort_by(|&a, &b| costs[a].total_cmp(&costs[b]));
            let best = order[0];
            let worst = order[n];
            let second_worst = order[n.saturating_sub(1)];

            let spread = costs[worst] - costs[best];
            if spread.is_finite() && spread <= self.config.ftol * costs[best].abs().max(1.0) {
                break ConvergenceStatus::SmallChi2Change;
            }
            let size = vertices
                .iter()
                .flat_map(|v| v.iter().zip(vertices[best].iter()).map(|(a, b)| (a - b).abs()))
                .fold(0.0, f64::max);
            if size <= self.config.xtol {
                break ConvergenceStatus::SmallStep;
            }
            if iterations >= self.config.max_iterations {
                break ConvergenceStatus::IterationLimit;
            }
            iterations += 1;

            let mut centroid = Array1::<f64>::zeros(n);
            for (i, v) in vertices.iter().enumerate() {
                if i != worst {
                    centroid += v;
                }
            }
            centroid /= n as f64;

            let reflected = &centroid + &((&centroid - &vertices[worst]) * alpha);
            let reflected_cost = simplex.cost(&reflected)?;

            if costs[best] <= reflected_cost && reflected_cost < costs[second_worst] {
                vertices[worst] = reflected;
                costs[worst] = reflected_cost;
            } else if reflected_cost < costs[best] {
                let expanded = &centroid + &((&reflected - &centroid) * gamma);
                let expanded_cost = simplex.cost(&expanded)?;
                if expanded_cost < reflected_cost {
                    vertices[worst] = expanded;
                    costs[worst] = expanded_cost;
                } else {
                    vertices[worst] = reflected;
                    costs[worst] = reflected_cost;
                }
            } else {
                let outside = reflected_cost < costs[worst];
                let contracted = if outside {
                    &centroid + &((&reflected - &centroid) * rho)
                } else {
                    &centroid + &((&vertices[worst] - &centroid) * rho)
                };
                let contracted_cost = simplex.cost(&contracted)?;
                let accept = if outside {
                    contracted_cost <= reflected_cost
                } else {
                    contracted_cost < costs[worst]
                };
                if accept {
                    vertices[worst] = contracted;
                    costs[worst] = contracted_cost;
                } else {
                    // Shrink towards the best vertex.
                    let anchor = vertices[best].clone();
                    for i in 0..=n {
                        if i != best {
                            vertices[i] = &anchor + &((&vertices[i] - &anchor) * sigma);
                            costs[i] = simplex.cost(&vertices[i])?;
                        }
                    }
                }
            }
        };

        let best = (0..=n)
            .min_by(|&a, &b| costs[a].total_cmp(&costs[b]))
            .unwrap_or(0);
        let params = vertices.swap_remove(best);
        let residuals = problem.eval(&params)?;
        let func_evals = simplex.func_evals.get() + 1;
        debug!(iterations, func_evals, chi2 = costs[best], status = ?status, "Simplex terminated");

        Ok(MinimizeResult {
            params,
            residuals,
            cost: costs[best],
            iterations,
            func_evals,
            grad_evals: 0,
            status,
            success: status.is_converged(),
            message: status.to_string(),
            jacobian: None,
        })
    }
}

//! # Fit driver
//!
//! Every fit of a cluster runs through the same states:
//!
//! ```text
//! Init -> GridSearch -> LocalMinimise -> Converged | Failed
//! ```
//!
//! The grid search is skipped when no grid is configured, in which case the
//! local minimiser starts from the values stored on the spins (or the
//! defaults). The optimisers see the scaled problem: every parameter is
//! divided by its scaling factor, and the constraints are built for the
//! scaled vector.
//!
//! [`fit_cluster`] reads the spins and returns a [`FitOutcome`];
//! [`store_outcome`] writes it back. [`minimise_cluster`] does both, and
//! [`minimise_pipe`] runs all units of a pipe in parallel.

mod batch;
mod exponential;

pub use batch::{minimise_pipe, BatchReport, UnitFailure};
pub use exponential::{fit_curve, minimise_exponential, CurveFit};

use crate::error::{RelaxError, Result};
use crate::experiment::R20Key;
use crate::grid::{grid_search, GridAxis, GridConfig, GridInfo, GridSearchResult};
use crate::lm::{
    ConvergenceStatus, LevenbergMarquardt, LmConfig, MinimizeResult, NelderMead, SimplexConfig,
};
use crate::models::ModelFamily;
use crate::parameters::{
    cluster_model, disassemble_param_vector, grid_bounds, linear_constraints, param_conversion,
    preset_values, scaling_vector, assemble_param_vector, LinearConstraints,
};
use crate::spin::{FitStats, Spin};
use crate::target::{ClusterTarget, ScaledProblem};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Cooperative cancellation flag shared between a caller and a running batch.
///
/// Batches check the flag between grid points, clusters and replicates and
/// return [`RelaxError::Cancelled`] once it is set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub(crate) fn check_cancel(cancel: Option<&CancelToken>) -> Result<()> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(RelaxError::Cancelled),
        _ => Ok(()),
    }
}

/// State of a single fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitState {
    Init,
    GridSearch,
    LocalMinimise,
    Converged,
    Failed,
}

impl fmt::Display for FitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FitState::Init => "init",
            FitState::GridSearch => "grid search",
            FitState::LocalMinimise => "local minimisation",
            FitState::Converged => "converged",
            FitState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The local minimiser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Algorithm {
    #[default]
    LevenbergMarquardt,
    Simplex,
}

/// Settings of one fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinimiseConfig {
    pub algorithm: Algorithm,
    pub lm: LmConfig,
    pub simplex: SimplexConfig,
    /// Grid search before the local minimisation; `None` skips it.
    pub grid: Option<GridConfig>,
    /// Apply the linear constraints of the model. Default: true
    pub constraints: bool,
}

impl Default for MinimiseConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            lm: LmConfig::default(),
            simplex: SimplexConfig::default(),
            grid: Some(GridConfig::default()),
            constraints: true,
        }
    }
}

impl MinimiseConfig {
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_lm(mut self, lm: LmConfig) -> Self {
        self.lm = lm;
        self
    }

    pub fn with_simplex(mut self, simplex: SimplexConfig) -> Self {
        self.simplex = simplex;
        self
    }

    pub fn with_grid(mut self, grid: Option<GridConfig>) -> Self {
        self.grid = grid;
        self
    }

    pub fn with_constraints(mut self, constraints: bool) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.lm.validate().map_err(RelaxError::InvalidConfig)?;
        self.simplex.validate().map_err(RelaxError::InvalidConfig)?;
        if let Some(grid) = &self.grid {
            grid.validate()?;
        }
        Ok(())
    }
}

/// Result of a successful fit, in physical units.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub state: FitState,
    pub params: Array1<f64>,
    pub chi2: f64,
    pub iterations: usize,
    pub func_evals: usize,
    pub grad_evals: usize,
    pub status: ConvergenceStatus,
    /// The grid minimum the local minimiser started from.
    pub grid: Option<GridSearchResult>,
}

/// Fit one cluster without touching the spins.
///
/// # Arguments
///
/// * `spins` - The spins of the cluster, sharing one model
/// * `r20_keys` - The pipe-wide R20 keys
/// * `sim_index` - Fit the data of this Monte Carlo replicate
/// * `config` - Grid and minimiser settings
/// * `cancel` - Checked during the grid search
///
/// # Errors
///
/// `ConvergenceFailure` when the local minimiser does not converge, with the
/// best vector in physical units. Errors of the grid search and the target
/// construction propagate unchanged.
pub fn fit_cluster(
    spins: &[Spin],
    r20_keys: &[R20Key],
    sim_index: Option<usize>,
    config: &MinimiseConfig,
    cancel: Option<&CancelToken>,
) -> Result<FitOutcome> {
    let mut state = FitState::Init;
    fit_cluster_tracked(spins, r20_keys, sim_index, config, cancel, &mut state)
}

/// [`fit_cluster`], recording the state reached in `state`.
pub(crate) fn fit_cluster_tracked(
    spins: &[Spin],
    r20_keys: &[R20Key],
    sim_index: Option<usize>,
    config: &MinimiseConfig,
    cancel: Option<&CancelToken>,
    state: &mut FitState,
) -> Result<FitOutcome> {
    *state = FitState::Init;
    config.validate()?;
    check_cancel(cancel)?;

    let target = ClusterTarget::new(spins, r20_keys, sim_index)?;
    let scaling = scaling_vector(spins, r20_keys)?;
    let problem = ScaledProblem::new(&target, scaling.clone())?;
    let constraints = if config.constraints {
        linear_constraints(spins, r20_keys, &scaling)?
    } else {
        LinearConstraints::unconstrained(scaling.len())
    };
    let mut start = problem.to_scaled(&assemble_param_vector(spins, r20_keys, sim_index)?);

    let grid = match &config.grid {
        Some(grid_config) => {
            *state = FitState::GridSearch;
            let info = scaled_grid(spins, r20_keys, sim_index, &scaling, grid_config)?;
            let result = grid_search(&problem, &info, Some(&constraints), grid_config, cancel)?;
            start = result.params.clone();
            Some(result)
        }
        None => None,
    };

    *state = FitState::LocalMinimise;
    check_cancel(cancel)?;
    let result = local_minimise(&problem, start, &constraints, config).and_then(|r| {
        r.into_converged().map_err(|e| match e {
            RelaxError::ConvergenceFailure {
                params,
                chi2,
                iterations,
                func_evals,
                grad_evals,
                reason,
            } => RelaxError::ConvergenceFailure {
                params: problem.to_physical(&params),
                chi2,
                iterations,
                func_evals,
                grad_evals,
                reason,
            },
            other => other,
        })
    });
    let result = match result {
        Ok(result) => result,
        Err(e) => {
            *state = FitState::Failed;
            return Err(e);
        }
    };

    *state = FitState::Converged;
    Ok(FitOutcome {
        state: *state,
        params: problem.to_physical(&result.params),
        chi2: result.cost,
        iterations: result.iterations,
        func_evals: result.func_evals,
        grad_evals: result.grad_evals,
        status: result.status,
        grid,
    })
}

/// The grid over the scaled vector. Elements with a stored value get a
/// single step at that value.
fn scaled_grid(
    spins: &[Spin],
    r20_keys: &[R20Key],
    sim_index: Option<usize>,
    scaling: &Array1<f64>,
    config: &GridConfig,
) -> Result<GridInfo> {
    let bounds = grid_bounds(spins, r20_keys)?;
    let preset = preset_values(spins, r20_keys, sim_index)?;
    let axes = bounds
        .iter()
        .zip(&preset)
        .zip(scaling.iter())
        .map(|((&(lower, upper), value), &s)| match value {
            Some(v) => GridAxis::fixed(v / s),
            None => GridAxis::new(config.increments, lower / s, upper / s),
        })
        .collect();
    GridInfo::new(axes)
}

fn local_minimise<P: crate::problem::Problem>(
    problem: &P,
    start: Array1<f64>,
    constraints: &LinearConstraints,
    config: &MinimiseConfig,
) -> Result<MinimizeResult> {
    match config.algorithm {
        Algorithm::LevenbergMarquardt => LevenbergMarquardt::with_config(config.lm.clone())
            .minimize_constrained(problem, start, constraints),
        Algorithm::Simplex => {
            let constraints = (!constraints.is_empty()).then_some(constraints);
            NelderMead::with_config(config.simplex.clone()).minimize(problem, start, constraints)
        }
    }
}

/// Write a fit result onto the spins of its cluster.
///
/// The vector goes into the point values, or into replicate `sim_index`;
/// the derived parameters are then back-calculated. Point fits record
/// their statistics in [`Spin::fit`], replicate fits their chi-squared in
/// [`Spin::chi2_sim`].
pub fn store_outcome(
    spins: &mut [Spin],
    r20_keys: &[R20Key],
    outcome: &FitOutcome,
    sim_index: Option<usize>,
) -> Result<()> {
    disassemble_param_vector(spins, r20_keys, &outcome.params, sim_index)?;
    param_conversion(spins, sim_index)?;
    for spin in spins.iter_mut().filter(|s| s.select) {
        match sim_index {
            None => {
                spin.fit = FitStats {
                    chi2: Some(outcome.chi2),
                    iterations: outcome.iterations,
                    func_evals: outcome.func_evals,
                    grad_evals: outcome.grad_evals,
                    converged: outcome.state == FitState::Converged,
                    warning: None,
                };
            }
            Some(i) => {
                if spin.chi2_sim.len() <= i {
                    spin.chi2_sim.resize(i + 1, f64::NAN);
                }
                spin.chi2_sim[i] = outcome.chi2;
            }
        }
    }
    Ok(())
}

/// Record a failed point fit on the selected spins.
pub(crate) fn store_failure(spins: &mut [Spin], error: &RelaxError) {
    for spin in spins.iter_mut().filter(|s| s.select) {
        spin.fit = match error {
            RelaxError::ConvergenceFailure {
                chi2,
                iterations,
                func_evals,
                grad_evals,
                ..
            } => FitStats {
                chi2: Some(*chi2),
                iterations: *iterations,
                func_evals: *func_evals,
                grad_evals: *grad_evals,
                converged: false,
                warning: Some(error.to_string()),
            },
            _ => FitStats {
                warning: Some(error.to_string()),
                ..FitStats::default()
            },
        };
    }
}

/// Fit one cluster and store the result on its spins.
///
/// Exponential clusters are fitted spin by spin with
/// [`minimise_exponential`]; their outcome sums the statistics of all
/// curves.
#[instrument(skip_all, fields(spins = spins.len(), sim = ?sim_index))]
pub fn minimise_cluster(
    spins: &mut [Spin],
    r20_keys: &[R20Key],
    sim_index: Option<usize>,
    config: &MinimiseConfig,
    cancel: Option<&CancelToken>,
) -> Result<FitOutcome> {
    if let Some(model) = cluster_model(spins)? {
        if model.family() == ModelFamily::Exponential {
            return minimise_exponential_cluster(spins, config, sim_index);
        }
    }
    match fit_cluster(spins, r20_keys, sim_index, config, cancel) {
        Ok(outcome) => {
            store_outcome(spins, r20_keys, &outcome, sim_index)?;
            debug!(chi2 = outcome.chi2, iterations = outcome.iterations, "Cluster fitted");
            Ok(outcome)
        }
        Err(e) => {
            if sim_index.is_none() {
                store_failure(spins, &e);
            }
            Err(e)
        }
    }
}

fn minimise_exponential_cluster(
    spins: &mut [Spin],
    config: &MinimiseConfig,
    sim_index: Option<usize>,
) -> Result<FitOutcome> {
    if sim_index.is_some() {
        return Err(RelaxError::InvalidParameter(
            "Exponential curves are not refitted per Monte Carlo replicate".to_string(),
        ));
    }
    let mut fits = Vec::new();
    for spin in spins.iter_mut().filter(|s| s.select) {
        fits.extend(minimise_exponential(spin, config)?);
    }
    Ok(exponential::exponential_outcome(&fits))
}

//! Two-parameter exponential fits of peak intensity decays.
//!
//! Each [`IntensityCurve`] of a spin is fitted on its own, and the fitted
//! R2eff with its covariance error becomes the dispersion observation of
//! the curve's point.

use super::{local_minimise, FitOutcome, FitState, MinimiseConfig};
use crate::error::{RelaxError, Result};
use crate::experiment::{DispersionPoint, IntensityCurve};
use crate::grid::{grid_search, GridInfo};
use crate::lm::ConvergenceStatus;
use crate::models::exponential::estimate;
use crate::parameters::{LinearConstraints, ParamName};
use crate::problem::Problem;
use crate::spin::{FitStats, Spin};
use crate::statistics::{multifit_covar, standard_errors};
use crate::target::{ExponentialTarget, ScaledProblem};
use ndarray::{array, Array1};
use tracing::debug;

/// Fit of one intensity curve.
#[derive(Debug, Clone)]
pub struct CurveFit {
    pub point: DispersionPoint,
    pub r2eff: f64,
    pub i0: f64,
    pub r2eff_err: f64,
    pub i0_err: f64,
    pub chi2: f64,
    pub iterations: usize,
    pub func_evals: usize,
    pub grad_evals: usize,
    pub status: ConvergenceStatus,
}

/// Fit `I0 exp(-R2eff t)` to one curve.
///
/// The start is the log-linear estimate of the curve. When no estimate
/// exists (fewer than two positive intensities) and a grid is configured,
/// the grid over `[R2eff, I0]` provides it instead.
pub fn fit_curve(curve: &IntensityCurve, config: &MinimiseConfig) -> Result<CurveFit> {
    config.validate()?;
    let target = ExponentialTarget::new(curve)?;
    let max_intensity = match target.max_intensity() {
        m if m > 0.0 => m,
        _ => 1.0,
    };
    let scaling = array![ParamName::R2eff.scaling(), max_intensity];
    let problem = ScaledProblem::new(&target, scaling.clone())?;
    let constraints = LinearConstraints::from_bounds(
        &[
            ParamName::R2eff.constraint_bounds(),
            ParamName::I0.constraint_bounds(),
        ],
        &scaling,
    )?;

    let start = match (estimate(&curve.times, &curve.intensities), &config.grid) {
        (Some((r2eff, i0)), _) => problem.to_scaled(&array![r2eff, i0]),
        (None, Some(grid_config)) => {
            let (r_lo, r_hi) = ParamName::R2eff.grid_bounds();
            let (i_lo, i_hi) = ParamName::I0.grid_bounds();
            let info = GridInfo::from_bounds(
                &[
                    (r_lo / scaling[0], r_hi / scaling[0]),
                    (i_lo, i_hi * 1.5),
                ],
                &[grid_config.increments, grid_config.increments],
            )?;
            grid_search(&problem, &info, Some(&constraints), grid_config, None)?.params
        }
        (None, None) => problem.to_scaled(&array![ParamName::R2eff.default_value(), max_intensity]),
    };

    let result = local_minimise(&problem, start, &constraints, config)?.into_converged()?;
    let params = problem.to_physical(&result.params);
    let jacobian = target.jacobian(&params)?;
    let covar = multifit_covar(&jacobian, 0.0, None)?;
    let errors = standard_errors(&covar.matrix);
    debug!(
        r2eff = params[0],
        error = errors[0],
        chi2 = result.cost,
        "Exponential curve fitted"
    );

    Ok(CurveFit {
        point: curve.point,
        r2eff: params[0],
        i0: params[1],
        r2eff_err: errors[0],
        i0_err: errors[1],
        chi2: result.cost,
        iterations: result.iterations,
        func_evals: result.func_evals,
        grad_evals: result.grad_evals,
        status: result.status,
    })
}

/// Fit every intensity curve of a spin and store R2eff as dispersion data.
///
/// An existing observation at the same point is overwritten, otherwise a new
/// one is added. The summed statistics of all curves go into [`Spin::fit`].
pub fn minimise_exponential(spin: &mut Spin, config: &MinimiseConfig) -> Result<Vec<CurveFit>> {
    if spin.curves.is_empty() {
        return Err(RelaxError::InsufficientData {
            required: 1,
            available: 0,
            context: format!("intensity curves of spin '{}'", spin.id),
        });
    }

    let fitted: Result<Vec<CurveFit>> = spin
        .curves
        .iter()
        .map(|curve| fit_curve(curve, config))
        .collect();
    let fits = match fitted {
        Ok(fits) => fits,
        Err(e) => {
            super::store_failure(std::slice::from_mut(spin), &e);
            return Err(e);
        }
    };

    let mut stats = FitStats {
        chi2: Some(0.0),
        converged: true,
        ..FitStats::default()
    };
    for fit in &fits {
        let existing = spin
            .observations
            .iter_mut()
            .find(|obs| obs.dispersion_point() == Some(&fit.point));
        match existing {
            Some(obs) => {
                obs.value = fit.r2eff;
                obs.error = fit.r2eff_err;
            }
            None => spin.add_dispersion(fit.point, fit.r2eff, fit.r2eff_err),
        }
        stats.chi2 = stats.chi2.map(|c| c + fit.chi2);
        stats.iterations += fit.iterations;
        stats.func_evals += fit.func_evals;
        stats.grad_evals += fit.grad_evals;
    }
    spin.fit = stats;
    Ok(fits)
}

/// Outcome summing the curve fits of a cluster's spins.
pub(super) fn exponential_outcome(fits: &[CurveFit]) -> FitOutcome {
    let params: Vec<f64> = fits.iter().flat_map(|f| [f.r2eff, f.i0]).collect();
    FitOutcome {
        state: FitState::Converged,
        params: Array1::from(params),
        chi2: fits.iter().map(|f| f.chi2).sum(),
        iterations: fits.iter().map(|f| f.iterations).sum(),
        func_evals: fits.iter().map(|f| f.func_evals).sum(),
        grad_evals: fits.iter().map(|f| f.grad_evals).sum(),
        status: fits
            .last()
            .map_or(ConvergenceStatus::Running, |f| f.status),
        grid: None,
    }
}

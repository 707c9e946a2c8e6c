//! Fit targets: the weighted chi-squared problems handed to the optimisers.
//!
//! A target snapshots everything it needs from the spins at construction
//! (observations, errors, per-point factors, parameter indices) and is
//! immutable afterwards, so one target can be evaluated concurrently from
//! many grid workers.

mod dispersion;
mod exponential;
mod model_free;

pub use dispersion::DispersionTarget;
pub use exponential::ExponentialTarget;
pub use model_free::ModelFreeTarget;

use crate::error::{RelaxError, Result};
use crate::experiment::R20Key;
use crate::models::ModelFamily;
use crate::parameters::cluster_model;
use crate::problem::Problem;
use crate::spin::Spin;
use ndarray::{Array1, Array2};

/// `sum(((data - back_calc) / errors)^2)`.
pub fn chi2(data: &[f64], back_calc: &[f64], errors: &[f64]) -> f64 {
    data.iter()
        .zip(back_calc)
        .zip(errors)
        .map(|((d, b), e)| ((d - b) / e).powi(2))
        .sum()
}

/// Checks shared by every target: a usable error and a value to fit.
pub(crate) fn check_observation(value: f64, error: f64, what: &dyn Fn() -> String) -> Result<()> {
    if !(error > 0.0) || !error.is_finite() {
        return Err(RelaxError::InvalidParameter(format!(
            "The error of {} must be positive, got {}",
            what(),
            error
        )));
    }
    if !value.is_finite() {
        return Err(RelaxError::InvalidParameter(format!(
            "No finite value to fit for {}",
            what()
        )));
    }
    Ok(())
}

pub(crate) fn check_data_count(available: usize, required: usize, context: &str) -> Result<()> {
    if available < required {
        return Err(RelaxError::InsufficientData {
            required,
            available,
            context: context.to_string(),
        });
    }
    Ok(())
}

/// A problem seen in diagonally scaled coordinates, `physical = x * scaling`.
pub struct ScaledProblem<'a, P: Problem> {
    inner: &'a P,
    scaling: Array1<f64>,
}

impl<'a, P: Problem> ScaledProblem<'a, P> {
    pub fn new(inner: &'a P, scaling: Array1<f64>) -> Result<Self> {
        if scaling.len() != inner.parameter_count() {
            return Err(RelaxError::DimensionMismatch(format!(
                "Scaling vector has {} elements for {} parameters",
                scaling.len(),
                inner.parameter_count()
            )));
        }
        if scaling.iter().any(|&s| !(s > 0.0)) {
            return Err(RelaxError::InvalidParameter(
                "Scaling factors must be positive".to_string(),
            ));
        }
        Ok(Self { inner, scaling })
    }

    pub fn scaling(&self) -> &Array1<f64> {
        &self.scaling
    }

    pub fn to_physical(&self, x: &Array1<f64>) -> Array1<f64> {
        x * &self.scaling
    }

    pub fn to_scaled(&self, params: &Array1<f64>) -> Array1<f64> {
        params / &self.scaling
    }
}

impl<'a, P: Problem> Problem for ScaledProblem<'a, P> {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        self.inner.eval(&self.to_physical(params))
    }

    fn parameter_count(&self) -> usize {
        self.inner.parameter_count()
    }

    fn residual_count(&self) -> usize {
        self.inner.residual_count()
    }

    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        if self.inner.has_custom_jacobian() {
            // Chain rule through the diagonal scaling.
            let mut jac = self.inner.jacobian(&self.to_physical(params))?;
            for (mut column, &s) in jac.columns_mut().into_iter().zip(self.scaling.iter()) {
                column *= s;
            }
            Ok(jac)
        } else {
            crate::utils::finite_difference::jacobian(self, params, None)
        }
    }

    fn has_custom_jacobian(&self) -> bool {
        self.inner.has_custom_jacobian()
    }
}

/// The target of one cluster, chosen by the cluster's model family.
pub enum ClusterTarget {
    Dispersion(DispersionTarget),
    ModelFree(ModelFreeTarget),
}

impl ClusterTarget {
    /// Build the target of a cluster.
    ///
    /// # Arguments
    ///
    /// * `spins` - The spins of the cluster, sharing one model
    /// * `r20_keys` - The pipe-wide R20 keys
    /// * `sim_index` - Fit the Monte Carlo replicate data instead of the measured values
    pub fn new(spins: &[Spin], r20_keys: &[R20Key], sim_index: Option<usize>) -> Result<Self> {
        let model = cluster_model(spins)?.ok_or_else(|| {
            RelaxError::InsufficientData {
                required: 1,
                available: 0,
                context: "cluster without selected spins".to_string(),
            }
        })?;
        match model.family() {
            ModelFamily::Dispersion => Ok(ClusterTarget::Dispersion(DispersionTarget::new(
                spins, r20_keys, sim_index,
            )?)),
            ModelFamily::ModelFree => Ok(ClusterTarget::ModelFree(ModelFreeTarget::new(
                spins, r20_keys, sim_index,
            )?)),
            ModelFamily::Exponential => Err(RelaxError::InvalidParameter(format!(
                "Model '{}' is fitted per intensity curve, not per cluster",
                model
            ))),
        }
    }

    /// Predicted values, in the order of [`ClusterTarget::observation_map`].
    pub fn back_calc(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        match self {
            ClusterTarget::Dispersion(t) => t.back_calc(params),
            ClusterTarget::ModelFree(t) => t.back_calc(params),
        }
    }

    /// `(spin position in the cluster, observation index on the spin)` of each residual.
    pub fn observation_map(&self) -> &[(usize, usize)] {
        match self {
            ClusterTarget::Dispersion(t) => t.observation_map(),
            ClusterTarget::ModelFree(t) => t.observation_map(),
        }
    }
}

impl Problem for ClusterTarget {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        match self {
            ClusterTarget::Dispersion(t) => t.eval(params),
            ClusterTarget::ModelFree(t) => t.eval(params),
        }
    }

    fn parameter_count(&self) -> usize {
        match self {
            ClusterTarget::Dispersion(t) => t.parameter_count(),
            ClusterTarget::ModelFree(t) => t.parameter_count(),
        }
    }

    fn residual_count(&self) -> usize {
        match self {
            ClusterTarget::Dispersion(t) => t.residual_count(),
            ClusterTarget::ModelFree(t) => t.residual_count(),
        }
    }

    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        match self {
            ClusterTarget::Dispersion(t) => t.jacobian(params),
            ClusterTarget::ModelFree(t) => t.jacobian(params),
        }
    }

    fn has_custom_jacobian(&self) -> bool {
        match self {
            ClusterTarget::Dispersion(t) => t.has_custom_jacobian(),
            ClusterTarget::ModelFree(t) => t.has_custom_jacobian(),
        }
    }
}

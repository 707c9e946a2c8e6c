use super::{check_data_count, check_observation};
use crate::error::{RelaxError, Result};
use crate::experiment::R20Key;
use crate::models::dispersion::{equation, DispersionEquation, ExchangeParams, PointContext};
use crate::models::ModelId;
use crate::parameters::{cluster_model, ParamKind, ParamLayout, ParamName};
use crate::problem::Problem;
use crate::spin::Spin;
use ndarray::Array1;
use std::sync::Arc;

struct PointData {
    /// Position of the spin in the target's spin list.
    slot: usize,
    context: PointContext,
    /// R20-type rates of this point's key.
    r20: Vec<(ParamName, usize)>,
    value: f64,
    error: f64,
}

/// Chi-squared of a cluster of spins under one dispersion model.
///
/// Every selected spin is evaluated with its slice of the shared vector:
/// its own R20 rates and per-spin parameters plus the cluster's globals.
/// The Jacobian is a forward finite difference.
pub struct DispersionTarget {
    model: ModelId,
    equation: Arc<dyn DispersionEquation>,
    n_params: usize,
    /// Non-R20 parameters seen by each spin.
    spin_params: Vec<Vec<(ParamName, usize)>>,
    points: Vec<PointData>,
    observation_map: Vec<(usize, usize)>,
}

impl DispersionTarget {
    /// Target for the catalogue equation of the cluster's model.
    pub fn new(spins: &[Spin], r20_keys: &[R20Key], sim_index: Option<usize>) -> Result<Self> {
        let model = cluster_model(spins)?.ok_or_else(|| RelaxError::InsufficientData {
            required: 1,
            available: 0,
            context: "cluster without selected spins".to_string(),
        })?;
        Self::with_equation(spins, r20_keys, sim_index, equation(model)?)
    }

    /// Target for a custom equation, e.g. a closed form outside the catalogue.
    pub fn with_equation(
        spins: &[Spin],
        r20_keys: &[R20Key],
        sim_index: Option<usize>,
        equation: Arc<dyn DispersionEquation>,
    ) -> Result<Self> {
        let model = equation.model();
        if let Some(cluster) = cluster_model(spins)? {
            if cluster != model {
                return Err(RelaxError::InvalidParameter(format!(
                    "Equation of model '{}' given for a cluster of model '{}'",
                    model, cluster
                )));
            }
        }
        let layout = ParamLayout::new(spins, r20_keys)?;
        let exp_type = model.exp_type();

        let mut spin_params = Vec::new();
        let mut points = Vec::new();
        let mut observation_map = Vec::new();
        for (spin_index, spin) in spins.iter().enumerate().filter(|(_, s)| s.select) {
            let slot = spin_params.len();
            spin_params.push(
                layout
                    .spin_entries(spin_index)
                    .filter(|e| e.name.kind() != ParamKind::R20)
                    .map(|e| (e.name, e.index))
                    .collect(),
            );

            for (obs_index, obs) in spin.observations.iter().enumerate() {
                let point = match obs.dispersion_point() {
                    Some(point) => point,
                    None => continue,
                };
                if exp_type.map_or(false, |t| t != point.exp_type) {
                    continue;
                }
                let key = point.r20_key();
                let r20: Vec<(ParamName, usize)> = layout
                    .spin_entries(spin_index)
                    .filter(|e| e.r20_key == Some(key))
                    .map(|e| (e.name, e.index))
                    .collect();
                if r20.is_empty() {
                    return Err(RelaxError::InvalidParameter(format!(
                        "R20 key '{}' of spin '{}' is not among the pipe's R20 keys",
                        key, spin.id
                    )));
                }
                let value = obs.value_for(sim_index);
                check_observation(value, obs.error, &|| format!("{} of spin '{}'", key, spin.id))?;
                points.push(PointData {
                    slot,
                    context: PointContext::new(point, spin),
                    r20,
                    value,
                    error: obs.error,
                });
                observation_map.push((spin_index, obs_index));
            }
        }

        check_data_count(points.len(), layout.len(), &format!("model '{}'", model))?;
        Ok(Self {
            model,
            equation,
            n_params: layout.len(),
            spin_params,
            points,
            observation_map,
        })
    }

    pub fn model(&self) -> ModelId {
        self.model
    }

    /// Back-calculated R2eff / R1rho of every point.
    pub fn back_calc(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        if params.len() != self.n_params {
            return Err(RelaxError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                self.n_params,
                params.len()
            )));
        }
        let base: Vec<ExchangeParams> = self
            .spin_params
            .iter()
            .map(|entries| {
                let mut p = ExchangeParams::default();
                for &(name, index) in entries {
                    p.set(name, params[index]);
                }
                p
            })
            .collect();

        let mut out = Array1::zeros(self.points.len());
        for (k, point) in self.points.iter().enumerate() {
            let mut p = base[point.slot];
            for &(name, index) in &point.r20 {
                p.set(name, params[index]);
            }
            out[k] = self.equation.r2eff(&p, &point.context)?;
        }
        Ok(out)
    }

    pub fn data(&self) -> Array1<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn errors(&self) -> Array1<f64> {
        self.points.iter().map(|p| p.error).collect()
    }

    pub fn observation_map(&self) -> &[(usize, usize)] {
        &self.observation_map
    }
}

impl Problem for DispersionTarget {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        let mut residuals = self.back_calc(params)?;
        for (r, point) in residuals.iter_mut().zip(&self.points) {
            *r = (*r - point.value) / point.error;
        }
        Ok(residuals)
    }

    fn parameter_count(&self) -> usize {
        self.n_params
    }

    fn residual_count(&self) -> usize {
        self.points.len()
    }
}

use super::{check_data_count, check_observation};
use crate::error::{RelaxError, Result};
use crate::experiment::{Observable, R20Key, RiType};
use crate::models::relaxation::{RelaxationConstants, RelaxationEquations, N_FREQUENCIES};
use crate::models::spectral_density::{djw, jw, DiffusionGeometry};
use crate::models::{MfModel, ModelId};
use crate::parameters::{cluster_model, ParamLayout, ParamName};
use crate::problem::Problem;
use crate::spin::Spin;
use ndarray::{Array1, Array2};

enum MfObservable {
    Ri { kind: RiType, frq: f64 },
    Jw { omega: f64 },
}

struct MfPoint {
    observable: MfObservable,
    value: f64,
    error: f64,
}

struct MfSpin {
    equations: RelaxationEquations,
    /// Fixed geometry; `None` when the spin optimises a local tm.
    geometry: Option<DiffusionGeometry>,
    local_tm: Option<usize>,
    /// Vector indices of the spectral density form parameters.
    form: Vec<usize>,
    rex: Option<usize>,
    /// Field at which Rex is reported: the lowest field of the spin's
    /// relaxation data, independent of the order the data were added in.
    frq_ref: f64,
    points: Vec<MfPoint>,
}

/// Chi-squared of model-free spins against relaxation data or spectral
/// density values, with an analytic Jacobian.
pub struct ModelFreeTarget {
    model: MfModel,
    n_params: usize,
    spins: Vec<MfSpin>,
    observation_map: Vec<(usize, usize)>,
}

impl ModelFreeTarget {
    pub fn new(spins: &[Spin], r20_keys: &[R20Key], sim_index: Option<usize>) -> Result<Self> {
        let model = match cluster_model(spins)? {
            Some(ModelId::ModelFree(mf)) => mf,
            Some(other) => {
                return Err(RelaxError::InvalidParameter(format!(
                    "Model '{}' is not a model-free model",
                    other
                )))
            }
            None => {
                return Err(RelaxError::InsufficientData {
                    required: 1,
                    available: 0,
                    context: "cluster without selected spins".to_string(),
                })
            }
        };
        let layout = ParamLayout::new(spins, r20_keys)?;

        let mut mf_spins = Vec::new();
        let mut observation_map = Vec::new();
        for (spin_index, spin) in spins.iter().enumerate().filter(|(_, s)| s.select) {
            let index_of = |name: ParamName| layout.index_of(name, Some(spin_index), None);
            let form = model
                .form
                .params()
                .iter()
                .map(|&name| {
                    index_of(name).ok_or_else(|| {
                        RelaxError::InvalidParameter(format!("No '{}' in the parameter vector", name))
                    })
                })
                .collect::<Result<Vec<usize>>>()?;
            let local_tm = if model.local_tm { index_of(ParamName::LocalTm) } else { None };
            let rex = if model.rex { index_of(ParamName::Rex) } else { None };

            let geometry = match (local_tm, &spin.diffusion) {
                (Some(_), _) => None,
                (None, Some(geometry)) => Some(geometry.clone()),
                (None, None) => {
                    return Err(RelaxError::InvalidParameter(format!(
                        "Spin '{}' has neither a diffusion geometry nor a local tm",
                        spin.id
                    )))
                }
            };

            let mut points = Vec::new();
            for (obs_index, obs) in spin.observations.iter().enumerate() {
                let observable = match obs.observable {
                    Observable::Relaxation { kind, frq } => MfObservable::Ri { kind, frq },
                    Observable::SpectralDensity { omega } => MfObservable::Jw { omega },
                    Observable::Dispersion(_) => continue,
                };
                let value = obs.value_for(sim_index);
                check_observation(value, obs.error, &|| {
                    format!("observation {} of spin '{}'", obs_index, spin.id)
                })?;
                points.push(MfPoint {
                    observable,
                    value,
                    error: obs.error,
                });
                observation_map.push((spin_index, obs_index));
            }

            let n_spin_params = form.len() + local_tm.iter().count() + rex.iter().count();
            check_data_count(
                points.len(),
                n_spin_params,
                &format!("model '{}' of spin '{}'", ModelId::ModelFree(model), spin.id),
            )?;

            // Rex is reported at the lowest field, not the first one loaded.
            let frq_ref = points
                .iter()
                .filter_map(|p| match p.observable {
                    MfObservable::Ri { frq, .. } => Some(frq),
                    MfObservable::Jw { .. } => None,
                })
                .min_by(f64::total_cmp)
                .unwrap_or(1.0);

            mf_spins.push(MfSpin {
                equations: RelaxationEquations::new(RelaxationConstants {
                    isotope: spin.isotope,
                    ..RelaxationConstants::default()
                }),
                geometry,
                local_tm,
                form,
                rex,
                frq_ref,
                points,
            });
        }

        Ok(Self {
            model,
            n_params: layout.len(),
            spins: mf_spins,
            observation_map,
        })
    }

    pub fn model(&self) -> MfModel {
        self.model
    }

    pub fn observation_map(&self) -> &[(usize, usize)] {
        &self.observation_map
    }

    fn check_len(&self, params: &Array1<f64>) -> Result<()> {
        if params.len() != self.n_params {
            return Err(RelaxError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                self.n_params,
                params.len()
            )));
        }
        Ok(())
    }

    fn geometry(spin: &MfSpin, params: &Array1<f64>) -> DiffusionGeometry {
        match (&spin.geometry, spin.local_tm) {
            (Some(geometry), _) => geometry.clone(),
            (None, Some(index)) => DiffusionGeometry::local_tm(params[index]),
            (None, None) => DiffusionGeometry::local_tm(0.0),
        }
    }

    /// Predicted values, in the order of [`ModelFreeTarget::observation_map`].
    pub fn back_calc(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        self.check_len(params)?;
        let mut out = Vec::with_capacity(self.observation_map.len());
        for spin in &self.spins {
            let geometry = Self::geometry(spin, params);
            let form: Vec<f64> = spin.form.iter().map(|&i| params[i]).collect();
            let rex = spin.rex.map_or(0.0, |i| params[i]);
            for point in &spin.points {
                let value = match point.observable {
                    MfObservable::Jw { omega } => jw(self.model.form, omega, &form, &geometry)?,
                    MfObservable::Ri { kind, frq } => {
                        let w = spin.equations.frequencies(frq);
                        let mut j = [0.0; N_FREQUENCIES];
                        for (jk, &wk) in j.iter_mut().zip(w.iter()) {
                            *jk = jw(self.model.form, wk, &form, &geometry)?;
                        }
                        spin.equations.ri(kind, frq, &j, rex, spin.frq_ref)?
                    }
                };
                out.push(value);
            }
        }
        Ok(Array1::from(out))
    }
}

impl Problem for ModelFreeTarget {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        let mut residuals = self.back_calc(params)?;
        let points = self.spins.iter().flat_map(|s| s.points.iter());
        for (r, point) in residuals.iter_mut().zip(points) {
            *r = (*r - point.value) / point.error;
        }
        Ok(residuals)
    }

    fn parameter_count(&self) -> usize {
        self.n_params
    }

    fn residual_count(&self) -> usize {
        self.observation_map.len()
    }

    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        self.check_len(params)?;
        let mut jac = Array2::zeros((self.residual_count(), self.n_params));
        let mut row = 0;
        for spin in &self.spins {
            let geometry = Self::geometry(spin, params);
            let n_diff = geometry.n_diff_params();
            let form: Vec<f64> = spin.form.iter().map(|&i| params[i]).collect();

            for point in &spin.points {
                // Gradient over [diffusion params, form params].
                let (grad, rex_derivative) = match point.observable {
                    MfObservable::Jw { omega } => {
                        (djw(self.model.form, omega, &form, &geometry)?, 0.0)
                    }
                    MfObservable::Ri { kind, frq } => {
                        let w = spin.equations.frequencies(frq);
                        let mut j = [0.0; N_FREQUENCIES];
                        let mut dj: [Array1<f64>; N_FREQUENCIES] = Default::default();
                        for k in 0..N_FREQUENCIES {
                            j[k] = jw(self.model.form, w[k], &form, &geometry)?;
                            dj[k] = djw(self.model.form, w[k], &form, &geometry)?;
                        }
                        let grad = spin.equations.dri(kind, frq, &j, &dj)?;
                        let dr = match kind {
                            RiType::R2 => (frq / spin.frq_ref).powi(2),
                            _ => 0.0,
                        };
                        (grad, dr)
                    }
                };

                if let Some(index) = spin.local_tm {
                    jac[[row, index]] = grad[0] / point.error;
                }
                for (a, &index) in spin.form.iter().enumerate() {
                    jac[[row, index]] = grad[n_diff + a] / point.error;
                }
                if let Some(index) = spin.rex {
                    jac[[row, index]] = rex_derivative / point.error;
                }
                row += 1;
            }
        }
        Ok(jac)
    }

    fn has_custom_jacobian(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::Observation;
    use crate::models::spectral_density::SpectralDensityForm;
    use crate::utils::finite_difference;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn mf_spin(model: MfModel, tm: Option<f64>) -> Spin {
        let mut spin = Spin::new(":1@N");
        spin.model = Some(ModelId::ModelFree(model));
        if let Some(tm) = tm {
            spin.diffusion = Some(DiffusionGeometry::sphere(tm));
        }
        for frq in [600e6, 800e6] {
            for kind in [RiType::R1, RiType::R2, RiType::Noe] {
                spin.add_observation(Observation::new(
                    Observable::Relaxation { kind, frq },
                    1.0,
                    0.05,
                ));
            }
        }
        spin
    }

    #[test]
    fn test_analytic_jacobian_matches_finite_difference() {
        let model = MfModel::preset(4, false).unwrap();
        let spins = vec![mf_spin(model, Some(8e-9))];
        let target = ModelFreeTarget::new(&spins, &[], None).unwrap();
        let x = array![0.8, 50e-12, 2.0];
        let analytic = target.jacobian(&x).unwrap();

        // Differentiate in scaled coordinates, where steps are well conditioned.
        let scaling = array![1.0, 1e-12, 1.0];
        let scaled = super::super::ScaledProblem::new(&target, scaling.clone()).unwrap();
        let numeric = finite_difference::jacobian(&scaled, &(&x / &scaling), Some(1e-7)).unwrap();
        for i in 0..analytic.nrows() {
            for j in 0..3 {
                assert_relative_eq!(
                    analytic[[i, j]] * scaling[j],
                    numeric[[i, j]],
                    max_relative = 1e-4,
                    epsilon = 1e-8
                );
            }
        }
    }

    #[test]
    fn test_local_tm_jacobian_column() {
        let model = MfModel::new(SpectralDensityForm::S2, false, true);
        let spins = vec![mf_spin(model, None)];
        let target = ModelFreeTarget::new(&spins, &[], None).unwrap();
        let x = array![10e-9, 0.85];
        let analytic = target.jacobian(&x).unwrap();
        let scaling = array![1e-12, 1.0];
        let scaled = super::super::ScaledProblem::new(&target, scaling.clone()).unwrap();
        let numeric = finite_difference::jacobian(&scaled, &(&x / &scaling), Some(1e-7)).unwrap();
        for i in 0..analytic.nrows() {
            assert_relative_eq!(
                analytic[[i, 0]] * 1e-12,
                numeric[[i, 0]],
                max_relative = 1e-4,
                epsilon = 1e-10
            );
        }
    }

    #[test]
    fn test_requires_geometry() {
        let model = MfModel::preset(1, false).unwrap();
        let spins = vec![mf_spin(model, None)];
        assert!(ModelFreeTarget::new(&spins, &[], None).is_err());
    }

    #[test]
    fn test_rex_scales_with_field() {
        let model = MfModel::preset(3, false).unwrap();
        let spins = vec![mf_spin(model, Some(8e-9))];
        let target = ModelFreeTarget::new(&spins, &[], None).unwrap();
        let without = target.back_calc(&array![0.8, 0.0]).unwrap();
        let with = target.back_calc(&array![0.8, 2.0]).unwrap();
        // Observations: R1, R2, NOE at 600 MHz then 800 MHz.
        assert_relative_eq!(with[1] - without[1], 2.0, epsilon = 1e-12);
        assert_relative_eq!(with[4] - without[4], 2.0 * (800.0f64 / 600.0).powi(2), epsilon = 1e-12);
        assert_eq!(with[0], without[0]);
    }

    #[test]
    fn test_rex_reference_ignores_data_order() {
        let model = MfModel::preset(3, false).unwrap();
        let mut spin = Spin::new(":2@N").with_diffusion(DiffusionGeometry::sphere(8e-9));
        spin.model = Some(ModelId::ModelFree(model));
        for frq in [800e6, 500e6, 600e6] {
            spin.add_observation(Observation::new(Observable::Relaxation { kind: RiType::R2, frq }, 1.0, 0.05));
        }
        let spins = vec![spin];
        let target = ModelFreeTarget::new(&spins, &[], None).unwrap();
        let rex = target.back_calc(&array![0.8, 3.0]).unwrap() - target.back_calc(&array![0.8, 0.0]).unwrap();
        assert_relative_eq!(rex[1], 3.0, epsilon = 1e-12);
        assert_relative_eq!(rex[0], 3.0 * (800.0f64 / 500.0).powi(2), epsilon = 1e-12);
        assert_relative_eq!(rex[2], 3.0 * (600.0f64 / 500.0).powi(2), epsilon = 1e-12);
    }
}

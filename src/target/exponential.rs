use super::{check_data_count, check_observation};
use crate::error::{RelaxError, Result};
use crate::experiment::IntensityCurve;
use crate::models::exponential::{exponential_decay, exponential_gradient};
use crate::problem::Problem;
use ndarray::{Array1, Array2};

/// Chi-squared of one intensity decay against `I0 exp(-R2eff t)`, over the
/// parameters `[R2eff, I0]`.
#[derive(Debug, Clone)]
pub struct ExponentialTarget {
    times: Vec<f64>,
    intensities: Vec<f64>,
    errors: Vec<f64>,
}

impl ExponentialTarget {
    pub fn new(curve: &IntensityCurve) -> Result<Self> {
        let n = curve.times.len();
        if curve.intensities.len() != n || curve.errors.len() != n {
            return Err(RelaxError::DimensionMismatch(format!(
                "Curve has {} times, {} intensities and {} errors",
                n,
                curve.intensities.len(),
                curve.errors.len()
            )));
        }
        for (k, (&value, &error)) in curve.intensities.iter().zip(&curve.errors).enumerate() {
            check_observation(value, error, &|| format!("intensity {}", k))?;
        }
        check_data_count(n, 2, "exponential curve")?;
        Ok(Self {
            times: curve.times.clone(),
            intensities: curve.intensities.clone(),
            errors: curve.errors.clone(),
        })
    }

    pub fn back_calc(&self, params: &Array1<f64>) -> Array1<f64> {
        self.times
            .iter()
            .map(|&t| exponential_decay(params[0], params[1], t))
            .collect()
    }

    pub fn max_intensity(&self) -> f64 {
        self.intensities.iter().copied().fold(0.0, f64::max)
    }
}

impl Problem for ExponentialTarget {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        if params.len() != 2 {
            return Err(RelaxError::DimensionMismatch(format!(
                "Expected 2 parameters, got {}",
                params.len()
            )));
        }
        Ok(self
            .times
            .iter()
            .zip(&self.intensities)
            .zip(&self.errors)
            .map(|((&t, &i), &e)| (exponential_decay(params[0], params[1], t) - i) / e)
            .collect())
    }

    fn parameter_count(&self) -> usize {
        2
    }

    fn residual_count(&self) -> usize {
        self.times.len()
    }

    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        let mut jac = Array2::zeros((self.times.len(), 2));
        for (k, (&t, &e)) in self.times.iter().zip(&self.errors).enumerate() {
            let [d_r2eff, d_i0] = exponential_gradient(params[0], params[1], t);
            jac[[k, 0]] = d_r2eff / e;
            jac[[k, 1]] = d_i0 / e;
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
    use crate::experiment::DispersionPoint;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn curve() -> IntensityCurve {
        let times = vec![0.0, 0.02, 0.04, 0.08];
        let intensities = times.iter().map(|&t| exponential_decay(12.0, 1e5, t)).collect();
        IntensityCurve {
            point: DispersionPoint::cpmg(600e6, 100.0, 0.04),
            times,
            intensities,
            errors: vec![500.0; 4],
        }
    }

    #[test]
    fn test_residuals_and_jacobian() {
        let target = ExponentialTarget::new(&curve()).unwrap();
        assert_relative_eq!(target.eval_cost(&array![12.0, 1e5]).unwrap(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(target.max_intensity(), 1e5);
        let jac = target.jacobian(&array![12.0, 1e5]).unwrap();
        assert_eq!(jac[[0, 0]], 0.0);
        assert_relative_eq!(jac[[0, 1]], 1.0 / 500.0);
    }

    #[test]
    fn test_bad_curves() {
        let mut c = curve();
        c.errors[1] = 0.0;
        assert!(ExponentialTarget::new(&c).is_err());
        let mut c = curve();
        c.times.pop();
        assert!(ExponentialTarget::new(&c).is_err());
    }
}

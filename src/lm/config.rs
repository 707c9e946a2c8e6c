//! Settings of the local minimisers.

use super::convergence::ConvergenceCriteria;
use serde::{Deserialize, Serialize};

/// Solver for the damped normal equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DecompositionMethod {
    Cholesky,
    QR,
    /// Cholesky, then QR if the matrix is not numerically positive definite.
    #[default]
    Auto,
}

/// Levenberg-Marquardt settings.
///
/// The tolerances follow [`ConvergenceCriteria`]; the `lambda_*` fields
/// drive [`super::damping::Damping`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    pub max_iterations: usize,
    /// Relative chi-squared change. Default 1e-12.
    pub ftol: f64,
    /// Largest relative parameter step. Default 1e-10.
    pub xtol: f64,
    /// Norm of the projected gradient. Default 1e-10.
    pub gtol: f64,
    pub initial_lambda: f64,
    pub lambda_up_factor: f64,
    pub lambda_down_factor: f64,
    pub min_lambda: f64,
    pub max_lambda: f64,
    pub decomposition_method: DecompositionMethod,
    /// Keep the Jacobian at the solution, needed for covariance errors.
    pub calc_jacobian: bool,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            ftol: 1e-12,
            xtol: 1e-10,
            gtol: 1e-10,
            initial_lambda: 1e-3,
            lambda_up_factor: 10.0,
            lambda_down_factor: 0.1,
            min_lambda: 1e-12,
            max_lambda: 1e12,
            decomposition_method: DecompositionMethod::default(),
            calc_jacobian: true,
        }
    }
}

impl LmConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.ftol = ftol;
        self
    }

    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.xtol = xtol;
        self
    }

    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.gtol = gtol;
        self
    }

    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.initial_lambda = lambda;
        self
    }

    pub fn with_decomposition_method(mut self, method: DecompositionMethod) -> Self {
        self.decomposition_method = method;
        self
    }

    pub fn with_calc_jacobian(mut self, calc_jacobian: bool) -> Self {
        self.calc_jacobian = calc_jacobian;
        self
    }

    /// The convergence tests these settings describe.
    pub fn criteria(&self) -> ConvergenceCriteria {
        ConvergenceCriteria::new(self.xtol, self.ftol, self.gtol, self.max_iterations)
    }

    /// Check the iteration cap, the tolerances and the damping schedule.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_iterations == 0 {
            return Err("LM max_iterations must be at least 1".to_string());
        }
        if [self.ftol, self.xtol, self.gtol].iter().any(|t| t.is_nan() || *t < 0.0) {
            return Err("LM tolerances must be non-negative".to_string());
        }
        if !(self.min_lambda > 0.0 && self.min_lambda <= self.initial_lambda && self.initial_lambda <= self.max_lambda) {
            return Err("LM damping must satisfy 0 < min_lambda <= initial_lambda <= max_lambda".to_string());
        }
        if !(self.lambda_up_factor > 1.0 && self.lambda_down_factor > 0.0 && self.lambda_down_factor < 1.0) {
            return Err("LM damping factors must satisfy up > 1 and 0 < down < 1".to_string());
        }
        Ok(())
    }
}

/// Configuration options for the Nelder-Mead simplex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplexConfig {
    /// Maximum number of iterations. Default: 5000
    pub max_iterations: usize,

    /// Tolerance for the relative spread of chi-squared over the simplex. Default: 1e-12
    pub ftol: f64,

    /// Tolerance for the size of the simplex, in scaled units. Default: 1e-8
    pub xtol: f64,

    /// Edge length of the initial simplex, in scaled units. Default: 0.1
    pub initial_step: f64,

    /// Reflection coefficient. Default: 1.0
    pub alpha: f64,

    /// Expansion coefficient. Default: 2.0
    pub gamma: f64,

    /// Contraction coefficient. Default: 0.5
    pub rho: f64,

    /// Shrink coefficient. Default: 0.5
    pub sigma: f64,
}

impl Default for SimplexConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5000,
            ftol: 1e-12,
            xtol: 1e-8,
            initial_step: 0.1,
            alpha: 1.0,
            gamma: 2.0,
            rho: 0.5,
            sigma: 0.5,
        }
    }
}

impl SimplexConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.ftol = ftol;
        self
    }

    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.xtol = xtol;
        self
    }

    pub fn with_initial_step(mut self, step: f64) -> Self {
        self.initial_step = step;
        self
    }

    /// Check the coefficients: `alpha > 0`, `gamma > 1`, `rho` and `sigma` in (0, 1).
    pub fn validate(&self) -> Result<(), String> {
        if !(self.alpha > 0.0) {
            return Err("Reflection coefficient (alpha) must be positive".to_string());
        }
        if !(self.gamma > 1.0) {
            return Err("Expansion coefficient (gamma) must be greater than 1".to_string());
        }
        if !(self.rho > 0.0 && self.rho < 1.0) {
            return Err("Contraction coefficient (rho) must be in (0, 1)".to_string());
        }
        if !(self.sigma > 0.0 && self.sigma < 1.0) {
            return Err("Shrink coefficient (sigma) must be in (0, 1)".to_string());
        }
        if !(self.initial_step > 0.0) {
            return Err("Initial simplex step must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(LmConfig::default().validate().is_ok());
        assert!(LmConfig::default().with_max_iterations(0).validate().is_err());
        assert!(LmConfig::default().with_ftol(-1.0).validate().is_err());
        assert!(LmConfig::default().with_lambda(1e20).validate().is_err());
        assert!(SimplexConfig::default().validate().is_ok());
        assert!(SimplexConfig::default().with_initial_step(0.0).validate().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: LmConfig = serde_json::from_str(r#"{"max_iterations": 50, "decomposition_method": "QR"}"#).unwrap();
        assert_eq!(config.max_iterations, 50);
        assert_eq!(config.decomposition_method, DecompositionMethod::QR);
        assert_eq!(config.ftol, LmConfig::default().ftol);
    }
}

//! # Covariance Matrix Calculations
//!
//! Covariance of fitted parameters from the Jacobian of the weighted
//! residuals, and the quantities derived from it.

use crate::error::{RelaxError, Result};
use crate::utils::matrix_convert::{nalgebra_to_ndarray, ndarray_to_nalgebra};
use nalgebra::DMatrix;
use ndarray::{Array1, Array2};
use tracing::warn;

/// Result of [`multifit_covar`].
#[derive(Debug, Clone)]
pub struct Covariance {
    pub matrix: Array2<f64>,
    /// Parameters found linearly dependent; their rows and columns are zero.
    pub flagged: Vec<usize>,
}

/// Covariance `(JᵀWJ)⁻¹` of the best-fit parameters.
///
/// `JᵀWJ` is QR-decomposed. Any parameter `k` with
/// `|R_kk| <= epsrel |R_11|` is treated as linearly dependent: it is
/// excluded, its row and column of the covariance are zero, and its index is
/// reported in [`Covariance::flagged`]. The remaining block is inverted.
///
/// # Arguments
///
/// * `jacobian` - Jacobian of the residuals, one row per observation
/// * `epsrel` - Relative tolerance of the rank test
/// * `weights` - Observation weights `1/sigma^2`; `None` when the residuals are already weighted
pub fn multifit_covar(
    jacobian: &Array2<f64>,
    epsrel: f64,
    weights: Option<&Array1<f64>>,
) -> Result<Covariance> {
    let (n_obs, n) = jacobian.dim();
    let jtwj = match weights {
        Some(w) => {
            if w.len() != n_obs {
                return Err(RelaxError::DimensionMismatch(format!(
                    "{} weights for {} Jacobian rows",
                    w.len(),
                    n_obs
                )));
            }
            let mut weighted = jacobian.clone();
            for (mut row, &wi) in weighted.rows_mut().into_iter().zip(w.iter()) {
                row *= wi;
            }
            jacobian.t().dot(&weighted)
        }
        None => jacobian.t().dot(jacobian),
    };
    if n == 0 {
        return Ok(Covariance {
            matrix: Array2::zeros((0, 0)),
            flagged: Vec::new(),
        });
    }

    let r = ndarray_to_nalgebra(&jtwj).qr().r();
    let threshold = (epsrel * r[(0, 0)]).abs();
    let flagged: Vec<usize> = (0..n).filter(|&k| r[(k, k)].abs() <= threshold).collect();
    for &k in &flagged {
        warn!(
            index = k,
            r_kk = r[(k, k)].abs(),
            threshold,
            "Covariance element is linearly dependent and set to zero"
        );
    }

    let kept: Vec<usize> = (0..n).filter(|k| !flagged.contains(k)).collect();
    let mut matrix = Array2::zeros((n, n));
    if !kept.is_empty() {
        let m = kept.len();
        let block = DMatrix::from_fn(m, m, |i, j| jtwj[[kept[i], kept[j]]]);
        let inverse = block
            .qr()
            .solve(&DMatrix::identity(m, m))
            .ok_or_else(|| {
                RelaxError::SingularSystem(format!(
                    "The {}x{} normal matrix of the kept parameters is singular",
                    m, m
                ))
            })?;
        let inverse = nalgebra_to_ndarray(&inverse);
        for (i, &ki) in kept.iter().enumerate() {
            for (j, &kj) in kept.iter().enumerate() {
                matrix[[ki, kj]] = inverse[[i, j]];
            }
        }
    }
    Ok(Covariance { matrix, flagged })
}

/// Calculate correlation matrix from covariance matrix.
///
/// `correl[i,j] = covar[i,j] / sqrt(covar[i,i] * covar[j,j])`, with zero
/// where a variance vanishes.
pub fn correlation(covar: &Array2<f64>) -> Array2<f64> {
    let n = covar.nrows();
    let mut correl = Array2::zeros((n, n));

    for i in 0..n {
        for j in 0..n {
            if i == j {
                correl[[i, j]] = 1.0;
            } else {
                let denom = (covar[[i, i]] * covar[[j, j]]).sqrt();
                if denom > 0.0 {
                    correl[[i, j]] = covar[[i, j]] / denom;
                }
            }
        }
    }

    correl
}

/// Square roots of the diagonal, zero for non-positive variances.
pub fn standard_errors(covar: &Array2<f64>) -> Array1<f64> {
    covar
        .diag()
        .iter()
        .map(|&v| if v > 0.0 { v.sqrt() } else { 0.0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr2, array};

    #[test]
    fn test_straight_line_covariance() {
        // y = a x + b at x = 0, 1, 2 with unit errors.
        let jac = arr2(&[[0.0, 1.0], [1.0, 1.0], [2.0, 1.0]]);
        let covar = multifit_covar(&jac, 0.0, None).unwrap();
        assert!(covar.flagged.is_empty());
        // JᵀJ = [[5, 3], [3, 3]], det 6.
        assert_relative_eq!(covar.matrix[[0, 0]], 0.5, epsilon = 1e-12);
        assert_relative_eq!(covar.matrix[[1, 1]], 5.0 / 6.0, epsilon = 1e-12);
        assert_relative_eq!(covar.matrix[[0, 1]], -0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_weights_match_prescaled_jacobian() {
        let jac = arr2(&[[0.0, 1.0], [1.0, 1.0], [2.0, 1.0]]);
        let sigma = array![0.5, 1.0, 2.0];
        let weights = sigma.mapv(|s: f64| 1.0 / (s * s));
        let a = multifit_covar(&jac, 0.0, Some(&weights)).unwrap();
        let mut scaled = jac.clone();
        for (mut row, s) in scaled.rows_mut().into_iter().zip(sigma.iter()) {
            row /= *s;
        }
        let b = multifit_covar(&scaled, 0.0, None).unwrap();
        for (x, y) in a.matrix.iter().zip(b.matrix.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_dependent_column_flagged() {
        let jac = arr2(&[[1.0, 0.0], [1.0, 0.0], [1.0, 0.0]]);
        let covar = multifit_covar(&jac, 1e-8, None).unwrap();
        assert_eq!(covar.flagged, vec![1]);
        assert_relative_eq!(covar.matrix[[0, 0]], 1.0 / 3.0, epsilon = 1e-12);
        assert_eq!(covar.matrix[[1, 1]], 0.0);
        assert_eq!(standard_errors(&covar.matrix)[1], 0.0);
    }

    #[test]
    fn test_correlation() {
        let covar = arr2(&[[0.1, 0.05], [0.05, 0.2]]);
        let correl = correlation(&covar);
        assert_eq!(correl[[0, 0]], 1.0);
        let expected = 0.05 / (0.1f64 * 0.2f64).sqrt();
        assert_relative_eq!(correl[[0, 1]], expected, epsilon = 1e-12);
    }

    #[test]
    fn test_standard_errors() {
        let covar = arr2(&[[0.1, 0.05], [0.05, 0.2]]);
        let errors = standard_errors(&covar);
        assert_relative_eq!(errors[0], 0.1f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(errors[1], 0.2f64.sqrt(), epsilon = 1e-12);
    }
}

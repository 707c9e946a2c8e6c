//! Statistics helpers for error analysis and result summaries.

mod covariance;

pub use covariance::{correlation, multifit_covar, standard_errors, Covariance};

use crate::error::{RelaxError, Result};
use tracing::debug;

/// Arithmetic mean; NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Geometric mean `exp(mean(ln x))` of positive values.
pub fn geometric_mean(values: &[f64]) -> Result<f64> {
    if values.is_empty() {
        return Err(RelaxError::InsufficientData {
            required: 1,
            available: 0,
            context: "geometric mean".to_string(),
        });
    }
    if let Some(&bad) = values.iter().find(|&&v| !(v > 0.0)) {
        return Err(RelaxError::InvalidParameter(format!(
            "The geometric mean needs positive values, got {}",
            bad
        )));
    }
    Ok((values.iter().map(|v| v.ln()).sum::<f64>() / values.len() as f64).exp())
}

/// Standard deviation with divisor `n - dof` over the values not skipped.
///
/// `skip[i] == true` excludes `values[i]`; a shorter `skip` keeps the rest.
/// Returns 0 when at most one value remains or `n <= dof`.
pub fn std(values: &[f64], skip: Option<&[bool]>, dof: usize) -> f64 {
    let kept: Vec<f64> = values
        .iter()
        .enumerate()
        .filter(|(i, _)| !skip.and_then(|s| s.get(*i).copied()).unwrap_or(false))
        .map(|(_, &v)| v)
        .collect();
    let n = kept.len();
    if n <= 1 || n <= dof {
        return 0.0;
    }
    let ave = mean(&kept);
    let sum_sq: f64 = kept.iter().map(|v| (v - ave).powi(2)).sum();
    (sum_sq / (n - dof) as f64).sqrt()
}

/// Bin values into `inc` equal-width bins over `[lower, upper)`.
///
/// Each value adds `1 / values.len()` to its bin. Values outside the range
/// are dropped, so the total falls short of one instead of being
/// renormalised.
pub fn bucket(values: &[f64], lower: f64, upper: f64, inc: usize) -> Result<Vec<f64>> {
    if inc == 0 || !(upper > lower) {
        return Err(RelaxError::InvalidParameter(format!(
            "Cannot bin [{}, {}) into {} buckets",
            lower, upper, inc
        )));
    }
    let mut bins = vec![0.0; inc];
    if values.is_empty() {
        return Ok(bins);
    }
    let width = (upper - lower) / inc as f64;
    let weight = 1.0 / values.len() as f64;
    for &v in values {
        let pos = ((v - lower) / width).floor();
        if !(pos >= 0.0 && pos < inc as f64) {
            debug!(value = v, lower, upper, "Value outside the bucket range dropped");
            continue;
        }
        bins[pos as usize] += weight;
    }
    Ok(bins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mean() {
        assert_relative_eq!(mean(&[1.0, 2.0, 6.0]), 3.0);
        assert!(mean(&[]).is_nan());
    }

    #[test]
    fn test_geometric_mean() {
        assert_relative_eq!(geometric_mean(&[1.0, 100.0]).unwrap(), 10.0, epsilon = 1e-12);
        assert!(geometric_mean(&[1.0, 0.0]).is_err());
        assert!(geometric_mean(&[]).is_err());
    }

    #[test]
    fn test_std_fixture() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(std(&values, None, 1), 2.138089935299395, epsilon = 1e-12);
        assert_relative_eq!(std(&values, None, 0), 2.0, epsilon = 1e-12);
        assert_eq!(std(&[3.0], None, 1), 0.0);
        assert_eq!(std(&[], None, 1), 0.0);
    }

    #[test]
    fn test_std_skip() {
        let values = [1.0, 1000.0, 3.0];
        let skip = [false, true, false];
        assert_relative_eq!(std(&values, Some(&skip), 1), 2.0_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_bucket_fixture() {
        let values: Vec<f64> = (0..100).map(|i| 2.0 * i as f64).collect();
        let bins = bucket(&values, 0.0, 200.0, 100).unwrap();
        assert_eq!(bins.len(), 100);
        for b in &bins {
            assert_relative_eq!(*b, 0.01, epsilon = 1e-12);
        }
        assert_relative_eq!(bins.iter().sum::<f64>(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_bucket_not_renormalised() {
        let bins = bucket(&[0.5, 1.5, 5.0, -1.0], 0.0, 2.0, 2).unwrap();
        assert_relative_eq!(bins[0], 0.25);
        assert_relative_eq!(bins[1], 0.25);
        assert!(bucket(&[1.0], 1.0, 1.0, 2).is_err());
    }
}

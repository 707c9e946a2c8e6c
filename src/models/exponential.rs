//! Two-parameter exponential decays for the R2eff stage.
//!
//! Peak intensities measured at a series of relaxation delays decay as
//! `I(t) = I0 exp(-R2eff t)`. The fitted R2eff (or R1rho) values are the
//! inputs of the dispersion models. For fixed-time experiments, with a single
//! delay and a reference spectrum, R2eff follows directly from the ratio.

use crate::error::{RelaxError, Result};

/// `I0 exp(-R2eff t)`.
pub fn exponential_decay(r2eff: f64, i0: f64, t: f64) -> f64 {
    i0 * (-r2eff * t).exp()
}

/// Partial derivatives of the decay with respect to `[R2eff, I0]`.
pub fn exponential_gradient(r2eff: f64, i0: f64, t: f64) -> [f64; 2] {
    let e = (-r2eff * t).exp();
    [-t * i0 * e, e]
}

/// R2eff and its error for a fixed-time (constant-time) experiment.
///
/// # Arguments
///
/// * `i_ref` - Intensity of the reference spectrum, without the CPMG block
/// * `i` - Intensity after the relaxation period
/// * `relax_time` - The relaxation period (s)
/// * `err_ref`, `err` - Intensity errors
///
/// # Returns
///
/// * `(R2eff, error)` with `R2eff = -ln(I / I_ref) / T` and the error
///   propagated as `sqrt((err_ref / I_ref)^2 + (err / I)^2) / T`
pub fn r2eff_fixed_time(
    i_ref: f64,
    i: f64,
    relax_time: f64,
    err_ref: f64,
    err: f64,
) -> Result<(f64, f64)> {
    if !(i_ref > 0.0) {
        return Err(RelaxError::domain("R2eff", "i_ref", i_ref, "intensities must be positive"));
    }
    if !(i > 0.0) {
        return Err(RelaxError::domain("R2eff", "i", i, "intensities must be positive"));
    }
    if !(relax_time > 0.0) {
        return Err(RelaxError::domain(
            "R2eff",
            "relax_time",
            relax_time,
            "the relaxation period must be positive",
        ));
    }
    let r2eff = -(i / i_ref).ln() / relax_time;
    let error = ((err_ref / i_ref).powi(2) + (err / i).powi(2)).sqrt() / relax_time;
    Ok((r2eff, error))
}

/// Starting values `(R2eff, I0)` from a weighted straight line through
/// `ln(I)` against `t`. Non-positive intensities are ignored.
///
/// Returns `None` with fewer than two usable points or a single delay.
pub fn estimate(times: &[f64], intensities: &[f64]) -> Option<(f64, f64)> {
    let points: Vec<(f64, f64, f64)> = times
        .iter()
        .zip(intensities)
        .filter(|(_, &y)| y > 0.0)
        // Weight by I^2: the variance of ln(I) is (sigma/I)^2.
        .map(|(&t, &y)| (t, y.ln(), y * y))
        .collect();
    if points.len() < 2 {
        return None;
    }

    let sw: f64 = points.iter().map(|p| p.2).sum();
    let st: f64 = points.iter().map(|p| p.2 * p.0).sum();
    let sy: f64 = points.iter().map(|p| p.2 * p.1).sum();
    let stt: f64 = points.iter().map(|p| p.2 * p.0 * p.0).sum();
    let sty: f64 = points.iter().map(|p| p.2 * p.0 * p.1).sum();
    let det = sw * stt - st * st;
    if det.abs() <= f64::EPSILON * sw * stt {
        return None;
    }
    let slope = (sw * sty - st * sy) / det;
    let intercept = (sy - slope * st) / sw;
    Some((-slope, intercept.exp()))
}

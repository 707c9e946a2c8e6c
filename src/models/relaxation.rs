//! R1, R2 and steady-state NOE from the spectral density.
//!
//! Dipolar and CSA relaxation of a heteronucleus X bonded to a proton, with
//! the spectral density sampled at the five frequencies
//! `0, wX, wH - wX, wH, wH + wX`. Chemical exchange adds `Rex (frq/frq_ref)^2`
//! to R2, `Rex` being the value at the reference field.

use crate::error::{RelaxError, Result};
use crate::experiment::{Isotope, RiType, G1H};
use ndarray::Array1;
use std::f64::consts::PI;

/// Permeability of free space (T^2.m^3.J^-1).
pub const MU0: f64 = 4.0 * PI * 1e-7;
/// Planck's constant (J.s).
pub const H: f64 = 6.62606896e-34;
/// Reduced Planck's constant (J.s).
pub const H_BAR: f64 = H / (2.0 * PI);
/// Default X-H bond length (m).
pub const BOND_LENGTH: f64 = 1.02e-10;
/// Default 15N chemical shift anisotropy (unitless).
pub const CSA_N15: f64 = -172e-6;

/// Physical constants of one spin's relaxation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelaxationConstants {
    pub isotope: Isotope,
    pub bond_length: f64,
    pub csa: f64,
}

impl Default for RelaxationConstants {
    fn default() -> Self {
        Self {
            isotope: Isotope::N15,
            bond_length: BOND_LENGTH,
            csa: CSA_N15,
        }
    }
}

/// Frequencies the spectral density is sampled at, in this order.
pub const N_FREQUENCIES: usize = 5;

/// Evaluates the relaxation rate equations for one spin.
#[derive(Debug, Clone, Copy)]
pub struct RelaxationEquations {
    constants: RelaxationConstants,
    /// Quarter of the squared dipolar coupling constant.
    dip: f64,
}

impl RelaxationEquations {
    pub fn new(constants: RelaxationConstants) -> Self {
        let gx = constants.isotope.gyromagnetic_ratio();
        let dip = 0.25
            * (MU0 / (4.0 * PI)).powi(2)
            * H_BAR.powi(2)
            * G1H.powi(2)
            * gx.powi(2)
            / constants.bond_length.powi(6);
        Self { constants, dip }
    }

    pub fn constants(&self) -> &RelaxationConstants {
        &self.constants
    }

    /// Angular frequencies `[0, wX, wH - wX, wH, wH + wX]` at proton frequency `frq` (Hz).
    pub fn frequencies(&self, frq: f64) -> [f64; N_FREQUENCIES] {
        let wh = 2.0 * PI * frq;
        let wx = 2.0 * PI * self.constants.isotope.larmor_frequency(frq);
        [0.0, wx, wh - wx, wh, wh + wx]
    }

    fn csa_const(&self, frq: f64) -> f64 {
        let wx = 2.0 * PI * self.constants.isotope.larmor_frequency(frq);
        (wx * self.constants.csa).powi(2) / 3.0
    }

    fn r1(&self, frq: f64, j: &[f64; N_FREQUENCIES]) -> f64 {
        self.dip * (j[2] + 3.0 * j[1] + 6.0 * j[4]) + self.csa_const(frq) * j[1]
    }

    /// Back-calculate a relaxation rate.
    ///
    /// # Arguments
    ///
    /// * `kind` - R1, R2 or NOE
    /// * `frq` - Proton frequency (Hz)
    /// * `j` - Spectral density values at [`RelaxationEquations::frequencies`]
    /// * `rex` - Chemical exchange contribution at the reference field
    /// * `frq_ref` - Reference proton frequency of `rex`
    pub fn ri(
        &self,
        kind: RiType,
        frq: f64,
        j: &[f64; N_FREQUENCIES],
        rex: f64,
        frq_ref: f64,
    ) -> Result<f64> {
        match kind {
            RiType::R1 => Ok(self.r1(frq, j)),
            RiType::R2 => {
                let dip = 0.5 * self.dip * (4.0 * j[0] + j[2] + 3.0 * j[1] + 6.0 * j[3] + 6.0 * j[4]);
                let csa = self.csa_const(frq) / 6.0 * (4.0 * j[0] + 3.0 * j[1]);
                Ok(dip + csa + rex * (frq / frq_ref).powi(2))
            }
            RiType::Noe => {
                let r1 = self.r1(frq, j);
                if r1 == 0.0 {
                    return Err(RelaxError::domain(
                        "NOE",
                        "R1",
                        r1,
                        "the NOE is undefined for a vanishing R1",
                    ));
                }
                Ok(1.0 + self.dip * self.gamma_ratio() * (6.0 * j[4] - j[2]) / r1)
            }
        }
    }

    fn gamma_ratio(&self) -> f64 {
        G1H / self.constants.isotope.gyromagnetic_ratio()
    }

    /// Gradient of a relaxation rate with respect to the spectral density
    /// parameters, given the spectral density gradients at each frequency.
    /// The Rex derivative, `(frq/frq_ref)^2` for R2, is not included.
    pub fn dri(
        &self,
        kind: RiType,
        frq: f64,
        j: &[f64; N_FREQUENCIES],
        dj: &[Array1<f64>; N_FREQUENCIES],
    ) -> Result<Array1<f64>> {
        let csa = self.csa_const(frq);
        let dr1 = || (&dj[2] + &(&dj[1] * 3.0) + &(&dj[4] * 6.0)) * self.dip + &dj[1] * csa;
        match kind {
            RiType::R1 => Ok(dr1()),
            RiType::R2 => {
                let dip = (&dj[0] * 4.0 + &dj[2] + &(&dj[1] * 3.0) + &(&dj[3] * 6.0) + &(&dj[4] * 6.0))
                    * (0.5 * self.dip);
                let csa = (&dj[0] * 4.0 + &(&dj[1] * 3.0)) * (csa / 6.0);
                Ok(dip + csa)
            }
            RiType::Noe => {
                let r1 = self.r1(frq, j);
                if r1 == 0.0 {
                    return Err(RelaxError::domain(
                        "NOE",
                        "R1",
                        r1,
                        "the NOE is undefined for a vanishing R1",
                    ));
                }
                let sigma = 6.0 * j[4] - j[2];
                let dsigma = &dj[4] * 6.0 - &dj[2];
                let factor = self.dip * self.gamma_ratio();
                Ok((dsigma * r1 - dr1() * sigma) * (factor / (r1 * r1)))
            }
        }
    }
}

impl Default for RelaxationEquations {
    fn default() -> Self {
        Self::new(RelaxationConstants::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::spectral_density::{djw, jw, DiffusionGeometry, SpectralDensityForm};
    use approx::assert_relative_eq;

    fn sample(eq: &RelaxationEquations, frq: f64, p: &[f64]) -> ([f64; 5], [Array1<f64>; 5]) {
        let geometry = DiffusionGeometry::sphere(10e-9);
        let w = eq.frequencies(frq);
        let mut j = [0.0; 5];
        let mut dj: [Array1<f64>; 5] = Default::default();
        for k in 0..5 {
            j[k] = jw(SpectralDensityForm::S2Te, w[k], p, &geometry).unwrap();
            dj[k] = djw(SpectralDensityForm::S2Te, w[k], p, &geometry).unwrap();
        }
        (j, dj)
    }

    #[test]
    fn test_typical_rates() {
        let eq = RelaxationEquations::default();
        let (j, _) = sample(&eq, 600e6, &[0.8, 50e-12]);
        let r1 = eq.ri(RiType::R1, 600e6, &j, 0.0, 600e6).unwrap();
        let r2 = eq.ri(RiType::R2, 600e6, &j, 0.0, 600e6).unwrap();
        let noe = eq.ri(RiType::Noe, 600e6, &j, 0.0, 600e6).unwrap();
        // A rigid backbone amide of a 10 ns protein at 600 MHz.
        assert!(r1 > 0.8 && r1 < 2.5, "R1 = {}", r1);
        assert!(r2 > 10.0 && r2 < 25.0, "R2 = {}", r2);
        assert!(noe > 0.6 && noe < 0.95, "NOE = {}", noe);

        let r2_rex = eq.ri(RiType::R2, 800e6, &j, 2.0, 600e6).unwrap();
        let r2_800 = eq.ri(RiType::R2, 800e6, &j, 0.0, 600e6).unwrap();
        assert_relative_eq!(r2_rex - r2_800, 2.0 * (800.0f64 / 600.0).powi(2), max_relative = 1e-10);
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let eq = RelaxationEquations::default();
        let p = [0.8, 50e-12];
        let (j, dj) = sample(&eq, 600e6, &p);
        for kind in [RiType::R1, RiType::R2, RiType::Noe] {
            let grad = eq.dri(kind, 600e6, &j, &dj).unwrap();
            for k in 0..2 {
                let h = 1e-6 * p[k];
                let mut up = p;
                let mut down = p;
                up[k] += h;
                down[k] -= h;
                let (ju, _) = sample(&eq, 600e6, &up);
                let (jd, _) = sample(&eq, 600e6, &down);
                let numeric = (eq.ri(kind, 600e6, &ju, 0.0, 600e6).unwrap()
                    - eq.ri(kind, 600e6, &jd, 0.0, 600e6).unwrap())
                    / (2.0 * h);
                assert_relative_eq!(grad[k], numeric, max_relative = 1e-5);
            }
        }
    }
}

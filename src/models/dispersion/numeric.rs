//! Numerical solutions of the Bloch-McConnell equations.
//!
//! The magnetisation of `N` exchanging sites is a `3N` vector of x, y and z
//! components. Free evolution under relaxation, chemical shift, a spin-lock
//! field along x and chemical exchange is propagated with the matrix
//! exponential; CPMG refocusing pulses are ideal 180 degree rotations about x.

use super::R2EFF_OVERFLOW;
use crate::error::{RelaxError, Result};
use nalgebra::{DMatrix, DVector};

/// Populations, resonance frequencies and pairwise exchange rates of a set of
/// exchanging sites.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeSites {
    pub populations: Vec<f64>,
    /// Resonance frequency of each site (rad/s).
    pub omegas: Vec<f64>,
    /// `rates[i][j]` is the rate constant from site `i` to site `j` (s^-1).
    pub rates: Vec<Vec<f64>>,
}

/// Forward and backward rates `(k_ij, k_ji)` of an exchange pair from its
/// exchange rate, with detailed balance `p_i k_ij = p_j k_ji`.
fn split_kex(kex: f64, p_i: f64, p_j: f64) -> (f64, f64) {
    let total = p_i + p_j;
    if total == 0.0 {
        return (0.0, 0.0);
    }
    (kex * p_j / total, kex * p_i / total)
}

impl ExchangeSites {
    /// Two sites A and B, B resonating at `omega_a + dw`.
    pub fn two_site(pa: f64, omega_a: f64, dw: f64, kex: f64) -> Self {
        let pb = 1.0 - pa;
        let (k_ab, k_ba) = split_kex(kex, pa, pb);
        Self {
            populations: vec![pa, pb],
            omegas: vec![omega_a, omega_a + dw],
            rates: vec![vec![0.0, k_ab], vec![k_ba, 0.0]],
        }
    }

    /// Three sites in a triangle: B at `omega_a + dw_ab`, C at `omega_b + dw_bc`.
    ///
    /// `kex` holds the exchange rates of the AB, BC and AC pairs.
    pub fn three_site(p: [f64; 2], omega_a: f64, dw: [f64; 2], kex: [f64; 3]) -> Self {
        let [pa, pb] = p;
        let pc = 1.0 - pa - pb;
        let (k_ab, k_ba) = split_kex(kex[0], pa, pb);
        let (k_bc, k_cb) = split_kex(kex[1], pb, pc);
        let (k_ac, k_ca) = split_kex(kex[2], pa, pc);
        let omega_b = omega_a + dw[0];
        Self {
            populations: vec![pa, pb, pc],
            omegas: vec![omega_a, omega_b, omega_b + dw[1]],
            rates: vec![
                vec![0.0, k_ab, k_ac],
                vec![k_ba, 0.0, k_bc],
                vec![k_ca, k_cb, 0.0],
            ],
        }
    }

    pub fn n_sites(&self) -> usize {
        self.populations.len()
    }
}

/// The Bloch-McConnell evolution matrix.
///
/// # Arguments
///
/// * `sites` - The exchanging sites
/// * `r2` - Transverse relaxation rate of each site
/// * `r1` - Longitudinal relaxation rate, shared by all sites
/// * `omega1` - Spin-lock field along x (rad/s)
/// * `carrier` - Carrier position the site offsets are measured from (rad/s)
pub fn bloch_mcconnell(
    sites: &ExchangeSites,
    r2: &[f64],
    r1: f64,
    omega1: f64,
    carrier: f64,
) -> DMatrix<f64> {
    let n = sites.n_sites();
    let mut l = DMatrix::zeros(3 * n, 3 * n);
    for s in 0..n {
        let b = 3 * s;
        let offset = sites.omegas[s] - carrier;
        l[(b, b)] = -r2[s];
        l[(b, b + 1)] = -offset;
        l[(b + 1, b)] = offset;
        l[(b + 1, b + 1)] = -r2[s];
        l[(b + 1, b + 2)] = -omega1;
        l[(b + 2, b + 1)] = omega1;
        l[(b + 2, b + 2)] = -r1;
    }
    for i in 0..n {
        for j in 0..n {
            let k = sites.rates[i][j];
            if i == j || k == 0.0 {
                continue;
            }
            for c in 0..3 {
                l[(3 * i + c, 3 * i + c)] -= k;
                l[(3 * j + c, 3 * i + c)] += k;
            }
        }
    }
    l
}

fn matrix_power(m: &DMatrix<f64>, mut exp: u64) -> DMatrix<f64> {
    let mut result = DMatrix::identity(m.nrows(), m.ncols());
    let mut base = m.clone();
    while exp > 0 {
        if exp & 1 == 1 {
            result = &result * &base;
        }
        exp >>= 1;
        if exp > 0 {
            base = &base * &base;
        }
    }
    result
}

fn rate_from_decay(fraction: f64, relax_time: f64) -> f64 {
    if fraction <= 0.0 || !fraction.is_finite() {
        R2EFF_OVERFLOW
    } else {
        -fraction.ln() / relax_time
    }
}

fn check_relax_time(relax_time: f64) -> Result<()> {
    if !(relax_time > 0.0) || !relax_time.is_finite() {
        return Err(RelaxError::InvalidParameter(format!(
            "The relaxation period must be positive, got {}",
            relax_time
        )));
    }
    Ok(())
}

/// Two-site CPMG R2eff from the 3D Bloch-McConnell equations.
///
/// The CPMG block `tcp - 180x - 2tcp - 180x - tcp`, `tcp = 1/(4 nu_cpmg)`,
/// is repeated `round(nu_cpmg T)` times, and R2eff follows from the
/// remaining x magnetisation of state A by the two-point relation
/// `-ln(M(T)/M(0)) / T`.
pub fn ns_cpmg_2site_3d(
    r20a: f64,
    r20b: f64,
    pa: f64,
    dw: f64,
    kex: f64,
    nu_cpmg: f64,
    relax_time: f64,
) -> Result<f64> {
    if pa == 1.0 || kex == 0.0 || dw == 0.0 {
        return Ok(r20a);
    }
    check_relax_time(relax_time)?;
    if !(nu_cpmg > 0.0) {
        return Err(RelaxError::InvalidParameter(format!(
            "The CPMG frequency must be positive, got {}",
            nu_cpmg
        )));
    }

    let sites = ExchangeSites::two_site(pa, 0.0, dw, kex);
    let l = bloch_mcconnell(&sites, &[r20a, r20b], 0.0, 0.0, 0.0);
    let tcp = 1.0 / (4.0 * nu_cpmg);
    let free = (&l * tcp).exp();
    let free2 = (&l * (2.0 * tcp)).exp();
    let pulse = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, -1.0, -1.0, 1.0, -1.0, -1.0]));
    let block = &free * &pulse * &free2 * &pulse * &free;

    let power = (nu_cpmg * relax_time).round().max(1.0) as u64;
    let total = matrix_power(&block, power);

    let mut m0 = DVector::zeros(6);
    m0[0] = pa;
    m0[3] = 1.0 - pa;
    let m = total * m0;
    Ok(rate_from_decay(m[0] / pa, relax_time))
}

/// R1rho of N exchanging sites from the Bloch-McConnell equations.
///
/// The magnetisation starts along the effective field of the
/// population-averaged resonance and R1rho is taken from its projection on
/// that axis after the spin-lock period.
pub fn ns_r1rho(
    sites: &ExchangeSites,
    r1rho_prime: f64,
    r1: f64,
    omega1: f64,
    carrier: f64,
    relax_time: f64,
) -> Result<f64> {
    check_relax_time(relax_time)?;
    let n = sites.n_sites();

    let avg_offset: f64 = sites
        .populations
        .iter()
        .zip(&sites.omegas)
        .map(|(p, w)| p * (w - carrier))
        .sum();
    let weff = (omega1 * omega1 + avg_offset * avg_offset).sqrt();
    let axis = if weff == 0.0 {
        [0.0, 0.0, 1.0]
    } else {
        [omega1 / weff, 0.0, avg_offset / weff]
    };

    let r2 = vec![r1rho_prime; n];
    let l = bloch_mcconnell(sites, &r2, r1, omega1, carrier);
    let mut m0 = DVector::zeros(3 * n);
    for s in 0..n {
        for c in 0..3 {
            m0[3 * s + c] = sites.populations[s] * axis[c];
        }
    }
    let m = (l * relax_time).exp() * m0;
    let projection: f64 = (0..n)
        .map(|s| (0..3).map(|c| m[3 * s + c] * axis[c]).sum::<f64>())
        .sum();
    Ok(rate_from_decay(projection, relax_time))
}

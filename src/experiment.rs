//! Experiment descriptors and observations.
//!
//! An observation pairs a measured value and its error with the identifier of
//! what was measured: a dispersion point, a relaxation rate, a spectral density
//! value, or an intensity on an exponential decay curve. Monte Carlo replicates
//! of the value are kept alongside it.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Gyromagnetic ratio of the proton (rad.s^-1.T^-1).
pub const G1H: f64 = 26.7522212e7;
/// Gyromagnetic ratio of nitrogen-15 (rad.s^-1.T^-1).
pub const G15N: f64 = -2.7126e7;
/// Gyromagnetic ratio of carbon-13 (rad.s^-1.T^-1).
pub const G13C: f64 = 6.728e7;

/// The NMR-active nucleus of a spin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Isotope {
    #[serde(rename = "1H")]
    H1,
    #[serde(rename = "13C")]
    C13,
    #[default]
    #[serde(rename = "15N")]
    N15,
}

impl Isotope {
    /// The gyromagnetic ratio (signed).
    pub fn gyromagnetic_ratio(&self) -> f64 {
        match self {
            Isotope::H1 => G1H,
            Isotope::C13 => G13C,
            Isotope::N15 => G15N,
        }
    }

    /// Larmor frequency of this nucleus in Hz for a given proton frequency in Hz.
    pub fn larmor_frequency(&self, proton_frq: f64) -> f64 {
        proton_frq * (self.gyromagnetic_ratio() / G1H).abs()
    }

    /// Conversion factor from ppm to rad/s at the given proton frequency.
    pub fn ppm_to_rad(&self, proton_frq: f64) -> f64 {
        2.0 * std::f64::consts::PI * self.larmor_frequency(proton_frq) * 1e-6
    }
}

/// Dispersion experiment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ExpType {
    /// Single-quantum CPMG.
    #[serde(rename = "SQ CPMG")]
    Cpmg,
    /// Spin-lock R1rho.
    #[serde(rename = "R1rho")]
    R1rho,
}

impl fmt::Display for ExpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpType::Cpmg => write!(f, "SQ CPMG"),
            ExpType::R1rho => write!(f, "R1rho"),
        }
    }
}

/// Key of one independently fitted baseline relaxation rate: the experiment
/// type and the proton spectrometer frequency in Hz.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct R20Key {
    pub exp_type: ExpType,
    pub frq: f64,
}

impl R20Key {
    pub fn new(exp_type: ExpType, frq: f64) -> Self {
        Self { exp_type, frq }
    }
}

impl PartialEq for R20Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for R20Key {}

impl PartialOrd for R20Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for R20Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.exp_type
            .cmp(&other.exp_type)
            .then_with(|| self.frq.total_cmp(&other.frq))
    }
}

impl fmt::Display for R20Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {:.8} MHz", self.exp_type, self.frq / 1e6)
    }
}

/// One point on a dispersion curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DispersionPoint {
    pub exp_type: ExpType,
    /// Proton spectrometer frequency (Hz).
    pub frq: f64,
    /// CPMG pulse train frequency or spin-lock field strength (Hz).
    pub point: f64,
    /// Spin-lock carrier offset (ppm), unused for CPMG.
    pub offset: f64,
    /// Relaxation (constant-time) period (s).
    pub relax_time: f64,
}

impl DispersionPoint {
    /// A CPMG point.
    pub fn cpmg(frq: f64, cpmg_frq: f64, relax_time: f64) -> Self {
        Self {
            exp_type: ExpType::Cpmg,
            frq,
            point: cpmg_frq,
            offset: 0.0,
            relax_time,
        }
    }

    /// An R1rho point.
    pub fn r1rho(frq: f64, spin_lock_nu1: f64, offset: f64, relax_time: f64) -> Self {
        Self {
            exp_type: ExpType::R1rho,
            frq,
            point: spin_lock_nu1,
            offset,
            relax_time,
        }
    }

    /// The R20 key this point belongs to.
    pub fn r20_key(&self) -> R20Key {
        R20Key::new(self.exp_type, self.frq)
    }
}

/// Relaxation data type for model-free analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiType {
    R1,
    R2,
    #[serde(rename = "NOE")]
    Noe,
}

/// What an observation measures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Observable {
    /// An effective relaxation rate (R2eff or R1rho) at a dispersion point.
    Dispersion(DispersionPoint),
    /// A relaxation rate at a proton frequency (Hz).
    Relaxation { kind: RiType, frq: f64 },
    /// A spectral density value J(omega) at angular frequency omega (rad/s).
    SpectralDensity { omega: f64 },
}

/// A measured value with its error and Monte Carlo replicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub observable: Observable,
    pub value: f64,
    pub error: f64,
    /// Values from duplicated or triplicated measurements, used for bootstrap resampling.
    #[serde(default)]
    pub replicates: Vec<f64>,
    /// Simulated values, one per Monte Carlo replicate.
    #[serde(default)]
    pub sims: Vec<f64>,
}

impl Observation {
    pub fn new(observable: Observable, value: f64, error: f64) -> Self {
        Self {
            observable,
            value,
            error,
            replicates: Vec::new(),
            sims: Vec::new(),
        }
    }

    /// Attach repeated measurements of the same point.
    pub fn with_replicates(mut self, replicates: Vec<f64>) -> Self {
        self.replicates = replicates;
        self
    }

    /// The value to fit: the measured one, or the replicate `sim_index`.
    pub fn value_for(&self, sim_index: Option<usize>) -> f64 {
        match sim_index {
            Some(i) => self.sims.get(i).copied().unwrap_or(f64::NAN),
            None => self.value,
        }
    }

    /// The dispersion point, if this is a dispersion observation.
    pub fn dispersion_point(&self) -> Option<&DispersionPoint> {
        match &self.observable {
            Observable::Dispersion(point) => Some(point),
            _ => None,
        }
    }
}

/// Peak intensities measured at a series of relaxation delays for one dispersion point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntensityCurve {
    pub point: DispersionPoint,
    pub times: Vec<f64>,
    pub intensities: Vec<f64>,
    pub errors: Vec<f64>,
}

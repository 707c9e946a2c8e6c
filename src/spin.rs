//! The spin container: the atomic unit of analysis.
//!
//! A spin carries its observations, the model assigned to it, the fitted
//! parameter values keyed by [`ParamKey`], their errors, and the Monte Carlo
//! replicate values. Optimisation results are written back onto spins.

use crate::error::{RelaxError, Result};
use crate::experiment::{
    DispersionPoint, IntensityCurve, Isotope, Observable, Observation, R20Key,
};
use crate::models::spectral_density::DiffusionGeometry;
use crate::models::ModelId;
use crate::parameters::names::ParamName;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Key of one stored parameter value.
///
/// R20-type rates are stored once per R20 key, all other parameters have
/// `r20 == None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ParamKey {
    pub name: ParamName,
    pub r20: Option<R20Key>,
}

impl ParamKey {
    pub fn new(name: ParamName) -> Self {
        Self { name, r20: None }
    }

    pub fn r20(name: ParamName, key: R20Key) -> Self {
        Self {
            name,
            r20: Some(key),
        }
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.r20 {
            Some(key) => write!(f, "{}[{}]", self.name, key),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Named parameter values of a spin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamStore {
    values: BTreeMap<ParamKey, f64>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: ParamName, r20: Option<R20Key>) -> Option<f64> {
        self.values.get(&ParamKey { name, r20 }).copied()
    }

    pub fn get_key(&self, key: &ParamKey) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn set(&mut self, name: ParamName, r20: Option<R20Key>, value: f64) {
        self.values.insert(ParamKey { name, r20 }, value);
    }

    pub fn set_key(&mut self, key: ParamKey, value: f64) {
        self.values.insert(key, value);
    }

    pub fn remove(&mut self, name: ParamName, r20: Option<R20Key>) -> Option<f64> {
        self.values.remove(&ParamKey { name, r20 })
    }

    pub fn contains(&self, name: ParamName, r20: Option<R20Key>) -> bool {
        self.values.contains_key(&ParamKey { name, r20 })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParamKey, &f64)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Monte Carlo replicate values of a spin's parameters, `<param>_sim[i]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimStore {
    values: BTreeMap<ParamKey, Vec<f64>>,
}

impl SimStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `n` replicate slots for `key`, initialised to NaN.
    pub fn allocate(&mut self, key: ParamKey, n: usize) {
        self.values.insert(key, vec![f64::NAN; n]);
    }

    pub fn get(&self, key: &ParamKey, index: usize) -> Option<f64> {
        self.values.get(key).and_then(|v| v.get(index)).copied()
    }

    /// Store the value of replicate `index`.
    pub fn set(&mut self, key: ParamKey, index: usize, value: f64) -> Result<()> {
        let slots = self.values.get_mut(&key).ok_or_else(|| {
            RelaxError::InvalidParameter(format!("No simulation slots allocated for '{}'", key))
        })?;
        let n_slots = slots.len();
        let slot = slots.get_mut(index).ok_or_else(|| {
            RelaxError::DimensionMismatch(format!(
                "Simulation index {} out of range for '{}' ({} slots)",
                index, key, n_slots
            ))
        })?;
        *slot = value;
        Ok(())
    }

    /// Store the value of replicate `index`, growing the slots as needed.
    pub fn insert(&mut self, key: ParamKey, index: usize, value: f64) {
        let slots = self.values.entry(key).or_default();
        if slots.len() <= index {
            slots.resize(index + 1, f64::NAN);
        }
        slots[index] = value;
    }

    pub fn values(&self, key: &ParamKey) -> Option<&[f64]> {
        self.values.get(key).map(|v| v.as_slice())
    }

    pub fn keys(&self) -> impl Iterator<Item = &ParamKey> {
        self.values.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Optimisation statistics written onto a spin after a fit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitStats {
    pub chi2: Option<f64>,
    pub iterations: usize,
    pub func_evals: usize,
    pub grad_evals: usize,
    pub converged: bool,
    pub warning: Option<String>,
}

/// A single spin system.
#[derive(Debug, Clone)]
pub struct Spin {
    /// Identifier, e.g. `:15@N`.
    pub id: String,
    /// Deselected spins are skipped by every traversal.
    pub select: bool,
    pub isotope: Isotope,
    /// Chemical shift (ppm), needed for off-resonance R1rho.
    pub chemical_shift: Option<f64>,
    pub model: Option<ModelId>,
    pub values: ParamStore,
    pub errors: ParamStore,
    pub sims: SimStore,
    pub observations: Vec<Observation>,
    /// Intensity decays for the exponential R2eff stage.
    pub curves: Vec<IntensityCurve>,
    /// Longitudinal relaxation rates as `(proton frequency in Hz, R1)`.
    pub r1: Vec<(f64, f64)>,
    pub diffusion: Option<DiffusionGeometry>,
    pub fit: FitStats,
    pub chi2_sim: Vec<f64>,
    /// Per-replicate selection; a replicate whose fit failed is deselected.
    pub select_sim: Vec<bool>,
}

impl Spin {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            select: true,
            isotope: Isotope::default(),
            chemical_shift: None,
            model: None,
            values: ParamStore::new(),
            errors: ParamStore::new(),
            sims: SimStore::new(),
            observations: Vec::new(),
            curves: Vec::new(),
            r1: Vec::new(),
            diffusion: None,
            fit: FitStats::default(),
            chi2_sim: Vec::new(),
            select_sim: Vec::new(),
        }
    }

    pub fn with_isotope(mut self, isotope: Isotope) -> Self {
        self.isotope = isotope;
        self
    }

    pub fn with_chemical_shift(mut self, ppm: f64) -> Self {
        self.chemical_shift = Some(ppm);
        self
    }

    pub fn with_diffusion(mut self, geometry: DiffusionGeometry) -> Self {
        self.diffusion = Some(geometry);
        self
    }

    pub fn add_observation(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    /// Add an R2eff or R1rho value at a dispersion point.
    pub fn add_dispersion(&mut self, point: DispersionPoint, value: f64, error: f64) {
        self.observations
            .push(Observation::new(Observable::Dispersion(point), value, error));
    }

    pub fn set_r1(&mut self, frq: f64, value: f64) {
        match self.r1.iter_mut().find(|(f, _)| *f == frq) {
            Some(entry) => entry.1 = value,
            None => self.r1.push((frq, value)),
        }
    }

    /// The R1 value at the given proton frequency.
    pub fn r1_at(&self, frq: f64) -> Option<f64> {
        self.r1
            .iter()
            .find(|(f, _)| (f - frq).abs() <= 1e-6 * frq.abs().max(1.0))
            .map(|(_, v)| *v)
    }

    pub fn dispersion_observations(&self) -> impl Iterator<Item = (&DispersionPoint, &Observation)> {
        self.observations
            .iter()
            .filter_map(|obs| obs.dispersion_point().map(|p| (p, obs)))
    }

    /// Whether the fit of this spin's model reads `obs`.
    ///
    /// Dispersion models read the dispersion points of their experiment type
    /// (all of them for `No Rex`), model-free models the relaxation data.
    /// Without a model every observation counts.
    pub fn fits_observation(&self, obs: &Observation) -> bool {
        let model = match &self.model {
            Some(model) => model,
            None => return true,
        };
        match obs.dispersion_point() {
            Some(point) => {
                model.is_dispersion() && model.exp_type().map_or(true, |t| t == point.exp_type)
            }
            None => model.is_model_free(),
        }
    }

    /// Distinct R20 keys of the dispersion data this spin's model fits.
    pub fn r20_keys(&self) -> BTreeSet<R20Key> {
        self.dispersion_observations()
            .filter(|(_, obs)| self.fits_observation(obs))
            .map(|(point, _)| point.r20_key())
            .collect()
    }

    /// Number of data points the fit of this spin's model consumes.
    pub fn n_observations(&self) -> usize {
        match &self.model {
            Some(model) if model.is_exponential() => {
                self.curves.iter().map(|c| c.intensities.len()).sum()
            }
            _ => self
                .observations
                .iter()
                .filter(|obs| self.fits_observation(obs))
                .count(),
        }
    }

    /// Whether replicate `index` is selected for the error analysis.
    pub fn sim_selected(&self, index: usize) -> bool {
        self.select_sim.get(index).copied().unwrap_or(true)
    }

    /// Drop all fitted values, errors, sims and statistics.
    pub fn reset_results(&mut self) {
        self.values.clear();
        self.errors.clear();
        self.sims.clear();
        self.fit = FitStats::default();
        self.chi2_sim.clear();
        self.select_sim.clear();
    }
}

impl Default for Spin {
    fn default() -> Self {
        Self::new("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::ExpType;

    #[test]
    fn test_param_store() {
        let key = R20Key::new(ExpType::Cpmg, 600e6);
        let mut store = ParamStore::new();
        store.set(ParamName::R2, Some(key), 12.0);
        store.set(ParamName::Kex, None, 1500.0);
        assert_eq!(store.get(ParamName::R2, Some(key)), Some(12.0));
        assert_eq!(store.get(ParamName::R2, None), None);
        assert_eq!(store.get(ParamName::Kex, None), Some(1500.0));
        assert_eq!(store.len(), 2);
        assert_eq!(store.remove(ParamName::Kex, None), Some(1500.0));
        assert!(!store.contains(ParamName::Kex, None));
    }

    #[test]
    fn test_sim_store() {
        let mut sims = SimStore::new();
        let key = ParamKey::new(ParamName::Dw);
        assert!(sims.set(key, 0, 1.0).is_err());
        sims.allocate(key, 3);
        assert!(sims.get(&key, 1).map(f64::is_nan).unwrap_or(false));
        sims.set(key, 1, 2.5).unwrap();
        assert_eq!(sims.get(&key, 1), Some(2.5));
        assert!(sims.set(key, 3, 1.0).is_err());
        assert_eq!(sims.values(&key).map(|v| v.len()), Some(3));
    }

    #[test]
    fn test_sim_store_index_past_the_slots() {
        let mut sims = SimStore::new();
        let key = ParamKey::new(ParamName::Kex);
        sims.allocate(key, 2);
        match sims.set(key, 5, 1500.0) {
            Err(RelaxError::DimensionMismatch(msg)) => assert!(msg.contains("2 slots"), "{}", msg),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(sims.values(&key).map(|v| v.len()), Some(2));
    }

    /// CPMG at 600 and 800 MHz plus three R1rho points at 600 MHz.
    fn mixed_spin(model: Option<ModelId>) -> Spin {
        let mut spin = Spin::new(":3@N");
        spin.model = model;
        for frq in [600e6, 800e6] {
            for nu in [50.0, 200.0, 800.0] {
                spin.add_dispersion(DispersionPoint::cpmg(frq, nu, 0.04), 12.0, 0.2);
            }
        }
        for nu1 in [1000.0, 2000.0, 4000.0] {
            spin.add_dispersion(DispersionPoint::r1rho(600e6, nu1, 0.0, 0.05), 11.0, 0.2);
        }
        spin
    }

    #[test]
    fn test_keys_and_counts_follow_the_model_experiment() {
        let cpmg = [R20Key::new(ExpType::Cpmg, 600e6), R20Key::new(ExpType::Cpmg, 800e6)];

        let spin = mixed_spin(Some(ModelId::Cr72));
        assert_eq!(spin.r20_keys().into_iter().collect::<Vec<_>>(), cpmg.to_vec());
        assert_eq!(spin.n_observations(), 6);

        let spin = mixed_spin(Some(ModelId::M61));
        let keys: Vec<R20Key> = spin.r20_keys().into_iter().collect();
        assert_eq!(keys, vec![R20Key::new(ExpType::R1rho, 600e6)]);
        assert_eq!(spin.n_observations(), 3);

        // No Rex and an unset model read every dispersion point.
        assert_eq!(mixed_spin(Some(ModelId::NoRex)).r20_keys().len(), 3);
        assert_eq!(mixed_spin(Some(ModelId::NoRex)).n_observations(), 9);
        assert_eq!(mixed_spin(None).n_observations(), 9);
    }

    #[test]
    fn test_spin_r20_keys() {
        let mut spin = Spin::new(":1@N");
        assert!(spin.select);
        spin.add_dispersion(DispersionPoint::cpmg(800e6, 100.0, 0.04), 10.0, 0.5);
        spin.add_dispersion(DispersionPoint::cpmg(600e6, 100.0, 0.04), 10.0, 0.5);
        spin.add_dispersion(DispersionPoint::cpmg(600e6, 200.0, 0.04), 9.0, 0.5);
        let keys: Vec<R20Key> = spin.r20_keys().into_iter().collect();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].frq, 600e6);
        assert_eq!(spin.n_observations(), 3);
    }

    #[test]
    fn test_r1_lookup() {
        let mut spin = Spin::new(":2@N");
        spin.set_r1(600e6, 1.5);
        spin.set_r1(600e6, 1.6);
        spin.set_r1(800e6, 1.2);
        assert_eq!(spin.r1.len(), 2);
        assert_eq!(spin.r1_at(600e6), Some(1.6));
        assert_eq!(spin.r1_at(500e6), None);
    }
}

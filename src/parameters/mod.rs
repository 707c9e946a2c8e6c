//! # Parameter vectors of a cluster
//!
//! A cluster of spins sharing one model is optimised over a single flat
//! parameter vector. This module owns the ordering of that vector: every
//! other layer (scaling, constraints, grid bounds, result unpacking) walks
//! the same traversal produced by [`loop_parameters`].
//!
//! ## Ordering
//!
//! The model's parameter names are visited in model order. Each name emits:
//!
//! - R20-type rates: one entry per (selected spin, R20 key), spins outer
//! - per-spin parameters: one entry per selected spin
//! - global parameters: a single entry shared by the cluster
//!
//! ## Example
//!
//! ```rust
//! use relaxopt_rs::experiment::{DispersionPoint, R20Key, ExpType};
//! use relaxopt_rs::models::ModelId;
//! use relaxopt_rs::parameters::{loop_parameters, param_num};
//! use relaxopt_rs::spin::Spin;
//!
//! let mut spins = vec![Spin::new(":1@N"), Spin::new(":2@N")];
//! for spin in spins.iter_mut() {
//!     spin.model = Some(ModelId::Cr72);
//! }
//! let keys = vec![
//!     R20Key::new(ExpType::Cpmg, 600e6),
//!     R20Key::new(ExpType::Cpmg, 800e6),
//! ];
//!
//! // r2 x 4, pA, dw x 2, kex
//! assert_eq!(param_num(&spins, &keys).unwrap(), 8);
//! let names: Vec<String> = loop_parameters(&spins, &keys)
//!     .unwrap()
//!     .map(|entry| entry.name.to_string())
//!     .collect();
//! assert_eq!(names, ["r2", "r2", "r2", "r2", "pA", "dw", "dw", "kex"]);
//! ```

pub mod constraints;
pub mod conversion;
pub mod names;

pub use constraints::{linear_constraints, LinearConstraints};
pub use conversion::param_conversion;
pub use names::{ParamKind, ParamName};

use crate::error::{RelaxError, Result};
use crate::experiment::R20Key;
use crate::models::ModelId;
use crate::spin::{ParamKey, Spin};
use ndarray::Array1;

/// One element of the flat parameter vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamEntry {
    pub name: ParamName,
    /// Position in the flat vector.
    pub index: usize,
    /// Position of the name in the model's parameter list.
    pub model_index: usize,
    /// Position of the owning spin in the cluster slice, `None` for globals.
    pub spin_index: Option<usize>,
    pub r20_key: Option<R20Key>,
}

impl ParamEntry {
    /// The key under which the value is stored on a spin.
    pub fn key(&self) -> ParamKey {
        ParamKey {
            name: self.name,
            r20: self.r20_key,
        }
    }
}

/// Lazy traversal of the parameter vector of a cluster.
///
/// The iterator borrows the R20 keys and is cheap to clone, so a traversal
/// can be restarted at any point.
#[derive(Debug, Clone)]
pub struct ParamIter<'a> {
    names: Vec<ParamName>,
    spins: Vec<usize>,
    r20_keys: &'a [R20Key],
    name_pos: usize,
    spin_pos: usize,
    key_pos: usize,
    index: usize,
}

impl<'a> ParamIter<'a> {
    fn advance_name(&mut self) {
        self.name_pos += 1;
        self.spin_pos = 0;
        self.key_pos = 0;
    }

    fn emit(&mut self, spin_index: Option<usize>, r20_key: Option<R20Key>) -> ParamEntry {
        let entry = ParamEntry {
            name: self.names[self.name_pos],
            index: self.index,
            model_index: self.name_pos,
            spin_index,
            r20_key,
        };
        self.index += 1;
        entry
    }
}

impl<'a> Iterator for ParamIter<'a> {
    type Item = ParamEntry;

    fn next(&mut self) -> Option<ParamEntry> {
        loop {
            let name = *self.names.get(self.name_pos)?;
            match name.kind() {
                ParamKind::R20 => {
                    if self.spin_pos >= self.spins.len() {
                        self.advance_name();
                        continue;
                    }
                    if self.key_pos >= self.r20_keys.len() {
                        self.spin_pos += 1;
                        self.key_pos = 0;
                        continue;
                    }
                    let spin = self.spins[self.spin_pos];
                    let key = self.r20_keys[self.key_pos];
                    self.key_pos += 1;
                    return Some(self.emit(Some(spin), Some(key)));
                }
                ParamKind::Spin => {
                    if self.spin_pos >= self.spins.len() {
                        self.advance_name();
                        continue;
                    }
                    let spin = self.spins[self.spin_pos];
                    self.spin_pos += 1;
                    return Some(self.emit(Some(spin), None));
                }
                ParamKind::Global => {
                    // spin_pos doubles as the "already emitted" flag.
                    if self.spin_pos > 0 || self.spins.is_empty() {
                        self.advance_name();
                        continue;
                    }
                    self.spin_pos = 1;
                    return Some(self.emit(None, None));
                }
            }
        }
    }
}

/// The model shared by the selected spins of a cluster.
///
/// Returns `None` for a cluster without selected spins.
pub fn cluster_model(spins: &[Spin]) -> Result<Option<ModelId>> {
    let mut model: Option<ModelId> = None;
    for spin in spins.iter().filter(|s| s.select) {
        let current = spin.model.ok_or_else(|| {
            RelaxError::InvalidParameter(format!("No model has been set for spin '{}'", spin.id))
        })?;
        match model {
            None => model = Some(current),
            Some(m) if m != current => {
                return Err(RelaxError::InvalidParameter(format!(
                    "Spin '{}' uses model '{}' but the cluster uses '{}'",
                    spin.id, current, m
                )))
            }
            Some(_) => {}
        }
    }
    Ok(model)
}

/// Walk the parameter vector of a cluster.
///
/// # Arguments
///
/// * `spins` - The spins of the cluster; deselected spins are skipped
/// * `r20_keys` - The pipe-wide sorted R20 keys
///
/// # Returns
///
/// * A lazy iterator of [`ParamEntry`], or an error if the selected spins
///   do not share one model
pub fn loop_parameters<'a>(spins: &[Spin], r20_keys: &'a [R20Key]) -> Result<ParamIter<'a>> {
    let names = match cluster_model(spins)? {
        Some(model) => model.params(),
        None => Vec::new(),
    };
    let selected = spins
        .iter()
        .enumerate()
        .filter(|(_, s)| s.select)
        .map(|(i, _)| i)
        .collect();
    Ok(ParamIter {
        names,
        spins: selected,
        r20_keys,
        name_pos: 0,
        spin_pos: 0,
        key_pos: 0,
        index: 0,
    })
}

/// Number of parameters of the cluster; globals are counted once.
pub fn param_num(spins: &[Spin], r20_keys: &[R20Key]) -> Result<usize> {
    Ok(loop_parameters(spins, r20_keys)?.count())
}

/// The traversal entry at position `index` of the flat vector.
pub fn param_index_to_param_info(
    index: usize,
    spins: &[Spin],
    r20_keys: &[R20Key],
) -> Result<Option<ParamEntry>> {
    Ok(loop_parameters(spins, r20_keys)?.nth(index))
}

/// A materialised traversal, for code that indexes the vector repeatedly.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamLayout {
    model: Option<ModelId>,
    entries: Vec<ParamEntry>,
}

impl ParamLayout {
    pub fn new(spins: &[Spin], r20_keys: &[R20Key]) -> Result<Self> {
        let model = cluster_model(spins)?;
        let entries = loop_parameters(spins, r20_keys)?.collect();
        Ok(Self { model, entries })
    }

    pub fn model(&self) -> Option<ModelId> {
        self.model
    }

    pub fn entries(&self) -> &[ParamEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&ParamEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position of a parameter in the vector.
    pub fn index_of(
        &self,
        name: ParamName,
        spin_index: Option<usize>,
        r20_key: Option<R20Key>,
    ) -> Option<usize> {
        self.entries
            .iter()
            .find(|e| {
                e.name == name
                    && e.r20_key == r20_key
                    && (e.spin_index.is_none() || e.spin_index == spin_index)
            })
            .map(|e| e.index)
    }

    /// Entries seen by one spin: its own, plus the globals.
    pub fn spin_entries(&self, spin_index: usize) -> impl Iterator<Item = &ParamEntry> {
        self.entries
            .iter()
            .filter(move |e| e.spin_index.map_or(true, |s| s == spin_index))
    }
}

/// Largest peak intensity of a spin, the natural scale of `I0`.
fn max_intensity(spin: &Spin) -> Option<f64> {
    spin.curves
        .iter()
        .flat_map(|c| c.intensities.iter().copied())
        .filter(|v| v.is_finite())
        .max_by(f64::total_cmp)
        .filter(|v| *v > 0.0)
}

/// Value of an entry stored on the cluster's spins.
///
/// Global values are read from the first selected spin holding one.
fn stored_value(spins: &[Spin], entry: &ParamEntry, sim_index: Option<usize>) -> Option<f64> {
    let key = entry.key();
    let read = |spin: &Spin| match sim_index {
        Some(i) => spin.sims.get(&key, i).filter(|v| !v.is_nan()),
        None => spin.values.get_key(&key),
    };
    match entry.spin_index {
        Some(s) => spins.get(s).and_then(read),
        None => spins.iter().filter(|s| s.select).find_map(read),
    }
}

fn default_value(spins: &[Spin], entry: &ParamEntry) -> f64 {
    match (entry.name, entry.spin_index.and_then(|s| spins.get(s))) {
        (ParamName::I0, Some(spin)) => max_intensity(spin).unwrap_or(1.0),
        (name, _) => name.default_value(),
    }
}

/// Build the flat parameter vector from the values stored on the spins.
///
/// With `sim_index`, the values of that Monte Carlo replicate are used,
/// falling back to the point values. Unset parameters take their defaults.
pub fn assemble_param_vector(
    spins: &[Spin],
    r20_keys: &[R20Key],
    sim_index: Option<usize>,
) -> Result<Array1<f64>> {
    let values: Vec<f64> = loop_parameters(spins, r20_keys)?
        .map(|entry| {
            stored_value(spins, &entry, sim_index)
                .or_else(|| sim_index.and_then(|_| stored_value(spins, &entry, None)))
                .unwrap_or_else(|| default_value(spins, &entry))
        })
        .collect();
    Ok(Array1::from(values))
}

/// The values already stored for each vector element, without defaults.
///
/// A grid search pins the elements that are `Some`.
pub fn preset_values(
    spins: &[Spin],
    r20_keys: &[R20Key],
    sim_index: Option<usize>,
) -> Result<Vec<Option<f64>>> {
    Ok(loop_parameters(spins, r20_keys)?
        .map(|entry| stored_value(spins, &entry, sim_index))
        .collect())
}

/// Write a parameter vector back onto the spins.
///
/// Global values are written to every selected spin of the cluster. With
/// `sim_index` the values go into the replicate stores.
pub fn disassemble_param_vector(
    spins: &mut [Spin],
    r20_keys: &[R20Key],
    params: &Array1<f64>,
    sim_index: Option<usize>,
) -> Result<()> {
    let entries: Vec<ParamEntry> = loop_parameters(spins, r20_keys)?.collect();
    if entries.len() != params.len() {
        return Err(RelaxError::DimensionMismatch(format!(
            "Expected {} parameters, got {}",
            entries.len(),
            params.len()
        )));
    }

    for entry in &entries {
        let value = params[entry.index];
        let key = entry.key();
        let targets: Vec<usize> = match entry.spin_index {
            Some(s) => vec![s],
            None => (0..spins.len()).filter(|&s| spins[s].select).collect(),
        };
        for s in targets {
            let spin = &mut spins[s];
            match sim_index {
                Some(i) => spin.sims.insert(key, i, value),
                None => spin.values.set_key(key, value),
            }
        }
    }
    Ok(())
}

/// Diagonal scaling of the vector: the optimiser works on `value / scaling`.
pub fn scaling_vector(spins: &[Spin], r20_keys: &[R20Key]) -> Result<Array1<f64>> {
    let values: Vec<f64> = loop_parameters(spins, r20_keys)?
        .map(|entry| match entry.name {
            ParamName::I0 => entry
                .spin_index
                .and_then(|s| spins.get(s))
                .and_then(max_intensity)
                .unwrap_or(1.0),
            name => name.scaling(),
        })
        .collect();
    Ok(Array1::from(values))
}

/// Grid search bounds `(lower, upper)` of each vector element, in physical units.
pub fn grid_bounds(spins: &[Spin], r20_keys: &[R20Key]) -> Result<Vec<(f64, f64)>> {
    let model = cluster_model(spins)?;
    let bounds = loop_parameters(spins, r20_keys)?
        .map(|entry| {
            let (lower, upper) = match model {
                Some(m) => m.grid_bounds(entry.name),
                None => entry.name.grid_bounds(),
            };
            match entry.name {
                // Intensities scale with the spectrum.
                ParamName::I0 => {
                    let scale = entry
                        .spin_index
                        .and_then(|s| spins.get(s))
                        .and_then(max_intensity)
                        .unwrap_or(1.0);
                    (lower * scale, upper * 1.5 * scale)
                }
                _ => (lower, upper),
            }
        })
        .collect();
    Ok(bounds)
}

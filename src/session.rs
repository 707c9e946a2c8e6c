//! Named data pipes.
//!
//! A [`Session`] owns a set of named [`Pipe`]s, each holding the spins of one
//! analysis (typically one model). Nothing is global: callers pass the pipe
//! they work on explicitly.

use crate::error::{RelaxError, Result};
use crate::experiment::R20Key;
use crate::models::ModelId;
use crate::spin::Spin;
use std::collections::{BTreeMap, BTreeSet};

/// The spins of one analysis, grouped into clusters.
#[derive(Debug, Clone, Default)]
pub struct Pipe {
    name: String,
    pub spins: Vec<Spin>,
    /// Spin indices of each cluster. A spin belongs to at most one cluster.
    clusters: Vec<Vec<usize>>,
}

impl Pipe {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spins: Vec::new(),
            clusters: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A copy of this pipe under another name.
    pub fn clone_as(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Add a spin, returning its index.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if a spin with the same id is already present.
    pub fn add_spin(&mut self, spin: Spin) -> Result<usize> {
        if self.spin_index(&spin.id).is_some() {
            return Err(RelaxError::InvalidParameter(format!(
                "Spin '{}' already exists in pipe '{}'",
                spin.id, self.name
            )));
        }
        self.spins.push(spin);
        Ok(self.spins.len() - 1)
    }

    pub fn spin_index(&self, id: &str) -> Option<usize> {
        self.spins.iter().position(|s| s.id == id)
    }

    pub fn spin(&self, id: &str) -> Option<&Spin> {
        self.spins.iter().find(|s| s.id == id)
    }

    pub fn spin_mut(&mut self, id: &str) -> Option<&mut Spin> {
        self.spins.iter_mut().find(|s| s.id == id)
    }

    /// Group spins into a cluster optimised jointly.
    ///
    /// The spins are removed from any cluster they belonged to before, and
    /// clusters left empty are dropped.
    pub fn cluster(&mut self, ids: &[&str]) -> Result<()> {
        let mut members = Vec::with_capacity(ids.len());
        for id in ids {
            let index = self.spin_index(id).ok_or_else(|| {
                RelaxError::InvalidParameter(format!(
                    "Spin '{}' does not exist in pipe '{}'",
                    id, self.name
                ))
            })?;
            if !members.contains(&index) {
                members.push(index);
            }
        }
        if members.is_empty() {
            return Ok(());
        }
        for cluster in self.clusters.iter_mut() {
            cluster.retain(|i| !members.contains(i));
        }
        self.clusters.retain(|c| !c.is_empty());
        self.clusters.push(members);
        Ok(())
    }

    /// Release all spins from their clusters.
    pub fn uncluster(&mut self) {
        self.clusters.clear();
    }

    /// The units of optimisation: every cluster, plus every free spin on
    /// its own, ordered by their first spin.
    pub fn cluster_units(&self) -> Vec<Vec<usize>> {
        let clustered: BTreeSet<usize> = self.clusters.iter().flatten().copied().collect();
        let mut units: Vec<Vec<usize>> = self.clusters.clone();
        units.extend(
            (0..self.spins.len())
                .filter(|i| !clustered.contains(i))
                .map(|i| vec![i]),
        );
        units.sort_by_key(|u| u.iter().min().copied().unwrap_or(usize::MAX));
        units
    }

    /// Copies of the spins of a unit, in unit order.
    pub fn unit_spins(&self, unit: &[usize]) -> Vec<Spin> {
        unit.iter().filter_map(|&i| self.spins.get(i).cloned()).collect()
    }

    /// Write the spins of a unit back, the inverse of [`Pipe::unit_spins`].
    pub fn store_unit(&mut self, unit: &[usize], spins: Vec<Spin>) -> Result<()> {
        if unit.len() != spins.len() {
            return Err(RelaxError::DimensionMismatch(format!(
                "{} spins returned for a unit of {}",
                spins.len(),
                unit.len()
            )));
        }
        for (&i, spin) in unit.iter().zip(spins) {
            match self.spins.get_mut(i) {
                Some(slot) => *slot = spin,
                None => {
                    return Err(RelaxError::InvalidParameter(format!(
                        "Spin index {} out of range",
                        i
                    )))
                }
            }
        }
        Ok(())
    }

    /// The sorted set of distinct R20 keys over the pipe's dispersion data.
    pub fn r20_keys(&self) -> Vec<R20Key> {
        self.spins
            .iter()
            .flat_map(|s| s.r20_keys())
            .collect::<BTreeSet<R20Key>>()
            .into_iter()
            .collect()
    }

    /// Set the model of every spin.
    pub fn set_model(&mut self, model: ModelId) {
        for spin in self.spins.iter_mut() {
            spin.model = Some(model);
        }
    }

    /// Observations consumed by the fits of the selected spins.
    pub fn count_observations(&self) -> usize {
        self.spins
            .iter()
            .filter(|s| s.select)
            .map(Spin::n_observations)
            .sum()
    }

    /// The model shared by the selected spins, if any.
    pub fn model(&self) -> Option<ModelId> {
        self.spins.iter().filter(|s| s.select).find_map(|s| s.model)
    }
}

/// A collection of named data pipes.
///
/// # Examples
///
/// ```
/// use relaxopt_rs::session::Session;
///
/// let mut session = Session::new();
/// session.create_pipe("CR72").unwrap();
/// session.copy_pipe("CR72", "final").unwrap();
/// assert_eq!(session.pipe_names(), vec!["CR72", "final"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Session {
    pipes: BTreeMap<String, Pipe>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty pipe.
    pub fn create_pipe(&mut self, name: &str) -> Result<&mut Pipe> {
        if self.pipes.contains_key(name) {
            return Err(RelaxError::PipeExists(name.to_string()));
        }
        Ok(self
            .pipes
            .entry(name.to_string())
            .or_insert_with(|| Pipe::new(name)))
    }

    /// Insert a pipe built elsewhere under its own name.
    pub fn insert_pipe(&mut self, pipe: Pipe) -> Result<()> {
        if self.pipes.contains_key(pipe.name()) {
            return Err(RelaxError::PipeExists(pipe.name().to_string()));
        }
        self.pipes.insert(pipe.name().to_string(), pipe);
        Ok(())
    }

    pub fn pipe(&self, name: &str) -> Result<&Pipe> {
        self.pipes
            .get(name)
            .ok_or_else(|| RelaxError::PipeNotFound(name.to_string()))
    }

    pub fn pipe_mut(&mut self, name: &str) -> Result<&mut Pipe> {
        self.pipes
            .get_mut(name)
            .ok_or_else(|| RelaxError::PipeNotFound(name.to_string()))
    }

    /// Copy the contents of pipe `from` into a new pipe `to`.
    pub fn copy_pipe(&mut self, from: &str, to: &str) -> Result<&mut Pipe> {
        if self.pipes.contains_key(to) {
            return Err(RelaxError::PipeExists(to.to_string()));
        }
        let copy = self.pipe(from)?.clone_as(to);
        Ok(self.pipes.entry(to.to_string()).or_insert(copy))
    }

    pub fn delete_pipe(&mut self, name: &str) -> Result<Pipe> {
        self.pipes
            .remove(name)
            .ok_or_else(|| RelaxError::PipeNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pipes.contains_key(name)
    }

    /// Pipe names in sorted order.
    pub fn pipe_names(&self) -> Vec<&str> {
        self.pipes.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{DispersionPoint, ExpType};

    fn pipe() -> Pipe {
        let mut pipe = Pipe::new("test");
        for id in [":1@N", ":2@N", ":3@N", ":4@N"] {
            pipe.add_spin(Spin::new(id)).unwrap();
        }
        pipe
    }

    #[test]
    fn test_duplicate_spin_rejected() {
        let mut pipe = pipe();
        assert!(pipe.add_spin(Spin::new(":2@N")).is_err());
    }

    #[test]
    fn test_cluster_units() {
        let mut pipe = pipe();
        pipe.cluster(&[":2@N", ":4@N"]).unwrap();
        assert_eq!(pipe.cluster_units(), vec![vec![0], vec![1, 3], vec![2]]);

        // Reclustering moves spins out of their old cluster.
        pipe.cluster(&[":4@N", ":3@N"]).unwrap();
        assert_eq!(pipe.cluster_units(), vec![vec![0], vec![1], vec![3, 2]]);

        assert!(pipe.cluster(&[":9@N"]).is_err());
        pipe.uncluster();
        assert_eq!(pipe.cluster_units().len(), 4);
    }

    #[test]
    fn test_r20_keys_pipe_wide() {
        let mut pipe = pipe();
        pipe.spins[0].add_dispersion(DispersionPoint::cpmg(800e6, 100.0, 0.04), 10.0, 0.5);
        pipe.spins[2].add_dispersion(DispersionPoint::cpmg(600e6, 100.0, 0.04), 10.0, 0.5);
        pipe.spins[2].add_dispersion(DispersionPoint::cpmg(800e6, 200.0, 0.04), 10.0, 0.5);
        let keys = pipe.r20_keys();
        assert_eq!(
            keys,
            vec![
                R20Key::new(ExpType::Cpmg, 600e6),
                R20Key::new(ExpType::Cpmg, 800e6)
            ]
        );
    }

    #[test]
    fn test_count_observations_skips_deselected() {
        let mut pipe = pipe();
        pipe.set_model(ModelId::Cr72);
        for spin in pipe.spins.iter_mut() {
            spin.add_dispersion(DispersionPoint::cpmg(600e6, 100.0, 0.04), 10.0, 0.5);
        }
        pipe.spins[1].select = false;
        assert_eq!(pipe.count_observations(), 3);
        assert_eq!(pipe.model(), Some(ModelId::Cr72));
    }

    #[test]
    fn test_unit_round_trip() {
        let mut pipe = pipe();
        let mut spins = pipe.unit_spins(&[3, 1]);
        spins[0].select = false;
        pipe.store_unit(&[3, 1], spins).unwrap();
        assert!(!pipe.spins[3].select);
        assert!(pipe.spins[1].select);
        assert!(pipe.store_unit(&[0], Vec::new()).is_err());
    }

    #[test]
    fn test_session_pipes() {
        let mut session = Session::new();
        session.create_pipe("a").unwrap().add_spin(Spin::new(":1")).unwrap();
        assert!(matches!(
            session.create_pipe("a"),
            Err(RelaxError::PipeExists(_))
        ));
        session.copy_pipe("a", "b").unwrap();
        assert_eq!(session.pipe("b").unwrap().spins.len(), 1);
        assert_eq!(session.pipe("b").unwrap().name(), "b");
        assert!(matches!(
            session.copy_pipe("missing", "c"),
            Err(RelaxError::PipeNotFound(_))
        ));
        session.delete_pipe("a").unwrap();
        assert_eq!(session.pipe_names(), vec!["b"]);
        assert!(session.pipe_mut("a").is_err());
    }
}

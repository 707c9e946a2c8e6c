//! # Monte Carlo error propagation
//!
//! The parameter errors of a pipe are estimated by refitting many
//! resampled copies of its data:
//!
//! 1. [`setup`] allocates `n` replicate slots for every fitted parameter.
//! 2. [`create_data`] draws `n` replicate values for every observation.
//! 3. [`run`] refits every unit once per replicate, storing the result in
//!    slot `i` of the spin's replicate store.
//! 4. [`error_analysis`] sets each error to the standard deviation
//!    (`dof = 1`) of the replicate values.
//!
//! Replicate `i` draws from its own generator, seeded with `seed + i`, so
//! the data do not depend on thread scheduling. Replicates whose fit fails
//! are deselected and excluded from the error analysis.

use crate::error::{RelaxError, Result};
use crate::experiment::R20Key;
use crate::optimise::{check_cancel, fit_cluster, store_outcome, CancelToken, MinimiseConfig};
use crate::parameters::{assemble_param_vector, ParamLayout};
use crate::progress::{Progress, ProgressReporter};
use crate::session::Pipe;
use crate::spin::{ParamKey, Spin};
use crate::statistics;
use crate::target::ClusterTarget;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, instrument, warn};

/// How the replicate data are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResampleMethod {
    /// Gaussian noise with the observation's error around the measured value.
    Gaussian,
    /// Gaussian noise around the value back-calculated from the fitted model.
    #[default]
    BackCalculated,
    /// Draw from the repeated measurements of an observation; observations
    /// without repeats fall back to Gaussian noise.
    Bootstrap,
}

/// How each replicate is refitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum McMode {
    /// A full grid search followed by the local minimiser.
    GridAndLocal,
    /// The local minimiser only, starting from the point estimate.
    #[default]
    LocalOnly,
}

/// Monte Carlo settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonteCarloConfig {
    /// Number of replicates. Default: 500
    pub n_sims: usize,
    /// Base seed; replicate `i` uses `seed + i`. Default: 0
    pub seed: u64,
    pub method: ResampleMethod,
    pub mode: McMode,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            n_sims: 500,
            seed: 0,
            method: ResampleMethod::default(),
            mode: McMode::default(),
        }
    }
}

impl MonteCarloConfig {
    pub fn with_n_sims(mut self, n_sims: usize) -> Self {
        self.n_sims = n_sims;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_method(mut self, method: ResampleMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_mode(mut self, mode: McMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_sims == 0 {
            return Err(RelaxError::InvalidConfig(
                "Monte Carlo needs at least one replicate".to_string(),
            ));
        }
        Ok(())
    }

    /// The settings each replicate fit runs with.
    pub fn replicate_config(&self, config: &MinimiseConfig) -> MinimiseConfig {
        match self.mode {
            McMode::GridAndLocal => config.clone(),
            McMode::LocalOnly => config.clone().with_grid(None),
        }
    }
}

/// A replicate fit that failed.
#[derive(Debug)]
pub struct ReplicateFailure {
    pub index: usize,
    /// Ids of the unit's spins.
    pub spins: Vec<String>,
    pub error: RelaxError,
}

/// Summary of [`run`].
#[derive(Debug, Default)]
pub struct McReport {
    /// Replicate fits attempted, over all units.
    pub fits: usize,
    pub failures: Vec<ReplicateFailure>,
}

fn selected_units(pipe: &Pipe) -> Vec<Vec<usize>> {
    pipe.cluster_units()
        .into_iter()
        .filter(|unit| unit.iter().any(|&i| pipe.spins[i].select))
        .collect()
}

/// Allocate `n_sims` replicate slots on every selected spin.
///
/// Slots are created for each parameter of the spin's unit, the replicate
/// chi-squared values are reset to NaN and all replicates are selected.
///
/// # Errors
///
/// `InvalidParameter` for exponential pipes, whose errors come from the
/// covariance of the curve fits.
pub fn setup(pipe: &mut Pipe, n_sims: usize) -> Result<()> {
    if pipe.model().map_or(false, |m| m.is_exponential()) {
        return Err(RelaxError::InvalidParameter(
            "Exponential curve errors come from the covariance matrix, not Monte Carlo".to_string(),
        ));
    }
    let r20_keys = pipe.r20_keys();
    for unit in selected_units(pipe) {
        let spins = pipe.unit_spins(&unit);
        let layout = ParamLayout::new(&spins, &r20_keys)?;
        for entry in layout.entries() {
            let key = entry.key();
            let targets: Vec<usize> = match entry.spin_index {
                Some(s) => vec![unit[s]],
                None => unit
                    .iter()
                    .copied()
                    .filter(|&i| pipe.spins[i].select)
                    .collect(),
            };
            for i in targets {
                pipe.spins[i].sims.allocate(key, n_sims);
            }
        }
    }
    for spin in pipe.spins.iter_mut().filter(|s| s.select) {
        spin.chi2_sim = vec![f64::NAN; n_sims];
        spin.select_sim = vec![true; n_sims];
        for obs in spin.observations.iter_mut() {
            obs.sims.clear();
        }
    }
    Ok(())
}

/// One observation to resample.
struct Draw {
    spin: usize,
    obs: usize,
    centre: f64,
    normal: Normal<f64>,
    replicates: Vec<f64>,
}

/// The back-calculated value of each observation of a unit, keyed by
/// `(pipe spin index, observation index)`.
fn back_calculated(
    pipe: &Pipe,
    unit: &[usize],
    r20_keys: &[R20Key],
) -> Result<HashMap<(usize, usize), f64>> {
    let spins = pipe.unit_spins(unit);
    let target = ClusterTarget::new(&spins, r20_keys, None)?;
    let params = assemble_param_vector(&spins, r20_keys, None)?;
    let values = target.back_calc(&params)?;
    Ok(target
        .observation_map()
        .iter()
        .zip(values.iter())
        .map(|(&(s, o), &v)| ((unit[s], o), v))
        .collect())
}

/// Draw the replicate data of every observation of the selected spins.
///
/// The back-calculated method needs fitted values on the spins; observations
/// the model does not fit keep their measured value as the centre.
#[instrument(skip_all, fields(n_sims = config.n_sims, method = ?config.method))]
pub fn create_data(pipe: &mut Pipe, config: &MonteCarloConfig) -> Result<()> {
    config.validate()?;
    let r20_keys = pipe.r20_keys();
    let mut centres: HashMap<(usize, usize), f64> = HashMap::new();
    if config.method == ResampleMethod::BackCalculated {
        for unit in selected_units(pipe) {
            centres.extend(back_calculated(pipe, &unit, &r20_keys)?);
        }
    }

    let mut draws = Vec::new();
    for (s, spin) in pipe.spins.iter().enumerate().filter(|(_, s)| s.select) {
        for (o, obs) in spin.observations.iter().enumerate() {
            let centre = centres.get(&(s, o)).copied().unwrap_or(obs.value);
            let normal = Normal::new(0.0, obs.error).map_err(|_| {
                RelaxError::InvalidParameter(format!(
                    "Error {} of observation {} of spin '{}' cannot be used for resampling",
                    obs.error, o, spin.id
                ))
            })?;
            let replicates = match config.method {
                ResampleMethod::Bootstrap => obs.replicates.clone(),
                _ => Vec::new(),
            };
            draws.push(Draw {
                spin: s,
                obs: o,
                centre,
                normal,
                replicates,
            });
        }
    }

    let values: Vec<Vec<f64>> = (0..config.n_sims)
        .into_par_iter()
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(i as u64));
            draws
                .iter()
                .map(|d| {
                    if d.replicates.is_empty() {
                        d.centre + d.normal.sample(&mut rng)
                    } else {
                        d.replicates[rng.gen_range(0..d.replicates.len())]
                    }
                })
                .collect()
        })
        .collect();

    for (k, draw) in draws.iter().enumerate() {
        pipe.spins[draw.spin].observations[draw.obs].sims = values.iter().map(|v| v[k]).collect();
    }
    Ok(())
}

/// Refit every selected unit once per replicate.
///
/// Fits run in parallel over all `(replicate, unit)` pairs on snapshots of
/// the units. A failed replicate is recorded, deselected on the unit's spins
/// and the batch continues; cancellation aborts without storing anything.
#[instrument(skip_all, fields(pipe = pipe.name(), n_sims = config.n_sims))]
pub fn run(
    pipe: &mut Pipe,
    config: &MonteCarloConfig,
    minimise: &MinimiseConfig,
    cancel: Option<&CancelToken>,
    progress: Option<&ProgressReporter>,
) -> Result<McReport> {
    config.validate()?;
    let n_sims = config.n_sims;
    let fit_config = config.replicate_config(minimise);
    fit_config.validate()?;
    let r20_keys = pipe.r20_keys();
    let units = selected_units(pipe);
    for unit in &units {
        for &i in unit {
            let spin = &pipe.spins[i];
            if spin.select && spin.select_sim.len() != n_sims {
                return Err(RelaxError::InvalidConfig(format!(
                    "Spin '{}' has {} replicate slots for {} replicates; run the setup first",
                    spin.id,
                    spin.select_sim.len(),
                    n_sims
                )));
            }
        }
    }
    let mut snapshots: Vec<Vec<Spin>> = units.iter().map(|u| pipe.unit_spins(u)).collect();

    info!(units = units.len(), "Monte Carlo simulations");
    let report = |event| {
        if let Some(p) = progress {
            p.report(event);
        }
    };
    report(Progress::PhaseStart {
        name: "monte carlo",
    });
    report(Progress::TaskStart {
        total_steps: (n_sims * units.len()) as u64,
    });

    let n_units = units.len();
    let shared = &snapshots;
    let results: Vec<(usize, usize, Result<_>)> = (0..n_sims * n_units)
        .into_par_iter()
        .map(|task| {
            let (index, u) = (task / n_units, task % n_units);
            let result = check_cancel(cancel)
                .and_then(|_| fit_cluster(&shared[u], &r20_keys, Some(index), &fit_config, cancel));
            report(Progress::TaskIncrement);
            (index, u, result)
        })
        .collect();

    if results
        .iter()
        .any(|(_, _, r)| matches!(r, Err(RelaxError::Cancelled)))
    {
        warn!("Monte Carlo simulations cancelled");
        return Err(RelaxError::Cancelled);
    }

    let mut mc = McReport {
        fits: results.len(),
        failures: Vec::new(),
    };
    for (index, u, result) in results {
        let spins = &mut snapshots[u];
        match result {
            Ok(outcome) => store_outcome(spins, &r20_keys, &outcome, Some(index))?,
            Err(error) => {
                let ids: Vec<String> = spins.iter().map(|s| s.id.clone()).collect();
                warn!(index, spins = ?ids, %error, "Replicate failed");
                for spin in spins.iter_mut() {
                    if let Some(selected) = spin.select_sim.get_mut(index) {
                        *selected = false;
                    }
                }
                mc.failures.push(ReplicateFailure {
                    index,
                    spins: ids,
                    error,
                });
            }
        }
    }
    for (unit, spins) in units.iter().zip(snapshots) {
        pipe.store_unit(unit, spins)?;
    }

    report(Progress::TaskFinish);
    report(Progress::PhaseFinish);
    info!(
        fits = mc.fits,
        failed = mc.failures.len(),
        "Monte Carlo simulations finished"
    );
    Ok(mc)
}

/// Set the error of every simulated parameter of the selected spins to the
/// standard deviation of its selected replicate values.
pub fn error_analysis(pipe: &mut Pipe) {
    for spin in pipe.spins.iter_mut().filter(|s| s.select) {
        let keys: Vec<ParamKey> = spin.sims.keys().copied().collect();
        for key in keys {
            let err = match spin.sims.values(&key) {
                Some(values) => {
                    let skip: Vec<bool> = values
                        .iter()
                        .enumerate()
                        .map(|(i, v)| !spin.sim_selected(i) || v.is_nan())
                        .collect();
                    statistics::std(values, Some(&skip), 1)
                }
                None => continue,
            };
            spin.errors.set_key(key, err);
        }
    }
}

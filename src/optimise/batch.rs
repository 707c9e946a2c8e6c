//! Parallel minimisation of every cluster of a pipe.

use super::{
    check_cancel, fit_cluster_tracked, minimise_cluster, store_failure, store_outcome,
    CancelToken, FitOutcome, FitState, MinimiseConfig,
};
use crate::error::{RelaxError, Result};
use crate::experiment::R20Key;
use crate::parameters::cluster_model;
use crate::progress::{Progress, ProgressReporter};
use crate::session::Pipe;
use crate::spin::Spin;
use rayon::prelude::*;
use tracing::{info, instrument, warn};

/// A unit whose fit failed.
#[derive(Debug)]
pub struct UnitFailure {
    /// Ids of the unit's spins.
    pub spins: Vec<String>,
    /// The state the fit was in when it failed.
    pub state: FitState,
    pub error: RelaxError,
}

/// Summary of a pipe-wide minimisation.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Units fitted successfully.
    pub fitted: usize,
    /// Sum of the chi-squared values of the fitted units.
    pub chi2: f64,
    pub failures: Vec<UnitFailure>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

fn run_unit(
    spins: &mut [Spin],
    r20_keys: &[R20Key],
    config: &MinimiseConfig,
    cancel: Option<&CancelToken>,
    state: &mut FitState,
) -> Result<FitOutcome> {
    check_cancel(cancel)?;
    if matches!(cluster_model(spins), Ok(Some(model)) if model.is_exponential()) {
        let result = minimise_cluster(spins, r20_keys, None, config, cancel);
        *state = if result.is_ok() {
            FitState::Converged
        } else {
            FitState::Failed
        };
        return result;
    }
    match fit_cluster_tracked(spins, r20_keys, None, config, cancel, state) {
        Ok(outcome) => {
            store_outcome(spins, r20_keys, &outcome, None)?;
            Ok(outcome)
        }
        Err(e) => {
            store_failure(spins, &e);
            Err(e)
        }
    }
}

/// Minimise every unit of a pipe, writing the results onto its spins.
///
/// Units are fitted in parallel on copies of their spins. A unit that fails
/// is recorded in the report and the batch continues; cancellation aborts
/// the whole batch without storing anything.
#[instrument(skip_all, fields(pipe = pipe.name()))]
pub fn minimise_pipe(
    pipe: &mut Pipe,
    config: &MinimiseConfig,
    cancel: Option<&CancelToken>,
    progress: Option<&ProgressReporter>,
) -> Result<BatchReport> {
    config.validate()?;
    let r20_keys = pipe.r20_keys();
    let units: Vec<Vec<usize>> = pipe
        .cluster_units()
        .into_iter()
        .filter(|unit| unit.iter().any(|&i| pipe.spins[i].select))
        .collect();
    info!(units = units.len(), "Minimising");
    let report = |event| {
        if let Some(p) = progress {
            p.report(event);
        }
    };
    report(Progress::PhaseStart { name: "minimise" });
    report(Progress::TaskStart {
        total_steps: units.len() as u64,
    });

    let pipe_ref: &Pipe = pipe;
    let results: Vec<(Vec<Spin>, FitState, Result<FitOutcome>)> = units
        .par_iter()
        .map(|unit| {
            let mut spins = pipe_ref.unit_spins(unit);
            let mut state = FitState::Init;
            let result = run_unit(&mut spins, &r20_keys, config, cancel, &mut state);
            report(Progress::TaskIncrement);
            (spins, state, result)
        })
        .collect();

    if results
        .iter()
        .any(|(_, _, r)| matches!(r, Err(RelaxError::Cancelled)))
    {
        warn!("Minimisation cancelled");
        return Err(RelaxError::Cancelled);
    }

    let mut batch = BatchReport::default();
    for (unit, (spins, state, result)) in units.iter().zip(results) {
        match result {
            Ok(outcome) => {
                batch.fitted += 1;
                batch.chi2 += outcome.chi2;
            }
            Err(error) => {
                let ids: Vec<String> = spins.iter().map(|s| s.id.clone()).collect();
                warn!(spins = ?ids, %state, %error, "Unit failed");
                batch.failures.push(UnitFailure {
                    spins: ids,
                    state,
                    error,
                });
            }
        }
        pipe.store_unit(unit, spins)?;
    }

    report(Progress::TaskFinish);
    report(Progress::PhaseFinish);
    info!(
        fitted = batch.fitted,
        failed = batch.failures.len(),
        chi2 = batch.chi2,
        "Minimisation finished"
    );
    Ok(batch)
}

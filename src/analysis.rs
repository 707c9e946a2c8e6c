//! # Automatic analysis
//!
//! [`run_analysis`] chains the building blocks of the crate into the usual
//! dispersion protocol:
//!
//! 1. Every model of [`AnalysisConfig::models`] gets its own pipe, copied
//!    from the base pipe (or from the `R2eff` pipe once the exponential
//!    curves have been fitted).
//! 2. Exchange models skip spins whose dispersion profile is flat, i.e. no
//!    R2eff range exceeds the insignificance threshold.
//! 3. With nesting on, a model starts from the values of the earlier fitted
//!    model sharing most of its parameters; the grid only searches the
//!    parameters that could not be transferred.
//! 4. All clusters of each pipe are minimised in parallel.
//! 5. The best model per cluster is copied into the final pipe and, if
//!    replicates are requested, its errors come from Monte Carlo.

use crate::error::{RelaxError, Result};
use crate::grid::GridConfig;
use crate::lm::{LmConfig, SimplexConfig};
use crate::model_selection::{select_model, Criterion, SelectionReport};
use crate::models::ModelId;
use crate::monte_carlo::{self, McMode, McReport, MonteCarloConfig, ResampleMethod};
use crate::optimise::{minimise_pipe, Algorithm, BatchReport, CancelToken, MinimiseConfig};
use crate::parameters::ParamName;
use crate::progress::{Progress, ProgressReporter};
use crate::session::{Pipe, Session};
use crate::spin::Spin;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

/// Settings of a complete analysis.
///
/// # Examples
///
/// ```
/// use relaxopt_rs::analysis::AnalysisConfig;
///
/// let config = AnalysisConfig::from_json(r#"{"models": ["No Rex", "CR72"], "mc_sims": 100}"#).unwrap();
/// assert_eq!(config.models.len(), 2);
/// assert_eq!(config.grid_increments, Some(21));
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Pipe holding the data. Default: "base"
    pub base_pipe: String,
    /// Pipe receiving the selected models. Default: "final"
    pub final_pipe: String,
    /// Catalogue keys of the models, fitted in this order.
    pub models: Vec<String>,
    /// Grid increments per parameter; `None` skips the grid. Default: Some(21)
    pub grid_increments: Option<usize>,
    pub sobol_max_points: Option<usize>,
    pub sobol_seed: u32,
    /// Start models from the values of a simpler fitted model. Default: true
    pub nesting: bool,
    /// R2eff range below which a spin shows no exchange. Default: 0.0
    pub insignificance: f64,
    pub algorithm: Algorithm,
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    pub max_iterations: usize,
    pub constraints: bool,
    /// Monte Carlo replicates of the final pipe; zero skips the error analysis.
    pub mc_sims: usize,
    pub mc_mode: McMode,
    pub mc_method: ResampleMethod,
    pub mc_seed: u64,
    pub criterion: Criterion,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let lm = LmConfig::default();
        Self {
            base_pipe: "base".to_string(),
            final_pipe: "final".to_string(),
            models: vec!["No Rex".to_string(), "CR72".to_string()],
            grid_increments: Some(21),
            sobol_max_points: None,
            sobol_seed: 0,
            nesting: true,
            insignificance: 0.0,
            algorithm: Algorithm::default(),
            ftol: lm.ftol,
            xtol: lm.xtol,
            gtol: lm.gtol,
            max_iterations: lm.max_iterations,
            constraints: true,
            mc_sims: 500,
            mc_mode: McMode::default(),
            mc_method: ResampleMethod::default(),
            mc_seed: 0,
            criterion: Criterion::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_grid_increments(mut self, increments: Option<usize>) -> Self {
        self.grid_increments = increments;
        self
    }

    pub fn with_mc_sims(mut self, n_sims: usize) -> Self {
        self.mc_sims = n_sims;
        self
    }

    pub fn with_nesting(mut self, nesting: bool) -> Self {
        self.nesting = nesting;
        self
    }

    pub fn with_insignificance(mut self, threshold: f64) -> Self {
        self.insignificance = threshold;
        self
    }

    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// The parsed models.
    pub fn model_ids(&self) -> Result<Vec<ModelId>> {
        self.models.iter().map(|m| ModelId::parse(m)).collect()
    }

    pub fn validate(&self) -> Result<()> {
        let models = self.model_ids()?;
        if models.is_empty() {
            return Err(RelaxError::InvalidConfig("No models to analyse".to_string()));
        }
        if models.iter().all(|m| m.is_exponential()) {
            return Err(RelaxError::InvalidConfig(
                "At least one model besides R2eff is needed".to_string(),
            ));
        }
        for (i, model) in models.iter().enumerate() {
            if models[..i].contains(model) {
                return Err(RelaxError::InvalidConfig(format!(
                    "Model '{}' listed twice",
                    model.name()
                )));
            }
        }
        if self.base_pipe == self.final_pipe {
            return Err(RelaxError::InvalidConfig(
                "The base and final pipes must differ".to_string(),
            ));
        }
        if self.insignificance.is_nan() || self.insignificance < 0.0 {
            return Err(RelaxError::InvalidConfig(format!(
                "Insignificance threshold must be non-negative, got {}",
                self.insignificance
            )));
        }
        self.minimise_config().validate()?;
        if self.mc_sims > 0 {
            self.monte_carlo_config().validate()?;
        }
        Ok(())
    }

    /// The settings of each pipe's minimisation.
    pub fn minimise_config(&self) -> MinimiseConfig {
        let lm = LmConfig::default()
            .with_max_iterations(self.max_iterations)
            .with_ftol(self.ftol)
            .with_xtol(self.xtol)
            .with_gtol(self.gtol);
        let simplex = SimplexConfig::default()
            .with_max_iterations(self.max_iterations)
            .with_ftol(self.ftol)
            .with_xtol(self.xtol);
        let grid = self.grid_increments.map(|increments| {
            let grid = GridConfig::default().with_increments(increments);
            match self.sobol_max_points {
                Some(max_points) => grid.with_sobol(max_points, self.sobol_seed),
                None => grid,
            }
        });
        MinimiseConfig::default()
            .with_algorithm(self.algorithm)
            .with_lm(lm)
            .with_simplex(simplex)
            .with_grid(grid)
            .with_constraints(self.constraints)
    }

    pub fn monte_carlo_config(&self) -> MonteCarloConfig {
        MonteCarloConfig::default()
            .with_n_sims(self.mc_sims)
            .with_seed(self.mc_seed)
            .with_method(self.mc_method)
            .with_mode(self.mc_mode)
    }
}

/// The fit of one model's pipe.
#[derive(Debug)]
pub struct ModelReport {
    pub model: ModelId,
    pub pipe: String,
    /// The model whose values the fit started from.
    pub nested_from: Option<ModelId>,
    pub batch: BatchReport,
}

/// Summary of [`run_analysis`].
#[derive(Debug, Default)]
pub struct AnalysisReport {
    pub models: Vec<ModelReport>,
    /// Spins skipped by the exchange models.
    pub insignificant: Vec<String>,
    pub selection: SelectionReport,
    pub monte_carlo: Option<McReport>,
    pub final_pipe: String,
}

/// Whether no R2eff range of the spin exceeds `threshold`.
///
/// Spins without dispersion data are never insignificant.
pub fn is_insignificant(spin: &Spin, threshold: f64) -> bool {
    let mut ranges: BTreeMap<_, (f64, f64)> = BTreeMap::new();
    for (point, obs) in spin.dispersion_observations() {
        let range = ranges
            .entry(point.r20_key())
            .or_insert((f64::INFINITY, f64::NEG_INFINITY));
        range.0 = range.0.min(obs.value);
        range.1 = range.1.max(obs.value);
    }
    !ranges.is_empty() && ranges.values().all(|(lo, hi)| hi - lo <= threshold)
}

/// Whether a `source` fit can provide the starting value of `name`.
fn provides(source: ModelId, name: ParamName) -> bool {
    let params = source.params();
    params.contains(&name)
        || match name {
            ParamName::R2a | ParamName::R2b => params.contains(&ParamName::R2),
            ParamName::Tex => params.contains(&ParamName::Kex),
            ParamName::Kex => params.contains(&ParamName::Tex),
            _ => false,
        }
}

/// The earlier fitted model sharing most parameters with `model`.
///
/// Only models of the same experiment type qualify, and at least one
/// parameter besides the R20 rates must be shared. Ties keep the earlier
/// model.
pub fn nesting_source(model: ModelId, fitted: &[ModelId]) -> Option<ModelId> {
    if !model.has_exchange() {
        return None;
    }
    let mut best: Option<(ModelId, usize)> = None;
    for &source in fitted {
        if source == model || !source.is_dispersion() || source.exp_type() != model.exp_type() {
            continue;
        }
        let shared: Vec<ParamName> = model
            .params()
            .into_iter()
            .filter(|&p| provides(source, p))
            .collect();
        if !shared.iter().any(|p| !p.is_r20()) {
            continue;
        }
        if best.map_or(true, |(_, n)| shared.len() > n) {
            best = Some((source, shared.len()));
        }
    }
    best.map(|(source, _)| source)
}

/// Copy the fitted values of `source` usable as starting values of the
/// spin's model. Returns whether every parameter of the model was set.
pub fn nest_values(spin: &mut Spin, source: &Spin) -> bool {
    let Some(model) = spin.model else {
        return false;
    };
    let mut complete = true;
    let keys = spin.r20_keys();
    for name in model.params() {
        if name.is_r20() {
            let from = if source.values.iter().any(|(k, _)| k.name == name) {
                name
            } else {
                ParamName::R2
            };
            for key in &keys {
                match source.values.get(from, Some(*key)) {
                    Some(v) => spin.values.set(name, Some(*key), v),
                    None => complete = false,
                }
            }
            continue;
        }
        let value = source.values.get(name, None).or_else(|| match name {
            ParamName::Tex => source
                .values
                .get(ParamName::Kex, None)
                .filter(|&k| k > 0.0)
                .map(|k| 1.0 / k),
            ParamName::Kex => source
                .values
                .get(ParamName::Tex, None)
                .filter(|&t| t > 0.0)
                .map(|t| 1.0 / t),
            _ => None,
        });
        match value {
            Some(v) => spin.values.set(name, None, v),
            None => complete = false,
        }
    }
    complete
}

/// Prepare the pipe of one model from the data pipe.
fn model_pipe(data: &Pipe, model: ModelId, insignificance: f64, skipped: &mut Vec<String>) -> Pipe {
    let mut pipe = data.clone_as(model.name());
    pipe.set_model(model);
    for spin in pipe.spins.iter_mut() {
        spin.reset_results();
        if model.has_exchange() && spin.select && is_insignificant(spin, insignificance) {
            spin.select = false;
            if !skipped.contains(&spin.id) {
                warn!(spin = %spin.id, threshold = insignificance, "Insignificant dispersion, spin skipped");
                skipped.push(spin.id.clone());
            }
        }
    }
    pipe
}

/// Run the full analysis on the base pipe of `session`.
pub fn run_analysis(session: &mut Session, config: &AnalysisConfig) -> Result<AnalysisReport> {
    run_analysis_with(session, config, None, None)
}

/// [`run_analysis`] with cancellation and progress reporting.
#[instrument(skip_all, fields(base = %config.base_pipe))]
pub fn run_analysis_with(
    session: &mut Session,
    config: &AnalysisConfig,
    cancel: Option<&CancelToken>,
    progress: Option<&ProgressReporter>,
) -> Result<AnalysisReport> {
    config.validate()?;
    let models = config.model_ids()?;
    let minimise = config.minimise_config();
    let report_progress = |event| {
        if let Some(p) = progress {
            p.report(event);
        }
    };
    info!(models = ?config.models, "Starting analysis");

    let mut report = AnalysisReport {
        final_pipe: config.final_pipe.clone(),
        ..AnalysisReport::default()
    };
    let mut data_pipe = config.base_pipe.clone();
    let mut fitted: Vec<ModelId> = Vec::new();
    let mut candidates: Vec<String> = Vec::new();

    // The exponential curves come first; the other models use their R2eff.
    let ordered = models
        .iter()
        .filter(|m| m.is_exponential())
        .chain(models.iter().filter(|m| !m.is_exponential()));
    for &model in ordered {
        report_progress(Progress::Message(format!("Model {}", model.name())));
        let mut pipe = model_pipe(
            session.pipe(&data_pipe)?,
            model,
            config.insignificance,
            &mut report.insignificant,
        );

        let mut pipe_config = minimise.clone();
        let nested_from = if config.nesting {
            nesting_source(model, &fitted)
        } else {
            None
        };
        if let Some(source) = nested_from {
            let source_pipe = session.pipe(&source.name())?;
            let mut complete = true;
            for spin in pipe.spins.iter_mut().filter(|s| s.select) {
                match source_pipe.spin(&spin.id).filter(|s| s.fit.converged) {
                    Some(src) => complete &= nest_values(spin, src),
                    None => complete = false,
                }
            }
            info!(model = %model.name(), source = %source.name(), complete, "Nested starting values");
            if complete {
                pipe_config = pipe_config.with_grid(None);
            }
        }

        let batch = minimise_pipe(&mut pipe, &pipe_config, cancel, progress)?;
        session.insert_pipe(pipe)?;
        if model.is_exponential() {
            data_pipe = model.name();
        } else {
            candidates.push(model.name());
        }
        fitted.push(model);
        report.models.push(ModelReport {
            model,
            pipe: model.name(),
            nested_from,
            batch,
        });
    }

    let names: Vec<&str> = candidates.iter().map(String::as_str).collect();
    report.selection = select_model(session, &names, &config.final_pipe, config.criterion)?;

    if config.mc_sims > 0 {
        let mc = config.monte_carlo_config();
        let pipe = session.pipe_mut(&config.final_pipe)?;
        monte_carlo::setup(pipe, mc.n_sims)?;
        monte_carlo::create_data(pipe, &mc)?;
        let mc_report = monte_carlo::run(pipe, &mc, &minimise, cancel, progress)?;
        monte_carlo::error_analysis(pipe);
        report.monte_carlo = Some(mc_report);
    }

    info!(
        final_pipe = %config.final_pipe,
        selected = report.selection.selections.len(),
        insignificant = report.insignificant.len(),
        "Analysis finished"
    );
    Ok(report)
}

//! Grid search for starting points of the local minimisers.
//!
//! The grid is split into contiguous chunks with [`GridInfo::sub_divide`]
//! and the chunks are searched in parallel. Every chunk reports its lowest
//! (chi-squared, flat index) pair, so the combined minimum does not depend on
//! the number of chunks or on scheduling: ties go to the lowest flat index.
//! Grids too large to enumerate may instead be sampled with Sobol' points.

mod info;
mod sobol;

pub use info::{GridAxis, GridInfo, GridIter};
pub use sobol::{SobolPoints, MAX_SOBOL_DIMENSIONS};

use crate::error::{RelaxError, Result};
use crate::optimise::{check_cancel, CancelToken};
use crate::parameters::constraints::FEASIBILITY_TOL;
use crate::parameters::LinearConstraints;
use crate::problem::Problem;
use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// Exhaustive grids with this many points or more are refused.
pub const GRID_LIMIT: u128 = 100_000_000;

/// Grid search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Number of increments per free parameter. Default: 11
    pub increments: usize,

    /// Switch to Sobol' sampling of this many points when the grid is larger. Default: None
    pub sobol_max_points: Option<usize>,

    /// Scrambling seed of the Sobol' sequence. Default: 0
    pub sobol_seed: u32,

    /// Number of chunks the grid is split into; `None` uses four per worker thread.
    pub chunks: Option<usize>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            increments: 11,
            sobol_max_points: None,
            sobol_seed: 0,
            chunks: None,
        }
    }
}

impl GridConfig {
    pub fn with_increments(mut self, increments: usize) -> Self {
        self.increments = increments;
        self
    }

    pub fn with_sobol(mut self, max_points: usize, seed: u32) -> Self {
        self.sobol_max_points = Some(max_points);
        self.sobol_seed = seed;
        self
    }

    pub fn with_chunks(mut self, chunks: usize) -> Self {
        self.chunks = Some(chunks);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.increments == 0 {
            return Err(RelaxError::InvalidConfig(
                "Grid increments must be at least 1".to_string(),
            ));
        }
        if self.sobol_max_points == Some(0) {
            return Err(RelaxError::InvalidConfig(
                "Sobol' max points must be at least 1".to_string(),
            ));
        }
        if self.chunks == Some(0) {
            return Err(RelaxError::InvalidConfig(
                "Grid chunk count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Best point of a grid search.
#[derive(Debug, Clone)]
pub struct GridSearchResult {
    pub params: Array1<f64>,
    pub chi2: f64,
    /// Flat grid index, or Sobol' sample index, of the minimum.
    pub index: u128,
    /// Points whose chi-squared was computed.
    pub evaluated: u64,
    /// Points skipped for violating the constraints.
    pub skipped: u64,
    /// Points outside a closed form's domain or with a non-finite chi-squared.
    pub failed: u64,
    pub sobol: bool,
}

#[derive(Debug, Clone, Default)]
struct ChunkResult {
    best: Option<(f64, u128, Array1<f64>)>,
    evaluated: u64,
    skipped: u64,
    failed: u64,
}

impl ChunkResult {
    fn visit<P: Problem>(
        &mut self,
        problem: &P,
        constraints: Option<&LinearConstraints>,
        index: u128,
        params: Array1<f64>,
    ) -> Result<()> {
        if let Some(c) = constraints {
            if !c.is_feasible(&params, FEASIBILITY_TOL) {
                self.skipped += 1;
                return Ok(());
            }
        }
        let cost = match problem.eval_cost(&params) {
            Ok(cost) if cost.is_finite() => cost,
            Ok(_) | Err(RelaxError::DomainError { .. }) => {
                self.failed += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.evaluated += 1;
        // Strictly lower only, so the earliest index wins ties.
        if self.best.as_ref().map_or(true, |(best, _, _)| cost < *best) {
            self.best = Some((cost, index, params));
        }
        Ok(())
    }

    fn merge(mut self, other: ChunkResult) -> ChunkResult {
        self.evaluated += other.evaluated;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.best = match (self.best, other.best) {
            (Some(a), Some(b)) => {
                let order = a.0.total_cmp(&b.0).then(a.1.cmp(&b.1));
                Some(if order == Ordering::Greater { b } else { a })
            }
            (a, b) => a.or(b),
        };
        self
    }
}

/// Evaluate the problem over a grid and return the lowest feasible point.
///
/// # Arguments
///
/// * `problem` - The (scaled) problem
/// * `info` - The grid, or a sub-grid of it
/// * `constraints` - Points violating `A x >= b` are skipped
/// * `config` - Sobol' switch and chunking
/// * `cancel` - Checked between grid points
pub fn grid_search<P: Problem + Sync>(
    problem: &P,
    info: &GridInfo,
    constraints: Option<&LinearConstraints>,
    config: &GridConfig,
    cancel: Option<&CancelToken>,
) -> Result<GridSearchResult> {
    config.validate()?;
    if info.dims() != problem.parameter_count() {
        return Err(RelaxError::DimensionMismatch(format!(
            "Grid of {} dimensions for {} parameters",
            info.dims(),
            problem.parameter_count()
        )));
    }

    let sobol = match config.sobol_max_points {
        Some(max) if info.range() > max as u128 => {
            Some(SobolPoints::from_grid(info, max, config.sobol_seed)?)
        }
        _ => None,
    };
    if sobol.is_none() && info.range() >= GRID_LIMIT {
        return Err(RelaxError::GridTooLarge {
            total: info.range(),
            limit: GRID_LIMIT,
        });
    }

    let n_points = match &sobol {
        Some(points) => points.len() as u128,
        None => info.range(),
    };
    let n_chunks = config
        .chunks
        .unwrap_or_else(|| 4 * rayon::current_num_threads())
        .max(1) as u128;
    let n_chunks = n_chunks.min(n_points.max(1)) as usize;

    let merged = match &sobol {
        None => info
            .sub_divide(n_chunks)?
            .par_iter()
            .map(|chunk| -> Result<ChunkResult> {
                let mut result = ChunkResult::default();
                for (index, params) in chunk.iter() {
                    check_cancel(cancel)?;
                    result.visit(problem, constraints, index, params)?;
                }
                Ok(result)
            })
            .collect::<Result<Vec<ChunkResult>>>()?,
        Some(points) => {
            let indices = points.indices();
            let size = ((points.len() + n_chunks - 1) / n_chunks).max(1);
            indices
                .clone()
                .step_by(size)
                .collect::<Vec<usize>>()
                .par_iter()
                .map(|&first| -> Result<ChunkResult> {
                    let mut result = ChunkResult::default();
                    for index in first..(first + size).min(indices.end) {
                        check_cancel(cancel)?;
                        if let Some(params) = points.point(index) {
                            result.visit(problem, constraints, index as u128, params)?;
                        }
                    }
                    Ok(result)
                })
                .collect::<Result<Vec<ChunkResult>>>()?
        }
    }
    .into_iter()
    .fold(ChunkResult::default(), ChunkResult::merge);

    let (chi2, index, params) = merged.best.ok_or_else(|| {
        RelaxError::InvalidParameter(format!(
            "No feasible grid point among {} ({} violate the constraints, {} failed)",
            n_points, merged.skipped, merged.failed
        ))
    })?;
    debug!(
        chi2,
        index = index as u64,
        evaluated = merged.evaluated,
        skipped = merged.skipped,
        sobol = sobol.is_some(),
        "Grid search minimum"
    );
    Ok(GridSearchResult {
        params,
        chi2,
        index,
        evaluated: merged.evaluated,
        skipped: merged.skipped,
        failed: merged.failed,
        sobol: sobol.is_some(),
    })
}

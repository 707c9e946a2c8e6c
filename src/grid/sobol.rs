//! Owen-scrambled Sobol' points over the bounds of a grid.

use super::info::GridInfo;
use crate::error::{RelaxError, Result};
use ndarray::Array1;
use sobol_burley::sample;

/// Number of dimensions `sobol_burley` provides.
pub const MAX_SOBOL_DIMENSIONS: usize = 256;

/// A fixed-size quasi-random sample of a box.
///
/// Axes with a single step (fixed parameters) keep their grid value and do
/// not consume a Sobol' dimension. The sample covers the sequence indices
/// `first..end`; a sample of a whole grid starts at 0.
#[derive(Debug, Clone)]
pub struct SobolPoints {
    bounds: Vec<(f64, f64)>,
    /// Sobol' dimension of each axis, `None` for fixed axes.
    dimension: Vec<Option<u32>>,
    first: u32,
    end: u32,
    seed: u32,
}

impl SobolPoints {
    pub fn new(bounds: Vec<(f64, f64)>, fixed: &[bool], n_points: usize, seed: u32) -> Result<Self> {
        if bounds.len() != fixed.len() {
            return Err(RelaxError::DimensionMismatch(format!(
                "{} bounds for {} axes",
                bounds.len(),
                fixed.len()
            )));
        }
        let n_points = u32::try_from(n_points).map_err(|_| {
            RelaxError::InvalidConfig(format!("{} Sobol' points exceed the sequence length", n_points))
        })?;
        let mut next = 0u32;
        let dimension: Vec<Option<u32>> = fixed
            .iter()
            .map(|&f| {
                if f {
                    None
                } else {
                    next += 1;
                    Some(next - 1)
                }
            })
            .collect();
        if next as usize > MAX_SOBOL_DIMENSIONS {
            return Err(RelaxError::InvalidConfig(format!(
                "{} free grid dimensions exceed the {} Sobol' dimensions available",
                next, MAX_SOBOL_DIMENSIONS
            )));
        }
        Ok(Self {
            bounds,
            dimension,
            first: 0,
            end: n_points,
            seed,
        })
    }

    /// Sample the box spanned by a grid's axes with `n_points` points.
    ///
    /// A sub-grid takes the share of the sequence proportional to its slice
    /// of the parent's flat index range, so the sub-grids of one
    /// [`GridInfo::sub_divide`] together sample exactly the parent's points.
    pub fn from_grid(info: &GridInfo, n_points: usize, seed: u32) -> Result<Self> {
        let bounds = info.axes().iter().map(|a| (a.lower, a.upper)).collect();
        let fixed: Vec<bool> = info.axes().iter().map(|a| a.steps == 1).collect();
        let mut points = Self::new(bounds, &fixed, n_points, seed)?;
        let share = |flat: u128| -> u32 {
            // total_steps < 2^128 and n_points < 2^32: split the product to avoid overflow.
            let total = info.total_steps();
            let n = points.end as u128;
            let whole = (flat / total) * n;
            let part = (flat % total) as f64 / total as f64 * n as f64;
            (whole + part.floor() as u128).min(n) as u32
        };
        let (first, end) = (share(info.start()), share(info.start() + info.range()));
        points.first = first;
        points.end = end;
        // Fixed axes sit at the axis midpoint, like the grid itself.
        for (b, axis) in points.bounds.iter_mut().zip(info.axes()) {
            if axis.steps == 1 {
                let mid = axis.value(0);
                *b = (mid, mid);
            }
        }
        Ok(points)
    }

    pub fn len(&self) -> usize {
        (self.end - self.first) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.first
    }

    /// Sequence indices covered by this sample.
    pub fn indices(&self) -> std::ops::Range<usize> {
        self.first as usize..self.end as usize
    }

    /// The point at sequence index `index`, or `None` outside [`Self::indices`].
    pub fn point(&self, index: usize) -> Option<Array1<f64>> {
        let index = u32::try_from(index)
            .ok()
            .filter(|&i| i >= self.first && i < self.end)?;
        Some(
            self.bounds
                .iter()
                .zip(&self.dimension)
                .map(|(&(lo, hi), dim)| match dim {
                    Some(d) => lo + sample(index, *d, self.seed) as f64 * (hi - lo),
                    None => lo,
                })
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = Array1<f64>> + '_ {
        self.indices().filter_map(move |i| self.point(i))
    }
}

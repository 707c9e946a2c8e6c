//! Mixed-radix description of an axis-aligned grid.
//!
//! A flat step index `s` maps to per-axis offsets through strides, with the
//! first axis varying fastest:
//!
//! ```text
//! s = o_0 + o_1 * n_0 + o_2 * n_0 * n_1 + ...
//! ```
//!
//! A `GridInfo` may also cover only a contiguous range `[start, start + range)`
//! of its parent grid, which is how the grid is split between workers.

use crate::error::{RelaxError, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// One axis: `steps` evenly spaced values from `lower` to `upper` inclusive.
///
/// A single step sits at the midpoint, so a fixed parameter is an axis with
/// `lower == upper` and one step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridAxis {
    pub steps: usize,
    pub lower: f64,
    pub upper: f64,
}

impl GridAxis {
    pub fn new(steps: usize, lower: f64, upper: f64) -> Self {
        Self {
            steps,
            lower,
            upper,
        }
    }

    /// An axis pinned at one value.
    pub fn fixed(value: f64) -> Self {
        Self::new(1, value, value)
    }

    pub fn value(&self, offset: usize) -> f64 {
        if self.steps == 1 {
            return 0.5 * (self.lower + self.upper);
        }
        self.lower + offset as f64 * (self.upper - self.lower) / (self.steps - 1) as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridInfo {
    axes: Vec<GridAxis>,
    strides: Vec<u128>,
    total_steps: u128,
    start: u128,
    range: u128,
}

impl GridInfo {
    /// Grid over all points of the given axes.
    pub fn new(axes: Vec<GridAxis>) -> Result<Self> {
        let mut strides = Vec::with_capacity(axes.len());
        let mut total: u128 = 1;
        for (i, axis) in axes.iter().enumerate() {
            if axis.steps == 0 {
                return Err(RelaxError::InvalidConfig(format!(
                    "Grid axis {} has no steps",
                    i
                )));
            }
            if !axis.lower.is_finite() || !axis.upper.is_finite() || axis.lower > axis.upper {
                return Err(RelaxError::InvalidConfig(format!(
                    "Grid axis {} has invalid bounds [{}, {}]",
                    i, axis.lower, axis.upper
                )));
            }
            strides.push(total);
            total = total.checked_mul(axis.steps as u128).ok_or_else(|| {
                RelaxError::GridTooLarge {
                    total: u128::MAX,
                    limit: super::GRID_LIMIT,
                }
            })?;
        }
        Ok(Self {
            axes,
            strides,
            total_steps: total,
            start: 0,
            range: total,
        })
    }

    /// Grid from `(lower, upper)` bounds with `increments[i]` steps per axis.
    pub fn from_bounds(bounds: &[(f64, f64)], increments: &[usize]) -> Result<Self> {
        if bounds.len() != increments.len() {
            return Err(RelaxError::DimensionMismatch(format!(
                "{} grid bounds for {} increments",
                bounds.len(),
                increments.len()
            )));
        }
        Self::new(
            bounds
                .iter()
                .zip(increments)
                .map(|(&(lower, upper), &steps)| GridAxis::new(steps, lower, upper))
                .collect(),
        )
    }

    pub fn axes(&self) -> &[GridAxis] {
        &self.axes
    }

    pub fn dims(&self) -> usize {
        self.axes.len()
    }

    /// Number of points in the full parent grid.
    pub fn total_steps(&self) -> u128 {
        self.total_steps
    }

    /// First flat index covered.
    pub fn start(&self) -> u128 {
        self.start
    }

    /// Number of flat indices covered.
    pub fn range(&self) -> u128 {
        self.range
    }

    /// The chunk `[start, start + range)`, which must lie inside this grid's range.
    pub fn sub_grid(&self, start: u128, range: u128) -> Result<Self> {
        let end = start.checked_add(range);
        if start < self.start || end.map_or(true, |e| e > self.start + self.range) {
            return Err(RelaxError::InvalidConfig(format!(
                "Sub-grid [{}, +{}) lies outside [{}, +{})",
                start, range, self.start, self.range
            )));
        }
        Ok(Self {
            start,
            range,
            ..self.clone()
        })
    }

    /// Split the covered range into exactly `n` contiguous chunks.
    ///
    /// Every chunk gets `range / n` points and the last also takes the remainder.
    pub fn sub_divide(&self, n: usize) -> Result<Vec<Self>> {
        let n128 = n as u128;
        if n == 0 || n128 > self.range {
            return Err(RelaxError::InvalidConfig(format!(
                "Cannot divide a grid range of {} points into {} parts",
                self.range, n
            )));
        }
        let size = self.range / n128;
        (0..n128)
            .map(|k| {
                let start = self.start + k * size;
                let range = if k + 1 == n128 {
                    self.start + self.range - start
                } else {
                    size
                };
                self.sub_grid(start, range)
            })
            .collect()
    }

    /// Per-axis offsets of a flat step index of the parent grid.
    pub fn get_step_offset(&self, step: u128) -> Vec<usize> {
        self.axes
            .iter()
            .zip(&self.strides)
            .map(|(axis, &stride)| ((step / stride) % axis.steps as u128) as usize)
            .collect()
    }

    /// Parameter vector of per-axis offsets.
    pub fn get_params(&self, offsets: &[usize]) -> Array1<f64> {
        self.axes
            .iter()
            .zip(offsets)
            .map(|(axis, &o)| axis.value(o))
            .collect()
    }

    /// Walk the covered range as `(flat index, parameter vector)` pairs.
    pub fn iter(&self) -> GridIter<'_> {
        GridIter {
            info: self,
            offsets: self.get_step_offset(self.start),
            index: self.start,
            end: self.start + self.range,
        }
    }
}

/// Odometer over a grid range: the first axis increments fastest.
pub struct GridIter<'a> {
    info: &'a GridInfo,
    offsets: Vec<usize>,
    index: u128,
    end: u128,
}

impl<'a> Iterator for GridIter<'a> {
    type Item = (u128, Array1<f64>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.end {
            return None;
        }
        let item = (self.index, self.info.get_params(&self.offsets));
        self.index += 1;
        for (offset, axis) in self.offsets.iter_mut().zip(&self.info.axes) {
            *offset += 1;
            if *offset < axis.steps {
                break;
            }
            *offset = 0;
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.end - self.index).ok();
        (remaining.unwrap_or(usize::MAX), remaining)
    }
}

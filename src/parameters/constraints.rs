//! Linear inequality constraints `A x >= b` on the scaled parameter vector.
//!
//! Rows are emitted while walking the cluster's parameter traversal, so the
//! same model and cluster always give the same matrix. Single-parameter rows
//! have a coefficient of +1 (lower bound) or -1 (upper bound) and
//! `b = bound / scaling`. Rows coupling two parameters are normalised so
//! their largest coefficient has magnitude one.

use super::{loop_parameters, ParamEntry, ParamName};
use crate::error::{RelaxError, Result};
use crate::experiment::R20Key;
use crate::spin::Spin;
use ndarray::{Array1, Array2};

/// Default tolerance of the feasibility test.
pub const FEASIBILITY_TOL: f64 = 1e-10;

/// `A x >= b`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraints {
    pub a: Array2<f64>,
    pub b: Array1<f64>,
}

impl LinearConstraints {
    pub fn new(a: Array2<f64>, b: Array1<f64>) -> Result<Self> {
        if a.nrows() != b.len() {
            return Err(RelaxError::DimensionMismatch(format!(
                "Constraint matrix has {} rows but b has {} elements",
                a.nrows(),
                b.len()
            )));
        }
        Ok(Self { a, b })
    }

    /// No constraints on `n` parameters.
    pub fn unconstrained(n: usize) -> Self {
        Self {
            a: Array2::zeros((0, n)),
            b: Array1::zeros(0),
        }
    }

    /// Box constraints from per-parameter physical bounds and a scaling vector.
    pub fn from_bounds(bounds: &[(Option<f64>, Option<f64>)], scaling: &Array1<f64>) -> Result<Self> {
        if bounds.len() != scaling.len() {
            return Err(RelaxError::DimensionMismatch(format!(
                "{} bounds for {} parameters",
                bounds.len(),
                scaling.len()
            )));
        }
        let mut builder = RowBuilder::new(bounds.len());
        for (i, &(lower, upper)) in bounds.iter().enumerate() {
            builder.bounds(i, lower, upper, scaling[i]);
        }
        builder.finish()
    }

    pub fn n_constraints(&self) -> usize {
        self.a.nrows()
    }

    pub fn n_params(&self) -> usize {
        self.a.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.a.nrows() == 0
    }

    /// `A x - b`; every element is non-negative at a feasible point.
    pub fn residuals(&self, x: &Array1<f64>) -> Array1<f64> {
        self.a.dot(x) - &self.b
    }

    /// Whether `min(A x - b) >= -tol`.
    pub fn is_feasible(&self, x: &Array1<f64>, tol: f64) -> bool {
        self.residuals(x).iter().all(|&r| r >= -tol)
    }

    /// Size of the largest violation, zero at a feasible point.
    pub fn violation(&self, x: &Array1<f64>) -> f64 {
        self.residuals(x)
            .iter()
            .fold(0.0_f64, |worst, &r| worst.max(-r))
    }

    /// Rows holding with equality (within `tol`) at `x`.
    pub fn active(&self, x: &Array1<f64>, tol: f64) -> Vec<usize> {
        self.residuals(x)
            .iter()
            .enumerate()
            .filter(|(_, &r)| r <= tol)
            .map(|(i, _)| i)
            .collect()
    }

    /// Ratio test: the largest `alpha` in `[0, 1]` keeping `x + alpha dx`
    /// feasible, and the row that blocks the step, if any.
    pub fn max_step(&self, x: &Array1<f64>, dx: &Array1<f64>) -> (f64, Option<usize>) {
        let slack = self.residuals(x);
        let rate = self.a.dot(dx);
        let mut alpha = 1.0;
        let mut blocking = None;
        for (i, (&s, &r)) in slack.iter().zip(rate.iter()).enumerate() {
            if r >= 0.0 {
                continue;
            }
            let limit = (s.max(0.0) / -r).max(0.0);
            if limit < alpha {
                alpha = limit;
                blocking = Some(i);
            }
        }
        (alpha, blocking)
    }

    /// Project `x` onto the single-parameter rows by clamping.
    ///
    /// Rows coupling several parameters are left to the caller.
    pub fn snap(&self, x: &Array1<f64>) -> Array1<f64> {
        let mut snapped = x.clone();
        for (row, &b) in self.a.outer_iter().zip(self.b.iter()) {
            let mut nonzero = row.iter().enumerate().filter(|(_, &c)| c != 0.0);
            let (j, c) = match (nonzero.next(), nonzero.next()) {
                (Some((j, &c)), None) => (j, c),
                _ => continue,
            };
            let bound = b / c;
            if c > 0.0 && snapped[j] < bound {
                snapped[j] = bound;
            } else if c < 0.0 && snapped[j] > bound {
                snapped[j] = bound;
            }
        }
        snapped
    }

    /// Per-parameter `(lower, upper)` bounds implied by the single-parameter rows.
    pub fn box_bounds(&self) -> Vec<(f64, f64)> {
        let mut bounds = vec![(f64::NEG_INFINITY, f64::INFINITY); self.n_params()];
        for (row, &b) in self.a.outer_iter().zip(self.b.iter()) {
            let mut nonzero = row.iter().enumerate().filter(|(_, &c)| c != 0.0);
            if let (Some((j, &c)), None) = (nonzero.next(), nonzero.next()) {
                let bound = b / c;
                if c > 0.0 {
                    bounds[j].0 = bounds[j].0.max(bound);
                } else {
                    bounds[j].1 = bounds[j].1.min(bound);
                }
            }
        }
        bounds
    }
}

struct RowBuilder {
    n: usize,
    rows: Vec<Vec<f64>>,
    b: Vec<f64>,
}

impl RowBuilder {
    fn new(n: usize) -> Self {
        Self {
            n,
            rows: Vec::new(),
            b: Vec::new(),
        }
    }

    fn single(&mut self, index: usize, coefficient: f64, b: f64) {
        let mut row = vec![0.0; self.n];
        row[index] = coefficient;
        self.rows.push(row);
        self.b.push(b);
    }

    fn bounds(&mut self, index: usize, lower: Option<f64>, upper: Option<f64>, scale: f64) {
        if let Some(lower) = lower {
            self.single(index, 1.0, lower / scale);
        }
        if let Some(upper) = upper {
            self.single(index, -1.0, -upper / scale);
        }
    }

    /// `ci si xi + cj sj xj >= b`, normalised.
    fn pair(&mut self, i: (usize, f64, f64), j: (usize, f64, f64), b: f64) {
        let ci = i.1 * i.2;
        let cj = j.1 * j.2;
        let norm = ci.abs().max(cj.abs());
        if norm == 0.0 {
            return;
        }
        let mut row = vec![0.0; self.n];
        row[i.0] = ci / norm;
        row[j.0] = cj / norm;
        self.rows.push(row);
        self.b.push(b / norm);
    }

    fn finish(self) -> Result<LinearConstraints> {
        let m = self.rows.len();
        let flat: Vec<f64> = self.rows.into_iter().flatten().collect();
        let a = Array2::from_shape_vec((m, self.n), flat)
            .map_err(|e| RelaxError::DimensionMismatch(e.to_string()))?;
        LinearConstraints::new(a, Array1::from(self.b))
    }
}

/// Relations between two parameters of the same owner, `coef_a a + coef_b b >= rhs`.
const PAIR_RELATIONS: [(ParamName, f64, ParamName, f64, f64); 5] = [
    // pA - pB >= 0 and -pA - pB >= -1
    (ParamName::PA, 1.0, ParamName::PB, -1.0, 0.0),
    (ParamName::PA, -1.0, ParamName::PB, -1.0, -1.0),
    (ParamName::S2f, 1.0, ParamName::S2, -1.0, 0.0),
    (ParamName::S2s, 1.0, ParamName::S2, -1.0, 0.0),
    (ParamName::Ts, 1.0, ParamName::Tf, -1.0, 0.0),
];

/// Build the constraints of a cluster in scaled coordinates.
///
/// # Arguments
///
/// * `spins` - The spins of the cluster
/// * `r20_keys` - The pipe-wide R20 keys
/// * `scaling` - The scaling vector of the cluster, see [`super::scaling_vector`]
pub fn linear_constraints(
    spins: &[Spin],
    r20_keys: &[R20Key],
    scaling: &Array1<f64>,
) -> Result<LinearConstraints> {
    let model = super::cluster_model(spins)?;
    let entries: Vec<ParamEntry> = loop_parameters(spins, r20_keys)?.collect();
    if entries.len() != scaling.len() {
        return Err(RelaxError::DimensionMismatch(format!(
            "Scaling vector has {} elements for {} parameters",
            scaling.len(),
            entries.len()
        )));
    }

    let mut builder = RowBuilder::new(entries.len());
    for (pos, entry) in entries.iter().enumerate() {
        let (lower, upper) = match model {
            Some(m) => m.constraint_bounds(entry.name),
            None => entry.name.constraint_bounds(),
        };
        builder.bounds(entry.index, lower, upper, scaling[entry.index]);

        // Pair rows are emitted at the later of the two parameters.
        for &(name_a, coef_a, name_b, coef_b, rhs) in &PAIR_RELATIONS {
            let partner = if entry.name == name_a {
                (name_b, coef_a, coef_b)
            } else if entry.name == name_b {
                (name_a, coef_b, coef_a)
            } else {
                continue;
            };
            let (partner_name, own_coef, partner_coef) = partner;
            let earlier = entries[..pos].iter().find(|e| {
                e.name == partner_name
                    && (e.spin_index.is_none()
                        || entry.spin_index.is_none()
                        || e.spin_index == entry.spin_index)
            });
            if let Some(other) = earlier {
                builder.pair(
                    (entry.index, own_coef, scaling[entry.index]),
                    (other.index, partner_coef, scaling[other.index]),
                    rhs,
                );
            }
        }
    }
    builder.finish()
}

//! Local minimisers.
//!
//! Levenberg-Marquardt with linear inequality constraints, and a
//! Nelder-Mead simplex for when derivatives are unreliable. Both work on
//! any [`crate::problem::Problem`] and report a [`MinimizeResult`].

pub mod algorithm;
pub mod config;
pub mod convergence;
pub mod damping;
pub mod simplex;

pub use algorithm::LevenbergMarquardt;
pub use config::{DecompositionMethod, LmConfig, SimplexConfig};
pub use convergence::{ConvergenceCriteria, ConvergenceStatus, MinimizeResult, StepSummary};
pub use damping::Damping;
pub use simplex::NelderMead;

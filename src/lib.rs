//! # relaxopt-rs
//!
//! `relaxopt-rs` is the numerical core of NMR relaxation dispersion and
//! model-free analysis: model functions, constrained grid search and
//! minimisation, and Monte Carlo error propagation.
//!
//! The library provides:
//! - A catalogue of CPMG and R1rho dispersion models, model-free spectral
//!   densities and two-parameter exponential decays
//! - Assembly of per-spin parameters into scaled optimisation vectors with
//!   linear inequality constraints
//! - A chunked, parallel grid search (or Sobol' sampling) seeding a
//!   Levenberg-Marquardt or Nelder-Mead local minimiser
//! - Monte Carlo replicate fits for parameter errors
//! - Information-criterion model selection over named data pipes
//!
//! ## Basic Usage
//!
//! ```
//! use relaxopt_rs::experiment::DispersionPoint;
//! use relaxopt_rs::models::ModelId;
//! use relaxopt_rs::optimise::{minimise_pipe, MinimiseConfig};
//! use relaxopt_rs::session::Session;
//! use relaxopt_rs::spin::Spin;
//!
//! let mut session = Session::new();
//! let pipe = session.create_pipe("No Rex").unwrap();
//! let mut spin = Spin::new(":12@N");
//! for (nu, r2eff) in [(100.0, 12.1), (400.0, 11.9), (800.0, 12.0)] {
//!     spin.add_dispersion(DispersionPoint::cpmg(600e6, nu, 0.04), r2eff, 0.2);
//! }
//! pipe.add_spin(spin).unwrap();
//! pipe.set_model(ModelId::NoRex);
//!
//! let report = minimise_pipe(pipe, &MinimiseConfig::default(), None, None).unwrap();
//! assert!(report.is_complete());
//! ```

// Data model
pub mod error;
pub mod experiment;
pub mod session;
pub mod spin;

// Models and parameters
pub mod models;
pub mod parameters;

// Optimisation
pub mod grid;
pub mod lm;
pub mod optimise;
pub mod problem;
pub mod target;

// Analysis
pub mod analysis;
pub mod model_selection;
pub mod monte_carlo;
pub mod statistics;

pub mod progress;
mod utils;

// Re-exports for convenience
pub use error::{RelaxError, Result};
pub use lm::LevenbergMarquardt;
pub use models::ModelId;
pub use problem::Problem;
pub use session::{Pipe, Session};
pub use spin::Spin;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

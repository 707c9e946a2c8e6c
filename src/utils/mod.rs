//! Crate-internal numerics helpers.

pub mod finite_difference;
pub mod matrix_convert;

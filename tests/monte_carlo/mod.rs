//! Integration tests for Monte Carlo error propagation

// Replicate errors against analytic and covariance errors
mod error_tests;

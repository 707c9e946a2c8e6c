//! Integration tests for the statistics helpers

// Reference values of std, bucket and the means
mod fixtures_tests;

// Covariance of fitted parameters
mod covariance_tests;

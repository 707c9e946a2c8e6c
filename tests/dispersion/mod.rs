//! Integration tests for dispersion clusters

// Parameter vectors and constraints of CR72
mod cr72_tests;

// Cluster fits and the automatic analysis
mod fit_tests;

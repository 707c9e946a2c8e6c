//! Integration tests for model-free fits

// Recovery of known motions from noise-free data
mod recovery_tests;

//! Integration tests for the grid layout and search

// Chunking and flat index mapping
mod sub_divide_tests;

// Grid search over real targets
mod search_tests;

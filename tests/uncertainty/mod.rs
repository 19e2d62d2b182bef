//! Tests for uncertainty calculations

// Linearized propagation through constraints against Monte Carlo sampling
mod propagation_tests;

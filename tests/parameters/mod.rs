//! Integration tests for the parameter system
//!
//! These tests exercise constraint expressions and bounds the way path fits use them.

// Tests for the Expression parsing and evaluation
mod expression_tests;

// Tests for bounded parameters and the internal coordinates seen by the minimizer
mod bounds_tests;

//! Levenberg-Marquardt algorithm implementation.
//!
//! This module provides the nonlinear least-squares solver that drives the
//! EXAFS fit. It works on any [`crate::problem::Problem`] and returns the
//! Jacobian at the solution for the covariance estimate.

pub mod algorithm;
pub mod config;

pub use algorithm::{LevenbergMarquardt, LmResult};
pub use config::LmConfig;

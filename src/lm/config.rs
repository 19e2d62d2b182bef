//! Configuration options for the Levenberg-Marquardt algorithm.
//!
//! This module defines the convergence criteria and damping settings of the
//! Levenberg-Marquardt algorithm. The configuration is serde-serializable so it
//! can be stored next to a fit setup.

use serde::{Deserialize, Serialize};

/// Configuration options for the Levenberg-Marquardt algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    /// Maximum number of iterations. Default: 1000
    pub max_iterations: usize,

    /// Relative tolerance for the reduction of the sum of squares. Default: 1.5e-8
    pub ftol: f64,

    /// Relative tolerance for the change of the parameters. Default: 1.5e-8
    pub xtol: f64,

    /// Tolerance for the largest gradient component. Default: 0.0
    pub gtol: f64,

    /// Initial value for the damping parameter. Default: 1e-3
    pub initial_lambda: f64,

    /// Factor by which to increase lambda. Default: 10.0
    pub lambda_up_factor: f64,

    /// Factor by which to decrease lambda. Default: 0.1
    pub lambda_down_factor: f64,

    /// Minimum value for lambda. Default: 1e-12
    pub min_lambda: f64,

    /// Maximum value for lambda. Default: 1e12
    pub max_lambda: f64,

    /// Squared relative step of the forward-difference Jacobian. Default: machine epsilon
    pub epsfcn: f64,

    /// Whether to return the Jacobian at the solution. Default: true
    pub calc_jacobian: bool,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            ftol: 1.5e-8,
            xtol: 1.5e-8,
            gtol: 0.0,
            initial_lambda: 1e-3,
            lambda_up_factor: 10.0,
            lambda_down_factor: 0.1,
            min_lambda: 1e-12,
            max_lambda: 1e12,
            epsfcn: f64::EPSILON,
            calc_jacobian: true,
        }
    }
}

impl LmConfig {
    /// Relative finite-difference step derived from `epsfcn`
    pub fn diff_step(&self) -> f64 {
        self.epsfcn.max(f64::EPSILON).sqrt()
    }
}

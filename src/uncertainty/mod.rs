//! # Uncertainty Calculation
//!
//! This module provides functionality for calculating uncertainties in parameter
//! estimates from nonlinear least-squares optimization results. It includes:
//!
//! - Covariance matrix estimation from Jacobian matrices
//! - Standard errors and correlations of the varied parameters
//! - Linearized propagation of correlated uncertainties into derived quantities
//! - Monte Carlo sampling as a cross-check of the linearized estimates

mod covariance;
mod monte_carlo;
mod propagation;

pub use covariance::{calculate_correlation, calculate_covariance, standard_errors_from_covariance};
pub use monte_carlo::{propagate_uncertainty, sample_correlated, MonteCarloResult};
pub use propagation::Uncertain;

/// Calculator for parameter uncertainties.
#[derive(Debug, Clone)]
pub struct UncertaintyCalculator {
    /// Degrees of freedom (n_points - n_parameters)
    pub nfree: usize,
    /// Chi-square value at minimum
    pub chisqr: f64,
    /// Reduced chi-square (chi^2 / nfree)
    pub redchi: f64,
}

impl UncertaintyCalculator {
    /// Create a new UncertaintyCalculator
    pub fn new(ndata: usize, nvarys: usize, chisqr: f64) -> Self {
        let nfree = if ndata > nvarys { ndata - nvarys } else { 1 };
        let redchi = chisqr / nfree as f64;

        Self {
            nfree,
            chisqr,
            redchi,
        }
    }

    /// Calculate the covariance matrix from the Jacobian
    pub fn calculate_covariance(
        &self,
        jacobian: &ndarray::Array2<f64>,
    ) -> crate::error::Result<ndarray::Array2<f64>> {
        covariance::calculate_covariance(jacobian, self.redchi)
    }
}

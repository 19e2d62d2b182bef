//! Implementation of the Levenberg-Marquardt algorithm.
//!
//! The step solves the Marquardt-scaled normal equations
//! `(JᵀJ + λ·diag(JᵀJ)) δ = -Jᵀr` with nalgebra, using a Cholesky factorization
//! and falling back to LU when the damped matrix is not positive definite.
//! Convergence follows the MINPACK criteria: relative reduction of the sum of
//! squares (`ftol`), relative step length (`xtol`) and gradient size (`gtol`).

use log::debug;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};
use std::fmt;

use crate::error::{FeffitError, Result};
use crate::problem::Problem;
use crate::utils::finite_difference;
use crate::utils::matrix_convert::{nalgebra_vec_to_ndarray, ndarray_to_nalgebra, ndarray_vec_to_nalgebra};

use super::config::LmConfig;

/// Result of the Levenberg-Marquardt optimization.
#[derive(Debug, Clone)]
pub struct LmResult {
    /// Optimized parameter values
    pub params: Array1<f64>,

    /// Residuals at the solution
    pub residuals: Array1<f64>,

    /// Sum of squared residuals
    pub cost: f64,

    /// Number of accepted steps
    pub iterations: usize,

    /// Number of function evaluations
    pub func_evals: usize,

    /// Whether the optimization succeeded
    pub success: bool,

    /// A message describing the result
    pub message: String,

    /// The Jacobian matrix at the solution (if requested)
    pub jacobian: Option<Array2<f64>>,
}

impl fmt::Display for LmResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optimization Result:")?;
        writeln!(f, "  Success: {}", self.success)?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Cost: {:.6e}", self.cost)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        writeln!(f, "  Parameters: {:?}", self.params)?;
        Ok(())
    }
}

/// Status of the iteration.
enum IterationStatus {
    /// Continue iteration
    Continue,

    /// Converged successfully
    Converged(String),

    /// Failed to converge
    Failed(String),
}

/// The Levenberg-Marquardt optimizer.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    /// Configuration options
    config: LmConfig,
}

impl LevenbergMarquardt {
    /// Create a new Levenberg-Marquardt optimizer with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new Levenberg-Marquardt optimizer with the given configuration.
    pub fn with_config(config: LmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Set the tolerance for the relative reduction of the sum of squares.
    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.config.ftol = ftol;
        self
    }

    /// Set the tolerance for the relative change of the parameters.
    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.config.xtol = xtol;
        self
    }

    /// Set the tolerance for the gradient.
    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.config.gtol = gtol;
        self
    }

    /// Set the initial value for the damping parameter.
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.config.initial_lambda = lambda;
        self
    }

    /// Set the squared relative finite-difference step.
    pub fn with_epsfcn(mut self, epsfcn: f64) -> Self {
        self.config.epsfcn = epsfcn;
        self
    }

    /// Set whether to calculate and return the Jacobian at the solution.
    pub fn with_calc_jacobian(mut self, calc_jacobian: bool) -> Self {
        self.config.calc_jacobian = calc_jacobian;
        self
    }

    /// Minimize the sum of squared residuals for the given problem.
    ///
    /// # Arguments
    ///
    /// * `problem` - The problem to solve
    /// * `initial_params` - Initial guess for the parameter values
    ///
    /// # Returns
    ///
    /// * `Result<LmResult>` - The result of the optimization. Running out of
    ///   iterations is reported through `success == false`, not as an error.
    pub fn minimize<P: Problem>(&self, problem: &P, initial_params: Array1<f64>) -> Result<LmResult> {
        let n_params = problem.parameter_count();
        if initial_params.len() != n_params {
            return Err(FeffitError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                n_params,
                initial_params.len()
            )));
        }

        let mut params = initial_params;
        let mut lambda = self.config.initial_lambda;

        let mut residuals = problem.eval(&params)?;
        let mut func_evals = 1;
        let mut cost = sum_of_squares(&residuals);
        if !cost.is_finite() {
            return Err(FeffitError::InvalidComputation(
                "residuals are not finite at the starting point".to_string(),
            ));
        }

        let mut iterations = 0;

        let (success, message) = loop {
            if n_params == 0 {
                break (true, "No parameters to vary".to_string());
            }
            if cost == 0.0 {
                break (true, "Sum of squares is zero".to_string());
            }
            if iterations >= self.config.max_iterations {
                break (
                    false,
                    format!("Maximum iterations ({}) reached", self.config.max_iterations),
                );
            }

            let jacobian = match self.jacobian(problem, &params, &residuals) {
                Ok(jacobian) => jacobian,
                Err(err) => break (false, format!("Jacobian could not be evaluated: {}", err)),
            };
            if !problem.has_custom_jacobian() {
                func_evals += n_params;
            }

            let j = ndarray_to_nalgebra(&jacobian);
            let r = ndarray_vec_to_nalgebra(&residuals);
            let jtj = j.transpose() * &j;
            let g = j.transpose() * &r;

            if self.config.gtol > 0.0 {
                let gnorm = g.amax();
                if gnorm <= self.config.gtol {
                    break (
                        true,
                        format!(
                            "Gradient convergence: max|g| = {:.2e} <= {:.2e}",
                            gnorm, self.config.gtol
                        ),
                    );
                }
            }

            let status = loop {
                let Some(step) = self.calculate_step(&jtj, &g, lambda) else {
                    lambda = (lambda * self.config.lambda_up_factor).min(self.config.max_lambda);
                    if lambda >= self.config.max_lambda {
                        break IterationStatus::Failed(
                            "Failed to calculate step, and lambda reached maximum".to_string(),
                        );
                    }
                    continue;
                };

                let step_nd = nalgebra_vec_to_ndarray(&step);
                let new_params = &params + &step_nd;
                func_evals += 1;
                let new_residuals = match problem.eval(&new_params) {
                    Ok(new_residuals) => new_residuals,
                    Err(err) => {
                        debug!("LM trial step rejected: {}", err);
                        lambda = (lambda * self.config.lambda_up_factor).min(self.config.max_lambda);
                        if lambda >= self.config.max_lambda {
                            break IterationStatus::Failed(format!(
                                "Trial step could not be evaluated, and lambda reached maximum: {}",
                                err
                            ));
                        }
                        continue;
                    }
                };
                let new_cost = sum_of_squares(&new_residuals);

                let predicted = &r + &j * &step;
                let predicted_cost = predicted.norm_squared();
                let actual_reduction = (cost - new_cost) / cost;
                let predicted_reduction = (cost - predicted_cost) / cost;

                let step_norm = step.norm();
                let param_norm = params.iter().map(|p| p * p).sum::<f64>().sqrt();
                let step_small = step_norm <= self.config.xtol * (param_norm + self.config.xtol);

                if new_cost.is_finite() && new_cost < cost {
                    params = new_params;
                    residuals = new_residuals;
                    cost = new_cost;
                    lambda = (lambda * self.config.lambda_down_factor).max(self.config.min_lambda);
                    iterations += 1;
                    debug!(
                        "LM iteration {}: cost = {:.6e}, lambda = {:.1e}",
                        iterations, cost, lambda
                    );

                    if actual_reduction.abs() <= self.config.ftol
                        && predicted_reduction <= self.config.ftol
                    {
                        break IterationStatus::Converged(format!(
                            "Cost convergence: relative reduction {:.2e} <= {:.2e}",
                            actual_reduction, self.config.ftol
                        ));
                    }
                    if step_small {
                        break IterationStatus::Converged(format!(
                            "Parameter convergence: |dx| = {:.2e} <= xtol*|x|",
                            step_norm
                        ));
                    }
                    break IterationStatus::Continue;
                }

                if predicted_reduction.abs() <= self.config.ftol
                    && actual_reduction <= self.config.ftol
                {
                    break IterationStatus::Converged(
                        "Cost convergence: no further reduction possible".to_string(),
                    );
                }
                if step_small {
                    break IterationStatus::Converged(format!(
                        "Parameter convergence: |dx| = {:.2e} <= xtol*|x|",
                        step_norm
                    ));
                }

                lambda = (lambda * self.config.lambda_up_factor).min(self.config.max_lambda);
                if lambda >= self.config.max_lambda {
                    break IterationStatus::Failed(
                        "Failed to decrease cost, and lambda reached maximum".to_string(),
                    );
                }
            };

            match status {
                IterationStatus::Continue => (),
                IterationStatus::Converged(message) => break (true, message),
                IterationStatus::Failed(message) => break (false, message),
            }
        };

        let jacobian = if self.config.calc_jacobian && n_params > 0 {
            if !problem.has_custom_jacobian() {
                func_evals += n_params;
            }
            match self.jacobian(problem, &params, &residuals) {
                Ok(jacobian) => Some(jacobian),
                Err(err) => {
                    debug!("LM final Jacobian unavailable: {}", err);
                    None
                }
            }
        } else {
            None
        };

        debug!("LM finished after {} iterations: {}", iterations, message);

        Ok(LmResult {
            params,
            residuals,
            cost,
            iterations,
            func_evals,
            success,
            message,
            jacobian,
        })
    }

    fn jacobian<P: Problem>(
        &self,
        problem: &P,
        params: &Array1<f64>,
        residuals: &Array1<f64>,
    ) -> Result<Array2<f64>> {
        if problem.has_custom_jacobian() {
            problem.jacobian(params)
        } else {
            finite_difference::jacobian_at(problem, params, residuals, Some(self.config.diff_step()))
        }
    }

    /// Solve `(JᵀJ + λ·diag(JᵀJ)) δ = -Jᵀr`, or `None` if the system is singular.
    fn calculate_step(&self, jtj: &DMatrix<f64>, g: &DVector<f64>, lambda: f64) -> Option<DVector<f64>> {
        let mut a = jtj.clone();
        for i in 0..a.nrows() {
            let d = jtj[(i, i)].max(1e-12);
            a[(i, i)] += lambda * d;
        }
        let rhs = -g.clone();

        let step = match a.clone().cholesky() {
            Some(chol) => chol.solve(&rhs),
            None => a.lu().solve(&rhs)?,
        };

        step.iter().all(|v| v.is_finite()).then_some(step)
    }
}

fn sum_of_squares(values: &Array1<f64>) -> f64 {
    values.iter().map(|r| r * r).sum()
}

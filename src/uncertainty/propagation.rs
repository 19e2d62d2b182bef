//! Linearized propagation of correlated uncertainties.
//!
//! An [`Uncertain`] carries a nominal value and its gradient with respect to the
//! varied parameters of a fit. Evaluating constraint expressions on `Uncertain`
//! values (see [`crate::parameters::ExprValue`]) yields the gradient of any derived
//! quantity, and its variance follows as `g · C · gᵀ` for the fit covariance `C`.

use ndarray::Array2;

use crate::parameters::expression::ExprValue;

/// A value with its gradient over the varied parameters.
///
/// An empty gradient stands for a value that does not depend on any parameter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Uncertain {
    /// Nominal value
    pub value: f64,
    /// Partial derivatives with respect to each varied parameter
    pub gradient: Vec<f64>,
}

impl Uncertain {
    /// A value with no parameter dependence.
    pub fn constant(value: f64) -> Self {
        Self {
            value,
            gradient: Vec::new(),
        }
    }

    /// The `index`-th of `count` varied parameters.
    pub fn variable(value: f64, index: usize, count: usize) -> Self {
        let mut gradient = vec![0.0; count];
        if index < count {
            gradient[index] = 1.0;
        }
        Self { value, gradient }
    }

    /// Whether the value depends on any parameter.
    pub fn is_constant(&self) -> bool {
        self.gradient.iter().all(|g| *g == 0.0)
    }

    /// Covariance between two values: `g_a · C · g_bᵀ`.
    pub fn covariance_with(&self, other: &Uncertain, covar: &Array2<f64>) -> f64 {
        let n = covar.nrows();
        let mut total = 0.0;
        for (i, gi) in self.gradient.iter().enumerate().take(n) {
            if *gi == 0.0 {
                continue;
            }
            for (j, gj) in other.gradient.iter().enumerate().take(n) {
                total += gi * covar[[i, j]] * gj;
            }
        }
        total
    }

    /// Variance under the covariance matrix of the varied parameters.
    pub fn variance(&self, covar: &Array2<f64>) -> f64 {
        self.covariance_with(self, covar)
    }

    /// Standard deviation, zero for constants or non-positive variance.
    pub fn std_dev(&self, covar: &Array2<f64>) -> f64 {
        let variance = self.variance(covar);
        if variance > 0.0 {
            variance.sqrt()
        } else {
            0.0
        }
    }
}

impl ExprValue for Uncertain {
    const TRACKS_GRADIENT: bool = true;

    fn constant(value: f64) -> Self {
        Uncertain::constant(value)
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn chain(&self, value: f64, derivative: f64) -> Self {
        Self {
            value,
            gradient: self.gradient.iter().map(|g| g * derivative).collect(),
        }
    }

    fn combine(args: &[Self], value: f64, partials: &[f64]) -> Self {
        let len = args.iter().map(|a| a.gradient.len()).max().unwrap_or(0);
        let mut gradient = vec![0.0; len];
        for (arg, partial) in args.iter().zip(partials) {
            if *partial == 0.0 {
                continue;
            }
            for (g, ga) in gradient.iter_mut().zip(&arg.gradient) {
                *g += partial * ga;
            }
        }
        Self { value, gradient }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::expression::{EvaluationContext, ExprResult, Expression, ExpressionError};
    use approx::assert_relative_eq;
    use ndarray::arr2;
    use std::collections::HashMap;

    struct UncertainScope(HashMap<String, Uncertain>);

    impl EvaluationContext<Uncertain> for UncertainScope {
        fn get_variable(&self, name: &str) -> ExprResult<Uncertain> {
            self.0
                .get(name)
                .cloned()
                .ok_or_else(|| ExpressionError::UndefinedVariable {
                    name: name.to_string(),
                })
        }

        fn has_variable(&self, name: &str) -> bool {
            self.0.contains_key(name)
        }

        fn variable_names(&self) -> Vec<String> {
            self.0.keys().cloned().collect()
        }
    }

    fn scope() -> UncertainScope {
        let mut vars = HashMap::new();
        vars.insert("a".to_string(), Uncertain::variable(2.0, 0, 2));
        vars.insert("b".to_string(), Uncertain::variable(3.0, 1, 2));
        UncertainScope(vars)
    }

    #[test]
    fn test_gradient_of_product() {
        let expr = Expression::parse("a * b + 1").unwrap();
        let result: Uncertain = expr.evaluate_as(&scope()).unwrap();
        assert_relative_eq!(result.value, 7.0);
        assert_relative_eq!(result.gradient[0], 3.0);
        assert_relative_eq!(result.gradient[1], 2.0);
    }

    #[test]
    fn test_gradient_of_functions() {
        let expr = Expression::parse("sqrt(a) * exp(-b/3)").unwrap();
        let result: Uncertain = expr.evaluate_as(&scope()).unwrap();
        let expected = 2.0_f64.sqrt() * (-1.0_f64).exp();
        assert_relative_eq!(result.value, expected, epsilon = 1e-12);
        assert_relative_eq!(result.gradient[0], expected / 4.0, epsilon = 1e-12);
        assert_relative_eq!(result.gradient[1], -expected / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_correlated_variance() {
        // var(a - b) = var(a) + var(b) - 2 cov(a, b)
        let covar = arr2(&[[0.04, 0.03], [0.03, 0.09]]);
        let expr = Expression::parse("a - b").unwrap();
        let result: Uncertain = expr.evaluate_as(&scope()).unwrap();
        assert_relative_eq!(result.variance(&covar), 0.04 + 0.09 - 0.06, epsilon = 1e-14);

        let constant = Uncertain::constant(5.0);
        assert!(constant.is_constant());
        assert_eq!(constant.std_dev(&covar), 0.0);
    }
}

//! Parameter definition and implementation
//!
//! A [`Parameter`] is a named value that is either varied by the fit, held fixed,
//! or computed from an expression over other parameters.

use crate::parameters::bounds::{Bounds, BoundsError, BoundsTransform};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur when working with parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Parameter '{name}' cannot have both an expression and be varied")]
    ExpressionAndVary { name: String },

    #[error("Bounds error: {0}")]
    BoundsError(#[from] BoundsError),

    #[error("Cannot evaluate expression for parameter '{name}': {message}")]
    ExpressionEvaluation { name: String, message: String },

    #[error("Parameter '{name}' not found")]
    ParameterNotFound { name: String },

    #[error("Parameter '{name}' already exists")]
    DuplicateName { name: String },

    #[error("Invalid parameter name '{name}'")]
    InvalidName { name: String },
}

/// A named fit parameter
///
/// Parameters can be varied during optimization, can have bounds constraints,
/// and can be linked to other parameters through expressions. A parameter with an
/// expression never varies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Name of the parameter
    name: String,

    /// Current value of the parameter
    value: f64,

    /// Value when created (for reset operations)
    init_value: f64,

    /// Whether this parameter is varied during optimization
    vary: bool,

    /// Minimum and maximum bounds for the parameter value
    #[serde(default)]
    bounds: Bounds,

    /// Constraint expression used to compute this parameter (if any)
    #[serde(default)]
    expr: Option<String>,

    /// Standard error of the parameter (set after fitting)
    #[serde(default)]
    pub stderr: Option<f64>,

    /// Correlations with other varied parameters (set after fitting)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub correl: BTreeMap<String, f64>,
}

/// Whether `name` can be used as a parameter name in expressions.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

impl Parameter {
    /// Create a varied, unbounded parameter
    ///
    /// # Examples
    ///
    /// ```
    /// use feffit_rs::parameters::Parameter;
    ///
    /// let param = Parameter::new("amp", 0.9);
    /// assert_eq!(param.name(), "amp");
    /// assert_eq!(param.value(), 0.9);
    /// assert!(param.vary());
    /// ```
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            init_value: value,
            vary: true,
            bounds: Bounds::default(),
            expr: None,
            stderr: None,
            correl: BTreeMap::new(),
        }
    }

    /// Create a parameter that is held at its value
    pub fn fixed(name: &str, value: f64) -> Self {
        let mut param = Self::new(name, value);
        param.vary = false;
        param
    }

    /// Create a varied parameter with bounds
    ///
    /// The value is clamped into `[min, max]`.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the parameter
    /// * `value` - Initial value of the parameter
    /// * `min` - Minimum allowed value (may be `-inf`)
    /// * `max` - Maximum allowed value (may be `inf`)
    pub fn with_bounds(name: &str, value: f64, min: f64, max: f64) -> Result<Self, ParameterError> {
        let bounds = Bounds::new(min, max)?;
        let value = bounds.clamp(value);
        let mut param = Self::new(name, value);
        param.bounds = bounds;
        Ok(param)
    }

    /// Create a parameter computed from an expression
    ///
    /// # Examples
    ///
    /// ```
    /// use feffit_rs::parameters::Parameter;
    ///
    /// let param = Parameter::with_expr("sig2_2", "2 * sig2");
    /// assert!(!param.vary());
    /// assert_eq!(param.expr(), Some("2 * sig2"));
    /// ```
    pub fn with_expr(name: &str, expr: &str) -> Self {
        let mut param = Self::new(name, 0.0);
        param.vary = false;
        param.expr = Some(expr.to_string());
        param
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Set the value, failing when it falls outside the bounds
    pub fn set_value(&mut self, value: f64) -> Result<(), ParameterError> {
        if !self.bounds.is_within_bounds(value) {
            return Err(ParameterError::BoundsError(BoundsError::ValueOutsideBounds {
                value,
                min: self.bounds.min,
                max: self.bounds.max,
            }));
        }
        self.value = value;
        Ok(())
    }

    /// Store a value computed from the constraint expression, clamped to the bounds
    pub(crate) fn set_computed_value(&mut self, value: f64) {
        self.value = self.bounds.clamp(value);
    }

    pub fn init_value(&self) -> f64 {
        self.init_value
    }

    /// Restore the initial value and clear fit results
    pub fn reset(&mut self) {
        self.value = self.bounds.clamp(self.init_value);
        self.stderr = None;
        self.correl.clear();
    }

    pub fn vary(&self) -> bool {
        self.vary
    }

    pub fn set_vary(&mut self, vary: bool) -> Result<(), ParameterError> {
        if vary && self.expr.is_some() {
            return Err(ParameterError::ExpressionAndVary {
                name: self.name.clone(),
            });
        }
        self.vary = vary;
        Ok(())
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn min(&self) -> f64 {
        self.bounds.min
    }

    pub fn max(&self) -> f64 {
        self.bounds.max
    }

    /// Replace the bounds and clamp the current value into them
    pub fn set_bounds(&mut self, min: f64, max: f64) -> Result<(), ParameterError> {
        self.bounds = Bounds::new(min, max)?;
        self.value = self.bounds.clamp(self.value);
        Ok(())
    }

    pub fn expr(&self) -> Option<&str> {
        self.expr.as_deref()
    }

    /// Attach or remove the constraint expression; attaching one stops the parameter varying
    pub(crate) fn set_expr(&mut self, expr: Option<&str>) {
        self.expr = expr.map(str::to_string);
        if self.expr.is_some() {
            self.vary = false;
        }
    }

    /// Optimizer-side value for this parameter
    pub fn to_internal(&self) -> Result<f64, ParameterError> {
        Ok(BoundsTransform::new(self.bounds).to_internal(self.value)?)
    }

    /// External value for an optimizer-side value
    pub fn from_internal(&self, internal: f64) -> f64 {
        BoundsTransform::new(self.bounds).to_external(internal)
    }

    /// d(external)/d(internal) at an optimizer-side value
    pub fn internal_derivative(&self, internal: f64) -> f64 {
        BoundsTransform::new(self.bounds).derivative(internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bounded_parameter_clamps() {
        let param = Parameter::with_bounds("s02", 1.4, 0.0, 1.2).unwrap();
        assert_eq!(param.value(), 1.2);
        assert!(Parameter::with_bounds("bad", 0.0, 2.0, 1.0).is_err());
    }

    #[test]
    fn test_set_value_outside_bounds() {
        let mut param = Parameter::with_bounds("s02", 0.9, 0.0, 1.2).unwrap();
        assert!(param.set_value(1.5).is_err());
        assert!(param.set_value(1.0).is_ok());
        assert_eq!(param.value(), 1.0);
    }

    #[test]
    fn test_expression_parameter_cannot_vary() {
        let mut param = Parameter::with_expr("sig2_2", "2 * sig2");
        assert!(!param.vary());
        assert_eq!(
            param.set_vary(true),
            Err(ParameterError::ExpressionAndVary {
                name: "sig2_2".to_string()
            })
        );
    }

    #[test]
    fn test_internal_round_trip() {
        let param = Parameter::with_bounds("e0", 3.0, -10.0, 10.0).unwrap();
        let internal = param.to_internal().unwrap();
        assert_relative_eq!(param.from_internal(internal), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_reset_clears_results() {
        let mut param = Parameter::new("dr", 0.0);
        param.set_value(0.02).unwrap();
        param.stderr = Some(0.01);
        param.correl.insert("e0".to_string(), 0.8);
        param.reset();
        assert_eq!(param.value(), 0.0);
        assert!(param.stderr.is_none());
        assert!(param.correl.is_empty());
    }

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("sig2_fe"));
        assert!(is_valid_name("_x1"));
        assert!(!is_valid_name("1x"));
        assert!(!is_valid_name("a-b"));
        assert!(!is_valid_name(""));
    }
}

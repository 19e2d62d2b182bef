//! Ordered collection of fit parameters with a compiled constraint graph
//!
//! The set keeps parameters in insertion order, so the varied-parameter vector
//! handed to the minimizer and every report are deterministic. Constraint
//! expressions are parsed once when a parameter is added or changed; the graph
//! rejects unknown names and cycles at that point, and is evaluated in
//! dependency order after every change of a varied value.

use ndarray::Array1;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{FeffitError, Result};
use crate::parameters::expression::{
    constant_value, EvaluationContext, ExprResult, Expression, ExpressionError, BUILTIN_FUNCTIONS,
};
use crate::parameters::parameter::{is_valid_name, Parameter, ParameterError};
use crate::uncertainty::Uncertain;

/// Compiled constraint expressions in evaluation order
#[derive(Debug, Clone, Default)]
struct ConstraintGraph {
    /// (parameter index, parsed expression), dependencies first
    order: Vec<(usize, Expression)>,
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// The shared parameter set of a fit
#[derive(Debug, Clone, Default)]
pub struct FitParameterSet {
    params: Vec<Parameter>,
    index: HashMap<String, usize>,
    graph: ConstraintGraph,
}

impl FitParameterSet {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from parameters, validating the constraint graph once
    pub fn from_parameters(params: Vec<Parameter>) -> Result<Self> {
        let mut set = Self::new();
        for param in params {
            set.insert_unchecked(param)?;
        }
        set.rebuild_graph()?;
        set.update_expressions()?;
        Ok(set)
    }

    fn insert_unchecked(&mut self, param: Parameter) -> Result<()> {
        if !is_valid_name(param.name()) {
            return Err(ParameterError::InvalidName {
                name: param.name().to_string(),
            }
            .into());
        }
        if self.index.contains_key(param.name()) {
            return Err(ParameterError::DuplicateName {
                name: param.name().to_string(),
            }
            .into());
        }
        self.index.insert(param.name().to_string(), self.params.len());
        self.params.push(param);
        Ok(())
    }

    /// Add a parameter
    ///
    /// A parameter with an expression must only reference parameters that are
    /// already in the set. On error the set is left unchanged.
    pub fn add(&mut self, param: Parameter) -> Result<()> {
        self.insert_unchecked(param)?;
        if let Err(err) = self.rebuild_graph().and_then(|_| self.update_expressions()) {
            if let Some(removed) = self.params.pop() {
                self.index.remove(removed.name());
            }
            // The graph without the new parameter was valid before
            self.rebuild_graph()?;
            return Err(err);
        }
        Ok(())
    }

    /// Add a varied parameter
    pub fn add_var(&mut self, name: &str, value: f64) -> Result<()> {
        self.add(Parameter::new(name, value))
    }

    /// Add a varied parameter with bounds
    pub fn add_bounded(&mut self, name: &str, value: f64, min: f64, max: f64) -> Result<()> {
        self.add(Parameter::with_bounds(name, value, min, max)?)
    }

    /// Add a parameter held at its value
    pub fn add_fixed(&mut self, name: &str, value: f64) -> Result<()> {
        self.add(Parameter::fixed(name, value))
    }

    /// Add a parameter computed from an expression
    pub fn add_expr(&mut self, name: &str, expr: &str) -> Result<()> {
        self.add(Parameter::with_expr(name, expr))
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.index.get(name).map(|&i| &self.params[i])
    }

    /// Current value of a parameter
    pub fn value(&self, name: &str) -> Option<f64> {
        self.get(name).map(Parameter::value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Parameters in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name().to_string()).collect()
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| FeffitError::ParameterNotFound(name.to_string()))
    }

    /// Set a parameter value and re-evaluate the constraints
    pub fn set_value(&mut self, name: &str, value: f64) -> Result<()> {
        let i = self.index_of(name)?;
        self.params[i].set_value(value)?;
        self.update_expressions()
    }

    pub fn set_vary(&mut self, name: &str, vary: bool) -> Result<()> {
        let i = self.index_of(name)?;
        self.params[i].set_vary(vary)?;
        Ok(())
    }

    pub fn set_bounds(&mut self, name: &str, min: f64, max: f64) -> Result<()> {
        let i = self.index_of(name)?;
        self.params[i].set_bounds(min, max)?;
        self.update_expressions()
    }

    /// Attach, replace or remove a constraint expression
    ///
    /// The graph is re-validated; on error the previous expression is restored.
    pub fn set_expr(&mut self, name: &str, expr: Option<&str>) -> Result<()> {
        let i = self.index_of(name)?;
        let previous = self.params[i].clone();
        self.params[i].set_expr(expr);
        if let Err(err) = self.rebuild_graph().and_then(|_| self.update_expressions()) {
            self.params[i] = previous;
            self.rebuild_graph()?;
            return Err(err);
        }
        Ok(())
    }

    /// Parameters varied by the fit, in order
    pub fn varying(&self) -> Vec<&Parameter> {
        self.params
            .iter()
            .filter(|p| p.vary() && p.expr().is_none())
            .collect()
    }

    pub fn varying_names(&self) -> Vec<String> {
        self.varying().iter().map(|p| p.name().to_string()).collect()
    }

    /// External values of the varied parameters
    pub fn varying_values(&self) -> Array1<f64> {
        self.varying().iter().map(|p| p.value()).collect()
    }

    /// Optimizer-side values of the varied parameters
    pub fn varying_internal_values(&self) -> Result<Array1<f64>> {
        let mut values = Vec::new();
        for p in self.varying() {
            values.push(p.to_internal()?);
        }
        Ok(Array1::from_vec(values))
    }

    /// d(external)/d(internal) of every varied parameter at the given internal values
    pub fn internal_derivatives(&self, internal: &[f64]) -> Vec<f64> {
        self.varying()
            .iter()
            .zip(internal)
            .map(|(p, &x)| p.internal_derivative(x))
            .collect()
    }

    /// Write optimizer-side values into the varied parameters and re-evaluate the constraints
    pub fn update_from_internal(&mut self, internal: &[f64]) -> Result<()> {
        let varying: Vec<usize> = self
            .params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.vary() && p.expr().is_none())
            .map(|(i, _)| i)
            .collect();

        if varying.len() != internal.len() {
            return Err(FeffitError::DimensionMismatch(format!(
                "expected {} varied values, got {}",
                varying.len(),
                internal.len()
            )));
        }

        for (&i, &x) in varying.iter().zip(internal) {
            let external = self.params[i].from_internal(x);
            self.params[i].set_computed_value(external);
        }
        self.update_expressions()
    }

    /// Write external values into the varied parameters and re-evaluate the constraints
    pub fn set_varying_values(&mut self, values: &[f64]) -> Result<()> {
        let names = self.varying_names();
        if names.len() != values.len() {
            return Err(FeffitError::DimensionMismatch(format!(
                "expected {} varied values, got {}",
                names.len(),
                values.len()
            )));
        }
        for (name, &v) in names.iter().zip(values) {
            let i = self.index_of(name)?;
            self.params[i].set_computed_value(v);
        }
        self.update_expressions()
    }

    /// Evaluate every constraint expression, dependencies first
    pub fn update_expressions(&mut self) -> Result<()> {
        for k in 0..self.graph.order.len() {
            let (i, value) = {
                let (i, expr) = &self.graph.order[k];
                let value = expr.evaluate(&*self).map_err(|e| {
                    ParameterError::ExpressionEvaluation {
                        name: self.params[*i].name().to_string(),
                        message: e.to_string(),
                    }
                })?;
                (*i, value)
            };
            if !value.is_finite() {
                return Err(FeffitError::InvalidComputation(format!(
                    "expression for '{}' evaluated to {}",
                    self.params[i].name(),
                    value
                )));
            }
            self.params[i].set_computed_value(value);
        }
        Ok(())
    }

    /// Evaluate an arbitrary expression against the current values
    pub fn eval_expression(&self, expr: &str) -> Result<f64> {
        Ok(Expression::parse(expr)?.evaluate(self)?)
    }

    /// Restore every parameter to its initial value
    pub fn reset(&mut self) -> Result<()> {
        for p in &mut self.params {
            p.reset();
        }
        self.update_expressions()
    }

    /// Store standard errors and correlations on the named parameter
    pub(crate) fn set_fit_statistics(
        &mut self,
        name: &str,
        stderr: Option<f64>,
        correl: Vec<(String, f64)>,
    ) -> Result<()> {
        let i = self.index_of(name)?;
        self.params[i].stderr = stderr;
        self.params[i].correl = correl.into_iter().collect();
        Ok(())
    }

    /// Values of every parameter with gradients over the varied parameters
    ///
    /// Varied parameters carry unit gradients, fixed parameters are constants and
    /// constrained parameters are evaluated through the graph.
    pub fn uncertain_values(&self) -> Result<UncertainValues> {
        let varying = self.varying_names();
        let n = varying.len();
        let mut values = HashMap::with_capacity(self.params.len());

        for p in &self.params {
            let value = match varying.iter().position(|v| v == p.name()) {
                Some(pos) => Uncertain::variable(p.value(), pos, n),
                None => Uncertain::constant(p.value()),
            };
            values.insert(p.name().to_string(), value);
        }

        let mut scope = UncertainValues { values };
        for (i, expr) in &self.graph.order {
            let value: Uncertain = expr.evaluate_as(&scope)?;
            scope
                .values
                .insert(self.params[*i].name().to_string(), value);
        }
        Ok(scope)
    }

    /// Parse every expression, check references and order the graph
    fn rebuild_graph(&mut self) -> Result<()> {
        let mut compiled: HashMap<usize, Expression> = HashMap::new();
        let mut deps: HashMap<usize, Vec<usize>> = HashMap::new();

        for (i, p) in self.params.iter().enumerate() {
            let Some(text) = p.expr() else { continue };
            let expr = Expression::parse(text).map_err(|e| {
                FeffitError::InvalidExpression(format!("'{}' for '{}': {}", text, p.name(), e))
            })?;

            for function in expr.functions() {
                if !BUILTIN_FUNCTIONS.contains(&function.as_str()) {
                    return Err(FeffitError::InvalidExpression(format!(
                        "unknown function '{}' in expression for '{}'",
                        function,
                        p.name()
                    )));
                }
            }

            let mut refs = Vec::new();
            for var in expr.variables() {
                match self.index.get(&var) {
                    Some(&j) => refs.push(j),
                    None if constant_value(&var).is_some() => {}
                    None => {
                        return Err(FeffitError::UnresolvedParameter {
                            name: var,
                            owner: p.name().to_string(),
                        })
                    }
                }
            }
            deps.insert(i, refs);
            compiled.insert(i, expr);
        }

        let mut marks = vec![Mark::Unvisited; self.params.len()];
        let mut stack = Vec::new();
        let mut order = Vec::new();
        for i in 0..self.params.len() {
            if compiled.contains_key(&i) {
                self.visit(i, &deps, &mut marks, &mut stack, &mut order)?;
            }
        }

        self.graph.order = order
            .into_iter()
            .filter_map(|i| compiled.remove(&i).map(|expr| (i, expr)))
            .collect();
        Ok(())
    }

    /// Depth-first post-order visit; dependencies end up before their users
    fn visit(
        &self,
        i: usize,
        deps: &HashMap<usize, Vec<usize>>,
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> Result<()> {
        match marks[i] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                let start = stack.iter().position(|&s| s == i).unwrap_or(0);
                let mut cycle: Vec<&str> =
                    stack[start..].iter().map(|&s| self.params[s].name()).collect();
                cycle.push(self.params[i].name());
                return Err(FeffitError::CircularExpression(cycle.join(" -> ")));
            }
            Mark::Unvisited => {}
        }

        marks[i] = Mark::InProgress;
        stack.push(i);
        if let Some(refs) = deps.get(&i) {
            for &j in refs {
                if deps.contains_key(&j) {
                    self.visit(j, deps, marks, stack, order)?;
                }
            }
        }
        stack.pop();
        marks[i] = Mark::Done;
        order.push(i);
        Ok(())
    }

    /// Serialize the parameters to a JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.params)?)
    }

    /// Rebuild a parameter set from JSON written by [`FitParameterSet::to_json`]
    pub fn from_json(json: &str) -> Result<Self> {
        let params: Vec<Parameter> = serde_json::from_str(json)?;
        Self::from_parameters(params)
    }

    /// Save the parameters to a JSON file
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &self.params)?;
        Ok(())
    }

    /// Load parameters from a JSON file
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let params: Vec<Parameter> = serde_json::from_reader(reader)?;
        Self::from_parameters(params)
    }
}

impl EvaluationContext for FitParameterSet {
    fn get_variable(&self, name: &str) -> ExprResult<f64> {
        self.value(name)
            .ok_or_else(|| ExpressionError::UndefinedVariable {
                name: name.to_string(),
            })
    }

    fn has_variable(&self, name: &str) -> bool {
        self.contains(name)
    }

    fn variable_names(&self) -> Vec<String> {
        self.names()
    }
}

/// Parameter values carrying gradients, produced by [`FitParameterSet::uncertain_values`]
#[derive(Debug, Clone, Default)]
pub struct UncertainValues {
    values: HashMap<String, Uncertain>,
}

impl UncertainValues {
    pub fn get(&self, name: &str) -> Option<&Uncertain> {
        self.values.get(name)
    }
}

impl EvaluationContext<Uncertain> for UncertainValues {
    fn get_variable(&self, name: &str) -> ExprResult<Uncertain> {
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| ExpressionError::UndefinedVariable {
                name: name.to_string(),
            })
    }

    fn has_variable(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    fn variable_names(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr2;

    fn sample_set() -> FitParameterSet {
        let mut params = FitParameterSet::new();
        params.add_bounded("amp", 0.9, 0.0, 2.0).unwrap();
        params.add_var("e0", 1.0).unwrap();
        params.add_var("sig2", 0.003).unwrap();
        params.add_expr("sig2_2", "2 * sig2").unwrap();
        params.add_expr("sig2_3", "sig2_2 + sig2").unwrap();
        params.add_fixed("deg", 6.0).unwrap();
        params
    }

    #[test]
    fn test_insertion_order_is_kept() {
        let params = sample_set();
        assert_eq!(
            params.names(),
            vec!["amp", "e0", "sig2", "sig2_2", "sig2_3", "deg"]
        );
        assert_eq!(params.varying_names(), vec!["amp", "e0", "sig2"]);
    }

    #[test]
    fn test_constraints_follow_updates() {
        let mut params = sample_set();
        assert_relative_eq!(params.value("sig2_3").unwrap(), 0.009, epsilon = 1e-15);

        params.set_value("sig2", 0.005).unwrap();
        assert_relative_eq!(params.value("sig2_2").unwrap(), 0.010, epsilon = 1e-15);
        assert_relative_eq!(params.value("sig2_3").unwrap(), 0.015, epsilon = 1e-15);
    }

    #[test]
    fn test_unresolved_name_rejected() {
        let mut params = sample_set();
        let err = params.add_expr("bad", "sig2 + missing").unwrap_err();
        match err {
            FeffitError::UnresolvedParameter { name, owner } => {
                assert_eq!(name, "missing");
                assert_eq!(owner, "bad");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!params.contains("bad"));
    }

    #[test]
    fn test_cycle_rejected_and_rolled_back() {
        let mut params = sample_set();
        let err = params.set_expr("sig2", Some("sig2_3 / 3")).unwrap_err();
        assert!(matches!(err, FeffitError::CircularExpression(_)));
        assert!(params.get("sig2").unwrap().expr().is_none());
        assert!(params.get("sig2").unwrap().vary());

        let mut params = FitParameterSet::new();
        let err = params.add_expr("a", "a + 1").unwrap_err();
        assert!(matches!(err, FeffitError::CircularExpression(_)));
        assert!(params.is_empty());
    }

    #[test]
    fn test_internal_round_trip() {
        let mut params = sample_set();
        let internal = params.varying_internal_values().unwrap();
        params.update_from_internal(internal.as_slice().unwrap()).unwrap();
        assert_relative_eq!(params.value("amp").unwrap(), 0.9, epsilon = 1e-12);
        assert_relative_eq!(params.value("sig2_2").unwrap(), 0.006, epsilon = 1e-12);
        assert!(params.update_from_internal(&[1.0]).is_err());
    }

    #[test]
    fn test_uncertain_values_propagate() {
        let params = sample_set();
        let uncertain = params.uncertain_values().unwrap();
        let sig2_3 = uncertain.get("sig2_3").unwrap();
        assert_eq!(sig2_3.gradient, vec![0.0, 0.0, 3.0]);

        let covar = arr2(&[[0.01, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1e-6]]);
        assert_relative_eq!(sig2_3.std_dev(&covar), 3e-3, epsilon = 1e-12);
        assert!(uncertain.get("deg").unwrap().is_constant());
    }

    #[test]
    fn test_json_round_trip() {
        let params = sample_set();
        let json = params.to_json().unwrap();
        let restored = FitParameterSet::from_json(&json).unwrap();
        assert_eq!(restored.names(), params.names());
        assert_eq!(restored.get("sig2_2").unwrap().expr(), Some("2 * sig2"));
        assert_eq!(restored.get("amp").unwrap().max(), 2.0);
    }

    #[test]
    fn test_duplicate_and_invalid_names() {
        let mut params = sample_set();
        assert!(params.add_var("amp", 1.0).is_err());
        assert!(params.add_var("2amp", 1.0).is_err());
        assert_eq!(params.len(), 6);
    }
}

//! Expression parsing and evaluation for parameter constraints
//!
//! Constraint expressions are parsed once into an [`Expression`] tree and then
//! evaluated many times. Evaluation is generic over [`ExprValue`], so the same
//! tree can produce a plain `f64` during a fit and a value with a gradient
//! (see [`crate::uncertainty::Uncertain`]) when propagating uncertainties.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, multispace0},
    combinator::{recognize, value},
    multi::{many0, separated_list1},
    number::complete::double,
    sequence::{delimited, pair},
    IResult, Parser,
};
use std::fmt;
use thiserror::Error;

/// Error that can occur during expression parsing or evaluation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Failed to parse expression: {message}")]
    ParseError { message: String },

    #[error("Undefined variable: {name}")]
    UndefinedVariable { name: String },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("Undefined function: {name}")]
    UndefinedFunction { name: String },
}

/// Result type for expression evaluation
pub type ExprResult<T> = Result<T, ExpressionError>;

/// Functions understood by every evaluation context.
pub const BUILTIN_FUNCTIONS: &[&str] = &[
    "sin", "cos", "tan", "asin", "acos", "atan", "sinh", "cosh", "tanh", "exp", "log", "ln",
    "log10", "sqrt", "abs", "max", "min",
];

/// Named constants available when the context does not define the name itself.
pub fn constant_value(name: &str) -> Option<f64> {
    match name {
        "pi" => Some(std::f64::consts::PI),
        _ => None,
    }
}

/// Expression AST node
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Constant number
    Number(f64),

    /// Variable reference
    Variable(String),

    /// Unary operations
    Unary(UnaryOp, Box<Expression>),

    /// Binary operations
    Binary(BinaryOp, Box<Expression>, Box<Expression>),

    /// Function call
    Function(String, Vec<Expression>),
}

/// Unary operations
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    /// Negation (-)
    Neg,
}

/// Binary operations
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    /// Addition (+)
    Add,

    /// Subtraction (-)
    Sub,

    /// Multiplication (*)
    Mul,

    /// Division (/)
    Div,

    /// Power (^ or **)
    Pow,
}

/// A scalar type an expression can be evaluated to.
///
/// Every operation is expressed through the chain rule: `chain` applies a
/// one-argument function whose derivative is known, `combine` merges several
/// arguments given the partial derivatives of the result with respect to each.
/// Plain `f64` ignores the derivatives.
pub trait ExprValue: Clone + fmt::Debug {
    /// Whether partial derivatives of context functions must be computed.
    const TRACKS_GRADIENT: bool;

    /// A value with no dependence on any parameter.
    fn constant(value: f64) -> Self;

    /// The nominal value.
    fn value(&self) -> f64;

    /// Result of `f(self)` where `f(self) = value` and `f'(self) = derivative`.
    fn chain(&self, value: f64, derivative: f64) -> Self;

    /// Result of `f(args)` where `∂f/∂args[i] = partials[i]`.
    fn combine(args: &[Self], value: f64, partials: &[f64]) -> Self;
}

impl ExprValue for f64 {
    const TRACKS_GRADIENT: bool = false;

    fn constant(value: f64) -> Self {
        value
    }

    fn value(&self) -> f64 {
        *self
    }

    fn chain(&self, value: f64, _derivative: f64) -> Self {
        value
    }

    fn combine(_args: &[Self], value: f64, _partials: &[f64]) -> Self {
        value
    }
}

/// Context for expression evaluation, providing variable values
pub trait EvaluationContext<T: ExprValue = f64> {
    /// Get the value of a variable
    fn get_variable(&self, name: &str) -> ExprResult<T>;

    /// Check if a variable exists
    fn has_variable(&self, name: &str) -> bool;

    /// Get the names of all variables
    fn variable_names(&self) -> Vec<String>;

    /// Call a function supplied by the context.
    ///
    /// Returns `None` when the context does not know `name`.
    fn call_function(&self, _name: &str, _args: &[f64]) -> Option<ExprResult<f64>> {
        None
    }

    /// Check if the context supplies a function
    fn has_function(&self, _name: &str) -> bool {
        false
    }
}

fn expect_args<T>(name: &str, args: &[T], count: usize) -> ExprResult<()> {
    if args.len() != count {
        return Err(ExpressionError::InvalidOperation {
            message: format!(
                "{}() requires {} argument(s), got {}",
                name,
                count,
                args.len()
            ),
        });
    }
    Ok(())
}

/// Apply a one-argument builtin, returning `None` for unknown names.
fn apply_unary<T: ExprValue>(name: &str, x: &T) -> Option<ExprResult<T>> {
    let v = x.value();
    let result = match name {
        "sin" => x.chain(v.sin(), v.cos()),
        "cos" => x.chain(v.cos(), -v.sin()),
        "tan" => x.chain(v.tan(), 1.0 / v.cos().powi(2)),
        "asin" => x.chain(v.asin(), 1.0 / (1.0 - v * v).sqrt()),
        "acos" => x.chain(v.acos(), -1.0 / (1.0 - v * v).sqrt()),
        "atan" => x.chain(v.atan(), 1.0 / (1.0 + v * v)),
        "sinh" => x.chain(v.sinh(), v.cosh()),
        "cosh" => x.chain(v.cosh(), v.sinh()),
        "tanh" => x.chain(v.tanh(), 1.0 - v.tanh().powi(2)),
        "exp" => x.chain(v.exp(), v.exp()),
        "log" | "ln" => {
            if v <= 0.0 {
                return Some(Err(ExpressionError::InvalidOperation {
                    message: format!("{}() of non-positive value {}", name, v),
                }));
            }
            x.chain(v.ln(), 1.0 / v)
        }
        "log10" => {
            if v <= 0.0 {
                return Some(Err(ExpressionError::InvalidOperation {
                    message: format!("log10() of non-positive value {}", v),
                }));
            }
            x.chain(v.log10(), 1.0 / (v * std::f64::consts::LN_10))
        }
        "sqrt" => {
            if v < 0.0 {
                return Some(Err(ExpressionError::InvalidOperation {
                    message: format!("sqrt() of negative value {}", v),
                }));
            }
            let root = v.sqrt();
            let derivative = if root > 0.0 { 0.5 / root } else { 0.0 };
            x.chain(root, derivative)
        }
        "abs" => x.chain(v.abs(), if v < 0.0 { -1.0 } else { 1.0 }),
        _ => return None,
    };
    Some(Ok(result))
}

impl Expression {
    /// Parse an expression from a string
    pub fn parse(input: &str) -> ExprResult<Self> {
        match expr_parser(input.trim()) {
            Ok((remainder, expr)) => {
                // Make sure the entire input was consumed
                if remainder.trim().is_empty() {
                    Ok(expr)
                } else {
                    Err(ExpressionError::ParseError {
                        message: format!("Unexpected trailing characters: '{}'", remainder),
                    })
                }
            }
            Err(e) => Err(ExpressionError::ParseError {
                message: format!("{:?}", e),
            }),
        }
    }

    /// Evaluate the expression to a plain number
    pub fn evaluate<C: EvaluationContext + ?Sized>(&self, context: &C) -> ExprResult<f64> {
        self.evaluate_as(context)
    }

    /// Evaluate the expression to any [`ExprValue`] supplied by the context
    pub fn evaluate_as<T, C>(&self, context: &C) -> ExprResult<T>
    where
        T: ExprValue,
        C: EvaluationContext<T> + ?Sized,
    {
        match self {
            Self::Number(n) => Ok(T::constant(*n)),

            Self::Variable(name) => {
                if !context.has_variable(name) {
                    if let Some(c) = constant_value(name) {
                        return Ok(T::constant(c));
                    }
                }
                context.get_variable(name)
            }

            Self::Unary(op, expr) => {
                let inner: T = expr.evaluate_as(context)?;
                match op {
                    UnaryOp::Neg => Ok(inner.chain(-inner.value(), -1.0)),
                }
            }

            Self::Binary(op, left, right) => {
                let lhs: T = left.evaluate_as(context)?;
                let rhs: T = right.evaluate_as(context)?;
                let (a, b) = (lhs.value(), rhs.value());
                let args = [lhs, rhs];

                match op {
                    BinaryOp::Add => Ok(T::combine(&args, a + b, &[1.0, 1.0])),
                    BinaryOp::Sub => Ok(T::combine(&args, a - b, &[1.0, -1.0])),
                    BinaryOp::Mul => Ok(T::combine(&args, a * b, &[b, a])),
                    BinaryOp::Div => {
                        if b == 0.0 {
                            Err(ExpressionError::DivisionByZero)
                        } else {
                            Ok(T::combine(&args, a / b, &[1.0 / b, -a / (b * b)]))
                        }
                    }
                    BinaryOp::Pow => {
                        let result = a.powf(b);
                        let d_base = b * a.powf(b - 1.0);
                        let d_exp = if a > 0.0 { result * a.ln() } else { 0.0 };
                        let partials = [
                            if d_base.is_finite() { d_base } else { 0.0 },
                            if d_exp.is_finite() { d_exp } else { 0.0 },
                        ];
                        Ok(T::combine(&args, result, &partials))
                    }
                }
            }

            Self::Function(name, args) => {
                let mut evaluated: Vec<T> = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(arg.evaluate_as(context)?);
                }
                self.call(name, evaluated, context)
            }
        }
    }

    fn call<T, C>(&self, name: &str, args: Vec<T>, context: &C) -> ExprResult<T>
    where
        T: ExprValue,
        C: EvaluationContext<T> + ?Sized,
    {
        match name {
            "max" | "min" => {
                if args.len() < 2 {
                    return Err(ExpressionError::InvalidOperation {
                        message: format!(
                            "{}() requires at least 2 arguments, got {}",
                            name,
                            args.len()
                        ),
                    });
                }
                let pick_max = name == "max";
                let mut best = &args[0];
                for candidate in &args[1..] {
                    let better = if pick_max {
                        candidate.value() > best.value()
                    } else {
                        candidate.value() < best.value()
                    };
                    if better {
                        best = candidate;
                    }
                }
                return Ok(best.clone());
            }
            _ if BUILTIN_FUNCTIONS.contains(&name) => {
                expect_args(name, &args, 1)?;
                if let Some(result) = apply_unary(name, &args[0]) {
                    return result;
                }
            }
            _ => {}
        }

        let values: Vec<f64> = args.iter().map(T::value).collect();
        let result = match context.call_function(name, &values) {
            Some(result) => result?,
            None => {
                return Err(ExpressionError::UndefinedFunction {
                    name: name.to_string(),
                })
            }
        };

        if !T::TRACKS_GRADIENT {
            return Ok(T::constant(result));
        }

        // Central differences for functions supplied by the context
        let mut partials = Vec::with_capacity(values.len());
        for i in 0..values.len() {
            let step = 1e-6 * values[i].abs().max(1e-3);
            let mut shifted = values.clone();
            shifted[i] = values[i] + step;
            let upper = context.call_function(name, &shifted).unwrap_or(Ok(result))?;
            shifted[i] = values[i] - step;
            let lower = context.call_function(name, &shifted).unwrap_or(Ok(result))?;
            partials.push((upper - lower) / (2.0 * step));
        }
        Ok(T::combine(&args, result, &partials))
    }

    /// Find all variable names used in the expression
    pub fn variables(&self) -> Vec<String> {
        let mut vars = Vec::new();
        self.collect_variables(&mut vars);
        vars.sort();
        vars.dedup();
        vars
    }

    /// Find all function names called in the expression
    pub fn functions(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_functions(&mut names);
        names.sort();
        names.dedup();
        names
    }

    /// Recursively collect all variable names used in the expression
    fn collect_variables(&self, vars: &mut Vec<String>) {
        match self {
            Self::Number(_) => {}

            Self::Variable(name) => {
                vars.push(name.clone());
            }

            Self::Unary(_, expr) => {
                expr.collect_variables(vars);
            }

            Self::Binary(_, left, right) => {
                left.collect_variables(vars);
                right.collect_variables(vars);
            }

            Self::Function(_, args) => {
                for arg in args {
                    arg.collect_variables(vars);
                }
            }
        }
    }

    fn collect_functions(&self, names: &mut Vec<String>) {
        match self {
            Self::Number(_) | Self::Variable(_) => {}
            Self::Unary(_, expr) => expr.collect_functions(names),
            Self::Binary(_, left, right) => {
                left.collect_functions(names);
                right.collect_functions(names);
            }
            Self::Function(name, args) => {
                names.push(name.clone());
                for arg in args {
                    arg.collect_functions(names);
                }
            }
        }
    }
}

// Parser functions using nom

/// Parse an identifier (variable or function name)
fn identifier(input: &str) -> IResult<&str, String> {
    let mut parser = recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ));

    let (input, matched) = parser.parse(input)?;
    Ok((input, matched.to_string()))
}

/// Parse a comma-separated list of expressions (for function arguments)
fn args_list(input: &str) -> IResult<&str, Vec<Expression>> {
    separated_list1(delimited(multispace0, char(','), multispace0), expr_parser).parse(input)
}

/// Parse a function call
fn function_call(input: &str) -> IResult<&str, Expression> {
    let (input, name) = identifier(input)?;
    let (input, _) = multispace0.parse(input)?;
    let (input, _) = char('(').parse(input)?;
    let (input, _) = multispace0.parse(input)?;

    // Handle empty arguments case
    if let Ok((input, _)) = close_paren(input) {
        return Ok((input, Expression::Function(name, vec![])));
    }

    let (input, args) = args_list(input)?;
    let (input, _) = multispace0.parse(input)?;
    let (input, _) = close_paren(input)?;

    Ok((input, Expression::Function(name, args)))
}

fn close_paren(input: &str) -> IResult<&str, char> {
    char(')').parse(input)
}

/// Parse an unsigned number; signs are handled as unary operators
fn number(input: &str) -> IResult<&str, Expression> {
    match input.chars().next() {
        Some(c) if c.is_ascii_digit() || c == '.' => {
            let (input, num) = double(input)?;
            Ok((input, Expression::Number(num)))
        }
        _ => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Float,
        ))),
    }
}

/// Parse a variable reference
fn variable(input: &str) -> IResult<&str, Expression> {
    let (input, var_name) = identifier(input)?;
    Ok((input, Expression::Variable(var_name)))
}

/// Parse a parenthesized expression
fn parens(input: &str) -> IResult<&str, Expression> {
    let (input, _) = char('(').parse(input)?;
    let (input, expr) = expr_parser(input)?;
    let (input, _) = multispace0.parse(input)?;
    let (input, _) = close_paren(input)?;
    Ok((input, expr))
}

/// Parse a primary expression (number, function call, variable or parenthesized expression)
fn primary(input: &str) -> IResult<&str, Expression> {
    alt((number, function_call, variable, parens)).parse(input)
}

fn pow_op(input: &str) -> IResult<&str, &str> {
    alt((tag("**"), tag("^"))).parse(input)
}

fn mul_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Mul, char('*')),
        value(BinaryOp::Div, char('/')),
    ))
    .parse(input)
}

fn add_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Add, char('+')),
        value(BinaryOp::Sub, char('-')),
    ))
    .parse(input)
}

/// Parse a power expression (expr ^ expr or expr ** expr), right associative
fn power(input: &str) -> IResult<&str, Expression> {
    let (input, base) = primary(input)?;
    let (rest, _) = multispace0.parse(input)?;

    match pow_op(rest) {
        Ok((after_op, _)) => {
            let (after_right, exponent) = factor(after_op)?;
            Ok((
                after_right,
                Expression::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)),
            ))
        }
        Err(_) => Ok((input, base)),
    }
}

/// Parse a signed factor (-expr, +expr); binds looser than a power
fn factor(input: &str) -> IResult<&str, Expression> {
    let (input, _) = multispace0.parse(input)?;

    if let Ok((rest, op)) = add_op(input) {
        let (rest, inner) = factor(rest)?;
        return Ok(match op {
            BinaryOp::Sub => (rest, Expression::Unary(UnaryOp::Neg, Box::new(inner))),
            _ => (rest, inner),
        });
    }
    power(input)
}

/// Parse a multiplicative expression (expr * expr, expr / expr), left associative
fn term(input: &str) -> IResult<&str, Expression> {
    let (mut input, mut left) = factor(input)?;

    loop {
        let (rest, _) = multispace0.parse(input)?;
        match mul_op(rest) {
            Ok((after_op, op)) => {
                let (remaining, right) = factor(after_op)?;
                left = Expression::Binary(op, Box::new(left), Box::new(right));
                input = remaining;
            }
            Err(_) => return Ok((input, left)),
        }
    }
}

/// Parse an additive expression (expr + expr, expr - expr), left associative
fn expr_parser(input: &str) -> IResult<&str, Expression> {
    let (input, _) = multispace0.parse(input)?;
    let (mut input, mut left) = term(input)?;

    loop {
        let (rest, _) = multispace0.parse(input)?;
        match add_op(rest) {
            Ok((after_op, op)) => {
                let (remaining, right) = term(after_op)?;
                left = Expression::Binary(op, Box::new(left), Box::new(right));
                input = remaining;
            }
            Err(_) => return Ok((input, left)),
        }
    }
}

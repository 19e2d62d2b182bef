//! Tests for the Expression parsing and evaluation

use approx::assert_relative_eq;
use feffit_rs::parameters::expression::{Expression, ExpressionError};
use feffit_rs::parameters::FitParameterSet;
use feffit_rs::FeffitError;

#[test]
fn test_expression_parsing() {
    let expr = Expression::parse("42").unwrap();
    assert!(expr.variables().is_empty());

    let expr = Expression::parse("  (  x  +  y  )  *  z  ").unwrap();
    assert_eq!(expr.variables(), vec!["x", "y", "z"]);

    let expr = Expression::parse("max(a, b, c) + sqrt(d)").unwrap();
    assert_eq!(expr.variables(), vec!["a", "b", "c", "d"]);
    assert_eq!(expr.functions(), vec!["max", "sqrt"]);

    assert!(Expression::parse("x +").is_err());
    assert!(Expression::parse("(x + y").is_err());
}

#[test]
fn test_expression_evaluation() {
    let mut ctx = FitParameterSet::new();
    ctx.add_fixed("x", 2.0).unwrap();
    ctx.add_fixed("y", 3.0).unwrap();

    let eval = |text: &str| Expression::parse(text).unwrap().evaluate(&ctx).unwrap();
    assert_relative_eq!(eval("x + y * 2"), 8.0);
    assert_relative_eq!(eval("(x + y) * 2"), 10.0);
    assert_relative_eq!(eval("x^2"), 4.0);
    assert_relative_eq!(eval("x**3"), 8.0);
    assert_relative_eq!(eval("-x + 1"), -1.0);
    assert_relative_eq!(eval("exp(0) + sqrt(16)"), 5.0);
    assert_relative_eq!(eval("min(x, y) / max(x, y)"), 2.0 / 3.0);
    assert_relative_eq!(eval("sin(pi / 2)"), 1.0, epsilon = 1e-15);

    let err = Expression::parse("x + missing").unwrap().evaluate(&ctx).unwrap_err();
    assert_eq!(
        err,
        ExpressionError::UndefinedVariable {
            name: "missing".to_string()
        }
    );
    assert!(matches!(
        Expression::parse("nosuch(x)").unwrap().evaluate(&ctx),
        Err(ExpressionError::UndefinedFunction { .. })
    ));
}

#[test]
fn test_shell_constraints() {
    // Second shell sharing E0 and scaling sigma2 with the first
    let mut params = FitParameterSet::new();
    params.add_var("amp", 0.9).unwrap();
    params.add_var("e0", 1.5).unwrap();
    params.add_var("ss1", 0.004).unwrap();
    params.add_fixed("ratio", 1.5).unwrap();
    params.add_expr("ss2", "ss1 * ratio").unwrap();
    params.add_expr("e0_2", "e0").unwrap();

    assert_eq!(params.varying_names(), vec!["amp", "e0", "ss1"]);
    assert_relative_eq!(params.value("ss2").unwrap(), 0.006, epsilon = 1e-15);

    params.set_value("ss1", 0.006).unwrap();
    assert_relative_eq!(params.value("ss2").unwrap(), 0.009, epsilon = 1e-15);
    assert_relative_eq!(params.eval_expression("ss2 / ss1").unwrap(), 1.5, epsilon = 1e-12);

    assert!(matches!(
        params.set_expr("ss1", Some("ss2 / ratio")),
        Err(FeffitError::CircularExpression(_))
    ));
    assert_relative_eq!(params.value("ss1").unwrap(), 0.006);
}

//! # Parameter System
//!
//! Named fit parameters shared by every path and dataset of a fit, in the
//! manner of lmfit-py.
//!
//! ## Key Features
//!
//! - **Named Parameters**: values are addressed by name from path expressions
//! - **Bounds Constraints**: min/max bounds handled through a smooth internal transform
//! - **Constraint Expressions**: parameters computed from other parameters, validated
//!   for unknown names and cycles when they are added
//! - **Serialization Support**: save and load parameter sets as JSON
//!
//! ## Example Usage
//!
//! ```rust
//! use feffit_rs::parameters::FitParameterSet;
//!
//! let mut params = FitParameterSet::new();
//! params.add_bounded("amp", 0.9, 0.0, 2.0).unwrap();
//! params.add_var("sig2", 0.003).unwrap();
//! params.add_expr("sig2_2", "2 * sig2").unwrap();
//!
//! assert_eq!(params.varying_names(), vec!["amp", "sig2"]);
//! assert!((params.value("sig2_2").unwrap() - 0.006).abs() < 1e-15);
//! ```

pub mod bounds;
pub mod expression;
pub mod parameter;
pub mod parameter_set;

pub use bounds::{Bounds, BoundsError, BoundsTransform};
pub use expression::{EvaluationContext, ExprResult, ExprValue, Expression, ExpressionError};
pub use parameter::{Parameter, ParameterError};
pub use parameter_set::{FitParameterSet, UncertainValues};

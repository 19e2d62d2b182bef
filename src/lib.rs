//! # feffit-rs
//!
//! `feffit-rs` fits EXAFS spectra with theoretical scattering paths computed by
//! Feff, using XAFS Fourier transforms and Levenberg-Marquardt least squares.
//!
//! The library provides:
//! - A parser for Feff `feffNNNN.dat` path files
//! - chi(k) of a path from its path parameters, with Einstein and correlated
//!   Debye models for the mean-square displacement
//! - XAFS window functions and forward/reverse Fourier transforms
//! - Simultaneous fits of several datasets in k, R or q space, sharing a
//!   parameter set with bounds and constraint expressions
//! - Standard errors and correlations rescaled to the number of independent
//!   points, propagated into constrained and path parameters
//!
//! ## Basic Usage
//!
//! ```no_run
//! use feffit_rs::parameters::FitParameterSet;
//! use feffit_rs::xafs::{feffit, feffit_report, FeffPath, FeffitConfig, FeffitDataSet,
//!     PathParameters, TransformConfig};
//! use ndarray::Array1;
//!
//! # fn main() -> feffit_rs::Result<()> {
//! let mut params = FitParameterSet::new();
//! params.add_var("amp", 1.0)?;
//! params.add_var("enot", 0.0)?;
//! params.add_var("delr", 0.0)?;
//! params.add_bounded("ss2", 0.003, 0.0, 0.05)?;
//!
//! let path = FeffPath::from_file(
//!     "feff0001.dat",
//!     PathParameters::new()
//!         .with_s02("amp")
//!         .with_e0("enot")
//!         .with_deltar("delr")
//!         .with_sigma2("ss2"),
//! )?;
//!
//! let k = Array1::linspace(0.0, 16.0, 321);
//! let chi = Array1::zeros(321);
//! let transform = TransformConfig::new().with_k_range(3.0, 14.0).with_r_range(1.4, 3.0);
//! let mut datasets = vec![FeffitDataSet::new(k, chi, vec![path], transform)?];
//!
//! let result = feffit(&mut params, &mut datasets, &FeffitConfig::default())?;
//! println!("{}", feffit_report(&result, 0.1, true));
//! # Ok(())
//! # }
//! ```

pub mod error;

// Parameter system
pub mod parameters;

pub mod lm;
pub mod problem;
pub mod uncertainty;
pub mod utils;

// EXAFS paths, transforms and the fit driver
pub mod xafs;

// Re-exports for convenience
pub use error::{FeffitError, Result};
pub use lm::{LevenbergMarquardt, LmConfig};
pub use parameters::FitParameterSet;
pub use problem::Problem;
pub use xafs::{feffit, feffit_report, FeffPath, FeffitConfig, FeffitDataSet, FitResult};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

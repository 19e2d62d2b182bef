//! Utility functions and helpers for the feffit-rs library.

pub mod finite_difference;
pub mod interp;
pub mod matrix_convert;

pub use interp::{interp_linear, CubicSpline};
pub use matrix_convert::{
    nalgebra_to_ndarray, nalgebra_vec_to_ndarray, ndarray_to_nalgebra, ndarray_vec_to_nalgebra,
};

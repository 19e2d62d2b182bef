//! One-dimensional interpolation on tabulated data.
//!
//! [`CubicSpline`] is an interpolating cubic spline with not-a-knot end
//! conditions that extrapolates with its end polynomials. [`interp_linear`]
//! is piecewise-linear interpolation that holds the end values outside the table.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, ArrayView1};

use crate::error::{FeffitError, Result};

/// Index of the interval `[x[i], x[i+1]]` used for `value`, clamped to the table.
fn interval(x: &[f64], value: f64) -> usize {
    let upper = x.partition_point(|&xi| xi <= value);
    upper.saturating_sub(1).min(x.len().saturating_sub(2))
}

fn check_table(x: &[f64], y: &[f64], min_len: usize) -> Result<()> {
    if x.len() != y.len() {
        return Err(FeffitError::DimensionMismatch(format!(
            "interpolation table has {} abscissae and {} ordinates",
            x.len(),
            y.len()
        )));
    }
    if x.len() < min_len {
        return Err(FeffitError::InvalidInput(format!(
            "interpolation needs at least {} points, got {}",
            min_len,
            x.len()
        )));
    }
    if x.windows(2).any(|w| w[1] <= w[0]) {
        return Err(FeffitError::InvalidInput(
            "interpolation abscissae must be strictly increasing".to_string(),
        ));
    }
    Ok(())
}

/// Interpolating cubic spline through `(x, y)`
#[derive(Debug, Clone)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Second derivatives at the knots
    m: Vec<f64>,
}

impl CubicSpline {
    /// Fit the spline; tables of fewer than four points use natural end conditions.
    pub fn new(x: ArrayView1<f64>, y: ArrayView1<f64>) -> Result<Self> {
        let x = x.to_vec();
        let y = y.to_vec();
        check_table(&x, &y, 2)?;

        let n = x.len();
        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        let mut a = DMatrix::<f64>::zeros(n, n);
        let mut b = DVector::<f64>::zeros(n);

        for i in 1..n - 1 {
            a[(i, i - 1)] = h[i - 1];
            a[(i, i)] = 2.0 * (h[i - 1] + h[i]);
            a[(i, i + 1)] = h[i];
            b[i] = 6.0 * ((y[i + 1] - y[i]) / h[i] - (y[i] - y[i - 1]) / h[i - 1]);
        }

        if n >= 4 {
            // Continuous third derivative across the second and second-to-last knots
            a[(0, 0)] = h[1];
            a[(0, 1)] = -(h[0] + h[1]);
            a[(0, 2)] = h[0];
            a[(n - 1, n - 3)] = h[n - 2];
            a[(n - 1, n - 2)] = -(h[n - 3] + h[n - 2]);
            a[(n - 1, n - 1)] = h[n - 3];
        } else {
            a[(0, 0)] = 1.0;
            a[(n - 1, n - 1)] = 1.0;
        }

        let m = a.lu().solve(&b).ok_or(FeffitError::SingularMatrix)?;

        Ok(Self {
            x,
            y,
            m: m.iter().copied().collect(),
        })
    }

    /// Spline value at `value`
    pub fn eval(&self, value: f64) -> f64 {
        let i = interval(&self.x, value);
        let h = self.x[i + 1] - self.x[i];
        let left = self.x[i + 1] - value;
        let right = value - self.x[i];
        self.m[i] * left.powi(3) / (6.0 * h)
            + self.m[i + 1] * right.powi(3) / (6.0 * h)
            + (self.y[i] / h - self.m[i] * h / 6.0) * left
            + (self.y[i + 1] / h - self.m[i + 1] * h / 6.0) * right
    }

    /// Spline values at every point of `values`
    pub fn eval_array(&self, values: ArrayView1<f64>) -> Array1<f64> {
        values.mapv(|v| self.eval(v))
    }
}

/// Linear interpolation of `(xp, fp)` at `x`, holding the end values outside the table
pub fn interp_linear(x: ArrayView1<f64>, xp: ArrayView1<f64>, fp: ArrayView1<f64>) -> Result<Array1<f64>> {
    let xp = xp.to_vec();
    let fp = fp.to_vec();
    check_table(&xp, &fp, 1)?;

    let n = xp.len();
    Ok(x.mapv(|v| {
        if n == 1 || v <= xp[0] {
            fp[0]
        } else if v >= xp[n - 1] {
            fp[n - 1]
        } else {
            let i = interval(&xp, v);
            let t = (v - xp[i]) / (xp[i + 1] - xp[i]);
            fp[i] + t * (fp[i + 1] - fp[i])
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array1};

    #[test]
    fn test_spline_reproduces_cubic() {
        // Not-a-knot splines are exact for cubic polynomials, extrapolation included
        let f = |x: f64| 0.5 * x.powi(3) - 2.0 * x * x + x - 3.0;
        let x = Array1::linspace(0.0, 4.0, 9);
        let y = x.mapv(f);
        let spline = CubicSpline::new(x.view(), y.view()).unwrap();

        for &v in &[0.0, 0.3, 1.77, 2.5, 4.0, -0.5, 4.6] {
            assert_relative_eq!(spline.eval(v), f(v), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_spline_passes_through_knots() {
        let x = array![0.0, 0.7, 1.1, 2.0, 3.5, 4.0];
        let y = x.mapv(f64::sin);
        let spline = CubicSpline::new(x.view(), y.view()).unwrap();
        let at_knots = spline.eval_array(x.view());
        for (a, b) in at_knots.iter().zip(y.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_short_tables() {
        let x = array![0.0, 2.0];
        let y = array![1.0, 5.0];
        let spline = CubicSpline::new(x.view(), y.view()).unwrap();
        assert_relative_eq!(spline.eval(0.5), 2.0, epsilon = 1e-12);

        let unsorted = array![0.0, 2.0, 1.0];
        assert!(CubicSpline::new(unsorted.view(), unsorted.view()).is_err());
    }

    #[test]
    fn test_linear_clamps_at_ends() {
        let xp = array![1.0, 2.0, 4.0];
        let fp = array![10.0, 20.0, 0.0];
        let out = interp_linear(array![0.0, 1.5, 3.0, 4.0, 9.0].view(), xp.view(), fp.view()).unwrap();
        assert_eq!(out, array![10.0, 15.0, 10.0, 0.0, 0.0]);
    }
}

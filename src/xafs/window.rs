//! Fourier transform windows.
//!
//! A window is 1 on `[xmin + dx/2, xmax - dx2/2]`, tapers to 0 over `dx` and
//! `dx2` on either side, and is sampled on a uniform grid.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::error::{FeffitError, Result};

/// Window shape, identified by the first three letters of its name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WindowKind {
    /// sin² / cos² taper
    Hanning,
    /// Hanning taper whose widths are fractions of the window range
    FlatHanning,
    /// Gaussian of width `dx` centered in the window
    Gaussian,
    /// Kaiser-Bessel window rescaled to reach 0 at its ends
    Kaiser,
    /// Linear taper
    Parzen,
    /// Quadratic taper
    Welch,
    /// Single sine lobe over the window
    Sine,
    /// Kaiser-Bessel window normalized to 1 at its center and cut at its ends
    Bessel,
}

impl WindowKind {
    pub fn name(&self) -> &'static str {
        match self {
            WindowKind::Hanning => "hanning",
            WindowKind::FlatHanning => "fhanning",
            WindowKind::Gaussian => "gaussian",
            WindowKind::Kaiser => "kaiser",
            WindowKind::Parzen => "parzen",
            WindowKind::Welch => "welch",
            WindowKind::Sine => "sine",
            WindowKind::Bessel => "bessel",
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WindowKind {
    type Err = FeffitError;

    fn from_str(s: &str) -> Result<Self> {
        let code: String = s.trim().to_lowercase().chars().take(3).collect();
        match code.as_str() {
            "han" => Ok(WindowKind::Hanning),
            "fha" => Ok(WindowKind::FlatHanning),
            "gau" => Ok(WindowKind::Gaussian),
            "kai" => Ok(WindowKind::Kaiser),
            "par" => Ok(WindowKind::Parzen),
            "wel" => Ok(WindowKind::Welch),
            "sin" => Ok(WindowKind::Sine),
            "bes" => Ok(WindowKind::Bessel),
            _ => Err(FeffitError::InvalidWindowKind(s.to_string())),
        }
    }
}

impl TryFrom<String> for WindowKind {
    type Error = FeffitError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<WindowKind> for String {
    fn from(kind: WindowKind) -> Self {
        kind.name().to_string()
    }
}

/// Modified Bessel function of the first kind, order zero
pub fn bessel_i0(x: f64) -> f64 {
    let half_sq = 0.25 * x * x;
    let mut term = 1.0;
    let mut sum = 1.0;
    for k in 1..500 {
        term *= half_sq / (k * k) as f64;
        sum += term;
        if term < 1e-17 * sum {
            break;
        }
    }
    sum
}

/// Build a window on the uniform grid `x`
///
/// `dx2` defaults to `dx`. The result has the length of `x` and values in `[0, 1]`.
pub fn ftwindow(
    x: &Array1<f64>,
    xmin: f64,
    xmax: f64,
    dx: f64,
    dx2: Option<f64>,
    kind: WindowKind,
) -> Result<Array1<f64>> {
    let n = x.len();
    if n < 2 {
        return Err(FeffitError::InvalidInput(format!(
            "window grid needs at least 2 points, got {}",
            n
        )));
    }

    let mut dx1 = dx;
    let mut dx2 = dx2.unwrap_or(dx);
    let x_lo = x.iter().copied().fold(f64::INFINITY, f64::min);
    let x_hi = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let xstep = (x[n - 1] - x[0]) / (n - 1) as f64;
    let xeps = 1e-4 * xstep;
    let mut x1 = x_lo.max(xmin - dx1 / 2.0);
    let mut x2 = xmin + dx1 / 2.0 + xeps;
    let mut x3 = xmax - dx2 / 2.0 - xeps;
    let mut x4 = x_hi.min(xmax + dx2 / 2.0);

    match kind {
        WindowKind::FlatHanning => {
            dx1 = dx1.max(0.0);
            dx2 = dx2.min(1.0);
            x2 = x1 + xeps + dx1 * (xmax - xmin) / 2.0;
            x3 = x4 - xeps - dx2 * (xmax - xmin) / 2.0;
        }
        WindowKind::Gaussian => dx1 = dx1.max(xeps),
        _ => {}
    }

    let last = (n - 1) as i64;
    let index = |v: f64| (((v + xeps) / xstep) as i64).clamp(0, last) as usize;
    let (mut i1, i2, mut i3, i4) = (index(x1), index(x2), index(x3), index(x4));
    if i2 == i1 {
        i1 = i2.saturating_sub(1);
    }
    if i4 == i3 {
        i3 = i2.max(i4.saturating_sub(1));
    }

    x1 = x[i1];
    x2 = x[i2];
    x3 = x[i3];
    x4 = x[i4];
    if x1 == x2 {
        x2 += xeps;
    }
    if x3 == x4 {
        x4 += xeps;
    }

    let mut fwin = Array1::zeros(n);
    if i3 > i2 {
        fwin.slice_mut(ndarray::s![i2..i3]).fill(1.0);
    }

    match kind {
        WindowKind::Hanning | WindowKind::FlatHanning => {
            for i in i1..=i2 {
                fwin[i] = ((PI / 2.0) * (x[i] - x1) / (x2 - x1)).sin().powi(2);
            }
            for i in i3..=i4 {
                fwin[i] = ((PI / 2.0) * (x[i] - x3) / (x4 - x3)).cos().powi(2);
            }
        }
        WindowKind::Parzen => {
            for i in i1..=i2 {
                fwin[i] = (x[i] - x1) / (x2 - x1);
            }
            for i in i3..=i4 {
                fwin[i] = 1.0 - (x[i] - x3) / (x4 - x3);
            }
        }
        WindowKind::Welch => {
            for i in i1..=i2 {
                fwin[i] = 1.0 - ((x[i] - x2) / (x2 - x1)).powi(2);
            }
            for i in i3..=i4 {
                fwin[i] = 1.0 - ((x[i] - x3) / (x4 - x3)).powi(2);
            }
        }
        WindowKind::Kaiser | WindowKind::Bessel => {
            let cen = (x4 + x1) / 2.0;
            let wid = (x4 - x1) / 2.0;
            let arg = x.mapv(|v| (1.0 - (v - cen).powi(2) / (wid * wid)).max(0.0));
            if kind == WindowKind::Bessel {
                let norm = bessel_i0(dx);
                fwin = Array1::from_shape_fn(n, |i| {
                    if x[i] <= x1 || x[i] >= x4 {
                        0.0
                    } else {
                        bessel_i0(dx * arg[i].sqrt()) / norm
                    }
                });
            } else {
                let scale = (bessel_i0(dx) - 1.0).max(1e-10);
                fwin = arg.mapv(|a| (bessel_i0(dx * a.sqrt()) - 1.0) / scale);
            }
        }
        WindowKind::Sine => {
            for i in i1..=i4 {
                fwin[i] = (PI * (x4 - x[i]) / (x4 - x1)).sin();
            }
        }
        WindowKind::Gaussian => {
            let cen = (x4 + x1) / 2.0;
            fwin = x.mapv(|v| (-(v - cen).powi(2) / (2.0 * dx1 * dx1)).exp());
        }
    }

    Ok(fwin)
}

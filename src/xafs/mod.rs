//! EXAFS path fitting.
//!
//! Feff path files are parsed into [`PathData`], wrapped with their path
//! parameters as [`FeffPath`], summed per measured spectrum in a
//! [`FeffitDataSet`] and fitted together by [`feffit`].

pub mod dataset;
pub mod elements;
pub mod feffdat;
pub mod feffit;
pub mod path;
pub mod sigma2;
pub mod transform;
pub mod window;

#[cfg(test)]
mod test_support;

pub use dataset::{DatasetOutput, EpsilonK, FeffitDataSet, PreparedData};
pub use feffdat::{PathAtom, PathData, Potential};
pub use feffit::{feffit, feffit_report, FeffitConfig, FitResult};
pub use path::{
    calc_chi, ff2chi, FeffPath, Interpolation, PathChi, PathOutput, PathParameters, PathSplines,
    PathValue, PathValues,
};
pub use sigma2::{sigma2_debye, sigma2_eins, EINS_FACTOR};
pub use transform::{FitSpace, FourierTransformer, TransformConfig, TransformOutput};
pub use window::{ftwindow, WindowKind};

/// `2 m_e / hbar²` in 1/(eV·Å²), converts energy to k²
pub const ETOK: f64 = 0.2624682843;

/// Floor for `k² - e0·ETOK` near the edge
pub const SMALL: f64 = 1e-6;

/// Compact number formatting for reports.
pub(crate) fn gformat(value: f64) -> String {
    if !value.is_finite() {
        return format!("{}", value);
    }
    if value == 0.0 {
        return "0.00000000".to_string();
    }
    let magnitude = value.abs().log10().floor() as i32;
    if (-4..6).contains(&magnitude) {
        let decimals = (7 - magnitude).clamp(0, 10) as usize;
        format!("{:.*}", decimals, value)
    } else {
        format!("{:.6e}", value)
    }
}

/// Fixed-point number with a leading space in place of a plus sign
pub(crate) fn signed(value: f64, decimals: usize) -> String {
    let sign = if value < 0.0 { '-' } else { ' ' };
    format!("{}{:.*}", sign, decimals, value.abs())
}

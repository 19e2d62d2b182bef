//! # Monte Carlo Methods for Uncertainty Propagation
//!
//! Draws parameter vectors from the multivariate normal distribution defined by a
//! best-fit vector and its covariance matrix, and propagates them through a
//! derived quantity. This gives an estimate that does not rely on linearization
//! and is used to cross-check [`super::Uncertain`] propagation.

use nalgebra::DMatrix;
use ndarray::{Array1, Array2};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::error::{FeffitError, Result};
use crate::utils::matrix_convert::ndarray_to_nalgebra;

/// Result of a Monte Carlo uncertainty analysis.
#[derive(Debug, Clone)]
pub struct MonteCarloResult {
    /// Propagated values, one per sample
    pub values: Array1<f64>,

    /// Mean of the propagated values
    pub mean: f64,

    /// Standard deviation of the propagated values
    pub std: f64,

    /// Median of the propagated values
    pub median: f64,
}

/// Lower Cholesky factor of a covariance matrix.
///
/// Covariances from nearly degenerate fits can fail to factor by rounding; a
/// small diagonal jitter is added before giving up.
fn cholesky_factor(covar: &Array2<f64>) -> Result<DMatrix<f64>> {
    let mat = ndarray_to_nalgebra(covar);
    if let Some(cholesky) = mat.clone().cholesky() {
        return Ok(cholesky.l());
    }

    let scale = covar.diag().iter().fold(0.0_f64, |a, b| a.max(b.abs()));
    let jitter = DMatrix::identity(mat.nrows(), mat.ncols()) * (scale * 1e-12).max(1e-300);
    (mat + jitter)
        .cholesky()
        .map(|c| c.l())
        .ok_or(FeffitError::SingularMatrix)
}

/// Sample correlated parameter vectors.
///
/// Each row of the returned matrix is `best + L z` where `L Lᵀ = covar` and `z`
/// is a vector of independent standard normal deviates.
pub fn sample_correlated<R: Rng + ?Sized>(
    best: &Array1<f64>,
    covar: &Array2<f64>,
    n_samples: usize,
    rng: &mut R,
) -> Result<Array2<f64>> {
    let n = best.len();
    if covar.nrows() != n || covar.ncols() != n {
        return Err(FeffitError::DimensionMismatch(format!(
            "covariance is {}x{}, expected {}x{}",
            covar.nrows(),
            covar.ncols(),
            n,
            n
        )));
    }

    let l = cholesky_factor(covar)?;
    let mut samples = Array2::zeros((n_samples, n));

    for mut row in samples.rows_mut() {
        let z: Vec<f64> = (0..n).map(|_| StandardNormal.sample(rng)).collect();
        for i in 0..n {
            let mut offset = 0.0;
            for (j, zj) in z.iter().enumerate().take(i + 1) {
                offset += l[(i, j)] * zj;
            }
            row[i] = best[i] + offset;
        }
    }

    Ok(samples)
}

/// Propagate correlated parameter uncertainties through `f` by sampling.
pub fn propagate_uncertainty<F, R>(
    best: &Array1<f64>,
    covar: &Array2<f64>,
    n_samples: usize,
    f: F,
    rng: &mut R,
) -> Result<MonteCarloResult>
where
    F: Fn(&Array1<f64>) -> Result<f64>,
    R: Rng + ?Sized,
{
    if n_samples < 2 {
        return Err(FeffitError::InvalidInput(
            "at least two Monte Carlo samples are required".to_string(),
        ));
    }

    let samples = sample_correlated(best, covar, n_samples, rng)?;
    let mut values = Vec::with_capacity(n_samples);
    for row in samples.rows() {
        values.push(f(&row.to_owned())?);
    }

    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1.0);

    let mut sorted = values.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = if sorted.len() % 2 == 0 {
        let mid = sorted.len() / 2;
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[sorted.len() / 2]
    };

    Ok(MonteCarloResult {
        values: Array1::from_vec(values),
        mean,
        std: var.sqrt(),
        median,
    })
}

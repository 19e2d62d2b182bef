//! One measured chi(k) spectrum with the paths that model it.
//!
//! [`FeffitDataSet::prepare`] resamples the data onto the transform grid and
//! fixes the noise levels; [`FeffitDataSet::residual`] then builds the
//! weighted difference between data and the sum of paths in k, R or q space.

use log::debug;
use ndarray::{concatenate, s, Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::{FeffitError, Result};
use crate::parameters::{FitParameterSet, UncertainValues};
use crate::utils::interp_linear;
use crate::xafs::path::{FeffPath, PathOutput, PathValues};
use crate::xafs::transform::{
    realimag, FitSpace, FourierTransformer, TransformConfig, TransformOutput,
};

/// Lower bound applied to noise levels before dividing by them
const MIN_EPSILON: f64 = 1e-12;

/// Uncertainty in chi(k): one value for every point or one value per point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EpsilonK {
    Scalar(f64),
    Array(Array1<f64>),
}

impl EpsilonK {
    /// Mean value
    pub fn mean(&self) -> f64 {
        match self {
            EpsilonK::Scalar(eps) => *eps,
            EpsilonK::Array(eps) => eps.mean().unwrap_or(0.0),
        }
    }

    fn floored(&self) -> EpsilonK {
        match self {
            EpsilonK::Scalar(eps) => EpsilonK::Scalar(eps.max(MIN_EPSILON)),
            EpsilonK::Array(eps) => EpsilonK::Array(eps.mapv(|e| e.max(MIN_EPSILON))),
        }
    }

    fn scaled(&self, factor: f64) -> EpsilonK {
        match self {
            EpsilonK::Scalar(eps) => EpsilonK::Scalar(eps * factor),
            EpsilonK::Array(eps) => EpsilonK::Array(eps * factor),
        }
    }

    /// `values / eps`, element by element for arrays
    fn divide(&self, values: &Array1<f64>) -> Result<Array1<f64>> {
        match self.floored() {
            EpsilonK::Scalar(eps) => Ok(values / eps),
            EpsilonK::Array(eps) => {
                if eps.len() != values.len() {
                    return Err(FeffitError::DimensionMismatch(format!(
                        "epsilon_k has {} points, chi(k) has {}",
                        eps.len(),
                        values.len()
                    )));
                }
                Ok(values / &eps)
            }
        }
    }
}

impl From<f64> for EpsilonK {
    fn from(eps: f64) -> Self {
        EpsilonK::Scalar(eps)
    }
}

impl From<Array1<f64>> for EpsilonK {
    fn from(eps: Array1<f64>) -> Self {
        EpsilonK::Array(eps)
    }
}

/// Data resampled onto the model grid, with its noise levels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedData {
    /// Model k grid, the first `ikmax` points of the transform grid
    pub k: Array1<f64>,
    /// Data chi(k) on the model grid
    pub chi: Array1<f64>,
    /// Number of independent points, `1 + 2 ΔR Δk / π`
    pub n_idp: f64,
    /// Noise in chi(k), one entry per k-weight
    pub epsilon_k: Vec<EpsilonK>,
    /// Noise in chi(R), one entry per k-weight
    pub epsilon_r: Vec<f64>,
}

/// Final state of one dataset after a fit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetOutput {
    pub label: String,
    pub transform: TransformConfig,
    pub n_idp: f64,
    pub epsilon_k: Vec<EpsilonK>,
    pub epsilon_r: Vec<f64>,
    pub data: TransformOutput,
    pub model: TransformOutput,
    pub paths: Vec<PathOutput>,
}

/// A chi(k) spectrum, its transform settings and the paths that model it
#[derive(Debug, Clone)]
pub struct FeffitDataSet {
    label: String,
    k: Array1<f64>,
    chi: Array1<f64>,
    epsilon_k: Option<EpsilonK>,
    delta_chi: Option<Array1<f64>>,
    transformer: FourierTransformer,
    paths: Vec<FeffPath>,
    prepared: Option<PreparedData>,
}

impl FeffitDataSet {
    /// Create a dataset from chi(k) on an increasing k grid
    pub fn new(
        k: Array1<f64>,
        chi: Array1<f64>,
        paths: Vec<FeffPath>,
        transform: TransformConfig,
    ) -> Result<Self> {
        if k.len() != chi.len() {
            return Err(FeffitError::DimensionMismatch(format!(
                "k has {} points, chi has {}",
                k.len(),
                chi.len()
            )));
        }
        if k.len() < 3 {
            return Err(FeffitError::InvalidInput(format!(
                "chi(k) needs at least 3 points, got {}",
                k.len()
            )));
        }
        if k.windows(2).into_iter().any(|w| w[1] <= w[0]) {
            return Err(FeffitError::InvalidInput(
                "k must be strictly increasing".to_string(),
            ));
        }
        Ok(Self {
            label: "dataset".to_string(),
            k,
            chi,
            epsilon_k: None,
            delta_chi: None,
            transformer: FourierTransformer::new(transform)?,
            paths,
            prepared: None,
        })
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Use a known noise level instead of estimating it
    pub fn with_epsilon_k(mut self, epsilon_k: impl Into<EpsilonK>) -> Self {
        self.epsilon_k = Some(epsilon_k.into());
        self.prepared = None;
        self
    }

    /// Per-point uncertainty in chi(k), combined with the estimated noise
    pub fn with_delta_chi(mut self, delta_chi: Array1<f64>) -> Self {
        self.delta_chi = Some(delta_chi);
        self.prepared = None;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn k(&self) -> &Array1<f64> {
        &self.k
    }

    pub fn chi(&self) -> &Array1<f64> {
        &self.chi
    }

    pub fn paths(&self) -> &[FeffPath] {
        &self.paths
    }

    pub fn paths_mut(&mut self) -> &mut [FeffPath] {
        self.prepared = None;
        &mut self.paths
    }

    pub fn add_path(&mut self, path: FeffPath) {
        self.paths.push(path);
    }

    pub fn transformer(&self) -> &FourierTransformer {
        &self.transformer
    }

    pub fn transform(&self) -> &TransformConfig {
        self.transformer.config()
    }

    /// Change the transform settings; the dataset must be prepared again
    pub fn set_transform(&mut self, config: TransformConfig) -> Result<()> {
        self.transformer.set_config(config)?;
        self.prepared = None;
        Ok(())
    }

    pub fn prepared(&self) -> Option<&PreparedData> {
        self.prepared.as_ref()
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    /// Resample the data onto the model grid and fix the noise levels
    pub fn prepare(&mut self) -> Result<&PreparedData> {
        let config = self.transformer.config().clone();
        let kdata_max = self.k.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let ikmax = ((1.01 + kdata_max / config.kstep) as usize).min(config.nfft);
        let k = self.transformer.k_grid().slice(s![..ikmax]).to_owned();
        let chi = interp_linear(k.view(), self.k.view(), self.chi.view())?;
        let n_idp = 1.0 + 2.0 * (config.rmax - config.rmin) * (config.kmax - config.kmin) / PI;

        let (epsilon_k, epsilon_r) = match &self.epsilon_k {
            Some(EpsilonK::Scalar(eps)) => self.set_epsilon_k(&EpsilonK::Scalar(*eps)),
            Some(EpsilonK::Array(eps)) => {
                let eps = self.resample(eps, &k, "epsilon_k")?;
                self.set_epsilon_k(&EpsilonK::Array(eps))
            }
            None => {
                let (eps_k, eps_r) = self.estimate_noise(chi.view(), 15.0, 30.0)?;
                match &self.delta_chi {
                    Some(delta_chi) => {
                        let eps_ave = eps_k.iter().sum::<f64>() / eps_k.len() as f64;
                        let dchi = self.resample(delta_chi, &k, "delta_chi")?;
                        let combined = dchi.mapv(|d| (d * d + eps_ave * eps_ave).sqrt());
                        self.set_epsilon_k(&EpsilonK::Array(combined))
                    }
                    None => (eps_k.into_iter().map(EpsilonK::Scalar).collect(), eps_r),
                }
            }
        };

        debug!(
            "prepared dataset '{}': {} model points, n_idp = {:.3}, epsilon_k = {:?}, epsilon_r = {:?}",
            self.label,
            k.len(),
            n_idp,
            epsilon_k.iter().map(EpsilonK::mean).collect::<Vec<_>>(),
            epsilon_r
        );

        Ok(&*self.prepared.insert(PreparedData {
            k,
            chi,
            n_idp,
            epsilon_k,
            epsilon_r,
        }))
    }

    fn resample(&self, values: &Array1<f64>, k: &Array1<f64>, what: &str) -> Result<Array1<f64>> {
        if values.len() != self.k.len() {
            return Err(FeffitError::DimensionMismatch(format!(
                "{} has {} points, data k has {}",
                what,
                values.len(),
                self.k.len()
            )));
        }
        interp_linear(k.view(), self.k.view(), values.view())
    }

    /// Estimate the noise of `chi` from its transform between `rmin` and `rmax`.
    ///
    /// Returns `(epsilon_k, epsilon_r)`, one entry per k-weight.
    pub fn estimate_noise(&self, chi: ArrayView1<f64>, rmin: f64, rmax: f64) -> Result<(Vec<f64>, Vec<f64>)> {
        let trans = &self.transformer;
        let config = trans.config();
        let half = (config.nfft / 2) as f64;
        let irmin = (0.01 + rmin / trans.rstep()) as usize;
        let irmax = (1.01 + rmax / trans.rstep()).min(half) as usize;
        let kwin_ave = trans.kwin().sum() * config.kstep / (config.kmax - config.kmin);

        let mut eps_k = Vec::with_capacity(config.kweight.len());
        let mut eps_r = Vec::with_capacity(config.kweight.len());
        for &kw in &config.kweight {
            let chir = trans.forward(chi, kw)?;
            let highr = realimag(chir.slice(s![irmin.min(irmax)..irmax]));
            let rms = if highr.is_empty() {
                0.0
            } else {
                (highr.mapv(|x| x * x).sum() / highr.len() as f64).sqrt()
            };
            let er = rms / kwin_ave;
            let w = 2.0 * kw + 1.0;
            let scale = (2.0 * PI * w / (config.kstep * (config.kmax.powf(w) - config.kmin.powf(w)))).sqrt();
            eps_k.push(scale * er);
            eps_r.push(er);
        }
        Ok((eps_k, eps_r))
    }

    /// Noise levels for a known uncertainty in chi(k).
    ///
    /// `epsilon_k` is kept as given for every k-weight; `epsilon_r` is the mean of
    /// `eps / (2·√(πw / (kstep·(kmax^w - kmin^w))))` with `w = 2·kweight + 1`.
    pub fn set_epsilon_k(&self, eps: &EpsilonK) -> (Vec<EpsilonK>, Vec<f64>) {
        let config = self.transformer.config();
        config
            .kweight
            .iter()
            .map(|&kw| {
                let w = 2.0 * kw + 1.0;
                let scale = 2.0 * (PI * w / (config.kstep * (config.kmax.powf(w) - config.kmin.powf(w)))).sqrt();
                (eps.clone(), eps.scaled(1.0 / scale).mean())
            })
            .unzip()
    }

    fn prepared_or_err(&self) -> Result<&PreparedData> {
        self.prepared.as_ref().ok_or_else(|| {
            FeffitError::InvalidInput(format!("dataset '{}' has not been prepared", self.label))
        })
    }

    /// Sum of path chi(k) on the model grid
    pub fn model_chi(&self, params: &FitParameterSet) -> Result<Array1<f64>> {
        let prepared = self.prepared_or_err()?;
        let mut model = Array1::<f64>::zeros(prepared.k.len());
        for path in &self.paths {
            model += &path.evaluate(params, Some(prepared.k.view()))?.chi;
        }
        Ok(model)
    }

    /// Weighted residual in the configured fit space, concatenated over k-weights.
    ///
    /// With `data_only` the model is left out, which gives the transformed data itself.
    pub fn residual(&self, params: &FitParameterSet, data_only: bool) -> Result<Array1<f64>> {
        let prepared = self.prepared_or_err()?;
        let diff = if data_only {
            prepared.chi.clone()
        } else {
            &prepared.chi - &self.model_chi(params)?
        };

        let trans = &self.transformer;
        let config = trans.config();
        let half = (config.nfft / 2) as f64;
        let iqmin = (0.01 + config.kmin / config.kstep).max(0.0) as usize;
        let iqmax = (0.01 + config.kmax / config.kstep).min(half) as usize;

        let mut parts: Vec<Array1<f64>> = Vec::with_capacity(config.kweight.len());
        for (i, &kw) in config.kweight.iter().enumerate() {
            match config.fitspace {
                FitSpace::K => {
                    let n = diff.len();
                    let weighted = prepared.epsilon_k[i].divide(&diff)? * &prepared.k.mapv(|k| k.powf(kw));
                    let (lo, hi) = (iqmin.min(n), iqmax.min(n));
                    parts.push(weighted.slice(s![lo..hi.max(lo)]).to_owned());
                }
                FitSpace::R => {
                    let irmin = (0.01 + config.rmin / trans.rstep()).max(0.0) as usize;
                    let irmax = (0.01 + config.rmax / trans.rstep()).min(half) as usize;
                    let eps_r = prepared.epsilon_r[i].max(MIN_EPSILON);
                    let chir = trans.forward(diff.view(), kw)?;
                    let chir = chir.slice(s![irmin.min(irmax)..irmax]).mapv(|c| c / eps_r);
                    parts.push(realimag(chir.view()));
                }
                FitSpace::Q => {
                    let eps_r = prepared.epsilon_r[i].max(MIN_EPSILON);
                    let chir = trans.forward(diff.view(), kw)?;
                    let chiq = trans.reverse(chir.view())?;
                    let chiq = chiq.slice(s![iqmin.min(iqmax)..iqmax]).mapv(|c| c / eps_r);
                    let interleaved = realimag(chiq.view());
                    parts.push(interleaved.slice(s![..;2]).to_owned());
                }
            }
        }

        let views: Vec<ArrayView1<f64>> = parts.iter().map(|p| p.view()).collect();
        concatenate(Axis(0), &views).map_err(|e| FeffitError::DimensionMismatch(e.to_string()))
    }

    /// Transform outputs for data, model and, when `path_outputs`, every path.
    ///
    /// `uncertainty` carries the parameter values with gradients and the covariance
    /// of the varied parameters, used for the path standard errors.
    pub fn output(
        &self,
        params: &FitParameterSet,
        uncertainty: Option<(&UncertainValues, &Array2<f64>)>,
        rmax_out: f64,
        qmax_out: f64,
        path_outputs: bool,
    ) -> Result<DatasetOutput> {
        let prepared = self.prepared_or_err()?;
        let trans = &self.transformer;

        let mut model = Array1::<f64>::zeros(prepared.k.len());
        let mut paths = Vec::with_capacity(self.paths.len());
        for path in &self.paths {
            let values = path.resolve(params)?;
            let stderr = match uncertainty {
                Some((uvals, covar)) => {
                    let grads = path.resolve_uncertain(uvals)?;
                    let mut std = [0.0; 8];
                    for (s, g) in std.iter_mut().zip(&grads) {
                        *s = g.std_dev(covar);
                    }
                    PathValues::from_array(std)
                }
                None => PathValues::default(),
            };
            let chi = path.evaluate_values(&values, Some(prepared.k.view()))?.chi;
            model += &chi;
            let transform = if path_outputs {
                Some(trans.output(chi.view(), rmax_out, qmax_out)?)
            } else {
                None
            };
            paths.push(PathOutput {
                label: path.label().to_string(),
                filename: path.data().filename.clone(),
                reff: path.data().reff,
                report: path.report(&values, Some(&stderr)),
                values,
                stderr,
                k: prepared.k.clone(),
                chi,
                transform,
            });
        }

        Ok(DatasetOutput {
            label: self.label.clone(),
            transform: trans.config().clone(),
            n_idp: prepared.n_idp,
            epsilon_k: prepared.epsilon_k.clone(),
            epsilon_r: prepared.epsilon_r.clone(),
            data: trans.output(prepared.chi.view(), rmax_out, qmax_out)?,
            model: trans.output(model.view(), rmax_out, qmax_out)?,
            paths,
        })
    }
}

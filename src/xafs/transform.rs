//! Forward and reverse XAFS Fourier transforms.
//!
//! Conventions: `chi(R) = (kstep/√π) · FFT[chi(k) · k^w · W(k)]` and
//! `chi(q) = (4√π/kstep) · IFFT[chi(R) · W(R)]`, both keeping the first
//! `nfft/2` points. [`FourierTransformer`] owns the uniform grids, the windows
//! and the FFT plans for one [`TransformConfig`].

use ndarray::{s, Array1, ArrayView1};
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{FeffitError, Result};
use crate::xafs::window::{ftwindow, WindowKind};

/// Space in which the fit residual is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitSpace {
    K,
    R,
    Q,
}

impl FromStr for FitSpace {
    type Err = FeffitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "k" => Ok(FitSpace::K),
            "r" => Ok(FitSpace::R),
            "q" => Ok(FitSpace::Q),
            other => Err(FeffitError::InvalidInput(format!(
                "unknown fit space '{}', expected one of k, r, q",
                other
            ))),
        }
    }
}

impl fmt::Display for FitSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FitSpace::K => "k",
            FitSpace::R => "r",
            FitSpace::Q => "q",
        };
        f.write_str(name)
    }
}

/// Parameters of the forward and reverse transforms of a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub kmin: f64,
    pub kmax: f64,
    /// k-weights; the residual is built for each weight in turn
    pub kweight: Vec<f64>,
    pub dk: f64,
    /// Upper k taper, `dk` when unset
    pub dk2: Option<f64>,
    pub window: WindowKind,
    pub nfft: usize,
    pub kstep: f64,
    pub rmin: f64,
    pub rmax: f64,
    pub dr: f64,
    /// Upper R taper, `dr` when unset
    pub dr2: Option<f64>,
    pub rwindow: WindowKind,
    pub fitspace: FitSpace,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            kmin: 0.0,
            kmax: 20.0,
            kweight: vec![2.0],
            dk: 4.0,
            dk2: None,
            window: WindowKind::Kaiser,
            nfft: 2048,
            kstep: 0.05,
            rmin: 0.0,
            rmax: 10.0,
            dr: 0.0,
            dr2: None,
            rwindow: WindowKind::Hanning,
            fitspace: FitSpace::R,
        }
    }
}

impl TransformConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_k_range(mut self, kmin: f64, kmax: f64) -> Self {
        self.kmin = kmin;
        self.kmax = kmax;
        self
    }

    pub fn with_r_range(mut self, rmin: f64, rmax: f64) -> Self {
        self.rmin = rmin;
        self.rmax = rmax;
        self
    }

    pub fn with_kweights(mut self, kweight: Vec<f64>) -> Self {
        self.kweight = kweight;
        self
    }

    pub fn with_kweight(self, kweight: f64) -> Self {
        self.with_kweights(vec![kweight])
    }

    pub fn with_dk(mut self, dk: f64, dk2: Option<f64>) -> Self {
        self.dk = dk;
        self.dk2 = dk2;
        self
    }

    pub fn with_dr(mut self, dr: f64, dr2: Option<f64>) -> Self {
        self.dr = dr;
        self.dr2 = dr2;
        self
    }

    pub fn with_window(mut self, window: WindowKind) -> Self {
        self.window = window;
        self
    }

    pub fn with_rwindow(mut self, rwindow: WindowKind) -> Self {
        self.rwindow = rwindow;
        self
    }

    pub fn with_fitspace(mut self, fitspace: FitSpace) -> Self {
        self.fitspace = fitspace;
        self
    }

    pub fn with_grid(mut self, kstep: f64, nfft: usize) -> Self {
        self.kstep = kstep;
        self.nfft = nfft;
        self
    }

    /// R spacing of the transform, `π/(kstep·nfft)`
    pub fn rstep(&self) -> f64 {
        PI / (self.kstep * self.nfft as f64)
    }

    /// First k-weight, used for output transforms
    pub fn first_kweight(&self) -> f64 {
        self.kweight.first().copied().unwrap_or(2.0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nfft < 4 || self.nfft % 2 != 0 {
            return Err(FeffitError::InvalidInput(format!(
                "nfft must be an even number of at least 4, got {}",
                self.nfft
            )));
        }
        if !(self.kstep > 0.0) {
            return Err(FeffitError::InvalidInput(format!(
                "kstep must be positive, got {}",
                self.kstep
            )));
        }
        if self.kweight.is_empty() {
            return Err(FeffitError::InvalidInput("at least one k-weight is required".to_string()));
        }
        if self.kmax <= self.kmin || self.rmax <= self.rmin {
            return Err(FeffitError::InvalidInput(format!(
                "empty fit range: k = [{}, {}], R = [{}, {}]",
                self.kmin, self.kmax, self.rmin, self.rmax
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), self)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
    }
}

/// Cache key of a window: grid plus window parameters
#[derive(Debug, Clone, Copy, PartialEq)]
struct WindowKey {
    kstep: f64,
    nfft: usize,
    lo: f64,
    hi: f64,
    taper_lo: f64,
    taper_hi: f64,
    kind: WindowKind,
}

impl WindowKey {
    fn for_k(config: &TransformConfig) -> Self {
        Self {
            kstep: config.kstep,
            nfft: config.nfft,
            lo: config.kmin,
            hi: config.kmax,
            taper_lo: config.dk,
            taper_hi: config.dk2.unwrap_or(config.dk),
            kind: config.window,
        }
    }

    fn for_r(config: &TransformConfig) -> Self {
        Self {
            kstep: config.kstep,
            nfft: config.nfft,
            lo: config.rmin,
            hi: config.rmax,
            taper_lo: config.dr,
            taper_hi: config.dr2.unwrap_or(config.dr),
            kind: config.rwindow,
        }
    }

    fn build(&self, grid: &Array1<f64>) -> Result<Array1<f64>> {
        ftwindow(grid, self.lo, self.hi, self.taper_lo, Some(self.taper_hi), self.kind)
    }
}

/// Grids, windows and FFT plans for one transform configuration
#[derive(Clone)]
pub struct FourierTransformer {
    config: TransformConfig,
    grid_key: (f64, usize),
    k_: Array1<f64>,
    r_: Array1<f64>,
    kwin_key: WindowKey,
    kwin: Array1<f64>,
    rwin_key: WindowKey,
    rwin: Array1<f64>,
    forward_plan: Arc<dyn Fft<f64>>,
    inverse_plan: Arc<dyn Fft<f64>>,
}

impl fmt::Debug for FourierTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FourierTransformer")
            .field("config", &self.config)
            .field("npts", &self.k_.len())
            .finish()
    }
}

impl FourierTransformer {
    pub fn new(config: TransformConfig) -> Result<Self> {
        config.validate()?;
        let (k_, r_) = make_grids(config.kstep, config.nfft);
        let mut planner = FftPlanner::<f64>::new();
        let kwin_key = WindowKey::for_k(&config);
        let rwin_key = WindowKey::for_r(&config);
        Ok(Self {
            grid_key: (config.kstep, config.nfft),
            kwin: kwin_key.build(&k_)?,
            rwin: rwin_key.build(&r_)?,
            forward_plan: planner.plan_fft_forward(config.nfft),
            inverse_plan: planner.plan_fft_inverse(config.nfft),
            k_,
            r_,
            kwin_key,
            rwin_key,
            config,
        })
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    /// Replace the configuration, rebuilding only the caches whose inputs changed
    pub fn set_config(&mut self, config: TransformConfig) -> Result<()> {
        config.validate()?;
        if self.grid_key != (config.kstep, config.nfft) {
            let (k_, r_) = make_grids(config.kstep, config.nfft);
            let mut planner = FftPlanner::<f64>::new();
            self.forward_plan = planner.plan_fft_forward(config.nfft);
            self.inverse_plan = planner.plan_fft_inverse(config.nfft);
            self.k_ = k_;
            self.r_ = r_;
            self.grid_key = (config.kstep, config.nfft);
        }
        let kwin_key = WindowKey::for_k(&config);
        if kwin_key != self.kwin_key {
            self.kwin = kwin_key.build(&self.k_)?;
            self.kwin_key = kwin_key;
        }
        let rwin_key = WindowKey::for_r(&config);
        if rwin_key != self.rwin_key {
            self.rwin = rwin_key.build(&self.r_)?;
            self.rwin_key = rwin_key;
        }
        self.config = config;
        Ok(())
    }

    /// Uniform k grid of `nfft` points
    pub fn k_grid(&self) -> &Array1<f64> {
        &self.k_
    }

    /// Uniform R grid of `nfft` points
    pub fn r_grid(&self) -> &Array1<f64> {
        &self.r_
    }

    pub fn kwin(&self) -> &Array1<f64> {
        &self.kwin
    }

    pub fn rwin(&self) -> &Array1<f64> {
        &self.rwin
    }

    pub fn kstep(&self) -> f64 {
        self.config.kstep
    }

    pub fn rstep(&self) -> f64 {
        self.config.rstep()
    }

    pub fn nfft(&self) -> usize {
        self.config.nfft
    }

    /// Forward transform of `chi` sampled on the first `chi.len()` points of the k grid
    pub fn forward(&self, chi: ArrayView1<f64>, kweight: f64) -> Result<Array1<Complex64>> {
        let n = chi.len();
        if n > self.config.nfft {
            return Err(FeffitError::DimensionMismatch(format!(
                "chi(k) has {} points, more than nfft = {}",
                n, self.config.nfft
            )));
        }
        let weighted = chi
            .iter()
            .zip(self.kwin.iter())
            .zip(self.k_.iter())
            .map(|((c, w), k)| Complex64::new(c * w * k.powf(kweight), 0.0));
        Ok(run_fft(
            self.forward_plan.as_ref(),
            self.config.nfft,
            weighted,
            self.config.kstep / PI.sqrt(),
        ))
    }

    /// Reverse transform of `chir` sampled on the first `chir.len()` points of the R grid.
    ///
    /// No one-sided correction is applied: the real part is `2·chi·k^w·W(k)`
    /// where the windows are flat. [`FourierTransformer::output`] halves it.
    pub fn reverse(&self, chir: ArrayView1<Complex64>) -> Result<Array1<Complex64>> {
        let n = chir.len();
        if n > self.config.nfft {
            return Err(FeffitError::DimensionMismatch(format!(
                "chi(R) has {} points, more than nfft = {}",
                n, self.config.nfft
            )));
        }
        let windowed = chir.iter().zip(self.rwin.iter()).map(|(c, w)| *c * *w);
        let nfft = self.config.nfft;
        Ok(run_fft(
            self.inverse_plan.as_ref(),
            nfft,
            windowed,
            4.0 * PI.sqrt() / (self.config.kstep * nfft as f64),
        ))
    }

    /// Output arrays for `chi` on the model grid, transformed with the first k-weight
    pub fn output(&self, chi: ArrayView1<f64>, rmax_out: f64, qmax_out: f64) -> Result<TransformOutput> {
        let n = chi.len();
        let half = self.config.nfft / 2;
        let chir = self.forward(chi, self.config.first_kweight())?;
        // chi(R) is one-sided, so the back transform carries twice the signal
        let chiq = self.reverse(chir.view())?.mapv(|c| c * 0.5);

        let irmax = ((1.01 + rmax_out / self.rstep()).min(half as f64)) as usize;
        let iqmax = ((1.05 + qmax_out / self.kstep()).min(half as f64)) as usize;
        let chir = chir.slice(s![..irmax]);
        let chiq = chiq.slice(s![..iqmax]);

        Ok(TransformOutput {
            k: self.k_.slice(s![..n]).to_owned(),
            chi: chi.to_owned(),
            kwin: self.kwin.slice(s![..n]).to_owned(),
            r: self.r_.slice(s![..irmax]).to_owned(),
            chir_mag: chir.mapv(|c| c.norm()),
            chir_pha: complex_phase(chir),
            chir_re: chir.mapv(|c| c.re),
            chir_im: chir.mapv(|c| c.im),
            q: self.k_.slice(s![..iqmax]).to_owned(),
            chiq_mag: chiq.mapv(|c| c.norm()),
            chiq_pha: complex_phase(chiq),
            chiq_re: chiq.mapv(|c| c.re),
            chiq_im: chiq.mapv(|c| c.im),
        })
    }
}

fn make_grids(kstep: f64, nfft: usize) -> (Array1<f64>, Array1<f64>) {
    let rstep = PI / (kstep * nfft as f64);
    (
        Array1::from_shape_fn(nfft, |i| kstep * i as f64),
        Array1::from_shape_fn(nfft, |i| rstep * i as f64),
    )
}

/// Zero-pad `input` to `nfft`, transform, keep the first half and scale
fn run_fft(
    plan: &dyn Fft<f64>,
    nfft: usize,
    input: impl Iterator<Item = Complex64>,
    scale: f64,
) -> Array1<Complex64> {
    let mut buffer = vec![Complex64::new(0.0, 0.0); nfft];
    for (slot, value) in buffer.iter_mut().zip(input) {
        *slot = value;
    }
    plan.process(&mut buffer);
    buffer.truncate(nfft / 2);
    Array1::from_iter(buffer.into_iter().map(|c| c * scale))
}

/// Forward XAFS transform of already weighted and windowed chi on a uniform grid
pub fn xftf_fast(chi: ArrayView1<f64>, nfft: usize, kstep: f64) -> Array1<Complex64> {
    let plan = FftPlanner::<f64>::new().plan_fft_forward(nfft);
    run_fft(
        plan.as_ref(),
        nfft,
        chi.iter().map(|&c| Complex64::new(c, 0.0)),
        kstep / PI.sqrt(),
    )
}

/// Reverse XAFS transform of already windowed chi(R).
///
/// Callers holding a one-sided chi(R) halve the input to recover chi(q) on the
/// scale of chi(k).
pub fn xftr_fast(chir: ArrayView1<Complex64>, nfft: usize, kstep: f64) -> Array1<Complex64> {
    let plan = FftPlanner::<f64>::new().plan_fft_inverse(nfft);
    run_fft(
        plan.as_ref(),
        nfft,
        chir.iter().copied(),
        4.0 * PI.sqrt() / (kstep * nfft as f64),
    )
}

/// Phase of a complex array with 2π jumps removed
pub fn complex_phase(arr: ArrayView1<Complex64>) -> Array1<f64> {
    let phase = arr.mapv(|c| c.im.atan2(c.re));
    let mut out = phase.clone();
    let mut shift = 0.0;
    for i in 1..phase.len() {
        let d = (phase[i] - phase[i - 1]) / PI;
        shift += d.abs().round() * d.signum();
        out[i] -= PI * shift;
    }
    out
}

/// Interleave real and imaginary parts: `[re0, im0, re1, im1, ...]`
pub fn realimag(arr: ArrayView1<Complex64>) -> Array1<f64> {
    arr.iter().flat_map(|c| [c.re, c.im]).collect()
}

/// Transform arrays of one chi(k) signal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformOutput {
    pub k: Array1<f64>,
    pub chi: Array1<f64>,
    pub kwin: Array1<f64>,
    pub r: Array1<f64>,
    pub chir_mag: Array1<f64>,
    pub chir_pha: Array1<f64>,
    pub chir_re: Array1<f64>,
    pub chir_im: Array1<f64>,
    pub q: Array1<f64>,
    pub chiq_mag: Array1<f64>,
    pub chiq_pha: Array1<f64>,
    pub chiq_re: Array1<f64>,
    pub chiq_im: Array1<f64>,
}

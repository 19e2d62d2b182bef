//! Fitting Feff paths to one or more datasets.
//!
//! [`feffit`] prepares every dataset, minimizes the concatenated residuals with
//! Levenberg-Marquardt over the varied parameters, rescales the statistics to
//! the number of independent points and propagates the correlated uncertainties
//! into constrained parameters and every path parameter.
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
//! params.add_var("del_e0", 0.0)?;
//! params.add_var("del_r", 0.0)?;
//! params.add_var("sig2", 0.003)?;
//!
//! let path = FeffPath::from_file(
//!     "feff0001.dat",
//!     PathParameters::new()
//!         .with_s02("amp")
//!         .with_e0("del_e0")
//!         .with_deltar("del_r")
//!         .with_sigma2("sig2"),
//! )?;
//! let (k, chi): (Array1<f64>, Array1<f64>) = (Array1::zeros(300), Array1::zeros(300));
//! let transform = TransformConfig::new().with_k_range(3.0, 14.0).with_r_range(1.4, 3.0);
//! let mut datasets = vec![FeffitDataSet::new(k, chi, vec![path], transform)?];
//!
//! let result = feffit(&mut params, &mut datasets, &FeffitConfig::default())?;
//! println!("{}", feffit_report(&result, 0.1, true));
//! # Ok(())
//! # }
//! ```

use log::{debug, info, warn};
use ndarray::{concatenate, Array1, Array2, ArrayView1, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{FeffitError, Result};
use crate::lm::{LevenbergMarquardt, LmConfig};
use crate::parameters::FitParameterSet;
use crate::problem::Problem;
use crate::uncertainty::{calculate_correlation, standard_errors_from_covariance, UncertaintyCalculator};
use crate::xafs::dataset::{DatasetOutput, EpsilonK, FeffitDataSet};
use crate::xafs::path::Interpolation;
use crate::xafs::{gformat, signed};

/// Settings of a fit beyond the per-dataset transforms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeffitConfig {
    pub lm: LmConfig,
    /// Upper R of the output arrays
    pub rmax_out: f64,
    /// Upper q of the output arrays
    pub qmax_out: f64,
    /// Whether to compute transform arrays for every path
    pub path_outputs: bool,
    /// Evaluate dataset residuals in parallel
    pub parallel: bool,
    /// Overrides the interpolation of every path when set
    pub interpolation: Option<Interpolation>,
}

impl Default for FeffitConfig {
    fn default() -> Self {
        Self {
            lm: LmConfig::default(),
            rmax_out: 10.0,
            qmax_out: 30.0,
            path_outputs: true,
            parallel: false,
            interpolation: None,
        }
    }
}

impl FeffitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lm(mut self, lm: LmConfig) -> Self {
        self.lm = lm;
        self
    }

    pub fn with_rmax_out(mut self, rmax_out: f64) -> Self {
        self.rmax_out = rmax_out;
        self
    }

    pub fn with_qmax_out(mut self, qmax_out: f64) -> Self {
        self.qmax_out = qmax_out;
        self
    }

    pub fn with_path_outputs(mut self, path_outputs: bool) -> Self {
        self.path_outputs = path_outputs;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = Some(interpolation);
        self
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Outcome of a fit
#[derive(Debug, Clone)]
pub struct FitResult {
    pub converged: bool,
    pub message: String,
    pub nvarys: usize,
    /// Length of the residual
    pub ndata: usize,
    pub nfree: usize,
    pub nfev: usize,
    /// Sum of the independent points of every dataset
    pub n_independent: f64,
    /// Raw sum of squared residuals
    pub chisqr: f64,
    pub chi_square: f64,
    pub chi_reduced: f64,
    pub rfactor: f64,
    pub aic: f64,
    pub bic: f64,
    /// Factor applied to the covariance, `nfree / (n_independent - nvarys)`
    pub err_scale: f64,
    pub var_names: Vec<String>,
    /// Covariance of the varied parameters, in `var_names` order
    pub covar: Option<Array2<f64>>,
    pub params: FitParameterSet,
    pub residual: Array1<f64>,
    pub datasets: Vec<DatasetOutput>,
}

/// Statistics rescaled to the number of independent points
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct FitStatistics {
    pub chi_square: f64,
    pub chi_reduced: f64,
    pub rfactor: f64,
    pub aic: f64,
    pub bic: f64,
    pub err_scale: f64,
}

impl FitStatistics {
    pub(crate) fn new(chisqr: f64, sum_dat2: f64, npts: usize, n_idp: f64, nvarys: usize) -> Self {
        let nfree = npts.saturating_sub(nvarys) as f64;
        let chi_square = chisqr * n_idp / npts.max(1) as f64;
        let dof = n_idp - nvarys as f64;
        let (chi_reduced, err_scale) = if dof > 0.0 {
            (chi_square / dof, nfree / dof)
        } else {
            warn!(
                "n_independent = {:.3} does not exceed the {} varied parameters; uncertainties are not rescaled",
                n_idp, nvarys
            );
            (f64::NAN, 1.0)
        };
        let neg2_loglikel = n_idp * (chi_square / n_idp).ln();
        Self {
            chi_square,
            chi_reduced,
            rfactor: chisqr / sum_dat2,
            aic: neg2_loglikel + 2.0 * nvarys as f64,
            bic: neg2_loglikel + n_idp.ln() * nvarys as f64,
            err_scale,
        }
    }
}

/// Least-squares problem over the varied parameters of a set, in optimizer coordinates
struct FeffitProblem<'a> {
    params: RefCell<FitParameterSet>,
    datasets: &'a [FeffitDataSet],
    parallel: bool,
    nvarys: usize,
    npts: usize,
}

impl Problem for FeffitProblem<'_> {
    fn eval(&self, internal: &Array1<f64>) -> Result<Array1<f64>> {
        let mut params = self.params.borrow_mut();
        params.update_from_internal(&internal.to_vec())?;
        collect_residuals(self.datasets, &params, false, self.parallel)
    }

    fn parameter_count(&self) -> usize {
        self.nvarys
    }

    fn residual_count(&self) -> usize {
        self.npts
    }
}

/// Residuals of every dataset, concatenated in order
fn collect_residuals(
    datasets: &[FeffitDataSet],
    params: &FitParameterSet,
    data_only: bool,
    parallel: bool,
) -> Result<Array1<f64>> {
    let parts: Vec<Array1<f64>> = if parallel {
        datasets
            .par_iter()
            .map(|ds| ds.residual(params, data_only))
            .collect::<Result<_>>()?
    } else {
        datasets
            .iter()
            .map(|ds| ds.residual(params, data_only))
            .collect::<Result<_>>()?
    };
    let views: Vec<ArrayView1<f64>> = parts.iter().map(|p| p.view()).collect();
    concatenate(Axis(0), &views).map_err(|e| FeffitError::DimensionMismatch(e.to_string()))
}

/// Covariance of the varied parameters in external coordinates.
///
/// `jacobian` is taken with respect to the optimizer coordinates `internal`.
fn external_covariance(
    params: &FitParameterSet,
    jacobian: &Array2<f64>,
    internal: &Array1<f64>,
    npts: usize,
    chisqr: f64,
) -> Result<Array2<f64>> {
    let nvarys = internal.len();
    let calc = UncertaintyCalculator::new(npts, nvarys, chisqr);
    let mut covar = calc.calculate_covariance(jacobian)?;
    let scale = params.internal_derivatives(&internal.to_vec());
    for i in 0..nvarys {
        for j in 0..nvarys {
            covar[[i, j]] *= scale[i] * scale[j];
        }
    }
    Ok(covar)
}

/// Store standard errors and correlations on the set and propagate them to constraints
fn store_uncertainties(params: &mut FitParameterSet, var_names: &[String], covar: &Array2<f64>) -> Result<()> {
    let stderr = standard_errors_from_covariance(covar);
    let correl = calculate_correlation(covar);
    for (i, name) in var_names.iter().enumerate() {
        let others = var_names
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(j, other)| (other.clone(), correl[[i, j]]))
            .collect();
        params.set_fit_statistics(name, Some(stderr[i]), others)?;
    }

    let uvals = params.uncertain_values()?;
    let constrained: Vec<String> = params
        .iter()
        .filter(|p| p.expr().is_some())
        .map(|p| p.name().to_string())
        .collect();
    for name in constrained {
        let std = uvals.get(&name).map(|u| u.std_dev(covar));
        params.set_fit_statistics(&name, std, Vec::new())?;
    }
    Ok(())
}

/// Fit the paths of every dataset to its data, varying the parameters of `params`.
///
/// On success `params` holds the best-fit values with standard errors and
/// correlations. When the minimizer does not converge, `params` is restored to
/// its values before the fit and the partial result is returned inside
/// [`FeffitError::FitDidNotConverge`].
pub fn feffit(
    params: &mut FitParameterSet,
    datasets: &mut [FeffitDataSet],
    config: &FeffitConfig,
) -> Result<FitResult> {
    if datasets.is_empty() {
        return Err(FeffitError::InvalidInput(
            "feffit needs at least one dataset".to_string(),
        ));
    }

    params.update_expressions()?;
    for ds in datasets.iter_mut() {
        if let Some(interpolation) = config.interpolation {
            for path in ds.paths_mut() {
                path.set_interpolation(interpolation);
            }
        }
        if ds.paths().is_empty() {
            return Err(FeffitError::InvalidInput(format!(
                "dataset '{}' has no paths",
                ds.label()
            )));
        }
        for path in ds.paths() {
            path.check(params)?;
        }
        ds.prepare()?;
    }
    let datasets: &[FeffitDataSet] = datasets;

    let saved = params.clone();
    let var_names = params.varying_names();
    let nvarys = var_names.len();
    let initial = params.varying_internal_values()?;
    let npts = collect_residuals(datasets, params, false, config.parallel)?.len();
    if npts == 0 {
        return Err(FeffitError::InvalidInput(
            "the fit ranges select no points".to_string(),
        ));
    }
    debug!(
        "feffit: {} datasets, {} varied parameters, {} residual points",
        datasets.len(),
        nvarys,
        npts
    );

    let problem = FeffitProblem {
        params: RefCell::new(params.clone()),
        datasets,
        parallel: config.parallel,
        nvarys,
        npts,
    };
    let lm = LevenbergMarquardt::with_config(config.lm.clone());
    let lm_result = lm.minimize(&problem, initial)?;

    let mut fitted = problem.params.into_inner();
    fitted.update_from_internal(&lm_result.params.to_vec())?;

    let residual = lm_result.residuals;
    let chisqr: f64 = residual.iter().map(|r| r * r).sum();
    let dat = collect_residuals(datasets, &fitted, true, config.parallel)?;
    let sum_dat2: f64 = dat.iter().map(|d| d * d).sum();
    let n_idp: f64 = datasets
        .iter()
        .filter_map(|ds| ds.prepared().map(|p| p.n_idp))
        .sum();
    let stats = FitStatistics::new(chisqr, sum_dat2, npts, n_idp, nvarys);

    let covar = match &lm_result.jacobian {
        Some(jacobian) if nvarys > 0 => {
            match external_covariance(&fitted, jacobian, &lm_result.params, npts, chisqr) {
                Ok(covar) => Some(covar * stats.err_scale),
                Err(e) => {
                    warn!("could not estimate uncertainties: {}", e);
                    None
                }
            }
        }
        _ => None,
    };

    let uvals = match &covar {
        Some(covar) => {
            store_uncertainties(&mut fitted, &var_names, covar)?;
            Some(fitted.uncertain_values()?)
        }
        None => None,
    };
    let uncertainty = uvals.as_ref().zip(covar.as_ref());

    let mut outputs = Vec::with_capacity(datasets.len());
    for ds in datasets {
        outputs.push(ds.output(
            &fitted,
            uncertainty,
            config.rmax_out,
            config.qmax_out,
            config.path_outputs,
        )?);
    }

    let result = FitResult {
        converged: lm_result.success,
        message: lm_result.message,
        nvarys,
        ndata: npts,
        nfree: npts.saturating_sub(nvarys),
        nfev: lm_result.func_evals,
        n_independent: n_idp,
        chisqr,
        chi_square: stats.chi_square,
        chi_reduced: stats.chi_reduced,
        rfactor: stats.rfactor,
        aic: stats.aic,
        bic: stats.bic,
        err_scale: stats.err_scale,
        var_names,
        covar,
        params: fitted,
        residual,
        datasets: outputs,
    };

    if !result.converged {
        warn!("feffit did not converge: {}", result.message);
        *params = saved;
        return Err(FeffitError::FitDidNotConverge {
            message: result.message.clone(),
            partial: Box::new(result),
        });
    }

    info!(
        "feffit converged after {} evaluations: chi_square = {}, reduced chi_square = {}, r-factor = {}",
        result.nfev,
        gformat(result.chi_square),
        gformat(result.chi_reduced),
        gformat(result.rfactor)
    );
    *params = result.params.clone();
    Ok(result)
}

fn format_epsilon(eps: &EpsilonK) -> String {
    match eps {
        EpsilonK::Scalar(value) => gformat(*value),
        EpsilonK::Array(values) => {
            let mean = values.mean().unwrap_or(0.0);
            let std = values.std(0.0);
            format!("Array(mean={}, std={})", gformat(mean), gformat(std))
        }
    }
}

/// Text report of a fit: statistics, datasets, variables, correlations and paths.
///
/// Correlations smaller in magnitude than `min_correl` are left out.
pub fn feffit_report(result: &FitResult, min_correl: f64, with_paths: bool) -> String {
    let topline = "=================== FEFFIT RESULTS ====================";
    let mut out = vec![topline.to_string(), "[[Statistics]]".to_string()];
    out.push(format!("   nvarys, npts       =  {}, {}", result.nvarys, result.ndata));
    out.push(format!("   n_independent      =  {:.3}", result.n_independent));
    out.push(format!("   chi_square         = {}", gformat(result.chi_square)));
    out.push(format!("   reduced chi_square = {}", gformat(result.chi_reduced)));
    out.push(format!("   r-factor           = {}", gformat(result.rfactor)));
    out.push(format!("   Akaike info crit   = {}", gformat(result.aic)));
    out.push(format!("   Bayesian info crit = {}", gformat(result.bic)));
    out.push(" ".to_string());

    let multiple = result.datasets.len() > 1;
    if multiple {
        out.push(format!("[[Datasets ({})]]", result.datasets.len()));
    } else {
        out.push("[[Data]]".to_string());
    }
    for (i, ds) in result.datasets.iter().enumerate() {
        let tr = &ds.transform;
        if multiple {
            out.push(format!(" dataset {}:", i + 1));
        }
        let join = |items: Vec<String>| items.join(", ");
        out.push(format!("   fit space          = '{}'", tr.fitspace));
        out.push(format!("   r-range            = {:.3}, {:.3}", tr.rmin, tr.rmax));
        out.push(format!("   k-range            = {:.3}, {:.3}", tr.kmin, tr.kmax));
        let mut kwin = format!("   k window, dk       = '{}', {:.3}", tr.window, tr.dk);
        if let Some(dk2) = tr.dk2 {
            kwin.push_str(&format!(", {:.3}", dk2));
        }
        out.push(kwin);
        let files: Vec<String> = ds
            .paths
            .iter()
            .map(|p| format!("'{}'", p.filename.as_deref().unwrap_or(p.label.as_str())))
            .collect();
        out.push(format!("   paths used in fit  = [{}]", files.join(", ")));
        out.push(format!(
            "   k-weight           = {}",
            join(tr.kweight.iter().map(|kw| kw.to_string()).collect())
        ));
        out.push(format!(
            "   epsilon_k          = {}",
            join(ds.epsilon_k.iter().map(format_epsilon).collect())
        ));
        out.push(format!(
            "   epsilon_r          = {}",
            join(ds.epsilon_r.iter().map(|e| gformat(*e)).collect())
        ));
        out.push(format!("   n_independent      = {:.3}", ds.n_idp));
    }

    out.push(" ".to_string());
    out.push("[[Variables]]".to_string());
    for par in result.params.iter() {
        let stderr = par.stderr.map_or_else(|| "unknown".to_string(), gformat);
        match par.expr() {
            None if par.vary() => out.push(format!(
                "   {:<14} = {} +/-{}   (init= {})",
                par.name(),
                gformat(par.value()),
                stderr,
                gformat(par.init_value())
            )),
            Some(expr) => out.push(format!(
                "   {:<14} = {} +/-{}  = '{}'",
                par.name(),
                gformat(par.value()),
                stderr,
                expr
            )),
            None => out.push(format!(
                "   {:<14} = {} (fixed)",
                par.name(),
                gformat(par.value())
            )),
        }
    }

    if !result.var_names.is_empty() {
        out.push(" ".to_string());
        out.push(format!(
            "[[Correlations]]    (unreported correlations are < {})",
            signed(min_correl, 3)
        ));
        let mut correls = Vec::new();
        for (i, name) in result.var_names.iter().enumerate() {
            let Some(par) = result.params.get(name) else {
                continue;
            };
            for other in &result.var_names[i + 1..] {
                if let Some(value) = par.correl.get(other) {
                    correls.push((format!("{}, {}", name, other), *value));
                }
            }
        }
        correls.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        for (pair, value) in correls {
            if value.abs() < min_correl {
                break;
            }
            out.push(format!("   {:<20} = {}", pair, signed(value, 3)));
        }
    }

    if with_paths {
        out.push(" ".to_string());
        out.push("[[Paths]]".to_string());
        for (i, ds) in result.datasets.iter().enumerate() {
            if multiple {
                out.push(format!(" dataset {}:", i + 1));
            }
            for path in &ds.paths {
                out.push(format!("{}\n", path.report));
            }
        }
    }
    out.push("=".repeat(topline.len()));
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xafs::path::{FeffPath, PathParameters};
    use crate::xafs::test_support::{sample_data, synthetic_chi};
    use crate::xafs::transform::{FitSpace, TransformConfig};
    use crate::xafs::window::WindowKind;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn fit_params() -> FitParameterSet {
        let mut params = FitParameterSet::new();
        params.add_var("amp", 1.0).unwrap();
        params.add_var("del_e0", 0.0).unwrap();
        params.add_var("del_r", 0.0).unwrap();
        params.add_bounded("sig2", 0.003, 0.0, 0.05).unwrap();
        params.add_expr("sig2_x2", "2 * sig2").unwrap();
        params
    }

    fn fit_path() -> FeffPath {
        FeffPath::new(
            Arc::new(sample_data()),
            PathParameters::new()
                .with_s02("amp")
                .with_e0("del_e0")
                .with_deltar("del_r")
                .with_sigma2("sig2"),
        )
        .unwrap()
        .with_label("cu1")
    }

    fn transform(fitspace: FitSpace) -> TransformConfig {
        TransformConfig::new()
            .with_k_range(3.0, 14.0)
            .with_r_range(1.5, 3.2)
            .with_dk(1.0, None)
            .with_window(WindowKind::Hanning)
            .with_fitspace(fitspace)
    }

    #[test]
    fn test_statistics() {
        let stats = FitStatistics::new(50.0, 1000.0, 100, 10.0, 4);
        assert_relative_eq!(stats.chi_square, 5.0);
        assert_relative_eq!(stats.chi_reduced, 5.0 / 6.0);
        assert_relative_eq!(stats.rfactor, 0.05);
        assert_relative_eq!(stats.err_scale, 96.0 / 6.0);
        let neg2 = 10.0 * (0.5f64).ln();
        assert_relative_eq!(stats.aic, neg2 + 8.0);
        assert_relative_eq!(stats.bic, neg2 + 10f64.ln() * 4.0);
    }

    #[test]
    fn test_error_scale_is_one_when_nidp_matches_points() {
        let stats = FitStatistics::new(12.0, 100.0, 40, 40.0, 3);
        assert_relative_eq!(stats.err_scale, 1.0);
        assert_relative_eq!(stats.chi_square, 12.0);
    }

    #[test]
    fn test_too_few_independent_points() {
        let stats = FitStatistics::new(12.0, 100.0, 40, 3.0, 4);
        assert!(stats.chi_reduced.is_nan());
        assert_eq!(stats.err_scale, 1.0);
    }

    #[test]
    fn test_fit_recovers_synthetic_parameters() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (k, chi) = synthetic_chi(0.85, 2.0, 0.02, 0.005, 1e-4);
        let mut params = fit_params();
        let mut datasets = vec![FeffitDataSet::new(k, chi, vec![fit_path()], transform(FitSpace::R)).unwrap()];

        let result = feffit(&mut params, &mut datasets, &FeffitConfig::default()).unwrap();
        assert!(result.converged);
        assert_eq!(result.nvarys, 4);
        assert_relative_eq!(params.value("amp").unwrap(), 0.85, epsilon = 0.02);
        assert_relative_eq!(params.value("del_e0").unwrap(), 2.0, epsilon = 0.3);
        assert_relative_eq!(params.value("del_r").unwrap(), 0.02, epsilon = 0.005);
        assert_relative_eq!(params.value("sig2").unwrap(), 0.005, epsilon = 5e-4);
        assert_relative_eq!(
            params.value("sig2_x2").unwrap(),
            2.0 * params.value("sig2").unwrap(),
            epsilon = 1e-12
        );
        assert!(result.rfactor < 1e-3);

        // Standard errors on varied and constrained parameters
        let sig2 = params.get("sig2").unwrap();
        let sig2_x2 = params.get("sig2_x2").unwrap();
        let std = sig2.stderr.unwrap();
        assert!(std > 0.0);
        assert_relative_eq!(sig2_x2.stderr.unwrap(), 2.0 * std, max_relative = 1e-6);
        assert!(sig2.correl.contains_key("amp"));

        // Path parameters carry the propagated errors of the variables they bind
        let path_out = &result.datasets[0].paths[0];
        assert_relative_eq!(path_out.stderr.sigma2, std, max_relative = 1e-6);
        assert_eq!(path_out.stderr.ei, 0.0);
        assert!(path_out.transform.is_some());

        let report = feffit_report(&result, 0.1, true);
        assert!(report.contains("[[Statistics]]"));
        assert!(report.contains("[[Data]]"));
        assert!(report.contains("fit space          = 'r'"));
        assert!(report.contains("sig2_x2        = "));
        assert!(report.contains("[[Correlations]]    (unreported correlations are <  0.100)"));
        assert!(report.contains("Path cu1, Feff.dat file = feff0001.dat"));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let (k, chi) = synthetic_chi(0.9, 1.0, 0.01, 0.004, 1e-4);
        let build = || {
            vec![
                FeffitDataSet::new(k.clone(), chi.clone(), vec![fit_path()], transform(FitSpace::R)).unwrap(),
                FeffitDataSet::new(k.clone(), chi.clone(), vec![fit_path()], transform(FitSpace::K)).unwrap(),
            ]
        };
        let mut seq_params = fit_params();
        let seq = feffit(&mut seq_params, &mut build(), &FeffitConfig::default()).unwrap();
        let mut par_params = fit_params();
        let par = feffit(&mut par_params, &mut build(), &FeffitConfig::default().with_parallel(true)).unwrap();

        assert_eq!(seq.ndata, par.ndata);
        assert_relative_eq!(seq.chisqr, par.chisqr, max_relative = 1e-10);
        assert_relative_eq!(seq.n_independent, 2.0 * (1.0 + 2.0 * 1.7 * 11.0 / std::f64::consts::PI), epsilon = 1e-9);
        let report = feffit_report(&seq, 0.1, false);
        assert!(report.contains("[[Datasets (2)]]"));
        assert!(!report.contains("[[Paths]]"));
    }

    #[test]
    fn test_non_convergence_restores_parameters() {
        let (k, chi) = synthetic_chi(0.85, 2.0, 0.02, 0.005, 1e-4);
        let mut params = fit_params();
        let before = params.clone();
        let mut datasets = vec![FeffitDataSet::new(k, chi, vec![fit_path()], transform(FitSpace::R)).unwrap()];
        let mut lm = LmConfig::default();
        lm.max_iterations = 1;
        let config = FeffitConfig::default().with_lm(lm);

        match feffit(&mut params, &mut datasets, &config) {
            Err(FeffitError::FitDidNotConverge { partial, .. }) => {
                assert!(!partial.converged);
                assert_eq!(partial.nvarys, 4);
                for name in before.names() {
                    assert_eq!(params.value(&name), before.value(&name));
                }
            }
            other => panic!("expected non-convergence, got {:?}", other.map(|r| r.message)),
        }
    }

    #[test]
    fn test_unresolved_path_parameter() {
        let (k, chi) = synthetic_chi(0.85, 0.0, 0.0, 0.005, 1e-4);
        let mut params = fit_params();
        let mut path = fit_path();
        path.set_parameter("e0", "enot").unwrap();
        let mut datasets = vec![FeffitDataSet::new(k, chi, vec![path], transform(FitSpace::R)).unwrap()];
        assert!(matches!(
            feffit(&mut params, &mut datasets, &FeffitConfig::default()),
            Err(FeffitError::UnresolvedParameter { .. })
        ));
    }

    #[test]
    fn test_config_json() {
        let config = FeffitConfig::default().with_rmax_out(8.0).with_interpolation(Interpolation::Linear);
        let json = config.to_json().unwrap();
        assert_eq!(FeffitConfig::from_json(&json).unwrap(), config);
        let partial = FeffitConfig::from_json(r#"{"parallel": true}"#).unwrap();
        assert!(partial.parallel);
        assert_eq!(partial.qmax_out, 30.0);
    }
}

//! A single scattering path and its EXAFS signal.
//!
//! A [`FeffPath`] pairs shared [`PathData`] with eight path parameters. Each
//! parameter is either a number or an expression over the fit parameters, the
//! path bindings `reff`, `nleg`, `rnorman`, `rmass`, `feff_degen` and the
//! Debye-Waller functions `sigma2_eins(t, theta)` and `sigma2_debye(t, theta)`.
//!
//! ```
//! use feffit_rs::xafs::{PathParameters, PathValue};
//!
//! let params = PathParameters::default()
//!     .with_s02("amp")
//!     .with_sigma2(PathValue::Expr("sigma2_eins(temp, theta)".to_string()))
//!     .with_deltar(0.01);
//! assert_eq!(params.s02, PathValue::Expr("amp".to_string()));
//! ```

use log::debug;
use ndarray::{Array1, ArrayView1};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use crate::error::{FeffitError, Result};
use crate::parameters::expression::{
    EvaluationContext, ExprResult, ExprValue, Expression, ExpressionError, BUILTIN_FUNCTIONS,
};
use crate::parameters::{FitParameterSet, UncertainValues};
use crate::uncertainty::Uncertain;
use crate::utils::{interp_linear, CubicSpline};
use crate::xafs::feffdat::PathData;
use crate::xafs::sigma2::{sigma2_debye, sigma2_eins};
use crate::xafs::transform::TransformOutput;
use crate::xafs::{gformat, signed, ETOK, SMALL};

/// Names of the path parameters, in evaluation order
pub const PATH_PARAM_NAMES: [&str; 8] = [
    "degen", "s02", "e0", "ei", "deltar", "sigma2", "third", "fourth",
];

const PATH_BINDINGS: [&str; 5] = ["reff", "nleg", "rnorman", "rmass", "feff_degen"];
const PATH_FUNCTIONS: [&str; 2] = ["sigma2_eins", "sigma2_debye"];

/// Value of one path parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathValue {
    Fixed(f64),
    /// Expression text; a bare name binds the field to that parameter
    Expr(String),
}

impl From<f64> for PathValue {
    fn from(value: f64) -> Self {
        PathValue::Fixed(value)
    }
}

impl From<&str> for PathValue {
    fn from(expr: &str) -> Self {
        PathValue::Expr(expr.to_string())
    }
}

impl From<String> for PathValue {
    fn from(expr: String) -> Self {
        PathValue::Expr(expr)
    }
}

impl fmt::Display for PathValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathValue::Fixed(value) => write!(f, "{}", value),
            PathValue::Expr(expr) => f.write_str(expr),
        }
    }
}

/// The eight path parameters as given by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathParameters {
    /// `None` uses the degeneracy of the path file
    pub degen: Option<PathValue>,
    pub s02: PathValue,
    pub e0: PathValue,
    pub ei: PathValue,
    pub deltar: PathValue,
    pub sigma2: PathValue,
    pub third: PathValue,
    pub fourth: PathValue,
}

impl Default for PathParameters {
    fn default() -> Self {
        Self {
            degen: None,
            s02: PathValue::Fixed(1.0),
            e0: PathValue::Fixed(0.0),
            ei: PathValue::Fixed(0.0),
            deltar: PathValue::Fixed(0.0),
            sigma2: PathValue::Fixed(0.0),
            third: PathValue::Fixed(0.0),
            fourth: PathValue::Fixed(0.0),
        }
    }
}

impl PathParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_degen(mut self, value: impl Into<PathValue>) -> Self {
        self.degen = Some(value.into());
        self
    }

    pub fn with_s02(mut self, value: impl Into<PathValue>) -> Self {
        self.s02 = value.into();
        self
    }

    pub fn with_e0(mut self, value: impl Into<PathValue>) -> Self {
        self.e0 = value.into();
        self
    }

    pub fn with_ei(mut self, value: impl Into<PathValue>) -> Self {
        self.ei = value.into();
        self
    }

    pub fn with_deltar(mut self, value: impl Into<PathValue>) -> Self {
        self.deltar = value.into();
        self
    }

    pub fn with_sigma2(mut self, value: impl Into<PathValue>) -> Self {
        self.sigma2 = value.into();
        self
    }

    pub fn with_third(mut self, value: impl Into<PathValue>) -> Self {
        self.third = value.into();
        self
    }

    pub fn with_fourth(mut self, value: impl Into<PathValue>) -> Self {
        self.fourth = value.into();
        self
    }

    /// Set a parameter by name
    pub fn set(&mut self, name: &str, value: impl Into<PathValue>) -> Result<()> {
        let value = value.into();
        match name {
            "degen" => self.degen = Some(value),
            "s02" => self.s02 = value,
            "e0" => self.e0 = value,
            "ei" => self.ei = value,
            "deltar" => self.deltar = value,
            "sigma2" => self.sigma2 = value,
            "third" => self.third = value,
            "fourth" => self.fourth = value,
            _ => {
                return Err(FeffitError::InvalidInput(format!(
                    "unknown path parameter '{}'",
                    name
                )))
            }
        }
        Ok(())
    }

    fn fields(&self) -> [Option<&PathValue>; 8] {
        [
            self.degen.as_ref(),
            Some(&self.s02),
            Some(&self.e0),
            Some(&self.ei),
            Some(&self.deltar),
            Some(&self.sigma2),
            Some(&self.third),
            Some(&self.fourth),
        ]
    }
}

/// Resolved path parameter values
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PathValues {
    pub degen: f64,
    pub s02: f64,
    pub e0: f64,
    pub ei: f64,
    pub deltar: f64,
    pub sigma2: f64,
    pub third: f64,
    pub fourth: f64,
}

impl PathValues {
    pub fn from_array(v: [f64; 8]) -> Self {
        Self {
            degen: v[0],
            s02: v[1],
            e0: v[2],
            ei: v[3],
            deltar: v[4],
            sigma2: v[5],
            third: v[6],
            fourth: v[7],
        }
    }

    pub fn to_array(&self) -> [f64; 8] {
        [
            self.degen,
            self.s02,
            self.e0,
            self.ei,
            self.deltar,
            self.sigma2,
            self.third,
            self.fourth,
        ]
    }
}

/// How tabulated path data is sampled at the shifted wavenumber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Cubic spline, extrapolating past the table
    #[default]
    Cubic,
    /// Linear, holding the end values past the table
    Linear,
}

/// Cubic splines of the tabulated amplitude, phase, momentum and mean free path
#[derive(Debug, Clone)]
pub struct PathSplines {
    pha: CubicSpline,
    amp: CubicSpline,
    rep: CubicSpline,
    lam: CubicSpline,
}

impl PathSplines {
    pub fn new(data: &PathData) -> Result<Self> {
        let k = data.k.view();
        Ok(Self {
            pha: CubicSpline::new(k, data.pha.view())?,
            amp: CubicSpline::new(k, data.amp.view())?,
            rep: CubicSpline::new(k, data.rep.view())?,
            lam: CubicSpline::new(k, data.lam.view())?,
        })
    }
}

/// Signal of one path
#[derive(Debug, Clone)]
pub struct PathChi {
    pub k: Array1<f64>,
    /// E0-shifted wavenumber
    pub q: Array1<f64>,
    pub chi: Array1<f64>,
    pub chi_imag: Array1<f64>,
    /// Complex photo-electron wavenumber
    pub p: Array1<Complex64>,
}

/// Final state of one path after a fit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathOutput {
    pub label: String,
    pub filename: Option<String>,
    pub reff: f64,
    pub values: PathValues,
    /// Propagated standard errors, zero for values that do not depend on varied parameters
    pub stderr: PathValues,
    pub k: Array1<f64>,
    pub chi: Array1<f64>,
    /// Transform arrays, present when path outputs were requested
    pub transform: Option<TransformOutput>,
    pub report: String,
}

/// Default model grid: `kstep·[0, int(1.01 + kmax/kstep))`, `kmax` capped at 30
pub fn default_k_grid(data: &PathData) -> Array1<f64> {
    let kstep = 0.05;
    let kmax = data.k.iter().copied().fold(f64::NEG_INFINITY, f64::max).min(30.0);
    let n = (1.01 + kmax / kstep) as usize;
    Array1::from_shape_fn(n, |i| kstep * i as f64)
}

/// E0-shifted wavenumber, `sign(en)·√|en|` with `en = k² - e0·ETOK`
pub fn shifted_q(k: ArrayView1<f64>, e0: f64) -> Array1<f64> {
    let mut en = k.mapv(|ki| ki * ki - e0 * ETOK);
    if en.iter().any(|e| e.abs() < SMALL) {
        en.mapv_inplace(|e| if e.abs() < 2.0 * SMALL { SMALL } else { e });
    }
    en.mapv(|e| e.signum() * e.abs().sqrt())
}

/// Compute chi(k) of a path for resolved parameter values.
///
/// Uses `k` when given, the default model grid otherwise.
pub fn calc_chi(
    data: &PathData,
    splines: &PathSplines,
    values: &PathValues,
    k: Option<ArrayView1<f64>>,
    interp: Interpolation,
) -> Result<PathChi> {
    let reff = data.reff;
    if reff < 0.05 {
        return Err(FeffitError::DegeneratePath {
            label: data.filename.clone().unwrap_or_else(|| data.title.clone()),
            reff,
        });
    }
    let k = match k {
        Some(k) => k.to_owned(),
        None => default_k_grid(data),
    };
    if k.len() < 3 {
        return Err(FeffitError::InvalidInput(format!(
            "path chi needs at least 3 k points, got {}",
            k.len()
        )));
    }

    let q = shifted_q(k.view(), values.e0);
    let (pha, amp, rep, lam) = match interp {
        Interpolation::Cubic => (
            splines.pha.eval_array(q.view()),
            splines.amp.eval_array(q.view()),
            splines.rep.eval_array(q.view()),
            splines.lam.eval_array(q.view()),
        ),
        Interpolation::Linear => {
            let kt = data.k.view();
            (
                interp_linear(q.view(), kt, data.pha.view())?,
                interp_linear(q.view(), kt, data.amp.view())?,
                interp_linear(q.view(), kt, data.rep.view())?,
                interp_linear(q.view(), kt, data.lam.view())?,
            )
        }
    };

    let i = Complex64::i();
    let n = k.len();
    let mut p = Array1::<Complex64>::zeros(n);
    let mut cchi = Array1::<Complex64>::zeros(n);
    for j in 0..n {
        let pp = (rep[j] + i / lam[j]).powi(2) + i * (values.ei * ETOK);
        let pj = pp.sqrt();
        let arg = -2.0 * reff * pj.im - 2.0 * pp * (values.sigma2 - pp * values.fourth / 3.0)
            + i * (2.0 * q[j] * reff
                + pha[j]
                + 2.0
                    * pj
                    * (values.deltar - 2.0 * values.sigma2 / reff - 2.0 * pp * values.third / 3.0));
        let scale = values.degen * values.s02 * amp[j] / (q[j] * (reff + values.deltar).powi(2));
        cchi[j] = arg.exp() * scale;
        p[j] = pj;
    }
    cchi[0] = 2.0 * cchi[1] - cchi[2];

    Ok(PathChi {
        chi: cchi.mapv(|c| c.im),
        chi_imag: cchi.mapv(|c| -c.re),
        k,
        q,
        p,
    })
}

#[derive(Debug, Clone)]
enum CompiledValue {
    FileDegen,
    Fixed(f64),
    Expr(Expression),
}

/// Scope for path parameter expressions: path bindings and functions over a parameter context
struct PathScope<'a, C: ?Sized> {
    data: &'a PathData,
    params: &'a C,
}

impl<C: ?Sized> PathScope<'_, C> {
    fn binding(&self, name: &str) -> Option<f64> {
        match name {
            "reff" => Some(self.data.reff),
            "nleg" => Some(self.data.nleg as f64),
            "rnorman" => Some(self.data.rnorman),
            "rmass" => Some(self.data.rmass()),
            "feff_degen" => Some(self.data.degen),
            _ => None,
        }
    }
}

impl<T, C> EvaluationContext<T> for PathScope<'_, C>
where
    T: ExprValue,
    C: EvaluationContext<T> + ?Sized,
{
    fn get_variable(&self, name: &str) -> ExprResult<T> {
        match self.binding(name) {
            Some(value) => Ok(T::constant(value)),
            None => self.params.get_variable(name),
        }
    }

    fn has_variable(&self, name: &str) -> bool {
        PATH_BINDINGS.contains(&name) || self.params.has_variable(name)
    }

    fn variable_names(&self) -> Vec<String> {
        let mut names: Vec<String> = PATH_BINDINGS.iter().map(|s| s.to_string()).collect();
        names.extend(self.params.variable_names());
        names
    }

    fn call_function(&self, name: &str, args: &[f64]) -> Option<ExprResult<f64>> {
        let model: fn(f64, f64, &PathData) -> f64 = match name {
            "sigma2_eins" => sigma2_eins,
            "sigma2_debye" => sigma2_debye,
            _ => return self.params.call_function(name, args),
        };
        if args.len() != 2 {
            return Some(Err(ExpressionError::InvalidOperation {
                message: format!("{}() takes 2 arguments, got {}", name, args.len()),
            }));
        }
        Some(Ok(model(args[0], args[1], self.data)))
    }

    fn has_function(&self, name: &str) -> bool {
        PATH_FUNCTIONS.contains(&name) || self.params.has_function(name)
    }
}

/// A scattering path with its path parameters
#[derive(Debug, Clone)]
pub struct FeffPath {
    data: Arc<PathData>,
    label: String,
    params: PathParameters,
    compiled: Vec<CompiledValue>,
    splines: PathSplines,
    interpolation: Interpolation,
}

impl FeffPath {
    /// Build a path; expressions are parsed here and the label is derived from the geometry.
    pub fn new(data: Arc<PathData>, params: PathParameters) -> Result<Self> {
        let splines = PathSplines::new(&data)?;
        let compiled = compile(&params)?;
        let mut path = Self {
            data,
            label: String::new(),
            params,
            compiled,
            splines,
            interpolation: Interpolation::default(),
        };
        path.label = path.geometry_label();
        Ok(path)
    }

    /// Read a path file and build a path from it
    pub fn from_file<P: AsRef<Path>>(path: P, params: PathParameters) -> Result<Self> {
        Self::new(Arc::new(PathData::from_file(path)?), params)
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn data(&self) -> &PathData {
        &self.data
    }

    pub fn shared_data(&self) -> Arc<PathData> {
        Arc::clone(&self.data)
    }

    pub fn parameters(&self) -> &PathParameters {
        &self.params
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    pub fn set_interpolation(&mut self, interpolation: Interpolation) {
        self.interpolation = interpolation;
    }

    /// Replace one path parameter, reparsing its expression
    pub fn set_parameter(&mut self, name: &str, value: impl Into<PathValue>) -> Result<()> {
        let mut params = self.params.clone();
        params.set(name, value)?;
        self.compiled = compile(&params)?;
        self.params = params;
        Ok(())
    }

    /// `p` followed by eight characters of a hash of the geometry and parameters
    fn geometry_label(&self) -> String {
        let mut hasher = DefaultHasher::new();
        for atom in &self.data.geom {
            atom.label.hash(&mut hasher);
            atom.ipot.hash(&mut hasher);
            for x in atom.position {
                format!("{:.4}", x).hash(&mut hasher);
            }
        }
        format!("{:.4} {:.4}", self.data.degen, self.data.reff).hash(&mut hasher);
        for field in self.params.fields() {
            format!("{:?}", field).hash(&mut hasher);
        }

        const ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";
        let mut bits = hasher.finish();
        let mut label = String::with_capacity(9);
        label.push('p');
        for _ in 0..8 {
            label.push(ALPHABET[(bits & 31) as usize] as char);
            bits >>= 5;
        }
        label
    }

    /// Check that every name and function used by the path expressions is known
    pub fn check(&self, params: &FitParameterSet) -> Result<()> {
        for (name, value) in PATH_PARAM_NAMES.iter().zip(&self.compiled) {
            let CompiledValue::Expr(expr) = value else {
                continue;
            };
            let owner = format!("{}.{}", self.label, name);
            for function in expr.functions() {
                if !BUILTIN_FUNCTIONS.contains(&function.as_str())
                    && !PATH_FUNCTIONS.contains(&function.as_str())
                {
                    return Err(FeffitError::InvalidExpression(format!(
                        "unknown function '{}' in '{}'",
                        function, owner
                    )));
                }
            }
            for variable in expr.variables() {
                if !PATH_BINDINGS.contains(&variable.as_str())
                    && !params.contains(&variable)
                    && crate::parameters::expression::constant_value(&variable).is_none()
                {
                    return Err(FeffitError::UnresolvedParameter {
                        name: variable,
                        owner,
                    });
                }
            }
        }
        Ok(())
    }

    fn resolve_as<T, C>(&self, params: &C) -> Result<Vec<T>>
    where
        T: ExprValue,
        C: EvaluationContext<T> + ?Sized,
    {
        let scope = PathScope {
            data: &self.data,
            params,
        };
        PATH_PARAM_NAMES
            .iter()
            .zip(&self.compiled)
            .map(|(name, value)| {
                let resolved = match value {
                    CompiledValue::FileDegen => T::constant(self.data.degen),
                    CompiledValue::Fixed(v) => T::constant(*v),
                    CompiledValue::Expr(expr) => expr.evaluate_as::<T, _>(&scope).map_err(|e| {
                        FeffitError::InvalidExpression(format!(
                            "{}.{}: {}",
                            self.label, name, e
                        ))
                    })?,
                };
                if !resolved.value().is_finite() {
                    return Err(FeffitError::InvalidComputation(format!(
                        "path '{}' parameter {} evaluated to {}",
                        self.label,
                        name,
                        resolved.value()
                    )));
                }
                Ok(resolved)
            })
            .collect()
    }

    /// Resolve the eight path parameters against the parameter set
    pub fn resolve(&self, params: &FitParameterSet) -> Result<PathValues> {
        let values: Vec<f64> = self.resolve_as(params)?;
        let mut out = [0.0; 8];
        out.copy_from_slice(&values);
        Ok(PathValues::from_array(out))
    }

    /// Resolve the path parameters carrying gradients over the varied parameters
    pub fn resolve_uncertain(&self, values: &UncertainValues) -> Result<Vec<Uncertain>> {
        self.resolve_as(values)
    }

    /// chi(k) for the current parameter values
    pub fn evaluate(&self, params: &FitParameterSet, k: Option<ArrayView1<f64>>) -> Result<PathChi> {
        let values = self.resolve(params)?;
        self.evaluate_values(&values, k)
    }

    /// chi(k) for already resolved values
    pub fn evaluate_values(&self, values: &PathValues, k: Option<ArrayView1<f64>>) -> Result<PathChi> {
        calc_chi(&self.data, &self.splines, values, k, self.interpolation)
    }

    /// Text report of the geometry and parameter values
    pub fn report(&self, values: &PathValues, stderr: Option<&PathValues>) -> String {
        let mut out = vec![
            format!(
                "   Path {}, Feff.dat file = {}",
                self.label,
                self.data.filename.as_deref().unwrap_or("")
            ),
            "     atom      x        y        z       ipot".to_string(),
        ];
        for atom in &self.data.geom {
            let [x, y, z] = atom.position;
            let mut line = format!(
                "    {:>4}      {}, {}, {}  {}",
                atom.label,
                signed(x, 4),
                signed(y, 4),
                signed(z, 4),
                atom.ipot
            );
            if atom.ipot == 0 {
                line.push_str(" (absorber)");
            }
            out.push(line);
        }
        out.push(format!("     {:7}= {}", "reff", gformat(self.data.reff)));

        let stderr = stderr.copied().unwrap_or_default();
        let text = |value: Option<&PathValue>| match value {
            Some(PathValue::Expr(expr)) => Some(expr.clone()),
            _ => None,
        };
        let fields = self.params.fields();
        let rows = [
            ("degen", values.degen, stderr.degen, text(fields[0])),
            ("n*s02", values.s02, stderr.s02, text(fields[1])),
            ("e0", values.e0, stderr.e0, text(fields[2])),
            (
                "r",
                self.data.reff + values.deltar,
                stderr.deltar,
                Some(format!("reff + {}", self.params.deltar)),
            ),
            ("deltar", values.deltar, stderr.deltar, text(fields[4])),
            ("sigma2", values.sigma2, stderr.sigma2, text(fields[5])),
            ("third", values.third, stderr.third, text(fields[6])),
            ("fourth", values.fourth, stderr.fourth, text(fields[7])),
            ("ei", values.ei, stderr.ei, text(fields[3])),
        ];
        for (name, value, std, expr) in rows {
            if value == 0.0 && matches!(name, "third" | "fourth" | "ei") {
                continue;
            }
            let mut line = if std > 0.0 {
                format!("     {:7}= {} +/-{}", name, gformat(value), gformat(std))
            } else {
                format!("     {:7}= {}", name, gformat(value))
            };
            if let Some(expr) = expr {
                line.push_str(&format!("  '{}'", expr));
            }
            out.push(line);
        }
        out.join("\n")
    }
}

fn compile(params: &PathParameters) -> Result<Vec<CompiledValue>> {
    params
        .fields()
        .iter()
        .zip(PATH_PARAM_NAMES)
        .map(|(field, name)| match field {
            None => Ok(CompiledValue::FileDegen),
            Some(PathValue::Fixed(value)) => Ok(CompiledValue::Fixed(*value)),
            Some(PathValue::Expr(text)) => Expression::parse(text)
                .map(CompiledValue::Expr)
                .map_err(|e| {
                    FeffitError::InvalidExpression(format!("{} = '{}': {}", name, text, e))
                }),
        })
        .collect()
}

/// Sum the chi(k) of several paths on a common grid.
///
/// Without `k`, the default model grid of the first path is used.
pub fn ff2chi(
    paths: &[FeffPath],
    params: &FitParameterSet,
    k: Option<ArrayView1<f64>>,
) -> Result<(Array1<f64>, Array1<f64>)> {
    let first = paths
        .first()
        .ok_or_else(|| FeffitError::InvalidInput("ff2chi needs at least one path".to_string()))?;
    let k = match k {
        Some(k) => k.to_owned(),
        None => default_k_grid(first.data()),
    };
    let mut chi = Array1::<f64>::zeros(k.len());
    for path in paths {
        chi += &path.evaluate(params, Some(k.view()))?.chi;
    }
    debug!("summed {} paths on {} k points", paths.len(), k.len());
    Ok((k, chi))
}

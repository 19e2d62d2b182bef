//! Debye-Waller factor models for a scattering path.
//!
//! Both models take the sample temperature and the characteristic temperature
//! in Kelvin and return sigma2 in Å². Temperatures are floored at `1e-5` K.

use crate::xafs::feffdat::PathData;

/// `hbar² c² / (2 k_B amu)` in Å²·K·amu
pub const EINS_FACTOR: f64 = 24.254360157751783;

const CONH: f64 = 72.7630804732553;
const CONR: f64 = 4.5693349700844;

const ROMBERG_ITERATIONS: usize = 12;
const ROMBERG_TOL: f64 = 1e-9;

/// Einstein model: `EINS_FACTOR / (theta * mu * tanh(theta / 2t))` where `mu`
/// is the reduced mass of the path with masses floored at 0.1 amu.
pub fn sigma2_eins(t: f64, theta: f64, path: &PathData) -> f64 {
    let theta = theta.max(1e-5);
    let t = t.max(1e-5);
    let inverse: f64 = path.geom.iter().map(|atom| 1.0 / atom.mass.max(0.1)).sum();
    let rmass = 1.0 / inverse.max(1e-12);
    EINS_FACTOR / (theta * rmass * (theta / (2.0 * t)).tanh())
}

/// Correlated Debye model summed over every pair of legs of the path.
///
/// `path.rnorman` is the average Norman radius in bohr.
pub fn sigma2_debye(t: f64, theta: f64, path: &PathData) -> f64 {
    let theta = theta.max(1e-5);
    let tk = t.max(1e-5);
    let atoms = &path.geom;
    let n = atoms.len();
    if n < 2 {
        return 0.0;
    }
    let rs = path.rnorman;
    let corr = |a: usize, b: usize| {
        let rij = distance(&atoms[a].position, &atoms[b].position);
        corrfn(rij, theta, tk, atoms[a].mass, atoms[b].mass, rs)
    };

    let mut sig2 = 0.0;
    for i0 in 0..n {
        let i1 = (i0 + 1) % n;
        for j0 in i0..n {
            let j1 = (j0 + 1) % n;
            let (pi0, pi1) = (&atoms[i0].position, &atoms[i1].position);
            let (pj0, pj1) = (&atoms[j0].position, &atoms[j1].position);
            let ridotj: f64 = (0..3).map(|c| (pi0[c] - pi1[c]) * (pj0[c] - pj1[c])).sum();

            let mut sig2ij = ridotj * (corr(i0, j0) + corr(i1, j1) - corr(i0, j1) - corr(i1, j0))
                / (distance(pi0, pi1) * distance(pj0, pj1));
            if i0 == j0 {
                sig2ij /= 2.0;
            }
            sig2 += sig2ij;
        }
    }
    sig2 / 2.0
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter().zip(b).map(|(p, q)| (p - q).powi(2)).sum::<f64>().sqrt()
}

/// Displacement correlation `<x_i x_j>` of two atoms `rij` apart
pub fn corrfn(rij: f64, theta: f64, tk: f64, mass1: f64, mass2: f64, rs: f64) -> f64 {
    let rx = CONR * rij / rs;
    let tx = theta / tk;
    let rmass = theta * (mass1 * mass2).sqrt();
    CONH * debint(rx, tx) / rmass
}

/// `sin(w rx)/rx * coth(w tx / 2)`
fn debfun(w: f64, rx: f64, tx: f64) -> f64 {
    if w <= 1e-20 {
        return 2.0 / tx;
    }
    let mut result = if rx > 0.0 { (w * rx).sin() / rx } else { w };
    let emwt = (-(w * tx).min(50.0)).exp();
    result *= (1.0 + emwt) / (1.0 - emwt);
    result
}

/// Romberg integral of `debfun` over `[0, 1]`
pub fn debint(rx: f64, tx: f64) -> f64 {
    let mut itn = 1;
    let mut step = 1.0;
    let mut result = 0.0;
    let mut bn = (debfun(0.0, rx, tx) + debfun(1.0, rx, tx)) / 2.0;
    let mut bo = bn;
    for _ in 0..ROMBERG_ITERATIONS {
        step /= 2.0;
        let sum: f64 = (0..itn).map(|i| debfun(step * (2 * i + 1) as f64, rx, tx)).sum();
        itn *= 2;
        let bnp1 = step * sum + bn / 2.0;
        result = (4.0 * bnp1 - bn) / 3.0;
        if ((result - bo) / result).abs() < ROMBERG_TOL {
            break;
        }
        bn = bnp1;
        bo = result;
    }
    result
}

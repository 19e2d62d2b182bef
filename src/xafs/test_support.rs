//! Synthetic path tables shared by the unit tests.

use ndarray::Array1;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::sync::Arc;

use crate::parameters::FitParameterSet;
use crate::xafs::feffdat::{PathAtom, PathData};
use crate::xafs::path::{FeffPath, PathParameters};

/// Smooth single-scattering Cu-Cu table on `k = 0, 0.1, ..., 20`
pub(crate) fn sample_data() -> PathData {
    let n = 201;
    let k = Array1::from_shape_fn(n, |i| 0.1 * i as f64);
    let real_phc = k.mapv(|k| 3.0 - 0.15 * k);
    let pha_feff = k.mapv(|k| -0.5 - 0.05 * k);
    let mag_feff = k.mapv(|k| 0.4 * (-0.02 * (k - 6.0).powi(2)).exp() + 0.05);
    let red_fact = k.mapv(|k| 0.9 + 0.002 * k);
    let lam = k.mapv(|k| 4.0 + 0.5 * k);
    let rep = k.mapv(|k| (k * k + 1.2).sqrt());
    let atom = |ipot: usize, position: [f64; 3]| PathAtom {
        label: "Cu".to_string(),
        iz: 29,
        ipot,
        mass: 63.546,
        position,
    };
    PathData {
        filename: Some("feff0001.dat".to_string()),
        nleg: 2,
        degen: 12.0,
        reff: 2.5478,
        rnorman: 2.6,
        geom: vec![atom(0, [0.0; 3]), atom(1, [-1.8016, 0.0, -1.8016])],
        pha: &real_phc + &pha_feff,
        amp: &mag_feff * &red_fact,
        k,
        real_phc,
        pha_feff,
        mag_feff,
        red_fact,
        lam,
        rep,
        ..Default::default()
    }
}

/// chi(k) of the sample path on `k = 0, 0.05, ..., 16` plus Gaussian noise
pub(crate) fn synthetic_chi(
    s02: f64,
    e0: f64,
    deltar: f64,
    sigma2: f64,
    noise: f64,
) -> (Array1<f64>, Array1<f64>) {
    let k = Array1::from_shape_fn(321, |i| 0.05 * i as f64);
    let path = FeffPath::new(
        Arc::new(sample_data()),
        PathParameters::new()
            .with_s02(s02)
            .with_e0(e0)
            .with_deltar(deltar)
            .with_sigma2(sigma2),
    )
    .unwrap();
    let mut chi = path
        .evaluate(&FitParameterSet::new(), Some(k.view()))
        .unwrap()
        .chi;
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let normal = Normal::new(0.0, noise).unwrap();
    chi.mapv_inplace(|c| c + normal.sample(&mut rng));
    (k, chi)
}

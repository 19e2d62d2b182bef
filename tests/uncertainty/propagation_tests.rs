//! Linear propagation of correlated uncertainties against sampling

use approx::assert_relative_eq;
use ndarray::{arr1, arr2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use feffit_rs::parameters::FitParameterSet;
use feffit_rs::uncertainty::{
    calculate_correlation, calculate_covariance, propagate_uncertainty, standard_errors_from_covariance,
    UncertaintyCalculator,
};

#[test]
fn test_covariance_of_straight_line() {
    // y = m x + b through (1,1), (2,2), (3,2), (4,3)
    let jacobian = arr2(&[[1.0, 1.0], [2.0, 1.0], [3.0, 1.0], [4.0, 1.0]]);
    let calc = UncertaintyCalculator::new(4, 2, 0.3);
    assert_eq!(calc.nfree, 2);
    assert_relative_eq!(calc.redchi, 0.15);

    let covar = calc.calculate_covariance(&jacobian).unwrap();
    // (J^T J)^-1 = [[0.2, -0.5], [-0.5, 1.5]]
    assert_relative_eq!(covar[[0, 0]], 0.2 * 0.15, epsilon = 1e-12);
    assert_relative_eq!(covar[[0, 1]], -0.5 * 0.15, epsilon = 1e-12);
    assert_relative_eq!(covar[[1, 1]], 1.5 * 0.15, epsilon = 1e-12);

    let correl = calculate_correlation(&covar);
    assert_relative_eq!(correl[[0, 0]], 1.0, epsilon = 1e-12);
    assert_relative_eq!(correl[[0, 1]], -0.5 / (0.2f64 * 1.5).sqrt(), epsilon = 1e-12);

    let stderr = standard_errors_from_covariance(&covar);
    assert_relative_eq!(stderr[1], (1.5f64 * 0.15).sqrt(), epsilon = 1e-12);

    let zero = arr2(&[[1.0, 0.0], [2.0, 0.0], [3.0, 0.0]]);
    assert!(calculate_covariance(&zero, 1.0).is_err());
}

#[test]
fn test_linear_propagation_matches_sampling() {
    let mut params = FitParameterSet::new();
    params.add_var("amp", 0.85).unwrap();
    params.add_var("ss", 0.005).unwrap();
    params.add_expr("amp_ss", "amp * exp(-2 * ss * 100)").unwrap();

    let covar = arr2(&[[4e-4, 2e-6], [2e-6, 1e-7]]);
    let linear = params
        .uncertain_values()
        .unwrap()
        .get("amp_ss")
        .unwrap()
        .std_dev(&covar);

    let best = arr1(&[0.85, 0.005]);
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let sampled = propagate_uncertainty(
        &best,
        &covar,
        4000,
        |x| {
            let mut p = params.clone();
            p.set_varying_values(x.as_slice().unwrap())?;
            Ok(p.value("amp_ss").unwrap_or(f64::NAN))
        },
        &mut rng,
    )
    .unwrap();

    assert_eq!(sampled.values.len(), 4000);
    assert_relative_eq!(sampled.mean, params.value("amp_ss").unwrap(), max_relative = 0.01);
    assert_relative_eq!(sampled.std, linear, max_relative = 0.1);
}

//! Tests for bounded parameters

use approx::assert_relative_eq;
use feffit_rs::parameters::FitParameterSet;

#[test]
fn test_internal_values_stay_in_bounds() {
    let mut params = FitParameterSet::new();
    params.add_bounded("amp", 0.9, 0.5, 1.2).unwrap();
    params.add_bounded("sig2", 0.003, 0.0, f64::INFINITY).unwrap();
    params.add_var("e0", -2.0).unwrap();

    let internal = params.varying_internal_values().unwrap();
    assert_eq!(internal.len(), 3);
    assert_relative_eq!(internal[2], -2.0);

    // Any internal value maps inside the bounds
    for x in [-100.0, -3.0, 0.0, 0.7, 42.0] {
        params.update_from_internal(&[x, x, x]).unwrap();
        let amp = params.value("amp").unwrap();
        let sig2 = params.value("sig2").unwrap();
        assert!((0.5..=1.2).contains(&amp), "amp = {}", amp);
        assert!(sig2 >= 0.0, "sig2 = {}", sig2);
        assert_relative_eq!(params.value("e0").unwrap(), x);
    }
}

#[test]
fn test_internal_derivatives_match_differences() {
    let mut params = FitParameterSet::new();
    params.add_bounded("amp", 0.9, 0.5, 1.2).unwrap();
    params.add_bounded("sig2", 0.003, 0.0, f64::INFINITY).unwrap();

    let internal = params.varying_internal_values().unwrap().to_vec();
    let derivs = params.internal_derivatives(&internal);
    let h = 1e-6;
    for i in 0..2 {
        let mut up = internal.clone();
        up[i] += h;
        let mut down = internal.clone();
        down[i] -= h;
        let mut p_up = params.clone();
        p_up.update_from_internal(&up).unwrap();
        let mut p_down = params.clone();
        p_down.update_from_internal(&down).unwrap();
        let name = &params.varying_names()[i];
        let numeric = (p_up.value(name).unwrap() - p_down.value(name).unwrap()) / (2.0 * h);
        assert_relative_eq!(derivs[i], numeric, max_relative = 1e-5);
    }
}

#[test]
fn test_bounds_clamp_and_validate() {
    let mut params = FitParameterSet::new();
    params.add_bounded("amp", 2.0, 0.5, 1.2).unwrap();
    assert_relative_eq!(params.value("amp").unwrap(), 1.2);
    assert!(params.add_bounded("sig2", 0.003, 0.01, 0.0).is_err());
    assert_eq!(params.len(), 1);
}

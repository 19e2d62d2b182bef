//! Fits of synthetic spectra built from a Feff path file

use approx::assert_relative_eq;
use ndarray::Array1;
use std::sync::Arc;

use feffit_rs::parameters::FitParameterSet;
use feffit_rs::xafs::{
    feffit, feffit_report, FeffPath, FeffitConfig, FeffitDataSet, FitSpace, PathAtom, PathData,
    PathParameters, TransformConfig, WindowKind,
};

use crate::test_helpers::{feff_dat_text, shell_parameters, simulate, write_temp};

fn truth() -> FitParameterSet {
    let mut params = FitParameterSet::new();
    params.add_fixed("amp", 0.88).unwrap();
    params.add_fixed("del_e0", 1.5).unwrap();
    params.add_fixed("del_r", -0.015).unwrap();
    params.add_fixed("sig2", 0.006).unwrap();
    params
}

fn starting_values() -> FitParameterSet {
    let mut params = FitParameterSet::new();
    params.add_var("amp", 1.0).unwrap();
    params.add_var("del_e0", 0.0).unwrap();
    params.add_var("del_r", 0.0).unwrap();
    params.add_bounded("sig2", 0.003, 0.0, 0.05).unwrap();
    params
}

fn transform(fitspace: FitSpace) -> TransformConfig {
    TransformConfig::new()
        .with_k_range(3.0, 14.0)
        .with_r_range(1.4, 3.2)
        .with_dk(1.0, None)
        .with_window(WindowKind::Hanning)
        .with_fitspace(fitspace)
}

#[test]
fn test_first_shell_fit_in_r_space() {
    let _ = env_logger::builder().is_test(true).try_init();
    let file = write_temp("feff0001.dat", &feff_dat_text());
    let path = FeffPath::from_file(&file, shell_parameters())
        .unwrap()
        .with_label("cu1");
    let (k, chi) = simulate(&path, &truth(), 2e-4, 3);

    let mut params = starting_values();
    let mut datasets = vec![FeffitDataSet::new(
        k,
        chi,
        vec![path],
        transform(FitSpace::R).with_kweights(vec![1.0, 2.0, 3.0]),
    )
    .unwrap()];
    let result = feffit(&mut params, &mut datasets, &FeffitConfig::default()).unwrap();

    assert!(result.converged, "{}", result.message);
    assert_relative_eq!(params.value("amp").unwrap(), 0.88, epsilon = 0.02);
    assert_relative_eq!(params.value("del_e0").unwrap(), 1.5, epsilon = 0.3);
    assert_relative_eq!(params.value("del_r").unwrap(), -0.015, epsilon = 0.003);
    assert_relative_eq!(params.value("sig2").unwrap(), 0.006, epsilon = 3e-4);
    for name in params.varying_names() {
        let stderr = params.get(&name).unwrap().stderr.unwrap();
        assert!(stderr > 0.0 && stderr.is_finite(), "{} +/- {}", name, stderr);
    }

    // Three k-weights in R space: real and imaginary parts for each
    let prepared = datasets[0].prepared().unwrap();
    assert_relative_eq!(
        prepared.n_idp,
        1.0 + 2.0 * 1.8 * 11.0 / std::f64::consts::PI,
        epsilon = 1e-9
    );
    assert_eq!(result.ndata % 6, 0);
    assert!(result.rfactor < 0.01);

    let output = &result.datasets[0];
    assert_eq!(output.data.r.len(), output.model.r.len());
    assert_eq!(output.paths.len(), 1);
    assert_eq!(output.paths[0].label, "cu1");
    assert_relative_eq!(output.paths[0].values.degen, 12.0);

    // Fitted values and their errors survive a JSON round trip
    let json = params.to_json().unwrap();
    let restored = FitParameterSet::from_json(&json).unwrap();
    assert_eq!(restored.get("amp").unwrap().stderr, params.get("amp").unwrap().stderr);

    let report = feffit_report(&result, 0.1, true);
    assert!(report.starts_with("=================== FEFFIT RESULTS ===================="));
    assert!(report.contains("[[Variables]]"));
    assert!(report.contains("   k-weight           = 1, 2, 3"));
    assert!(report.contains("   Path cu1, Feff.dat file = "));
}

#[test]
fn test_fit_in_k_and_q_space() {
    let file = write_temp("feff0004.dat", &feff_dat_text());
    let path = FeffPath::from_file(&file, shell_parameters()).unwrap();
    let (k, chi) = simulate(&path, &truth(), 2e-4, 5);

    for fitspace in [FitSpace::K, FitSpace::Q] {
        let mut params = starting_values();
        let mut datasets =
            vec![FeffitDataSet::new(k.clone(), chi.clone(), vec![path.clone()], transform(fitspace)).unwrap()];
        let result = feffit(&mut params, &mut datasets, &FeffitConfig::default()).unwrap();
        assert!(result.converged, "{}: {}", fitspace, result.message);
        assert_relative_eq!(params.value("amp").unwrap(), 0.88, epsilon = 0.03);
        assert_relative_eq!(params.value("sig2").unwrap(), 0.006, epsilon = 5e-4);
    }
}

#[test]
fn test_temperature_series_shares_debye_temperature() {
    let file = write_temp("feff0005.dat", &feff_dat_text());
    let at = |temp: &str| {
        FeffPath::from_file(
            &file,
            PathParameters::new()
                .with_s02("amp")
                .with_e0("del_e0")
                .with_deltar("del_r")
                .with_sigma2(format!("sigma2_debye({}, theta)", temp)),
        )
        .unwrap()
    };

    let mut truth = FitParameterSet::new();
    truth.add_fixed("amp", 0.9).unwrap();
    truth.add_fixed("del_e0", 2.0).unwrap();
    truth.add_fixed("del_r", 0.0).unwrap();
    truth.add_fixed("theta", 315.0).unwrap();
    truth.add_fixed("t_low", 80.0).unwrap();
    truth.add_fixed("t_high", 300.0).unwrap();

    let (k_low, chi_low) = simulate(&at("t_low"), &truth, 2e-4, 11);
    let (k_high, chi_high) = simulate(&at("t_high"), &truth, 2e-4, 12);

    let mut params = FitParameterSet::new();
    params.add_var("amp", 1.0).unwrap();
    params.add_var("del_e0", 0.0).unwrap();
    params.add_var("del_r", 0.0).unwrap();
    params.add_bounded("theta", 250.0, 50.0, 1000.0).unwrap();
    params.add_fixed("t_low", 80.0).unwrap();
    params.add_fixed("t_high", 300.0).unwrap();

    let mut datasets = vec![
        FeffitDataSet::new(k_low, chi_low, vec![at("t_low")], transform(FitSpace::R))
            .unwrap()
            .with_label("80K"),
        FeffitDataSet::new(k_high, chi_high, vec![at("t_high")], transform(FitSpace::R))
            .unwrap()
            .with_label("300K"),
    ];
    let config = FeffitConfig::default().with_parallel(true).with_path_outputs(false);
    let result = feffit(&mut params, &mut datasets, &config).unwrap();

    assert!(result.converged, "{}", result.message);
    assert_eq!(result.datasets.len(), 2);
    assert_relative_eq!(params.value("theta").unwrap(), 315.0, epsilon = 8.0);
    assert_relative_eq!(params.value("amp").unwrap(), 0.9, epsilon = 0.03);

    // The colder spectrum has the smaller mean-square displacement
    let low = &result.datasets[0].paths[0];
    let high = &result.datasets[1].paths[0];
    assert!(low.values.sigma2 < high.values.sigma2);
    assert!(high.stderr.sigma2 > 0.0);
    assert!(low.transform.is_none());

    let report = feffit_report(&result, 0.5, true);
    assert!(report.contains("[[Datasets (2)]]"));
    assert!(report.contains(" dataset 2:"));
}

/// Single-scattering path with unit amplitude, zero phase and no mean free path loss
fn flat_path() -> FeffPath {
    let k = Array1::from_shape_fn(201, |i| 0.1 * i as f64);
    let atom = |ipot: usize, position: [f64; 3]| PathAtom {
        label: "O".to_string(),
        iz: 8,
        ipot,
        mass: 15.999,
        position,
    };
    let data = PathData {
        filename: Some("flat.dat".to_string()),
        nleg: 2,
        degen: 1.0,
        reff: 2.0,
        rnorman: 2.0,
        geom: vec![atom(0, [0.0; 3]), atom(1, [0.0, 0.0, 2.0])],
        real_phc: Array1::zeros(k.len()),
        pha_feff: Array1::zeros(k.len()),
        pha: Array1::zeros(k.len()),
        mag_feff: Array1::ones(k.len()),
        red_fact: Array1::ones(k.len()),
        amp: Array1::ones(k.len()),
        lam: Array1::from_elem(k.len(), 1e10),
        rep: k.clone(),
        k,
        ..Default::default()
    };
    FeffPath::new(Arc::new(data), shell_parameters()).unwrap()
}

#[test]
fn test_noisy_fit_recovers_truth_within_errors() {
    let path = flat_path();
    let truth = [("amp", 0.9), ("del_e0", 1.5), ("del_r", 0.02), ("sig2", 0.003)];
    let mut fixed = FitParameterSet::new();
    for (name, value) in truth {
        fixed.add_fixed(name, value).unwrap();
    }
    let (k, chi) = simulate(&path, &fixed, 0.002, 2024);

    let mut params = FitParameterSet::new();
    params.add_var("amp", 1.0).unwrap();
    params.add_var("del_e0", 0.0).unwrap();
    params.add_var("del_r", 0.0).unwrap();
    params.add_var("sig2", 0.005).unwrap();
    let transform = TransformConfig::new()
        .with_k_range(2.0, 12.0)
        .with_r_range(1.0, 3.0)
        .with_kweight(2.0)
        .with_fitspace(FitSpace::R);
    let mut datasets = vec![FeffitDataSet::new(k, chi, vec![path], transform).unwrap()];
    let result = feffit(&mut params, &mut datasets, &FeffitConfig::default()).unwrap();

    assert!(result.converged, "{}", result.message);
    assert!(result.n_independent > 10.0 && result.n_independent < 16.0);
    // Noise estimated from the data puts the reduced chi-square near one
    assert!(
        result.chi_reduced > 0.3 && result.chi_reduced < 3.0,
        "reduced chi-square {}",
        result.chi_reduced
    );
    for (name, value) in truth {
        let param = params.get(name).unwrap();
        let stderr = param.stderr.unwrap();
        assert!(stderr > 0.0 && stderr.is_finite(), "{} +/- {}", name, stderr);
        let deviation = (param.value() - value) / stderr;
        assert!(
            deviation.abs() < 3.0,
            "{} = {} +/- {}, expected {}",
            name,
            param.value(),
            stderr,
            value
        );
    }
}

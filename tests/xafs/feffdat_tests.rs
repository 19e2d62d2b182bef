//! Reading Feff path files from disk

use approx::assert_relative_eq;
use feffit_rs::parameters::FitParameterSet;
use feffit_rs::xafs::{FeffPath, PathData, PathParameters};
use feffit_rs::FeffitError;

use crate::test_helpers::{feff_dat_text, write_temp, FIRST_DATA_LINE};

#[test]
fn test_read_path_file() {
    let file = write_temp("feff0006.dat", &feff_dat_text());
    let data = PathData::from_file(&file).unwrap();

    assert_eq!(data.filename.as_deref(), file.to_str());
    assert_eq!(data.nleg, 2);
    assert_relative_eq!(data.degen, 12.0);
    assert_relative_eq!(data.reff, 2.5478);
    assert_eq!(data.npts(), 201);
    assert_eq!(data.geom.len(), 2);
    assert_eq!(data.geom[0].label, "Cu");
    assert_eq!(data.geom[1].label, "Cu");
    assert_relative_eq!(data.rmass(), 63.546 / 2.0, epsilon = 1e-3);
    assert_relative_eq!(data.k[10], 1.0);
    assert_relative_eq!(data.pha[0], data.real_phc[0] + data.pha_feff[0]);
}

#[test]
fn test_path_from_file_uses_file_degeneracy() {
    let file = write_temp("feff0002.dat", &feff_dat_text());
    let path = FeffPath::from_file(&file, PathParameters::new().with_sigma2(0.003)).unwrap();
    let values = path.resolve(&FitParameterSet::new()).unwrap();
    assert_relative_eq!(values.degen, 12.0);
    assert_relative_eq!(values.s02, 1.0);
    assert_relative_eq!(values.sigma2, 0.003);
    assert!(path.label().starts_with('p'));
}

#[test]
fn test_six_column_row_is_malformed() {
    let mut lines: Vec<String> = feff_dat_text().lines().map(String::from).collect();
    let row = FIRST_DATA_LINE + 4;
    let mut words: Vec<&str> = lines[row - 1].split_whitespace().collect();
    words.pop();
    lines[row - 1] = words.join("  ");
    let file = write_temp("feff0003.dat", &lines.join("\n"));

    match PathData::from_file(&file) {
        Err(FeffitError::MalformedPathFile { line, reason }) => {
            assert_eq!(line, row);
            assert!(reason.contains("7 columns"), "{}", reason);
        }
        other => panic!("expected a malformed file error, got {:?}", other.map(|d| d.npts())),
    }
}

#[test]
fn test_non_utf8_row_is_malformed() {
    let mut bytes = Vec::new();
    let row = FIRST_DATA_LINE + 7;
    for (idx, line) in feff_dat_text().lines().enumerate() {
        if idx + 1 == row {
            bytes.extend_from_slice(b"  0.700 \xff\xfe 1.0E+00");
        } else {
            bytes.extend_from_slice(line.as_bytes());
        }
        bytes.push(b'\n');
    }
    let file = write_temp("feff0007.dat", "");
    std::fs::write(&file, &bytes).unwrap();

    match PathData::from_file(&file) {
        Err(FeffitError::MalformedPathFile { line, reason }) => {
            assert_eq!(line, row);
            assert!(reason.contains("UTF-8"), "{}", reason);
        }
        other => panic!("expected a malformed file error, got {:?}", other.map(|d| d.npts())),
    }
}

#[test]
fn test_missing_file() {
    let missing = std::env::temp_dir().join("feffit-rs-no-such-dir").join("feff9999.dat");
    assert!(matches!(
        FeffPath::from_file(&missing, PathParameters::new()),
        Err(FeffitError::IoError(_))
    ));
}

//! Reader for Feff scattering path files (`feffNNNN.dat`).
//!
//! A path file has a free-form header (title, potentials, exchange model,
//! interstitial values), a path block with the leg geometry and a data block of
//! seven columns: `k, real[2*phc], mag[feff], phase[feff], red factor, lambda, real[p]`.

use ndarray::Array1;
use std::fs;
use std::path::Path;

use crate::error::{FeffitError, Result};
use crate::xafs::elements::{atomic_weight, element_symbol};

/// One unique potential from the header
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Potential {
    pub ipot: usize,
    pub iz: usize,
    /// Muffin-tin radius
    pub rmt: f64,
    /// Norman radius
    pub rnm: f64,
}

/// One atom of the scattering path
#[derive(Debug, Clone, PartialEq)]
pub struct PathAtom {
    pub label: String,
    pub iz: usize,
    pub ipot: usize,
    /// Atomic mass in amu
    pub mass: f64,
    pub position: [f64; 3],
}

/// Contents of one Feff path file
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PathData {
    pub filename: Option<String>,
    pub title: String,
    pub version: String,
    pub potentials: Vec<Potential>,
    pub gam_ch: f64,
    pub exch: String,
    pub mu: f64,
    pub kf: f64,
    pub vint: f64,
    pub rs_int: f64,
    pub nleg: usize,
    pub degen: f64,
    pub reff: f64,
    pub rnorman: f64,
    pub edge: f64,
    pub geom: Vec<PathAtom>,
    pub k: Array1<f64>,
    pub real_phc: Array1<f64>,
    pub mag_feff: Array1<f64>,
    pub pha_feff: Array1<f64>,
    pub red_fact: Array1<f64>,
    pub lam: Array1<f64>,
    pub rep: Array1<f64>,
    /// Total phase, `real_phc + pha_feff`
    pub pha: Array1<f64>,
    /// Total amplitude, `mag_feff * red_fact`
    pub amp: Array1<f64>,
}

#[derive(PartialEq)]
enum Section {
    Header,
    Path,
    Arrays,
}

fn malformed(line: usize, reason: impl Into<String>) -> FeffitError {
    FeffitError::MalformedPathFile {
        line,
        reason: reason.into(),
    }
}

fn number<T: std::str::FromStr>(word: Option<&&str>, line: usize, what: &str) -> Result<T> {
    word.and_then(|w| w.parse::<T>().ok())
        .ok_or_else(|| malformed(line, format!("expected a number for {}", what)))
}

impl PathData {
    /// Read and parse a path file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path.as_ref())?;
        let text = String::from_utf8(bytes).map_err(|err| {
            let valid = &err.as_bytes()[..err.utf8_error().valid_up_to()];
            let line = valid.iter().filter(|&&b| b == b'\n').count() + 1;
            malformed(line, "line is not valid UTF-8")
        })?;
        let mut data = Self::parse(&text)?;
        data.filename = Some(path.as_ref().display().to_string());
        Ok(data)
    }

    /// Parse the text of a path file
    pub fn parse(text: &str) -> Result<Self> {
        let mut data = PathData::default();
        let mut section = Section::Header;
        let mut path_lines = 0;
        let mut columns: [Vec<f64>; 7] = Default::default();

        for (idx, raw) in text.lines().enumerate() {
            let lineno = idx + 1;
            let line = raw.strip_prefix('#').unwrap_or(raw).trim();

            if lineno == 1 {
                let split = line.char_indices().nth(64).map_or(line.len(), |(i, _)| i);
                data.title = line[..split].trim().to_string();
                data.version = line[split..].trim().to_string();
                continue;
            }
            if line.is_empty() {
                continue;
            }
            if line.starts_with('k') && line.ends_with("real[p]@#") {
                section = Section::Arrays;
                continue;
            }
            if line.get(2..10).map_or(false, |s| s.contains("----")) {
                section = Section::Path;
                continue;
            }

            match section {
                Section::Header => data.parse_header_line(line, lineno)?,
                Section::Path => {
                    path_lines += 1;
                    if path_lines == 1 {
                        data.parse_path_line(line, lineno)?;
                    } else if path_lines > 2 {
                        data.geom.push(parse_atom(line, lineno)?);
                    }
                }
                Section::Arrays => {
                    let row: Vec<f64> = line
                        .split_whitespace()
                        .map(|w| w.parse::<f64>())
                        .collect::<std::result::Result<_, _>>()
                        .map_err(|_| malformed(lineno, "non-numeric value in data row"))?;
                    if row.len() != 7 {
                        return Err(malformed(
                            lineno,
                            format!("expected 7 columns, found {}", row.len()),
                        ));
                    }
                    for (column, value) in columns.iter_mut().zip(row) {
                        column.push(value);
                    }
                }
            }
        }

        if data.nleg == 0 || data.reff == 0.0 {
            return Err(malformed(0, "missing path block"));
        }
        if columns[0].len() < 2 {
            return Err(malformed(0, "missing or empty data block"));
        }
        if columns[0].windows(2).any(|w| w[1] <= w[0]) {
            return Err(malformed(0, "k values of the data block are not increasing"));
        }

        let [k, real_phc, mag_feff, pha_feff, red_fact, lam, rep] = columns.map(Array1::from_vec);
        data.pha = &real_phc + &pha_feff;
        data.amp = &mag_feff * &red_fact;
        data.k = k;
        data.real_phc = real_phc;
        data.mag_feff = mag_feff;
        data.pha_feff = pha_feff;
        data.red_fact = red_fact;
        data.lam = lam;
        data.rep = rep;
        Ok(data)
    }

    fn parse_header_line(&mut self, line: &str, lineno: usize) -> Result<()> {
        let replaced = line.replace('=', " ");
        if line.starts_with("Abs") || line.starts_with("Pot") {
            let mut words: Vec<&str> = replaced.split_whitespace().skip(1).collect();
            let mut ipot = 0;
            if line.starts_with("Pot") {
                ipot = number(words.first(), lineno, "ipot")?;
                words.remove(0);
            }
            self.potentials.push(Potential {
                ipot,
                iz: number(words.get(1), lineno, "Z")?,
                rmt: number(words.get(3), lineno, "Rmt")?,
                rnm: number(words.get(5), lineno, "Rnm")?,
            });
        } else if line.starts_with("Gam_ch") {
            let words: Vec<&str> = replaced.splitn(3, ' ').collect();
            self.gam_ch = number(words.get(1), lineno, "Gam_ch")?;
            self.exch = words.get(2).map(|s| s.trim().to_string()).unwrap_or_default();
        } else if line.starts_with("Mu") {
            let words: Vec<&str> = replaced.split_whitespace().collect();
            self.mu = number(words.get(1), lineno, "Mu")?;
            self.kf = number(words.get(3), lineno, "kf")?;
            self.vint = number(words.get(5), lineno, "Vint")?;
            self.rs_int = number(words.get(7), lineno, "Rs_int")?;
        }
        Ok(())
    }

    fn parse_path_line(&mut self, line: &str, lineno: usize) -> Result<()> {
        let words: Vec<&str> = line.split_whitespace().take(5).collect();
        let nleg: f64 = number(words.first(), lineno, "nleg")?;
        self.nleg = nleg as usize;
        self.degen = number(words.get(1), lineno, "degeneracy")?;
        self.reff = number(words.get(2), lineno, "reff")?;
        self.rnorman = number(words.get(3), lineno, "rnorman")?;
        self.edge = number(words.get(4), lineno, "edge")?;
        Ok(())
    }

    /// Reduced mass of the path, `1 / Σ 1/max(1, mass)`
    pub fn rmass(&self) -> f64 {
        let inverse: f64 = self.geom.iter().map(|atom| 1.0 / atom.mass.max(1.0)).sum();
        1.0 / inverse
    }

    /// Number of rows in the data block
    pub fn npts(&self) -> usize {
        self.k.len()
    }
}

fn parse_atom(line: &str, lineno: usize) -> Result<PathAtom> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let position = [
        number(words.first(), lineno, "x")?,
        number(words.get(1), lineno, "y")?,
        number(words.get(2), lineno, "z")?,
    ];
    let ipot = number(words.get(3), lineno, "ipot")?;
    let iz: usize = number(words.get(4), lineno, "atomic number")?;
    let mass = atomic_weight(iz)
        .ok_or_else(|| malformed(lineno, format!("unknown atomic number {}", iz)))?;
    let label = match words.get(5) {
        Some(label) => label.to_string(),
        None => element_symbol(iz).unwrap_or("X").to_string(),
    };
    Ok(PathAtom {
        label,
        iz,
        ipot,
        mass,
        position,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const HEADER: &str = "\
 Cu metal fcc a=3.61                                              Feff 6L.02
 Abs   Z=29 Rmt= 1.271 Rnm= 1.371 K  shell
 Pot 1 Z=29 Rmt= 1.271 Rnm= 1.371
 Gam_ch=1.761E+00 H-L exch
 Mu=-4.845E+00 kf=1.808E+00 Vint=-1.741E+01 Rs_int= 2.037
 Path    1      icalls     2
 -----------------------------------------------------------------------
   2   12.000   2.5478   2.5478    0.00000 nleg, deg, reff, rnrmav(bohr), edge
        x         y         z   pot at#
    0.0000    0.0000    0.0000  0  29 Cu       absorbing atom
   -1.8016    0.0000   -1.8016  1  29
    k   real[2*phc]   mag[feff]  phase[feff] red factor   lambda     real[p]@#
";

    fn sample() -> String {
        let mut text = HEADER.to_string();
        for i in 0..6 {
            let k = i as f64;
            text.push_str(&format!(
                "   {:.3} {:.4E} {:.4E} {:.4E} {:.4E} {:.4E} {:.4E}\n",
                k,
                4.0 - 0.1 * k,
                0.3 + 0.01 * k,
                -1.0 - 0.2 * k,
                0.9,
                5.0 + k,
                k + 0.1
            ));
        }
        text
    }

    #[test]
    fn test_parse_header_and_path() {
        let data = PathData::parse(&sample()).unwrap();
        assert_eq!(data.title, "Cu metal fcc a=3.61");
        assert_eq!(data.version, "Feff 6L.02");
        assert_eq!(data.potentials.len(), 2);
        assert_eq!(data.potentials[1].ipot, 1);
        assert_eq!(data.potentials[1].iz, 29);
        assert_relative_eq!(data.potentials[0].rmt, 1.271);
        assert_relative_eq!(data.gam_ch, 1.761);
        assert_eq!(data.exch, "H-L exch");
        assert_relative_eq!(data.mu, -4.845);
        assert_relative_eq!(data.rs_int, 2.037);

        assert_eq!(data.nleg, 2);
        assert_relative_eq!(data.degen, 12.0);
        assert_relative_eq!(data.reff, 2.5478);
        assert_eq!(data.geom.len(), 2);
        assert_eq!(data.geom[0].label, "Cu");
        assert_eq!(data.geom[1].label, "Cu");
        assert_eq!(data.geom[1].ipot, 1);
        assert_relative_eq!(data.geom[1].position[2], -1.8016);
    }

    #[test]
    fn test_derived_columns() {
        let data = PathData::parse(&sample()).unwrap();
        assert_eq!(data.npts(), 6);
        for i in 0..6 {
            assert_relative_eq!(data.pha[i], data.real_phc[i] + data.pha_feff[i]);
            assert_relative_eq!(data.amp[i], data.mag_feff[i] * data.red_fact[i]);
        }
        assert_relative_eq!(data.rmass(), 63.546 / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_hash_prefixed_lines() {
        let text: String = sample().lines().map(|l| format!("#{}\n", l)).collect();
        let data = PathData::parse(&text).unwrap();
        assert_eq!(data.version, "Feff 6L.02");
        assert_eq!(data.npts(), 6);
    }

    #[test]
    fn test_six_column_row_rejected() {
        let mut text = sample();
        text.push_str("   6.000 3.4E+00 3.6E-01 -2.2E+00 9.0E-01 1.1E+01\n");
        match PathData::parse(&text) {
            Err(FeffitError::MalformedPathFile { line, reason }) => {
                assert_eq!(line, 19);
                assert!(reason.contains("7 columns"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_blocks_rejected() {
        assert!(PathData::parse(HEADER).is_err());
        let no_path: String = sample()
            .lines()
            .filter(|l| !l.contains("----"))
            .map(|l| format!("{}\n", l))
            .collect();
        assert!(PathData::parse(&no_path).is_err());
    }
}

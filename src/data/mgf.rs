// ============================================================
// Layer 4 - MGF Loader
// ============================================================
// Reads every .mgf file in a directory and turns each
// BEGIN IONS / END IONS block into a RawSpectrum.
//
// Block layout:
//   BEGIN IONS
//   TITLE=run1.1234.1234.2
//   PEPMASS=543.2101 12000.0      <- only the first field is used
//   CHARGE=2+                     <- leading digits only
//   SEQ=PEPLIDE                   <- normalised to PEPIIDE
//   101.0712 2300                 <- m/z, intensity (one peak per line)
//   ...
//   END IONS
//
// Unlike a best-effort reader, any malformed block aborts the
// whole load: ingestion must never persist a partial dataset.
//
// Reference: Rust Book §9 (Error Handling), §12 (I/O)

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::domain::error::{SpectraError, SpectraResult};
use crate::domain::spectrum::RawSpectrum;
use crate::domain::traits::SpectrumSource;
use crate::domain::vocab::normalize_peptide;

/// Loads all .mgf files from one directory.
pub struct MgfLoader {
    dir: PathBuf,
}

impl MgfLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The .mgf files of the directory, sorted by name so that
    /// dense store indices are reproducible between runs.
    fn mgf_files(&self) -> SpectraResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_mgf = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("mgf"));
            if path.is_file() && is_mgf {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl SpectrumSource for MgfLoader {
    fn load_all(&self) -> SpectraResult<Vec<RawSpectrum>> {
        let files = self.mgf_files()?;
        if files.is_empty() {
            tracing::warn!("No .mgf files found in '{}'", self.dir.display());
        }

        let mut spectra = Vec::new();
        for path in files {
            let parsed = parse_mgf_file(&path)?;
            tracing::debug!("Parsed {} spectra from '{}'", parsed.len(), path.display());
            spectra.extend(parsed);
        }

        tracing::info!("Loaded {} spectra from '{}'", spectra.len(), self.dir.display());
        Ok(spectra)
    }
}

pub fn parse_mgf_file(path: &Path) -> SpectraResult<Vec<RawSpectrum>> {
    let file = fs::File::open(path)?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");
    parse_mgf(BufReader::new(file), name)
}

/// Fields collected while inside one block.
#[derive(Default)]
struct BlockBuilder {
    title:          Option<String>,
    precursor_mass: Option<f64>,
    charge:         Option<f64>,
    sequence:       Option<String>,
    mz:             Vec<f64>,
    intensity:      Vec<i64>,
}

impl BlockBuilder {
    fn finish(self, source: &str, line: usize) -> SpectraResult<RawSpectrum> {
        let title = self
            .title
            .ok_or_else(|| SpectraError::malformed(source, line, "END IONS reached without TITLE"))?;
        let missing = |field: &str| {
            SpectraError::malformed(source, line, format!("block '{title}' has no {field}"))
        };
        let precursor_mass = self.precursor_mass.ok_or_else(|| missing("PEPMASS"))?;
        let charge         = self.charge.ok_or_else(|| missing("CHARGE"))?;
        let sequence       = self.sequence.ok_or_else(|| missing("SEQ"))?;

        Ok(RawSpectrum {
            title,
            precursor_mass,
            charge,
            sequence,
            mz:        self.mz,
            intensity: self.intensity,
        })
    }
}

/// Parse MGF text from any reader. `source` only labels errors.
pub fn parse_mgf<R: BufRead>(reader: R, source: &str) -> SpectraResult<Vec<RawSpectrum>> {
    let mut spectra = Vec::new();
    let mut block: Option<BlockBuilder> = None;
    let mut line_no = 0;

    for line in reader.lines() {
        let line = line?;
        line_no += 1;
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with("BEGIN IONS") {
            if block.is_some() {
                return Err(SpectraError::malformed(source, line_no, "BEGIN IONS inside an open block"));
            }
            block = Some(BlockBuilder::default());
            continue;
        }

        if line.starts_with("END IONS") {
            let finished = block
                .take()
                .ok_or_else(|| SpectraError::malformed(source, line_no, "END IONS without BEGIN IONS"))?;
            spectra.push(finished.finish(source, line_no)?);
            continue;
        }

        let Some(current) = block.as_mut() else {
            // Global header lines (e.g. MASS=Monoisotopic) live outside blocks.
            if line.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '-' | '+' | '.')) {
                return Err(SpectraError::malformed(source, line_no, "peak line outside a block"));
            }
            continue;
        };

        // Inside a block every line that is not KEY=VALUE must be a peak.
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim();
            match key.trim() {
                "TITLE"   => current.title = Some(value.to_string()),
                "PEPMASS" => current.precursor_mass = Some(parse_pepmass(value, source, line_no)?),
                "CHARGE"  => current.charge = Some(parse_charge(value, source, line_no)?),
                "SEQ"     => current.sequence = Some(normalize_peptide(value)),
                _         => {}
            }
        } else {
            let (mz, intensity) = parse_peak(line, source, line_no)?;
            current.mz.push(mz);
            current.intensity.push(intensity);
        }
    }

    if block.is_some() {
        return Err(SpectraError::malformed(source, line_no, "file ended inside an open block"));
    }
    Ok(spectra)
}

fn parse_peak(line: &str, source: &str, line_no: usize) -> SpectraResult<(f64, i64)> {
    let mut fields = line.split_whitespace();
    let (Some(mz), Some(intensity)) = (fields.next(), fields.next()) else {
        return Err(SpectraError::malformed(source, line_no, format!("expected '<mz> <intensity>', got '{line}'")));
    };
    let mz: f64 = mz
        .parse()
        .map_err(|_| SpectraError::malformed(source, line_no, format!("bad m/z '{mz}'")))?;
    let intensity: f64 = intensity
        .parse()
        .map_err(|_| SpectraError::malformed(source, line_no, format!("bad intensity '{intensity}'")))?;

    if !mz.is_finite() || mz < 0.0 {
        return Err(SpectraError::malformed(source, line_no, format!("m/z must be non-negative, got {mz}")));
    }
    if !intensity.is_finite() {
        return Err(SpectraError::malformed(source, line_no, format!("intensity must be finite, got {intensity}")));
    }
    // Intensities are stored as integers; fractional parts are dropped.
    Ok((mz, intensity.trunc() as i64))
}

fn parse_pepmass(value: &str, source: &str, line_no: usize) -> SpectraResult<f64> {
    value
        .split_whitespace()
        .next()
        .and_then(|v| v.parse::<f64>().ok())
        .ok_or_else(|| SpectraError::malformed(source, line_no, format!("bad PEPMASS '{value}'")))
}

fn parse_charge(value: &str, source: &str, line_no: usize) -> SpectraResult<f64> {
    let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits
        .parse::<u32>()
        .map(f64::from)
        .map_err(|_| SpectraError::malformed(source, line_no, format!("bad CHARGE '{value}'")))
}

// ============================================================
// Layer 4 - Peak Filter
// ============================================================
// Optional clean-up applied to each spectrum before it is stored:
//   1. drop peaks outside the [min_mz, max_mz] window
//   2. drop peaks below min_relative_intensity * base peak
//
// Ingestion stores peaks unfiltered unless --filter-peaks is set.

use serde::{Deserialize, Serialize};

use crate::domain::spectrum::RawSpectrum;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakFilter {
    pub min_mz: f64,
    pub max_mz: f64,
    /// Fraction of the most intense peak a peak must reach to be kept.
    pub min_relative_intensity: f64,
}

impl Default for PeakFilter {
    fn default() -> Self {
        Self {
            min_mz:                 200.0,
            max_mz:                 2000.0,
            min_relative_intensity: 0.01,
        }
    }
}

impl PeakFilter {
    pub fn apply(&self, mut spectrum: RawSpectrum) -> RawSpectrum {
        let before = spectrum.peak_count();
        let base_peak = spectrum.intensity.iter().copied().max().unwrap_or(0);
        let threshold = base_peak as f64 * self.min_relative_intensity;

        let (mz, intensity): (Vec<f64>, Vec<i64>) = spectrum
            .mz
            .iter()
            .copied()
            .zip(spectrum.intensity.iter().copied())
            .filter(|&(mz, intensity)| {
                mz >= self.min_mz && mz <= self.max_mz && intensity as f64 >= threshold
            })
            .unzip();

        spectrum.mz = mz;
        spectrum.intensity = intensity;
        tracing::trace!(
            "Filtered '{}': {} -> {} peaks",
            spectrum.title,
            before,
            spectrum.peak_count()
        );
        spectrum
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_and_intensity_filter() {
        let spectrum = RawSpectrum {
            title:          "t".to_string(),
            precursor_mass: 800.0,
            charge:         2.0,
            sequence:       "PEPTIDE".to_string(),
            mz:             vec![150.0, 250.0, 900.0, 1500.0, 2500.0],
            intensity:      vec![1000, 1000, 5, 400, 1000],
        };
        let filtered = PeakFilter::default().apply(spectrum);
        assert_eq!(filtered.mz, vec![250.0, 1500.0]);
        assert_eq!(filtered.intensity, vec![1000, 400]);
    }

    #[test]
    fn test_empty_spectrum_stays_empty() {
        let spectrum = RawSpectrum {
            title:          "t".to_string(),
            precursor_mass: 1.0,
            charge:         1.0,
            sequence:       "A".to_string(),
            mz:             vec![],
            intensity:      vec![],
        };
        assert_eq!(PeakFilter::default().apply(spectrum).peak_count(), 0);
    }
}

// ============================================================
// Layer 3 - Core Traits
// ============================================================
// The application layer loads spectra through SpectrumSource and
// never sees the file format behind it:
//   - MgfLoader implements SpectrumSource for a directory of .mgf files
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use crate::domain::error::SpectraResult;
use crate::domain::spectrum::RawSpectrum;

/// Anything that can produce parsed spectra.
pub trait SpectrumSource {
    /// Load every spectrum available from this source, in a
    /// deterministic order. Fails on the first malformed block.
    fn load_all(&self) -> SpectraResult<Vec<RawSpectrum>>;
}

// ============================================================
// Layer 3 - Spectrum Domain Types
// ============================================================
// RawSpectrum    - one parsed MGF block, before tokenisation
// SpectrumRecord - what the record store persists: the raw peaks
//                  plus the pre-tokenised target peptide
//
// Records are written once during ingestion and never updated.
//
// Reference: Rust Book §5 (Structs and Methods)

use serde::{Deserialize, Serialize};

use crate::domain::error::SpectraResult;
use crate::domain::vocab::PeptideVocab;

/// A spectrum exactly as read from a BEGIN IONS / END IONS block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSpectrum {
    /// TITLE= value, used as the lookup name in the store
    pub title: String,

    /// PEPMASS= value (precursor m/z)
    pub precursor_mass: f64,

    /// CHARGE= value, leading digits only
    pub charge: f64,

    /// SEQ= value after normalize_peptide()
    pub sequence: String,

    pub mz: Vec<f64>,
    pub intensity: Vec<i64>,
}

impl RawSpectrum {
    pub fn peak_count(&self) -> usize {
        self.mz.len()
    }
}

/// One stored training example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumRecord {
    pub title:          String,
    pub mz:             Vec<f64>,
    pub intensity:      Vec<i64>,
    pub precursor_mass: f64,
    pub charge:         f64,
    pub sequence:       String,
    /// tokenize + encode of `sequence`: starts with <SOS>, ends with <EOS>
    pub token_indices:  Vec<usize>,
}

impl SpectrumRecord {
    /// Tokenise the peptide and build the record to persist.
    /// Fails with UnknownSymbol when the sequence contains a residue
    /// the vocabulary does not know.
    pub fn from_raw(raw: RawSpectrum, vocab: &PeptideVocab) -> SpectraResult<Self> {
        let tokens        = vocab.tokenize(&raw.sequence);
        let token_indices = vocab.encode(&tokens)?;
        Ok(Self {
            title:          raw.title,
            mz:             raw.mz,
            intensity:      raw.intensity,
            precursor_mass: raw.precursor_mass,
            charge:         raw.charge,
            sequence:       raw.sequence,
            token_indices,
        })
    }

    pub fn peak_count(&self) -> usize {
        self.mz.len()
    }

    /// (m/z, intensity) pairs in stored order, as the model consumes them.
    pub fn peaks(&self) -> impl Iterator<Item = (f64, i64)> + '_ {
        self.mz.iter().copied().zip(self.intensity.iter().copied())
    }
}

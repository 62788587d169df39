// ============================================================
// Layer 3 - Domain Layer
// ============================================================
// Plain Rust types that define the vocabulary of the system:
// peptides, spectra and the errors that can occur around them.
//
// Rules for this layer:
//   - NO burn types
//   - NO file or database I/O
//   - Only structs, enums, traits and pure functions
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

/// Typed error taxonomy shared by the lower layers
pub mod error;

/// Residue <-> index mapping and peptide normalisation
pub mod vocab;

/// Raw and stored spectrum records
pub mod spectrum;

/// Abstractions other layers implement
pub mod traits;

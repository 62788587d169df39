// ============================================================
// Layer 3 - Error Taxonomy
// ============================================================
// Every fallible operation below the application layer returns
// SpectraError. The application and CLI layers wrap it into
// anyhow::Error with extra context.
//
//   UnknownSymbol / UnknownIndex / DuplicateSymbol -> vocabulary
//   MalformedRecord                                -> MGF parsing
//   MissingKey / CorruptRecord                     -> store lookups
//   PrecursorNotSet                                -> m/z not supplied for an input
//   InvalidConfiguration                           -> model / loss setup
//
// Reference: thiserror crate documentation

use thiserror::Error;

/// Convenience alias used by the domain, data and ml layers.
pub type SpectraResult<T> = Result<T, SpectraError>;

#[derive(Debug, Error)]
pub enum SpectraError {
    /// A token that is not part of the peptide vocabulary
    #[error("unknown symbol '{0}' in peptide vocabulary")]
    UnknownSymbol(String),

    /// An index with no symbol behind it
    #[error("unknown vocabulary index {0}")]
    UnknownIndex(usize),

    /// add_special_token called with a symbol that already exists
    #[error("symbol '{0}' is already in the vocabulary")]
    DuplicateSymbol(String),

    /// An MGF block that cannot be turned into a spectrum record
    #[error("malformed record in '{source_name}' at line {line}: {reason}")]
    MalformedRecord {
        source_name: String,
        line:        usize,
        reason:      String,
    },

    /// The m/z tensor handed to an encoding does not cover the input peaks
    #[error("m/z values not set for input: expected shape {expected:?}, got {found:?}")]
    PrecursorNotSet {
        expected: [usize; 2],
        found:    [usize; 2],
    },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Lookup of a title (or index) that was never written to the store
    #[error("no record stored under key '{0}'")]
    MissingKey(String),

    /// A stored blob that no longer decodes into a record
    #[error("record {index} in '{store}' cannot be decoded: {source}")]
    CorruptRecord {
        store:  String,
        index:  usize,
        source: bincode::error::DecodeError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("record store error: {0}")]
    Store(#[from] heed::Error),

    #[error("cannot encode record: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("cannot decode record: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

impl SpectraError {
    pub fn malformed(source_name: &str, line: usize, reason: impl Into<String>) -> Self {
        SpectraError::MalformedRecord {
            source_name: source_name.to_string(),
            line,
            reason: reason.into(),
        }
    }
}

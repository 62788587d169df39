// ============================================================
// Layer 3 - Peptide Vocabulary
// ============================================================
// A fixed, append-only mapping between residue symbols and the
// integer class indices the model predicts.
//
// Index layout (never reorder, trained weights depend on it):
//   0        <PAD>
//   1..=24   A C E D F I H K M L N Q P S R T W V Y G O U Z X
//   25       <SOS>
//   26       <EOS>
//   27..     tokens appended with add_special_token()
//
// Tokenisation is character level, except that bracketed names
// such as <SOS> or <Oxidation> form a single token:
//   "PEP<Ox>TIDE" -> ["P", "E", "P", "<Ox>", "T", "I", "D", "E"]
//
// Reference: Rust Book §8 (Hash Maps), regex crate documentation

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::error::{SpectraError, SpectraResult};

pub const PAD_TOKEN: &str = "<PAD>";
pub const SOS_TOKEN: &str = "<SOS>";
pub const EOS_TOKEN: &str = "<EOS>";

pub const PAD_IDX: usize = 0;
pub const SOS_IDX: usize = 25;
pub const EOS_IDX: usize = 26;

pub const DEFAULT_TOKENS: [&str; 27] = [
    PAD_TOKEN, "A", "C", "E", "D", "F", "I", "H", "K", "M", "L", "N", "Q", "P",
    "S", "R", "T", "W", "V", "Y", "G", "O", "U", "Z", "X", SOS_TOKEN, EOS_TOKEN,
];

static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<[a-zA-Z0-9]+>|[a-zA-Z-]").expect("token pattern is a valid regex")
});

/// Bidirectional symbol <-> index table.
#[derive(Debug, Clone)]
pub struct PeptideVocab {
    token_to_idx: HashMap<String, usize>,
    idx_to_token: Vec<String>,
}

impl Default for PeptideVocab {
    fn default() -> Self {
        Self::new()
    }
}

impl PeptideVocab {
    pub fn new() -> Self {
        let idx_to_token: Vec<String> = DEFAULT_TOKENS.iter().map(|t| t.to_string()).collect();
        let token_to_idx = idx_to_token
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
        Self { token_to_idx, idx_to_token }
    }

    pub fn len(&self) -> usize {
        self.idx_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idx_to_token.is_empty()
    }

    /// Split a peptide string into residue tokens.
    /// Characters that match neither a bracketed name nor a
    /// letter/hyphen are dropped.
    pub fn tokenize(&self, sequence: &str) -> Vec<String> {
        TOKEN_PATTERN
            .find_iter(sequence)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// Tokenise every sequence of a batch.
    pub fn tokenize_batch<S: AsRef<str>>(&self, sequences: &[S]) -> Vec<Vec<String>> {
        sequences.iter().map(|s| self.tokenize(s.as_ref())).collect()
    }

    pub fn index_of(&self, token: &str) -> SpectraResult<usize> {
        self.token_to_idx
            .get(token)
            .copied()
            .ok_or_else(|| SpectraError::UnknownSymbol(token.to_string()))
    }

    pub fn token_of(&self, index: usize) -> SpectraResult<&str> {
        self.idx_to_token
            .get(index)
            .map(String::as_str)
            .ok_or(SpectraError::UnknownIndex(index))
    }

    /// Map a tokenised sequence to indices wrapped as
    /// [<SOS>, t1, ..., tn, <EOS>].
    pub fn encode<S: AsRef<str>>(&self, tokens: &[S]) -> SpectraResult<Vec<usize>> {
        let mut out = Vec::with_capacity(tokens.len() + 2);
        out.push(SOS_IDX);
        for token in tokens {
            out.push(self.index_of(token.as_ref())?);
        }
        out.push(EOS_IDX);
        Ok(out)
    }

    pub fn encode_batch<S: AsRef<str>>(&self, batch: &[Vec<S>]) -> SpectraResult<Vec<Vec<usize>>> {
        batch.iter().map(|tokens| self.encode(tokens)).collect()
    }

    /// Inverse of encode. Special tokens are returned as-is, so
    /// decode(encode(t)) == [<SOS>] + t + [<EOS>].
    pub fn decode(&self, indices: &[usize]) -> SpectraResult<Vec<String>> {
        indices
            .iter()
            .map(|&i| self.token_of(i).map(str::to_string))
            .collect()
    }

    pub fn decode_batch(&self, batch: &[Vec<usize>]) -> SpectraResult<Vec<Vec<String>>> {
        batch.iter().map(|indices| self.decode(indices)).collect()
    }

    /// Append a new symbol at the next free index and return it.
    pub fn add_special_token(&mut self, token: &str) -> SpectraResult<usize> {
        if self.token_to_idx.contains_key(token) {
            return Err(SpectraError::DuplicateSymbol(token.to_string()));
        }
        let index = self.idx_to_token.len();
        self.idx_to_token.push(token.to_string());
        self.token_to_idx.insert(token.to_string(), index);
        Ok(index)
    }

    /// Tokenise, pad/truncate to `num_steps` with <PAD>, then encode.
    /// The returned indices are `num_steps + 2` long because of the
    /// <SOS>/<EOS> wrap; the mask covers the padded token window.
    pub fn seq_to_indices(
        &self,
        sequence:  &str,
        num_steps: usize,
    ) -> SpectraResult<(Vec<usize>, Vec<u8>)> {
        let tokens = self.tokenize(sequence);
        let (padded, mask) = pad_truncate(&tokens, num_steps, PAD_TOKEN.to_string());
        Ok((self.encode(&padded)?, mask))
    }
}

/// Right-truncate or right-pad `tokens` to exactly `target_len`.
///
/// Returns the padded sequence together with its attention mask
/// (1 = real token, 0 = padding).
pub fn pad_truncate<T: Clone>(tokens: &[T], target_len: usize, pad: T) -> (Vec<T>, Vec<u8>) {
    if tokens.len() >= target_len {
        return (tokens[..target_len].to_vec(), vec![1; target_len]);
    }
    let missing = target_len - tokens.len();
    let mut padded = tokens.to_vec();
    padded.extend(std::iter::repeat(pad).take(missing));
    let mut mask = vec![1u8; tokens.len()];
    mask.extend(std::iter::repeat(0u8).take(missing));
    (padded, mask)
}

/// Canonical peptide form stored with every record:
/// whitespace removed, uppercased, leucine folded onto isoleucine
/// (the two are isobaric and indistinguishable by mass).
pub fn normalize_peptide(sequence: &str) -> String {
    sequence
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .map(|c| if c == 'L' { 'I' } else { c })
        .collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let v = PeptideVocab::new();
        assert_eq!(v.len(), 27);
        assert_eq!(v.index_of(PAD_TOKEN).unwrap(), PAD_IDX);
        assert_eq!(v.index_of(SOS_TOKEN).unwrap(), SOS_IDX);
        assert_eq!(v.index_of(EOS_TOKEN).unwrap(), EOS_IDX);
        assert_eq!(v.index_of("A").unwrap(), 1);
        assert_eq!(v.index_of("X").unwrap(), 24);
    }

    #[test]
    fn test_tokenize_keeps_bracketed_names() {
        let v = PeptideVocab::new();
        assert_eq!(
            v.tokenize("PEP<Ox1>T-K"),
            vec!["P", "E", "P", "<Ox1>", "T", "-", "K"]
        );
        assert!(v.tokenize("").is_empty());
    }

    #[test]
    fn test_decode_inverts_encode() {
        let v = PeptideVocab::new();
        for seq in ["PEPTIDE", "ACDEFGHIKMNPQRSTVWY", "K"] {
            let tokens = v.tokenize(seq);
            let decoded = v.decode(&v.encode(&tokens).unwrap()).unwrap();

            let mut expected = vec![SOS_TOKEN.to_string()];
            expected.extend(tokens);
            expected.push(EOS_TOKEN.to_string());
            assert_eq!(decoded, expected);
        }
    }

    #[test]
    fn test_batch_encode_decode() {
        let v = PeptideVocab::new();
        let batch = v.tokenize_batch(&["PEPTIDE", "AK"]);
        let encoded = v.encode_batch(&batch).unwrap();
        assert_eq!(encoded[1], vec![SOS_IDX, 1, 8, EOS_IDX]);
        let decoded = v.decode_batch(&encoded).unwrap();
        assert_eq!(decoded[1], vec!["<SOS>", "A", "K", "<EOS>"]);
    }

    #[test]
    fn test_unknown_symbol_fails() {
        let v = PeptideVocab::new();
        let err = v.encode(&["A", "B"]).unwrap_err();
        assert!(matches!(err, SpectraError::UnknownSymbol(s) if s == "B"));
        assert!(matches!(v.decode(&[99]), Err(SpectraError::UnknownIndex(99))));
    }

    #[test]
    fn test_add_special_token_appends() {
        let mut v = PeptideVocab::new();
        assert_eq!(v.add_special_token("<MASK>").unwrap(), 27);
        assert_eq!(v.index_of("<MASK>").unwrap(), 27);
        assert_eq!(v.len(), 28);
        assert!(matches!(
            v.add_special_token("A"),
            Err(SpectraError::DuplicateSymbol(_))
        ));
    }

    #[test]
    fn test_pad_short_sequence() {
        let (padded, mask) = pad_truncate(&[1, 2, 3], 6, 0);
        assert_eq!(padded, vec![1, 2, 3, 0, 0, 0]);
        assert_eq!(mask, vec![1, 1, 1, 0, 0, 0]);
    }

    #[test]
    fn test_truncate_long_sequence() {
        let (padded, mask) = pad_truncate(&["a", "b", "c", "d"], 2, "<PAD>");
        assert_eq!(padded, vec!["a", "b"]);
        assert_eq!(mask, vec![1, 1]);
    }

    #[test]
    fn test_seq_to_indices_pads_before_wrapping() {
        let v = PeptideVocab::new();
        let (indices, mask) = v.seq_to_indices("AK", 4).unwrap();
        assert_eq!(indices, vec![SOS_IDX, 1, 8, PAD_IDX, PAD_IDX, EOS_IDX]);
        assert_eq!(mask, vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_normalize_peptide() {
        assert_eq!(normalize_peptide(" pep lide\t"), "PEPIIDE");
        assert_eq!(normalize_peptide("LLL"), "III");
    }
}

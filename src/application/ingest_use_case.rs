// ============================================================
// Layer 2 - IngestUseCase
// ============================================================
// Turns a directory of .mgf files into a record store:
//
//   Step 1: Open (or create) the LMDB store       (Layer 4 - data)
//   Step 2: Parse, filter, tokenise and persist   (Layer 4 - data)
//
// The previous contents of the store are replaced only if every
// block of every file parses and tokenises.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::filter::PeakFilter;
use crate::data::store::{RecordStore, DEFAULT_MAP_SIZE};
use crate::domain::vocab::PeptideVocab;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub mgf_dir:      String,
    pub db_path:      String,
    pub map_size:     usize,
    /// None stores peaks exactly as read.
    pub peak_filter:  Option<PeakFilter>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mgf_dir:     "data/mgf".to_string(),
            db_path:     "data/train_db".to_string(),
            map_size:    DEFAULT_MAP_SIZE,
            peak_filter: None,
        }
    }
}

pub struct IngestUseCase {
    config: IngestConfig,
    vocab:  PeptideVocab,
}

impl IngestUseCase {
    pub fn new(config: IngestConfig) -> Self {
        Self { config, vocab: PeptideVocab::new() }
    }

    /// Returns the number of records now in the store.
    pub fn execute(&self) -> Result<usize> {
        let cfg = &self.config;

        // ── Step 1: Open the store ───────────────────────────────────────────
        let mut store = RecordStore::open(&cfg.db_path, cfg.map_size)
            .with_context(|| format!("Cannot open record store '{}'", cfg.db_path))?;

        // ── Step 2: Ingest ───────────────────────────────────────────────────
        tracing::info!("Ingesting .mgf files from '{}'", cfg.mgf_dir);
        if let Some(filter) = &cfg.peak_filter {
            tracing::info!(
                "Peak filter: m/z in [{}, {}], intensity >= {} of base peak",
                filter.min_mz, filter.max_mz, filter.min_relative_intensity
            );
        }
        let count = store
            .ingest_dir(&cfg.mgf_dir, &self.vocab, cfg.peak_filter.as_ref())
            .with_context(|| format!("Ingestion of '{}' failed; store left unchanged", cfg.mgf_dir))?;

        Ok(count)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const MGF: &str = "\
BEGIN IONS
TITLE=scan=1
PEPMASS=421.76 1200.0
CHARGE=2+
SEQ=PEPLIDE
150.0 40
250.5 4000
2500.0 900
END IONS
";

    fn config(mgf_dir: &std::path::Path, db_dir: &std::path::Path, filter: Option<PeakFilter>) -> IngestConfig {
        IngestConfig {
            mgf_dir:     mgf_dir.display().to_string(),
            db_path:     db_dir.display().to_string(),
            map_size:    16 * 1024 * 1024,
            peak_filter: filter,
        }
    }

    #[test]
    fn test_ingest_directory() {
        let mgf_dir = tempfile::tempdir().unwrap();
        let db_dir  = tempfile::tempdir().unwrap();
        fs::write(mgf_dir.path().join("a.mgf"), MGF).unwrap();

        let count = IngestUseCase::new(config(mgf_dir.path(), db_dir.path(), None)).execute().unwrap();
        assert_eq!(count, 1);

        let store = RecordStore::open(db_dir.path(), 16 * 1024 * 1024).unwrap();
        let record = store.get_by_title("scan=1").unwrap();
        assert_eq!(record.sequence, "PEPIIDE");
        assert_eq!(record.mz.len(), 3);
    }

    #[test]
    fn test_ingest_with_filter_drops_out_of_window_peaks() {
        let mgf_dir = tempfile::tempdir().unwrap();
        let db_dir  = tempfile::tempdir().unwrap();
        fs::write(mgf_dir.path().join("a.mgf"), MGF).unwrap();

        let cfg = config(mgf_dir.path(), db_dir.path(), Some(PeakFilter::default()));
        IngestUseCase::new(cfg).execute().unwrap();

        let store = RecordStore::open(db_dir.path(), 16 * 1024 * 1024).unwrap();
        assert_eq!(store.get(0).unwrap().unwrap().mz, vec![250.5]);
    }
}

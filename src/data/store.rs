// ============================================================
// Layer 4 - Spectral Record Store
// ============================================================
// Persists SpectrumRecords in an LMDB environment (via heed).
//
// Layout inside the environment:
//   spectra : "0", "1", ... -> bincode(SpectrumRecord)
//   titles  : TITLE         -> "<index>"
//
// The title table is mirrored into a HashMap on open so that
// name lookups never touch the database.
//
// Ingestion is all-or-nothing: every block is parsed and
// tokenised first, then the previous contents are cleared and the
// new records are written inside ONE write transaction. If
// anything fails before commit, LMDB discards the transaction and
// the store keeps its old contents.
//
// Duplicate titles: the later block replaces the earlier one but
// keeps its position, so the store holds exactly one record per
// title (last write wins).
//
// Reference: heed crate documentation, LMDB docs (mdb_env_open)

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use indexmap::IndexMap;

use crate::data::filter::PeakFilter;
use crate::data::mgf::MgfLoader;
use crate::domain::error::{SpectraError, SpectraResult};
use crate::domain::spectrum::{RawSpectrum, SpectrumRecord};
use crate::domain::traits::SpectrumSource;
use crate::domain::vocab::PeptideVocab;

const SPECTRA_DB: &str = "spectra";
const TITLES_DB:  &str = "titles";

/// 1 GiB; LMDB only reserves address space, not disk.
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;

pub struct RecordStore {
    env:         Env,
    spectra:     Database<Str, Bytes>,
    titles:      Database<Str, Str>,
    title_index: HashMap<String, usize>,
    path:        PathBuf,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("path", &self.path)
            .field("titles", &self.title_index.len())
            .finish()
    }
}

impl RecordStore {
    /// Open (or create) the store at `path`. `map_size` is the
    /// maximum database size in bytes and must be a multiple of the
    /// OS page size.
    pub fn open(path: impl AsRef<Path>, map_size: usize) -> SpectraResult<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        // SAFETY: each store path is opened once per process and the
        // environment is never opened with conflicting flags.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(2)
                .open(&path)?
        };

        let mut wtxn = env.write_txn()?;
        let spectra: Database<Str, Bytes> = env.create_database(&mut wtxn, Some(SPECTRA_DB))?;
        let titles:  Database<Str, Str>   = env.create_database(&mut wtxn, Some(TITLES_DB))?;
        wtxn.commit()?;

        let mut title_index = HashMap::new();
        {
            let rtxn = env.read_txn()?;
            for entry in titles.iter(&rtxn)? {
                let (title, key) = entry?;
                let index = key.parse::<usize>().map_err(|_| {
                    SpectraError::MissingKey(format!("{title} -> {key}"))
                })?;
                title_index.insert(title.to_string(), index);
            }
        }

        tracing::debug!(
            "Opened record store '{}' ({} titles)",
            path.display(),
            title_index.len()
        );
        Ok(Self { env, spectra, titles, title_index, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse every .mgf file in `dir` and replace the store contents.
    pub fn ingest_dir(
        &mut self,
        dir:    impl AsRef<Path>,
        vocab:  &PeptideVocab,
        filter: Option<&PeakFilter>,
    ) -> SpectraResult<usize> {
        self.ingest(&MgfLoader::new(dir.as_ref()), vocab, filter)
    }

    /// Load, filter, tokenise and persist all spectra of `source`.
    /// Returns the number of records written.
    pub fn ingest<S: SpectrumSource>(
        &mut self,
        source: &S,
        vocab:  &PeptideVocab,
        filter: Option<&PeakFilter>,
    ) -> SpectraResult<usize> {
        let mut by_title: IndexMap<String, RawSpectrum> = IndexMap::new();
        for spectrum in source.load_all()? {
            let spectrum = match filter {
                Some(f) => f.apply(spectrum),
                None    => spectrum,
            };
            if let Some(previous) = by_title.insert(spectrum.title.clone(), spectrum) {
                tracing::warn!("Duplicate title '{}': keeping the later block", previous.title);
            }
        }

        let records = by_title
            .into_values()
            .map(|raw| SpectrumRecord::from_raw(raw, vocab))
            .collect::<SpectraResult<Vec<_>>>()?;

        self.write_all(&records)?;
        tracing::info!("Stored {} records in '{}'", records.len(), self.path.display());
        Ok(records.len())
    }

    /// Replace the store contents with `records`, keyed 0..n.
    pub fn write_all(&mut self, records: &[SpectrumRecord]) -> SpectraResult<()> {
        let config = bincode::config::standard();
        let blobs = records
            .iter()
            .map(|r| bincode::serde::encode_to_vec(r, config))
            .collect::<Result<Vec<_>, _>>()?;

        let mut title_index = HashMap::with_capacity(records.len());
        let mut wtxn = self.env.write_txn()?;
        self.spectra.clear(&mut wtxn)?;
        self.titles.clear(&mut wtxn)?;
        for (index, (record, blob)) in records.iter().zip(&blobs).enumerate() {
            let key = index.to_string();
            self.spectra.put(&mut wtxn, &key, blob)?;
            self.titles.put(&mut wtxn, &record.title, &key)?;
            title_index.insert(record.title.clone(), index);
        }
        wtxn.commit()?;

        self.title_index = title_index;
        Ok(())
    }

    /// Point lookup by dense index. Ok(None) if the key is unset.
    pub fn get(&self, index: usize) -> SpectraResult<Option<SpectrumRecord>> {
        let rtxn = self.env.read_txn()?;
        let Some(blob) = self.spectra.get(&rtxn, &index.to_string())? else {
            return Ok(None);
        };
        let (record, _) = bincode::serde::decode_from_slice(blob, bincode::config::standard())?;
        Ok(Some(record))
    }

    /// Decode every record once, in index order. Returns the count.
    ///
    /// Fails on the first index that is missing or does not decode, so
    /// a dataset opened on a verified store never meets a bad record
    /// halfway through an epoch.
    pub fn verify(&self) -> SpectraResult<usize> {
        let config = bincode::config::standard();
        let rtxn = self.env.read_txn()?;
        let count = self.spectra.len(&rtxn)? as usize;
        for index in 0..count {
            let key = index.to_string();
            let blob = self
                .spectra
                .get(&rtxn, &key)?
                .ok_or(SpectraError::MissingKey(key))?;
            bincode::serde::decode_from_slice::<SpectrumRecord, _>(blob, config).map_err(|source| {
                SpectraError::CorruptRecord {
                    store: self.path.display().to_string(),
                    index,
                    source,
                }
            })?;
        }
        Ok(count)
    }

    /// Overwrite the blob under `index` without encoding it.
    #[cfg(test)]
    pub(crate) fn put_raw(&self, index: usize, blob: &[u8]) -> SpectraResult<()> {
        let mut wtxn = self.env.write_txn()?;
        self.spectra.put(&mut wtxn, &index.to_string(), blob)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn index_of(&self, title: &str) -> SpectraResult<usize> {
        self.title_index
            .get(title)
            .copied()
            .ok_or_else(|| SpectraError::MissingKey(title.to_string()))
    }

    pub fn get_by_title(&self, title: &str) -> SpectraResult<SpectrumRecord> {
        let index = self.index_of(title)?;
        self.get(index)?
            .ok_or_else(|| SpectraError::MissingKey(index.to_string()))
    }

    /// Number of stored records.
    pub fn count(&self) -> SpectraResult<usize> {
        let rtxn = self.env.read_txn()?;
        Ok(self.spectra.len(&rtxn)? as usize)
    }
}

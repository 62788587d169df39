use std::path::Path;

use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

use crate::data::store::RecordStore;
use crate::domain::error::SpectraResult;
use crate::domain::spectrum::SpectrumRecord;

/// One training sample, converted to the element types the model uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumItem {
    /// [m/z, intensity] per peak, in stored order
    pub peaks:          Vec<[f32; 2]>,
    pub precursor_mass: f32,
    pub charge:         f32,
    /// <SOS> ... <EOS> wrapped target indices (unpadded)
    pub tokens:         Vec<usize>,
}

impl SpectrumItem {
    pub fn peak_count(&self) -> usize {
        self.peaks.len()
    }
}

impl From<SpectrumRecord> for SpectrumItem {
    fn from(record: SpectrumRecord) -> Self {
        let peaks = record
            .peaks()
            .map(|(mz, intensity)| [mz as f32, intensity as f32])
            .collect();
        Self {
            peaks,
            precursor_mass: record.precursor_mass as f32,
            charge:         record.charge as f32,
            tokens:         record.token_indices,
        }
    }
}

/// Burn dataset backed by a record store.
///
/// The LMDB environment is thread safe, so one store handle is
/// shared by every data loader worker; each `get` opens its own
/// short read transaction.
///
/// Burn's iterators stop at the first `None`, so every record is
/// decoded once in `new` and `get` only returns `None` past `len`.
pub struct SpectrumDataset {
    store: RecordStore,
    len:   usize,
}

impl SpectrumDataset {
    pub fn new(store: RecordStore) -> SpectraResult<Self> {
        let len = store.verify()?;
        Ok(Self { store, len })
    }

    pub fn open(path: impl AsRef<Path>, map_size: usize) -> SpectraResult<Self> {
        Self::new(RecordStore::open(path, map_size)?)
    }

    pub fn sample_count(&self) -> usize {
        self.len
    }
}

impl Dataset<SpectrumItem> for SpectrumDataset {
    fn get(&self, index: usize) -> Option<SpectrumItem> {
        match self.store.get(index) {
            Ok(record) => record.map(SpectrumItem::from),
            // Only reachable if the store is rewritten while a run reads it.
            Err(e) => {
                tracing::error!(
                    "Cannot read record {} of '{}': {}",
                    index,
                    self.store.path().display(),
                    e
                );
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.len
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::SpectraError;
    use crate::domain::vocab::{EOS_IDX, SOS_IDX};

    fn record(title: &str) -> SpectrumRecord {
        SpectrumRecord {
            title:          title.to_string(),
            mz:             vec![120.5, 340.25],
            intensity:      vec![7, 9],
            precursor_mass: 640.5,
            charge:         3.0,
            sequence:       "AK".to_string(),
            token_indices:  vec![SOS_IDX, 1, 8, EOS_IDX],
        }
    }

    #[test]
    fn test_get_converts_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordStore::open(dir.path(), 16 * 1024 * 1024).unwrap();
        store.write_all(&[record("a"), record("b")]).unwrap();

        let dataset = SpectrumDataset::new(store).unwrap();
        assert_eq!(dataset.len(), 2);

        let item = dataset.get(1).unwrap();
        assert_eq!(item.peaks, vec![[120.5, 7.0], [340.25, 9.0]]);
        assert_eq!(item.precursor_mass, 640.5);
        assert_eq!(item.charge, 3.0);
        assert_eq!(item.tokens, vec![SOS_IDX, 1, 8, EOS_IDX]);
        assert!(dataset.get(2).is_none());
    }

    #[test]
    fn test_unreadable_record_fails_at_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordStore::open(dir.path(), 16 * 1024 * 1024).unwrap();
        store.write_all(&[record("a"), record("b"), record("c"), record("d")]).unwrap();
        store.put_raw(1, &[0xff, 0xff, 0xff]).unwrap();

        let err = SpectrumDataset::new(store).err().unwrap();
        assert!(matches!(err, SpectraError::CorruptRecord { index: 1, .. }));
    }

    #[test]
    fn test_loader_sees_every_record() {
        use crate::data::batcher::SpectrumBatcher;
        use burn::data::dataloader::{DataLoader, DataLoaderBuilder};

        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordStore::open(dir.path(), 16 * 1024 * 1024).unwrap();
        store.write_all(&[record("a"), record("b"), record("c"), record("d")]).unwrap();

        let batcher = SpectrumBatcher::<burn::backend::NdArray>::new(Default::default());
        let loader = DataLoaderBuilder::new(batcher)
            .batch_size(1)
            .build(SpectrumDataset::new(store).unwrap());
        assert_eq!(loader.iter().count(), 4);
    }
}

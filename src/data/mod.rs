// ============================================================
// Layer 4 - Data Pipeline
// ============================================================
// Everything from raw .mgf files to padded tensor batches.
//
//   .mgf files
//       │
//       ▼
//   MgfLoader         → parses BEGIN IONS / END IONS blocks
//       │
//       ▼
//   PeakFilter        → optional m/z window + intensity cut
//       │
//       ▼
//   RecordStore       → tokenises and persists records in LMDB
//       │
//       ▼
//   SpectrumDataset   → implements Burn's Dataset trait
//       │
//       ▼
//   SpectrumBatcher   → pads spectra and targets into one batch
//       │
//       ▼
//   DataLoader        → feeds batches to the training loop
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// MGF block parser and directory loader
pub mod mgf;

/// Optional peak filtering before storage
pub mod filter;

/// LMDB-backed spectrum record store
pub mod store;

/// Implements Burn's Dataset trait over the record store
pub mod dataset;

/// Implements Burn's Batcher trait to create padded batches
pub mod batcher;

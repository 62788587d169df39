// ============================================================
// Layer 2 - Application / Use Cases
// ============================================================
// Orchestrates the other layers to accomplish one goal each:
// building a record store, or training a model on record stores.
//
// Rules for this layer:
//   - No model code or tensor math here
//   - No argument parsing here (that's Layer 1)
//   - Only workflow coordination, with anyhow errors carrying
//     context for the user
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// The .mgf -> record store workflow
pub mod ingest_use_case;

// The training workflow
pub mod train_use_case;

// ============================================================
// Layer 6 - Infrastructure Layer
// ============================================================
// Cross-cutting concerns of a training run that don't belong to
// the data or model layers:
//
//   checkpoint.rs  - model weights (CompactRecorder), the latest
//                    epoch pointer and the run's TrainConfig as JSON
//
//   metrics.rs     - one CSV row per epoch with training loss,
//                    validation loss and token accuracy
//
// Reference: Burn Book §5 (Checkpointing)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;

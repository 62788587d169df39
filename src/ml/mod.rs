// ============================================================
// Layer 5 - ML / Model Layer (Burn)
// ============================================================
// The network, its loss and the training loop.
//
//   encoding.rs   - m/z positional encodings
//                   • additive sin/cos stage on the embeddings
//                   • rotary stage applied to queries and keys
//
//   attention.rs  - multi-head self-attention with rotary m/z
//                   scores and a key padding mask
//
//   model.rs      - the spectrum encoder
//                   • linear peak embedding (× √d_model)
//                   • N pre-norm encoder layers (ReLU FFN)
//                   • final layer norm
//                   • linear generator + log-softmax per peak
//
//   loss.rs       - class-weighted cross-entropy, <PAD> down-weighted
//
//   trainer.rs    - epoch loop: Adam steps, validation, test pass,
//                   metrics and checkpoints
//
// Every forward call receives the m/z tensor of the batch it
// processes; no module keeps per-batch state.
//
// Reference: Burn Book §3 (Building Blocks), §5 (Training)
//            Vaswani et al. (2017) Attention Is All You Need
//            Su et al. (2021) RoFormer

/// m/z positional encodings (additive and rotary)
pub mod encoding;

/// m/z-conditioned multi-head attention
pub mod attention;

/// Spectrum transformer encoder
pub mod model;

/// Weighted sequence loss
pub mod loss;

/// Training loop with validation, test evaluation and checkpointing
pub mod trainer;

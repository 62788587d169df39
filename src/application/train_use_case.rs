// ============================================================
// Layer 2 - TrainUseCase
// ============================================================
// Orchestrates a training run in order:
//
//   Step 1: Validate the configuration and fix the seed
//   Step 2: Open the train / valid / test stores   (Layer 4 - data)
//   Step 3: Prepare checkpoint dir and metrics log  (Layer 6 - infra)
//   Step 4: Save the config next to the checkpoints (Layer 6 - infra)
//   Step 5: Run the training loop                   (Layer 5 - ml)
//
// Reference: Burn Book §5 (Training)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::data::dataset::SpectrumDataset;
use crate::data::store::DEFAULT_MAP_SIZE;
use crate::domain::vocab::DEFAULT_TOKENS;
use crate::infra::{checkpoint::CheckpointManager, metrics::MetricsLogger};
use crate::ml::loss::{LossKind, SpectrumLoss};
use crate::ml::model::SpectrumTransformerConfig;
use crate::ml::trainer::{run_training, TrainData, TrainSummary};

// ─── Training Configuration ──────────────────────────────────────────────────
// All settings of a training run. Saved as JSON next to the
// checkpoints; a JSON file may also be passed on the command line,
// and any field it leaves out takes the default below.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub train_db:          String,
    pub valid_db:          Option<String>,
    pub test_db:           Option<String>,
    pub checkpoint_dir:    String,
    pub map_size:          usize,

    pub input_dim:         usize,
    pub vocab_size:        usize,
    pub num_layers:        usize,
    pub d_model:           usize,
    pub d_ff:              usize,
    pub num_heads:         usize,
    pub dropout:           f64,

    pub lr:                f64,
    pub batch_size:        usize,
    pub num_workers:       usize,
    pub epochs:            usize,
    /// None draws a fresh seed, which is then written into the saved config.
    pub seed:              Option<u64>,

    pub loss:              LossKind,
    pub pad_weight:        f32,
    pub mask_padding_loss: bool,
    pub mask_padded_peaks: bool,
    pub resume:            bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            train_db:          "data/train_db".to_string(),
            valid_db:          None,
            test_db:           None,
            checkpoint_dir:    "checkpoints".to_string(),
            map_size:          DEFAULT_MAP_SIZE,
            input_dim:         2,
            vocab_size:        DEFAULT_TOKENS.len(),
            num_layers:        6,
            d_model:           512,
            d_ff:              2048,
            num_heads:         8,
            dropout:           0.1,
            lr:                1e-3,
            batch_size:        2,
            num_workers:       0,
            epochs:            10,
            seed:              None,
            loss:              LossKind::CrossEntropy,
            pad_weight:        0.001,
            mask_padding_loss: false,
            mask_padded_peaks: true,
            resume:            false,
        }
    }
}

impl TrainConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Invalid config file '{}'", path.display()))
    }

    pub fn model_config(&self) -> SpectrumTransformerConfig {
        SpectrumTransformerConfig::new()
            .with_input_dim(self.input_dim)
            .with_vocab_size(self.vocab_size)
            .with_num_layers(self.num_layers)
            .with_d_model(self.d_model)
            .with_d_ff(self.d_ff)
            .with_num_heads(self.num_heads)
            .with_dropout(self.dropout)
    }

    pub fn loss(&self) -> SpectrumLoss {
        SpectrumLoss::new(self.loss)
            .with_pad_weight(self.pad_weight)
            .with_mask_padding(self.mask_padding_loss)
    }

    /// Settings that would only fail deep inside the loop are rejected here.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.epochs == 0 {
            bail!("epochs must be at least 1");
        }
        if !(0.0..1.0).contains(&self.dropout) {
            bail!("dropout must be in [0, 1), got {}", self.dropout);
        }
        if self.lr <= 0.0 {
            bail!("learning rate must be positive, got {}", self.lr);
        }
        if self.loss == LossKind::NegativeLogLikelihood {
            bail!("negative log-likelihood loss is not supported; use cross_entropy");
        }
        Ok(())
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<TrainSummary> {
        // ── Step 1: Validate and fix the seed ────────────────────────────────
        let mut cfg = self.config.clone();
        cfg.validate()?;
        let seed = *cfg.seed.get_or_insert_with(rand::random);
        tracing::info!("Training seed: {}", seed);

        // ── Step 2: Open the record stores ────────────────────────────────────
        let open = |path: &str| {
            SpectrumDataset::open(path, cfg.map_size)
                .with_context(|| format!("Cannot open record store '{path}'"))
        };
        let train = open(&cfg.train_db)?;
        tracing::info!("Train store '{}': {} records", cfg.train_db, train.sample_count());
        if train.sample_count() == 0 {
            tracing::warn!("Train store '{}' is empty; run 'ingest' first", cfg.train_db);
        }
        let valid = cfg.valid_db.as_deref().map(open).transpose()?;
        let test  = cfg.test_db.as_deref().map(open).transpose()?;
        if let Some(v) = &valid {
            tracing::info!("Validation store: {} records", v.sample_count());
        }
        if let Some(t) = &test {
            tracing::info!("Test store: {} records", t.sample_count());
        }

        // ── Step 3: Checkpoints and metrics ──────────────────────────────────
        let ckpt_manager = CheckpointManager::new(&cfg.checkpoint_dir)?;
        let resuming     = cfg.resume && ckpt_manager.has_checkpoint();
        let metrics      = MetricsLogger::new(&cfg.checkpoint_dir, resuming)?;

        // ── Step 4: Save config ──────────────────────────────────────────────
        ckpt_manager.save_config(&cfg)?;

        // ── Step 5: Run training loop (Layer 5) ──────────────────────────────
        run_training(&cfg, TrainData { train, valid, test }, &ckpt_manager, &metrics)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_takes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(&path, r#"{ "train_db": "/tmp/train", "d_model": 128, "loss": "cross_entropy" }"#)
            .unwrap();

        let cfg = TrainConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.train_db, "/tmp/train");
        assert_eq!(cfg.d_model, 128);
        assert_eq!(cfg.num_layers, 6);
        assert_eq!(cfg.vocab_size, 27);
        assert!(cfg.valid_db.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        assert!(TrainConfig::default().validate().is_ok());
        assert!(TrainConfig { batch_size: 0, ..TrainConfig::default() }.validate().is_err());
        assert!(TrainConfig { dropout: 1.0, ..TrainConfig::default() }.validate().is_err());
        assert!(TrainConfig { loss: LossKind::NegativeLogLikelihood, ..TrainConfig::default() }
            .validate()
            .is_err());
    }

    #[test]
    fn test_loss_follows_config() {
        let cfg = TrainConfig { pad_weight: 0.5, mask_padding_loss: true, ..TrainConfig::default() };
        let loss = cfg.loss();
        assert_eq!(loss.kind, LossKind::CrossEntropy);
        assert_eq!(loss.pad_weight, 0.5);
        assert!(loss.mask_padding);
    }
}

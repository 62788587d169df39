// ============================================================
// Layer 6 - Checkpoint Manager
// ============================================================
// Saves and restores model weights and optimiser state using a
// full-precision named MessagePack recorder, so a resumed run
// continues from exactly the saved values.
//
// What gets saved:
//   1. Model weights (.mpk.gz file), once per epoch
//   2. Adam moment estimates (.mpk.gz file), once per epoch
//   3. latest_epoch.json, the number of the last saved epoch
//   4. train_config.json, the full TrainConfig of the run
//
// The config is needed to rebuild a SpectrumTransformer with the
// same shape before its weights can be loaded; the recorder
// refuses records whose architecture does not match.
//
// File naming convention:
//   checkpoints/
//     model_epoch_1.mpk.gz
//     optim_epoch_1.mpk.gz
//     model_epoch_2.mpk.gz
//     ...
//     latest_epoch.json
//     train_config.json
//     metrics.csv          (written by MetricsLogger)
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use std::{fs, path::{Path, PathBuf}};
use burn::{
    module::AutodiffModule,
    optim::Optimizer,
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::TrainConfig;
use crate::ml::model::SpectrumTransformer;

const LATEST_EPOCH_FILE: &str = "latest_epoch.json";
const CONFIG_FILE:       &str = "train_config.json";

type CheckpointRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

/// Manages saving and loading of model checkpoints in one directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn model_path(&self, epoch: usize) -> PathBuf {
        // recorder appends .mpk.gz
        self.dir.join(format!("model_epoch_{epoch}"))
    }

    fn optim_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("optim_epoch_{epoch}"))
    }

    /// Save model weights for `epoch` and move the latest pointer to it.
    pub fn save_model<B: Backend>(
        &self,
        model: &SpectrumTransformer<B>,
        epoch: usize,
    ) -> Result<()> {
        let path = self.model_path(epoch);
        CheckpointRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        let latest_path = self.dir.join(LATEST_EPOCH_FILE);
        fs::write(&latest_path, serde_json::to_string(&epoch)?)
            .with_context(|| format!("Failed to write {LATEST_EPOCH_FILE}"))?;

        tracing::debug!("Saved checkpoint: epoch {}", epoch);
        Ok(())
    }

    /// Load the weights of the latest saved epoch into `model`.
    /// Returns the restored model and that epoch number.
    pub fn load_model<B: Backend>(
        &self,
        model:  SpectrumTransformer<B>,
        device: &B::Device,
    ) -> Result<(SpectrumTransformer<B>, usize)> {
        let epoch = self.latest_epoch()?;
        let path  = self.model_path(epoch);

        tracing::info!("Loading checkpoint from epoch {}", epoch);
        let record = CheckpointRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load checkpoint '{}'", path.display()))?;

        Ok((model.load_record(record), epoch))
    }

    /// Save the optimiser state of `epoch`. Call before `save_model`
    /// so the latest pointer never names an epoch without one.
    pub fn save_optimizer<B, M, O>(&self, optim: &O, epoch: usize) -> Result<()>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let path = self.optim_path(epoch);
        Recorder::<B>::record(&CheckpointRecorder::new(), optim.to_record(), path.clone())
            .with_context(|| format!("Failed to save optimizer state to '{}'", path.display()))?;
        Ok(())
    }

    /// Restore the optimiser state saved for `epoch`. Checkpoints
    /// written without one leave `optim` untouched.
    pub fn load_optimizer<B, M, O>(&self, optim: O, epoch: usize, device: &B::Device) -> Result<O>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let path = self.optim_path(epoch);
        if !path.with_extension("mpk.gz").exists() {
            tracing::warn!("No optimizer state for epoch {}; Adam restarts from zero moments", epoch);
            return Ok(optim);
        }
        let record: O::Record = Recorder::<B>::load(&CheckpointRecorder::new(), path.clone(), device)
            .with_context(|| format!("Cannot load optimizer state '{}'", path.display()))?;
        Ok(optim.load_record(record))
    }

    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join(CONFIG_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read config from '{}'", path.display()))?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn has_checkpoint(&self) -> bool {
        self.dir.join(LATEST_EPOCH_FILE).exists()
    }

    /// Epoch number stored in latest_epoch.json.
    pub fn latest_epoch(&self) -> Result<usize> {
        let path = self.dir.join(LATEST_EPOCH_FILE);
        let s = fs::read_to_string(&path)
            .with_context(|| format!("Cannot find '{}'. Has this run saved a checkpoint?", path.display()))?;
        Ok(serde_json::from_str::<usize>(&s)?)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::SpectrumTransformerConfig;

    type TestBackend = burn::backend::NdArray;

    fn tiny_model(device: &<TestBackend as Backend>::Device) -> SpectrumTransformer<TestBackend> {
        SpectrumTransformerConfig::new()
            .with_num_layers(1)
            .with_d_model(8)
            .with_d_ff(16)
            .with_num_heads(2)
            .init(device)
            .unwrap()
    }

    #[test]
    fn test_save_and_load_model() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        let device = Default::default();

        assert!(!ckpt.has_checkpoint());
        let saved = tiny_model(&device);
        ckpt.save_model(&saved, 3).unwrap();
        assert_eq!(ckpt.latest_epoch().unwrap(), 3);

        let (loaded, epoch) = ckpt.load_model(tiny_model(&device), &device).unwrap();
        assert_eq!(epoch, 3);
        // weights are stored in full precision
        let diff = (saved.generator.weight.val() - loaded.generator.weight.val())
            .abs()
            .max()
            .into_scalar();
        assert!(diff < 1e-6);
    }

    #[test]
    fn test_optimizer_state_round_trip() {
        use burn::optim::{AdamConfig, GradientsParams};
        type AdBackend = burn::backend::Autodiff<TestBackend>;

        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        let device = Default::default();

        let model: SpectrumTransformer<AdBackend> = SpectrumTransformerConfig::new()
            .with_num_layers(1)
            .with_d_model(8)
            .with_d_ff(16)
            .with_num_heads(2)
            .init(&device)
            .unwrap();
        let mut optim = AdamConfig::new().init::<AdBackend, SpectrumTransformer<AdBackend>>();
        let loss = model.generator.weight.val().sum();
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        let _model = optim.step(1e-3, model, grads);
        assert!(!optim.to_record().is_empty());

        ckpt.save_optimizer::<AdBackend, SpectrumTransformer<AdBackend>, _>(&optim, 1).unwrap();
        let fresh = AdamConfig::new().init::<AdBackend, SpectrumTransformer<AdBackend>>();
        let restored = ckpt.load_optimizer::<AdBackend, SpectrumTransformer<AdBackend>, _>(fresh, 1, &device).unwrap();
        assert_eq!(restored.to_record().len(), optim.to_record().len());

        // an epoch without saved state keeps the optimizer it was given
        let fresh = AdamConfig::new().init::<AdBackend, SpectrumTransformer<AdBackend>>();
        let untouched = ckpt.load_optimizer::<AdBackend, SpectrumTransformer<AdBackend>, _>(fresh, 2, &device).unwrap();
        assert!(untouched.to_record().is_empty());
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        let cfg = TrainConfig { epochs: 7, d_model: 64, ..TrainConfig::default() };
        ckpt.save_config(&cfg).unwrap();

        let loaded = ckpt.load_config().unwrap();
        assert_eq!(loaded.epochs, 7);
        assert_eq!(loaded.d_model, 64);
    }

    #[test]
    fn test_missing_pointer_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        assert!(ckpt.latest_epoch().is_err());
    }
}

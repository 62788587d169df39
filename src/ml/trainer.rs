// ============================================================
// Layer 5 - Training Loop
// ============================================================
// Train + validation loop using Burn's DataLoader and Adam.
//
//   for each epoch:
//     for each batch:
//       mz   = spectra[:, :, 0]
//       out  = model(spectra, mz, peak_mask)
//       loss = weighted CE(out, targets)      logged per batch
//       backward, Adam step
//     validation pass (loss + token accuracy), metrics row, checkpoint
//   optional final pass over the test store
//
// Backend notes:
//   - Training uses TrainBackend (Autodiff<..>) for gradients
//   - model.valid() returns the model on the inner backend, so the
//     validation and test batchers use B::InnerBackend too
//   - argmax(2) returns [batch, peaks, 1]; squeeze before comparing
//     with the [batch, peaks] targets
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use anyhow::{Context, Result};
use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::TrainConfig;
use crate::data::batcher::{SpectrumBatch, SpectrumBatcher};
use crate::data::dataset::SpectrumDataset;
use crate::domain::error::SpectraResult;
use crate::domain::vocab::PAD_IDX;
use crate::infra::checkpoint::CheckpointManager;
use crate::infra::metrics::{EpochMetrics, MetricsLogger};
use crate::ml::loss::SpectrumLoss;
use crate::ml::model::SpectrumTransformer;

#[cfg(feature = "wgpu")]
pub type TrainBackend = burn::backend::Autodiff<burn::backend::Wgpu>;
#[cfg(not(feature = "wgpu"))]
pub type TrainBackend = burn::backend::Autodiff<burn::backend::NdArray>;

/// The stores a run reads from. Only `train` is required.
pub struct TrainData {
    pub train: SpectrumDataset,
    pub valid: Option<SpectrumDataset>,
    pub test:  Option<SpectrumDataset>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalSummary {
    /// Mean batch loss
    pub loss:           f64,
    /// Correct predictions over non-<PAD> target positions
    pub token_accuracy: f64,
    pub batches:        usize,
    pub tokens:         usize,
}

#[derive(Debug, Clone)]
pub struct TrainSummary {
    pub epochs_run: usize,
    pub last_epoch: Option<EpochMetrics>,
    pub test:       Option<EvalSummary>,
}

pub fn run_training(
    cfg:          &TrainConfig,
    data:         TrainData,
    ckpt_manager: &CheckpointManager,
    metrics:      &MetricsLogger,
) -> Result<TrainSummary> {
    let device = <TrainBackend as Backend>::Device::default();
    tracing::info!("Using device: {:?}", device);
    train_loop::<TrainBackend>(cfg, data, ckpt_manager, metrics, device)
}

/// One optimisation step. Returns the updated model and the batch loss.
pub fn train_step<B, O>(
    model:       SpectrumTransformer<B>,
    optim:       &mut O,
    batch:       &SpectrumBatch<B>,
    loss:        &SpectrumLoss,
    lr:          f64,
    mask_padded: bool,
) -> SpectraResult<(SpectrumTransformer<B>, f64)>
where
    B: AutodiffBackend,
    O: Optimizer<SpectrumTransformer<B>, B>,
{
    let (loss_tensor, _) = model.forward_loss(batch, loss, mask_padded)?;
    let loss_val: f64 = loss_tensor.clone().into_scalar().elem::<f64>();

    let grads = loss_tensor.backward();
    let grads = GradientsParams::from_grads(grads, &model);
    Ok((optim.step(lr, model, grads), loss_val))
}

/// Loss and token accuracy of `model` over every batch of `loader`.
pub fn evaluate<B: Backend>(
    model:       &SpectrumTransformer<B>,
    loader:      &dyn DataLoader<SpectrumBatch<B>>,
    loss:        &SpectrumLoss,
    mask_padded: bool,
) -> SpectraResult<EvalSummary> {
    let mut loss_sum = 0.0f64;
    let mut batches  = 0usize;
    let mut correct  = 0i64;
    let mut tokens   = 0i64;

    for batch in loader.iter() {
        let (batch_loss, output) = model.forward_loss(&batch, loss, mask_padded)?;
        loss_sum += batch_loss.into_scalar().elem::<f64>();
        batches  += 1;

        let predicted = output.argmax(2).squeeze::<2>(2);
        let real = batch.targets.clone().equal_elem(PAD_IDX as i64).bool_not().int();
        let hits = predicted.equal(batch.targets).int() * real.clone();

        correct += hits.sum().into_scalar().elem::<i64>();
        tokens  += real.sum().into_scalar().elem::<i64>();
    }

    Ok(EvalSummary {
        loss:           if batches > 0 { loss_sum / batches as f64 } else { f64::NAN },
        token_accuracy: if tokens  > 0 { correct as f64 / tokens as f64 } else { 0.0 },
        batches,
        tokens:         tokens as usize,
    })
}

pub fn train_loop<B: AutodiffBackend>(
    cfg:          &TrainConfig,
    data:         TrainData,
    ckpt_manager: &CheckpointManager,
    metrics:      &MetricsLogger,
    device:       B::Device,
) -> Result<TrainSummary> {
    let seed = cfg.seed.unwrap_or(0);
    B::seed(seed);
    let loss = cfg.loss();

    // ── Build model ───────────────────────────────────────────────────────────
    let mut model: SpectrumTransformer<B> = cfg
        .model_config()
        .init(&device)
        .context("Invalid model configuration")?;
    let mut resumed_from = None;
    if cfg.resume && ckpt_manager.has_checkpoint() {
        let (restored, epoch) = ckpt_manager.load_model(model, &device)?;
        model = restored;
        resumed_from = Some(epoch);
        tracing::info!("Resuming after epoch {}", epoch);
    }
    let first_epoch = resumed_from.map_or(1, |epoch| epoch + 1);
    tracing::info!(
        "Model ready: {} layers, d_model={}, heads={}",
        cfg.num_layers, cfg.d_model, cfg.num_heads
    );

    // ── Adam optimiser ────────────────────────────────────────────────────────
    // m = β1*m + (1-β1)*g
    // v = β2*v + (1-β2)*g²
    // θ = θ - lr * m / (√v + ε)
    let mut optim = AdamConfig::new()
        .with_epsilon(1e-8)
        .init::<B, SpectrumTransformer<B>>();
    if let Some(epoch) = resumed_from {
        optim = ckpt_manager.load_optimizer::<B, SpectrumTransformer<B>, _>(optim, epoch, &device)?;
    }

    // ── Data loaders ──────────────────────────────────────────────────────────
    let train_batcher = SpectrumBatcher::<B>::new(device.clone());
    let mut train_builder = DataLoaderBuilder::new(train_batcher)
        .batch_size(cfg.batch_size)
        .shuffle(seed);
    if cfg.num_workers > 0 {
        train_builder = train_builder.num_workers(cfg.num_workers);
    }
    let train_loader = train_builder.build(data.train);

    let eval_loader = |dataset: SpectrumDataset| {
        let batcher = SpectrumBatcher::<B::InnerBackend>::new(device.clone());
        let builder = DataLoaderBuilder::new(batcher).batch_size(cfg.batch_size);
        let builder = if cfg.num_workers > 0 { builder.num_workers(cfg.num_workers) } else { builder };
        builder.build(dataset)
    };
    let valid_loader = data.valid.map(eval_loader);
    let test_loader  = data.test.map(eval_loader);

    // ── Epoch loop ────────────────────────────────────────────────────────────
    let mut last_epoch = None;
    let mut best_valid = f64::INFINITY;
    for epoch in first_epoch..=cfg.epochs {
        let mut train_loss_sum = 0.0f64;
        let mut train_batches  = 0usize;

        for batch in train_loader.iter() {
            let (updated, loss_val) = train_step(model, &mut optim, &batch, &loss, cfg.lr, cfg.mask_padded_peaks)
                .with_context(|| format!("Training step failed in epoch {epoch}"))?;
            model = updated;
            tracing::info!("[Epoch {}] [Batch {}] [Loss {:.5}]", epoch, train_batches, loss_val);

            train_loss_sum += loss_val;
            train_batches  += 1;
        }
        if train_batches == 0 {
            tracing::warn!("Epoch {} saw no training batches", epoch);
        }

        let avg_train_loss = if train_batches > 0 {
            train_loss_sum / train_batches as f64
        } else { f64::NAN };

        // ── Validation phase ──────────────────────────────────────────────────
        // dropout disabled for deterministic evaluation
        let valid = match &valid_loader {
            Some(loader) => Some(evaluate(&model.valid(), loader.as_ref(), &loss, cfg.mask_padded_peaks)?),
            None => None,
        };
        let (valid_loss, valid_acc) = valid
            .map(|v| (v.loss, v.token_accuracy))
            .unwrap_or((f64::NAN, f64::NAN));

        println!(
            "Epoch {:>3}/{} | train_loss={:.4} | valid_loss={:.4} | token_acc={:.1}%",
            epoch, cfg.epochs, avg_train_loss, valid_loss, valid_acc * 100.0,
        );

        let row = EpochMetrics::new(epoch, avg_train_loss, valid_loss, valid_acc);
        if row.is_improvement(best_valid) {
            best_valid = row.valid_loss;
            tracing::info!("New best validation loss {:.4} at epoch {}", best_valid, epoch);
        }
        metrics.log(&row)?;
        ckpt_manager.save_optimizer::<B, SpectrumTransformer<B>, _>(&optim, epoch)?;
        ckpt_manager.save_model(&model, epoch)?;
        tracing::info!("Checkpoint saved for epoch {}", epoch);
        last_epoch = Some(row);
    }

    // ── Test phase ────────────────────────────────────────────────────────────
    let test = match &test_loader {
        Some(loader) => {
            let summary = evaluate(&model.valid(), loader.as_ref(), &loss, cfg.mask_padded_peaks)?;
            println!(
                "Test | loss={:.4} | token_acc={:.1}% over {} tokens",
                summary.loss, summary.token_accuracy * 100.0, summary.tokens,
            );
            Some(summary)
        }
        None => None,
    };

    let epochs_run = (first_epoch..=cfg.epochs).count();
    tracing::info!("Training complete!");
    Ok(TrainSummary { epochs_run, last_epoch, test })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::data::dataloader::batcher::Batcher;
    use crate::data::dataset::SpectrumItem;
    use crate::data::store::RecordStore;
    use crate::domain::spectrum::SpectrumRecord;
    use crate::domain::vocab::{EOS_IDX, SOS_IDX};
    use crate::ml::model::SpectrumTransformerConfig;

    type TestBackend = burn::backend::Autodiff<burn::backend::NdArray>;

    const MAP_SIZE: usize = 16 * 1024 * 1024;

    fn tiny_config() -> SpectrumTransformerConfig {
        SpectrumTransformerConfig::new()
            .with_num_layers(1)
            .with_d_model(8)
            .with_d_ff(16)
            .with_num_heads(2)
            .with_dropout(0.0)
    }

    fn record(title: &str, peaks: usize) -> SpectrumRecord {
        SpectrumRecord {
            title:          title.to_string(),
            mz:             (0..peaks).map(|p| 100.0 + 57.02 * p as f64).collect(),
            intensity:      (0..peaks).map(|p| 10 + p as i64).collect(),
            precursor_mass: 800.4,
            charge:         2.0,
            sequence:       "GAK".to_string(),
            token_indices:  vec![SOS_IDX, 20, 1, 8, EOS_IDX],
        }
    }

    fn store_with(dir: &std::path::Path, records: &[SpectrumRecord]) -> SpectrumDataset {
        let mut store = RecordStore::open(dir, MAP_SIZE).unwrap();
        store.write_all(records).unwrap();
        SpectrumDataset::new(store).unwrap()
    }

    #[test]
    fn test_train_step_updates_parameters() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device).unwrap();
        let before = model.generator.weight.val().inner();

        let batch = SpectrumBatcher::<TestBackend>::new(device).batch(vec![
            SpectrumItem::from(record("a", 6)),
            SpectrumItem::from(record("b", 3)),
        ]);
        let mut optim = AdamConfig::new().init();
        let (model, loss) = train_step(model, &mut optim, &batch, &SpectrumLoss::default(), 1e-2, true)
            .unwrap();

        assert!(loss.is_finite() && loss > 0.0);
        let after = model.generator.weight.val().inner();
        let diff = (after - before).abs().sum().into_scalar();
        assert!(diff > 0.0);
    }

    #[test]
    fn test_train_loop_writes_metrics_and_checkpoints() {
        let train_dir = tempfile::tempdir().unwrap();
        let valid_dir = tempfile::tempdir().unwrap();
        let test_dir  = tempfile::tempdir().unwrap();
        let ckpt_dir  = tempfile::tempdir().unwrap();

        let data = TrainData {
            train: store_with(train_dir.path(), &[record("t1", 5), record("t2", 7), record("t3", 4)]),
            valid: Some(store_with(valid_dir.path(), &[record("v1", 6)])),
            test:  Some(store_with(test_dir.path(), &[record("x1", 5), record("x2", 8)])),
        };

        let model = tiny_config();
        let cfg = TrainConfig {
            epochs:      2,
            batch_size:  2,
            num_workers: 0,
            num_layers:  model.num_layers,
            d_model:     model.d_model,
            d_ff:        model.d_ff,
            num_heads:   model.num_heads,
            dropout:     model.dropout,
            seed:        Some(7),
            ..TrainConfig::default()
        };

        let ckpt    = CheckpointManager::new(ckpt_dir.path()).unwrap();
        let metrics = MetricsLogger::new(ckpt_dir.path(), false).unwrap();
        let summary = train_loop::<TestBackend>(&cfg, data, &ckpt, &metrics, Default::default()).unwrap();

        assert_eq!(summary.epochs_run, 2);
        let last = summary.last_epoch.unwrap();
        assert_eq!(last.epoch, 2);
        assert!(last.train_loss.is_finite());
        assert!((0.0..=1.0).contains(&last.valid_token_acc));

        let test = summary.test.unwrap();
        assert_eq!(test.batches, 1);
        // both padded to 8 peaks, each keeps its 5 target tokens
        assert_eq!(test.tokens, 10);

        assert_eq!(ckpt.latest_epoch().unwrap(), 2);
        let csv = std::fs::read_to_string(metrics.csv_path()).unwrap();
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn test_resume_continues_after_latest_checkpoint() {
        let ckpt_dir = tempfile::tempdir().unwrap();
        let model = tiny_config();
        let cfg = TrainConfig {
            epochs:      1,
            batch_size:  2,
            num_layers:  model.num_layers,
            d_model:     model.d_model,
            d_ff:        model.d_ff,
            num_heads:   model.num_heads,
            dropout:     model.dropout,
            seed:        Some(11),
            ..TrainConfig::default()
        };
        let ckpt = CheckpointManager::new(ckpt_dir.path()).unwrap();

        let first_dir = tempfile::tempdir().unwrap();
        let data = TrainData {
            train: store_with(first_dir.path(), &[record("t1", 5), record("t2", 3)]),
            valid: None,
            test:  None,
        };
        let metrics = MetricsLogger::new(ckpt_dir.path(), false).unwrap();
        train_loop::<TestBackend>(&cfg, data, &ckpt, &metrics, Default::default()).unwrap();
        assert!(ckpt_dir.path().join("optim_epoch_1.mpk.gz").exists());

        let second_dir = tempfile::tempdir().unwrap();
        let data = TrainData {
            train: store_with(second_dir.path(), &[record("t1", 5), record("t2", 3)]),
            valid: None,
            test:  None,
        };
        let resumed = TrainConfig { epochs: 3, resume: true, ..cfg };
        let metrics = MetricsLogger::new(ckpt_dir.path(), true).unwrap();
        let summary = train_loop::<TestBackend>(&resumed, data, &ckpt, &metrics, Default::default()).unwrap();

        assert_eq!(summary.epochs_run, 2);
        assert_eq!(summary.last_epoch.unwrap().epoch, 3);
        assert_eq!(ckpt.latest_epoch().unwrap(), 3);

        let csv = std::fs::read_to_string(metrics.csv_path()).unwrap();
        let epochs: Vec<&str> = csv.lines().skip(1).map(|l| l.split(',').next().unwrap()).collect();
        assert_eq!(epochs, vec!["1", "2", "3"]);
    }
}

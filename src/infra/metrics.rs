// ============================================================
// Layer 6 - Metrics Logger
// ============================================================
// Appends one CSV row per epoch to checkpoints/metrics.csv.
// A fresh run starts a new file; a resumed run appends to it.
//
//   epoch,train_loss,valid_loss,valid_token_acc
//   1,3.124500,3.089200,0.123000
//   2,2.890100,2.854300,0.184000
//
// valid_token_acc is the fraction of non-<PAD> target positions
// whose argmax prediction is correct. When no validation store is
// configured both validation columns hold NaN.
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

const HEADER: &str = "epoch,train_loss,valid_loss,valid_token_acc";

/// One row of metrics for a single training epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Starts at 1
    pub epoch: usize,

    /// Mean loss over all training batches
    pub train_loss: f64,

    /// Mean loss over the validation batches
    pub valid_loss: f64,

    /// Range: [0.0, 1.0]
    pub valid_token_acc: f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train_loss: f64, valid_loss: f64, valid_token_acc: f64) -> Self {
        Self { epoch, train_loss, valid_loss, valid_token_acc }
    }

    /// True if this epoch's validation loss beats `best_valid_loss`.
    /// NaN never counts as an improvement.
    pub fn is_improvement(&self, best_valid_loss: f64) -> bool {
        self.valid_loss < best_valid_loss
    }
}

pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// With `append` an existing log keeps its rows; otherwise (or if
    /// there is no log yet) the file is recreated with just the header.
    pub fn new(dir: impl AsRef<Path>, append: bool) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let csv_path = dir.join("metrics.csv");
        if !append || !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)?;

        writeln!(
            f,
            "{},{:.6},{:.6},{:.6}",
            m.epoch,
            m.train_loss,
            m.valid_loss,
            m.valid_token_acc,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, valid_loss={:.4}",
            m.epoch,
            m.train_loss,
            m.valid_loss,
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

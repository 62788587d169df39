// ============================================================
// Layer 1 - CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `ingest` and `train`, and all
// their flags.
//
// Training flags are optional overrides: the run starts from
// `--config FILE.json` (or the built-in defaults) and every flag
// that is given replaces the matching field.
//
// Reference: Rust Book §12 (Building a CLI Program)

use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};

use crate::application::ingest_use_case::IngestConfig;
use crate::application::train_use_case::TrainConfig;
use crate::data::filter::PeakFilter;
use crate::data::store::DEFAULT_MAP_SIZE;
use crate::ml::loss::LossKind;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse a directory of .mgf files into a record store
    Ingest(IngestArgs),

    /// Train the spectrum transformer on record stores
    Train(TrainArgs),
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Directory containing .mgf files
    #[arg(long)]
    pub mgf_dir: String,

    /// Record store directory (created if missing, contents replaced)
    #[arg(long)]
    pub db_path: String,

    /// Maximum store size in bytes
    #[arg(long, default_value_t = DEFAULT_MAP_SIZE)]
    pub map_size: usize,

    /// Keep only peaks with m/z in [200, 2000] and at least 1% of the
    /// base peak intensity
    #[arg(long)]
    pub filter_peaks: bool,
}

impl From<IngestArgs> for IngestConfig {
    fn from(a: IngestArgs) -> Self {
        IngestConfig {
            mgf_dir:     a.mgf_dir,
            db_path:     a.db_path,
            map_size:    a.map_size,
            peak_filter: a.filter_peaks.then(PeakFilter::default),
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LossArg {
    CrossEntropy,
    NegativeLogLikelihood,
}

impl From<LossArg> for LossKind {
    fn from(a: LossArg) -> Self {
        match a {
            LossArg::CrossEntropy          => LossKind::CrossEntropy,
            LossArg::NegativeLogLikelihood => LossKind::NegativeLogLikelihood,
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct TrainArgs {
    /// JSON file with a full or partial TrainConfig
    #[arg(long)]
    pub config: Option<String>,

    /// Training record store [default: data/train_db]
    #[arg(long)]
    pub train_db: Option<String>,

    /// Validation record store, evaluated after every epoch
    #[arg(long)]
    pub valid_db: Option<String>,

    /// Test record store, evaluated once after training
    #[arg(long)]
    pub test_db: Option<String>,

    /// Where checkpoints, config and metrics.csv go [default: checkpoints]
    #[arg(long)]
    pub checkpoint_dir: Option<String>,

    /// Maximum store size in bytes [default: 1 GiB]
    #[arg(long)]
    pub map_size: Option<usize>,

    /// Features per peak [default: 2]
    #[arg(long)]
    pub input_dim: Option<usize>,

    /// Output classes [default: 27]
    #[arg(long)]
    pub vocab_size: Option<usize>,

    /// Encoder layers [default: 6]
    #[arg(long)]
    pub num_layers: Option<usize>,

    /// Hidden dimension [default: 512]
    #[arg(long)]
    pub d_model: Option<usize>,

    /// Feed-forward inner dimension [default: 2048]
    #[arg(long)]
    pub d_ff: Option<usize>,

    /// Attention heads; d_model / num_heads must be even [default: 8]
    #[arg(long)]
    pub num_heads: Option<usize>,

    /// Dropout probability [default: 0.1]
    #[arg(long)]
    pub dropout: Option<f64>,

    /// Adam learning rate [default: 0.001]
    #[arg(long)]
    pub lr: Option<f64>,

    /// [default: 2]
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Data loader threads, 0 loads on the training thread [default: 0]
    #[arg(long)]
    pub num_workers: Option<usize>,

    /// [default: 10]
    #[arg(long)]
    pub epochs: Option<usize>,

    /// Shuffle and initialisation seed [default: random]
    #[arg(long)]
    pub seed: Option<u64>,

    /// [default: cross-entropy]
    #[arg(long, value_enum)]
    pub loss: Option<LossArg>,

    /// Loss weight of the <PAD> class [default: 0.001]
    #[arg(long)]
    pub pad_weight: Option<f32>,

    /// Average the loss over non-<PAD> targets only
    #[arg(long)]
    pub mask_padding_loss: bool,

    /// Let attention see zero-padded peaks
    #[arg(long)]
    pub no_peak_mask: bool,

    /// Continue from the latest checkpoint in --checkpoint-dir
    #[arg(long)]
    pub resume: bool,
}

impl TrainArgs {
    /// Start from --config (or the defaults) and apply every given flag.
    pub fn into_config(self) -> Result<TrainConfig> {
        let mut cfg = match &self.config {
            Some(path) => TrainConfig::from_json_file(path)?,
            None       => TrainConfig::default(),
        };

        if let Some(v) = self.train_db       { cfg.train_db = v; }
        if let Some(v) = self.valid_db       { cfg.valid_db = Some(v); }
        if let Some(v) = self.test_db        { cfg.test_db = Some(v); }
        if let Some(v) = self.checkpoint_dir { cfg.checkpoint_dir = v; }
        if let Some(v) = self.map_size       { cfg.map_size = v; }
        if let Some(v) = self.input_dim      { cfg.input_dim = v; }
        if let Some(v) = self.vocab_size     { cfg.vocab_size = v; }
        if let Some(v) = self.num_layers     { cfg.num_layers = v; }
        if let Some(v) = self.d_model        { cfg.d_model = v; }
        if let Some(v) = self.d_ff           { cfg.d_ff = v; }
        if let Some(v) = self.num_heads      { cfg.num_heads = v; }
        if let Some(v) = self.dropout        { cfg.dropout = v; }
        if let Some(v) = self.lr             { cfg.lr = v; }
        if let Some(v) = self.batch_size     { cfg.batch_size = v; }
        if let Some(v) = self.num_workers    { cfg.num_workers = v; }
        if let Some(v) = self.epochs         { cfg.epochs = v; }
        if let Some(v) = self.seed           { cfg.seed = Some(v); }
        if let Some(v) = self.loss           { cfg.loss = v.into(); }
        if let Some(v) = self.pad_weight     { cfg.pad_weight = v; }
        if self.mask_padding_loss { cfg.mask_padding_loss = true; }
        if self.no_peak_mask      { cfg.mask_padded_peaks = false; }
        if self.resume            { cfg.resume = true; }

        Ok(cfg)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{ "d_model": 64, "epochs": 3, "train_db": "a" }"#).unwrap();

        let args = TrainArgs {
            config:       Some(path.display().to_string()),
            epochs:       Some(5),
            loss:         Some(LossArg::CrossEntropy),
            no_peak_mask: true,
            ..TrainArgs::default()
        };
        let cfg = args.into_config().unwrap();
        assert_eq!(cfg.d_model, 64);
        assert_eq!(cfg.epochs, 5);
        assert_eq!(cfg.train_db, "a");
        assert!(!cfg.mask_padded_peaks);
    }

    #[test]
    fn test_parse_ingest_command() {
        let cli = Cli::try_parse_from([
            "mzformer", "ingest", "--mgf-dir", "raw", "--db-path", "db", "--filter-peaks",
        ])
        .unwrap();
        let Commands::Ingest(args) = cli.command else {
            panic!("expected ingest");
        };
        let cfg = IngestConfig::from(args);
        assert_eq!(cfg.mgf_dir, "raw");
        assert_eq!(cfg.map_size, DEFAULT_MAP_SIZE);
        assert_eq!(cfg.peak_filter, Some(PeakFilter::default()));
    }

    #[test]
    fn test_parse_train_command() {
        let cli = Cli::try_parse_from([
            "mzformer", "train", "--train-db", "t", "--valid-db", "v",
            "--num-layers", "2", "--loss", "negative-log-likelihood",
        ])
        .unwrap();
        let Commands::Train(args) = cli.command else {
            panic!("expected train");
        };
        let cfg = args.into_config().unwrap();
        assert_eq!(cfg.valid_db.as_deref(), Some("v"));
        assert_eq!(cfg.num_layers, 2);
        assert_eq!(cfg.loss, LossKind::NegativeLogLikelihood);
        assert!(cfg.validate().is_err());
    }
}

// ============================================================
// Layer 1 - CLI / Presentation Layer
// ============================================================
// Parses command line arguments with `clap` and delegates all
// work to Layer 2 (application).
//
//   1. `ingest` - parses .mgf files into an LMDB record store
//   2. `train`  - trains the spectrum transformer on record stores
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, IngestArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "mzformer",
    version = "0.1.0",
    about = "De novo peptide sequencing with an m/z-aware transformer encoder."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Ingest(args) => run_ingest(args),
            Commands::Train(args)  => run_train(args),
        }
    }
}

fn run_ingest(args: IngestArgs) -> Result<()> {
    use crate::application::ingest_use_case::IngestUseCase;

    let db_path = args.db_path.clone();
    let count = IngestUseCase::new(args.into()).execute()?;

    println!("Stored {count} spectra in '{db_path}'.");
    Ok(())
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    let config = args.into_config()?;
    tracing::info!("Starting training on record store: {}", config.train_db);
    let checkpoint_dir = config.checkpoint_dir.clone();

    let summary = TrainUseCase::new(config).execute()?;

    println!(
        "Training complete after {} epoch(s). Checkpoints in '{}'.",
        summary.epochs_run, checkpoint_dir
    );
    Ok(())
}

// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Three subcommands: `drive`, `prepare` and `train`.
// Every one of them accepts `--config` (an EngineConfig JSON
// file) and `--word-vectors`, which overrides the file's entry.
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::application::{prepare_use_case::PrepareConfig, train_use_case::TrainConfig};
use crate::domain::config::EngineConfig;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve line-delimited JSON requests on stdin/stdout
    Drive(DriveArgs),

    /// Convert a JSONL dataset into one batch file
    Prepare(PrepareArgs),

    /// Train a transform graph on a JSONL dataset
    Train(TrainArgs),
}

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Engine configuration file (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// GloVe-style word vector file for string variables
    #[arg(long)]
    pub word_vectors: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DriveArgs {
    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug)]
pub struct PrepareArgs {
    /// JSONL file of {"input": ..., "output": ...} lines
    #[arg(long)]
    pub dataset: PathBuf,

    #[arg(long)]
    pub input_schema: PathBuf,

    #[arg(long)]
    pub output_schema: PathBuf,

    /// Batch file to write
    #[arg(long, default_value = "batches/batch.json")]
    pub output: PathBuf,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// JSONL file of {"input": ..., "output": ...} lines
    #[arg(long)]
    pub dataset: PathBuf,

    #[arg(long)]
    pub input_schema: PathBuf,

    #[arg(long)]
    pub output_schema: PathBuf,

    /// Directory for weights, graph.json and metrics.csv
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// Examples per optimizer step
    #[arg(long, default_value_t = 16)]
    pub batch_size: usize,

    /// Full passes over the training split
    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,

    /// adam, adamw, sgd, adagrad or rmsprop
    #[arg(long, default_value = "adam")]
    pub algorithm: String,

    /// Share of the dataset used for training, the rest validates
    #[arg(long, default_value_t = 0.8)]
    pub train_fraction: f64,

    /// Seed for the train/validation split
    #[arg(long)]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub engine: EngineArgs,
}

impl PrepareArgs {
    pub fn into_config(self, engine: EngineConfig) -> PrepareConfig {
        PrepareConfig {
            dataset:       self.dataset,
            input_schema:  self.input_schema,
            output_schema: self.output_schema,
            output:        self.output,
            engine,
        }
    }
}

impl TrainArgs {
    /// The application layer never sees clap types.
    pub fn into_config(self, engine: EngineConfig) -> TrainConfig {
        TrainConfig {
            dataset:        self.dataset,
            input_schema:   self.input_schema,
            output_schema:  self.output_schema,
            checkpoint_dir: self.checkpoint_dir,
            batch_size:     self.batch_size,
            epochs:         self.epochs,
            lr:             self.lr,
            algorithm:      self.algorithm,
            train_fraction: self.train_fraction,
            seed:           self.seed,
            engine,
        }
    }
}

// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses arguments with clap and hands off to Layer 2.
//
//   1. `drive`   — line-JSON driver on stdin/stdout
//   2. `prepare` — dataset → batch file
//   3. `train`   — dataset → checkpoints
//
// stdout belongs to the driver protocol during `drive`, so
// nothing here prints in that mode.
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use std::{fs, io};

use anyhow::{Context, Result};
use clap::Parser;
use commands::{Commands, DriveArgs, EngineArgs, PrepareArgs, TrainArgs};

use crate::application::{driver::Driver, prepare_use_case::PrepareUseCase, train_use_case::TrainUseCase};
use crate::domain::config::EngineConfig;
use crate::infra::word_vectors::WordVectors;
use crate::ml::{default_device, TrainBackend};

#[derive(Parser, Debug)]
#[command(
    name = "schema-net",
    version,
    about = "Build, train and run neural networks shaped by JSON schemas."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Config file first, then command line overrides.
fn engine_config(args: &EngineArgs) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Cannot read config '{}'", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("'{}' is not a valid config", path.display()))?
        }
        None => EngineConfig::default(),
    };
    if let Some(path) = &args.word_vectors {
        config.word_vectors = Some(path.clone());
    }
    Ok(config)
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Drive(args)   => run_drive(args),
            Commands::Prepare(args) => run_prepare(args),
            Commands::Train(args)   => run_train(args),
        }
    }
}

fn run_drive(args: DriveArgs) -> Result<()> {
    let config = engine_config(&args.engine)?;
    let words  = WordVectors::from_config(&config)?;
    tracing::info!("Driver ready, reading requests from stdin");

    let mut driver = Driver::<TrainBackend>::new(config, words, default_device());
    driver.run(io::stdin().lock(), io::stdout().lock())
}

fn run_prepare(args: PrepareArgs) -> Result<()> {
    let config  = engine_config(&args.engine)?;
    let output  = args.output.clone();
    let written = PrepareUseCase::new(args.into_config(config)).execute()?;
    println!("Prepared {} examples into '{}'.", written, output.display());
    Ok(())
}

fn run_train(args: TrainArgs) -> Result<()> {
    let config = engine_config(&args.engine)?;
    tracing::info!("Starting training on '{}'", args.dataset.display());

    let checkpoint_dir = args.checkpoint_dir.clone();
    TrainUseCase::new(args.into_config(config)).execute()?;

    println!("Training complete. Checkpoints saved to '{}'.", checkpoint_dir.display());
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_word_vectors_flag_overrides_config_file() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{"word_vectors": "a.txt", "decode_threads": 2}"#).unwrap();

        let config = engine_config(&EngineArgs { config: Some(path), word_vectors: Some(PathBuf::from("b.txt")) }).unwrap();
        assert_eq!(config.word_vectors, Some(PathBuf::from("b.txt")));
        assert_eq!(config.decode_threads, 2);
    }

    #[test]
    fn test_train_arguments_parse() {
        let cli = Cli::try_parse_from([
            "schema-net", "train", "--dataset", "d.jsonl", "--input-schema", "i.json",
            "--output-schema", "o.json", "--epochs", "3", "--seed", "9",
        ])
        .unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        let config = args.into_config(EngineConfig::default());
        assert_eq!(config.epochs, 3);
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.algorithm, "adam");
    }
}

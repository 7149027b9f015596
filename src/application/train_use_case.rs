// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Runs a whole training job on a transform graph:
//
//   Step 1: Load the two schemas        (Layer 3 - domain)
//   Step 2: Load word vectors, if any   (Layer 6 - infra)
//   Step 3: Load the JSONL dataset      (Layer 4 - data)
//   Step 4: Split train/validation      (Layer 4 - data)
//   Step 5: Build graph + session       (Layer 5 - ml)
//   Step 6: Save config                 (Layer 6 - infra)
//   Step 7: Run the epoch loop          (Layer 5 - ml)
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Burn Book §5 (Training)

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::{dataset::ExampleDataset, splitter::split_train_val};
use crate::domain::config::EngineConfig;
use crate::infra::{checkpoint::CheckpointManager, metrics::MetricsLogger, word_vectors::WordVectors};
use crate::ml::{
    default_device,
    graph::SchemaGraph,
    trainer::{run_training, EpochPlan, OptimizerParams, TrainingSession},
    TrainBackend,
};

// ─── Training Configuration ──────────────────────────────────────────────────
// Everything a `train` run needs. Saved next to the checkpoints
// so a run can be inspected or repeated later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub dataset:        PathBuf,
    pub input_schema:   PathBuf,
    pub output_schema:  PathBuf,
    pub checkpoint_dir: PathBuf,
    pub batch_size:     usize,
    pub epochs:         usize,
    pub lr:             f64,
    pub algorithm:      String,
    pub train_fraction: f64,
    pub seed:           Option<u64>,
    pub engine:         EngineConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            dataset:        PathBuf::from("data/train.jsonl"),
            input_schema:   PathBuf::from("schemas/input.json"),
            output_schema:  PathBuf::from("schemas/output.json"),
            checkpoint_dir: PathBuf::from("checkpoints"),
            batch_size:     16,
            epochs:         10,
            lr:             1e-3,
            algorithm:      "adam".to_string(),
            train_fraction: 0.8,
            seed:           None,
            engine:         EngineConfig::default(),
        }
    }
}

pub(crate) fn read_schema(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read schema '{}'", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("'{}' is not valid JSON", path.display()))
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<()> {
        let cfg = &self.config;

        // ── Step 1: Schemas ───────────────────────────────────────────────────
        let input_schema  = read_schema(&cfg.input_schema)?;
        let output_schema = read_schema(&cfg.output_schema)?;

        // ── Step 2: Word vectors ──────────────────────────────────────────────
        let words = WordVectors::from_config(&cfg.engine)?;

        // ── Step 3: Dataset ───────────────────────────────────────────────────
        let examples = ExampleDataset::load_jsonl(&cfg.dataset)?.into_examples();

        // ── Step 4: Train / validation split ──────────────────────────────────
        let (train, val) = split_train_val(examples, cfg.train_fraction, cfg.seed);
        tracing::info!("Split: {} train, {} validation", train.len(), val.len());
        let train = ExampleDataset::new(train);
        let val   = ExampleDataset::new(val);

        // ── Step 5: Graph + session ───────────────────────────────────────────
        let graph = SchemaGraph::transform(input_schema, output_schema, cfg.engine.clone(), words)?;
        tracing::info!("Graph planned: {} layers", graph.plan().layer_count());
        let mut session = TrainingSession::<TrainBackend>::new(graph, default_device());

        let params = OptimizerParams { learning_rate: Some(cfg.lr), ..OptimizerParams::default() };
        session.reset(&cfg.algorithm, &params)?;

        // ── Step 6: Save config ───────────────────────────────────────────────
        let ckpt    = CheckpointManager::new(&cfg.checkpoint_dir)?;
        let metrics = MetricsLogger::new(&cfg.checkpoint_dir)?;
        ckpt.save_json("train_config.json", cfg)?;

        // ── Step 7: Epoch loop ────────────────────────────────────────────────
        let plan = EpochPlan { epochs: cfg.epochs, batch_size: cfg.batch_size };
        run_training(&mut session, &plan, &train, &val, &ckpt, &metrics)?;

        // The driver's `load` reads `network` from the directory.
        session.export_parameters(&cfg.checkpoint_dir)?;
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execute_writes_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("in.json"), json!({"type": "object", "properties": {"x": {"type": "number"}}}).to_string()).unwrap();
        fs::write(root.join("out.json"), json!({"type": "boolean"}).to_string()).unwrap();
        let lines: String = (0..6)
            .map(|i| format!("{}\n", json!({"input": {"x": i as f64}, "output": i % 2 == 0})))
            .collect();
        fs::write(root.join("data.jsonl"), lines).unwrap();

        let config = TrainConfig {
            dataset:        root.join("data.jsonl"),
            input_schema:   root.join("in.json"),
            output_schema:  root.join("out.json"),
            checkpoint_dir: root.join("ckpt"),
            batch_size:     2,
            epochs:         2,
            seed:           Some(3),
            ..TrainConfig::default()
        };
        TrainUseCase::new(config).execute().unwrap();

        let ckpt = CheckpointManager::new(root.join("ckpt")).unwrap();
        assert_eq!(ckpt.latest_epoch().unwrap(), 2);
        assert!(root.join("ckpt/graph.json").exists());
        assert!(root.join("ckpt/train_config.json").exists());
        assert!(root.join("ckpt/network.mpk.gz").exists());
        let csv = fs::read_to_string(root.join("ckpt/metrics.csv")).unwrap();
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn test_missing_schema_names_the_file() {
        let config = TrainConfig { input_schema: PathBuf::from("/nonexistent/in.json"), ..TrainConfig::default() };
        let err = TrainUseCase::new(config).execute().err().unwrap();
        assert!(format!("{err}").contains("/nonexistent/in.json"));
    }
}

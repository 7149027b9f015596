// ============================================================
// Layer 2 — PrepareUseCase
// ============================================================
// Converts a JSONL dataset into one batch file offline, so a
// driver session can start straight from `iteration`:
//
//   schemas + dataset ──convert──► batch.json
//
// The word slot tables grown while converting live in the graph,
// so the graph is saved beside the batch (`graph.json`) and the
// same slots are used when it is loaded again.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::application::train_use_case::read_schema;
use crate::data::dataset::ExampleDataset;
use crate::domain::{config::EngineConfig, traits::Persistable};
use crate::infra::{checkpoint::CheckpointManager, word_vectors::WordVectors};
use crate::ml::graph::SchemaGraph;

#[derive(Debug, Clone)]
pub struct PrepareConfig {
    pub dataset:       PathBuf,
    pub input_schema:  PathBuf,
    pub output_schema: PathBuf,
    pub output:        PathBuf,
    pub engine:        EngineConfig,
}

pub struct PrepareUseCase {
    config: PrepareConfig,
}

impl PrepareUseCase {
    pub fn new(config: PrepareConfig) -> Self {
        Self { config }
    }

    /// Returns the number of examples written.
    pub fn execute(&self) -> Result<usize> {
        let cfg   = &self.config;
        let words = WordVectors::from_config(&cfg.engine)?;
        let mut graph = SchemaGraph::transform(
            read_schema(&cfg.input_schema)?,
            read_schema(&cfg.output_schema)?,
            cfg.engine.clone(),
            words,
        )?;

        let examples = ExampleDataset::load_jsonl(&cfg.dataset)?.into_examples();
        let (inputs, outputs): (Vec<_>, Vec<_>) = examples.into_iter().map(|e| (e.input, e.output)).unzip();
        let batch = graph.prepare_batch(&inputs, Some(&outputs))?;
        batch.save(&cfg.output)?;

        let dir = cfg.output.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        CheckpointManager::new(dir)?.save_graph(&graph.description())?;

        tracing::info!("Prepared {} examples into '{}'", batch.batch_size, cfg.output.display());
        Ok(batch.batch_size)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::artifact::BatchArtifact;
    use serde_json::json;
    use std::fs;

    #[test]
    fn test_prepare_writes_batch_and_graph() {
        let dir  = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("in.json"), json!({"type": "number"}).to_string()).unwrap();
        fs::write(root.join("out.json"), json!({"type": "string", "enum": ["a", "b"]}).to_string()).unwrap();
        fs::write(
            root.join("data.jsonl"),
            "{\"input\": 1.0, \"output\": \"a\"}\n\n{\"input\": 2.0, \"output\": \"b\"}\n",
        )
        .unwrap();

        let written = PrepareUseCase::new(PrepareConfig {
            dataset:       root.join("data.jsonl"),
            input_schema:  root.join("in.json"),
            output_schema: root.join("out.json"),
            output:        root.join("batches/all.json"),
            engine:        EngineConfig::default(),
        })
        .execute()
        .unwrap();

        assert_eq!(written, 2);
        let batch = BatchArtifact::load(&root.join("batches/all.json")).unwrap();
        assert_eq!(batch.batch_size, 2);
        assert!(root.join("batches/graph.json").exists());
    }
}

// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores network parameters with Burn's gzipped
// MessagePack recorder at full precision (f32 on disk, so a
// saved network reloads bit for bit), together with the graph
// description needed to rebuild the network they belong to.
//
// What gets saved:
//   1. Network weights (.mpk.gz)  — every layer in the arena
//   2. graph.json                 — schemas, layer lists, engine
//                                   config and word slot tables
//   3. latest_epoch.json          — last epoch saved by `train`
//   4. train_config.json          — the `train` command's config
//
// The weights alone cannot be loaded: the arena's slot layout
// comes from planning, so graph.json is rebuilt into a graph
// first and its freshly initialised network receives the record.
// The recorder refuses records whose layout differs.
//
// File naming convention:
//   checkpoints/
//     graph.json
//     network.mpk.gz          ← driver `save`
//     network_epoch_1.mpk.gz  ← weights after epoch 1
//     best.mpk.gz             ← lowest validation loss so far
//     latest_epoch.json
//     train_config.json
//     metrics.csv
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Recorder},
};
use serde::{de::DeserializeOwned, Serialize};

use crate::ml::{graph::GraphDescription, params::SchemaNetwork};

type WeightsRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

/// Manages the files of one checkpoint directory.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `{dir}/{name}.mpk.gz`; the recorder adds the extension.
    pub fn save_network<B: Backend>(&self, network: &SchemaNetwork<B>, name: &str) -> Result<()> {
        let path = self.dir.join(name);
        WeightsRecorder::new()
            .record(network.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save parameters to '{}'", path.display()))?;
        tracing::debug!("Saved parameters '{}'", path.display());
        Ok(())
    }

    /// Load `{dir}/{name}.mpk.gz` into `network`, which must come
    /// from the same plan.
    pub fn load_network<B: Backend>(
        &self,
        network: SchemaNetwork<B>,
        name:    &str,
        device:  &B::Device,
    ) -> Result<SchemaNetwork<B>> {
        let path   = self.dir.join(name);
        let record = WeightsRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load parameters '{}'. Were they saved first?", path.display()))?;
        Ok(network.load_record(record))
    }

    /// Weights for one epoch, the graph beside them, and the
    /// latest-epoch pointer.
    pub fn save_epoch<B: Backend>(
        &self,
        graph:   &GraphDescription,
        network: &SchemaNetwork<B>,
        epoch:   usize,
    ) -> Result<()> {
        self.save_graph(graph)?;
        self.save_network(network, &format!("network_epoch_{epoch}"))?;
        self.save_json("latest_epoch.json", &epoch)?;
        tracing::debug!("Saved checkpoint: epoch {}", epoch);
        Ok(())
    }

    /// Read latest_epoch.json; fails if nothing was trained yet.
    pub fn latest_epoch(&self) -> Result<usize> {
        self.load_json("latest_epoch.json")
            .context("Cannot find 'latest_epoch.json'. Have you run 'train' first?")
    }

    pub fn save_graph(&self, graph: &GraphDescription) -> Result<()> {
        self.save_json("graph.json", graph)
    }

    pub fn load_graph(&self) -> Result<GraphDescription> {
        self.load_json("graph.json")
    }

    pub fn save_json<T: Serialize + ?Sized>(&self, file: &str, value: &T) -> Result<()> {
        let path = self.dir.join(file);
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&path, json).with_context(|| format!("Cannot write '{}'", path.display()))?;
        tracing::debug!("Saved '{}'", path.display());
        Ok(())
    }

    pub fn load_json<T: DeserializeOwned>(&self, file: &str) -> Result<T> {
        let path = self.dir.join(file);
        let json = fs::read_to_string(&path).with_context(|| format!("Cannot read '{}'", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("'{}' is not valid", path.display()))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::EngineConfig;
    use crate::ml::graph::SchemaGraph;
    use burn::backend::NdArray;
    use serde_json::json;

    fn graph() -> SchemaGraph {
        SchemaGraph::transform(
            json!({"type": "number"}),
            json!({"type": "number"}),
            EngineConfig::default(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_epoch_round_trip() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path().join("nested")).unwrap();
        let g    = graph();
        let device = Default::default();
        let net: SchemaNetwork<NdArray> = g.init(&device);

        ckpt.save_epoch(&g.description(), &net, 3).unwrap();
        assert!(dir.path().join("nested/network_epoch_3.mpk.gz").exists());
        assert_eq!(ckpt.latest_epoch().unwrap(), 3);
        assert_eq!(ckpt.load_graph().unwrap(), g.description());

        let fresh: SchemaNetwork<NdArray> = g.init(&device);
        let loaded = ckpt.load_network(fresh, "network_epoch_3", &device).unwrap();
        assert_eq!(
            loaded.linears[0].weight.val().into_data().to_vec::<f32>().unwrap(),
            net.linears[0].weight.val().into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn test_missing_latest_epoch_is_an_error() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        assert!(ckpt.latest_epoch().is_err());
    }
}

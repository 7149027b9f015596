// ============================================================
// Layer 5 — Training Session
// ============================================================
// Owns a graph, its network and an optimizer.
//
// Key Burn 0.20 insight:
//   - Training uses an AutodiffBackend for gradients
//   - network.valid() returns the network on the inner backend
//     (dropout disabled), used for every evaluation
//   - Optimizers are generic over the module type; the session
//     keeps one behind the object-safe StepOptimizer trait so
//     `reset` can swap the algorithm at runtime
//
// The epoch loop at the bottom drives a session over a dataset
// the way the `train` command needs it.
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use std::{path::Path, sync::Arc, time::Instant};

use anyhow::{Context, Result};
use burn::{
    data::dataset::Dataset,
    module::AutodiffModule,
    optim::{
        AdaGradConfig, AdamConfig, AdamWConfig, GradientsParams, Optimizer, RmsPropConfig, SgdConfig,
    },
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::data::{artifact::BatchArtifact, dataset::{Example, ExampleDataset}};
use crate::domain::error::EngineError;
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{EpochMetrics, MetricsLogger},
    word_vectors::WordVectors,
};
use crate::ml::{graph::SchemaGraph, params::SchemaNetwork, tensor::host_values};

// ─── Optimizers ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    Adam,
    AdamW,
    Sgd,
    AdaGrad,
    RmsProp,
}

impl OptimizerKind {
    /// Accepts the short names and the `...Optimizer` spellings,
    /// in any case.
    pub fn from_name(name: &str) -> crate::domain::error::Result<Self> {
        let kind = match name.to_ascii_lowercase().as_str() {
            "adam" | "adamoptimizer" => Self::Adam,
            "adamax" | "adamaxoptimizer" => {
                tracing::warn!("'{}' is trained with Adam", name);
                Self::Adam
            }
            "adamw" => Self::AdamW,
            "sgd" | "gradientdescentoptimizer" => Self::Sgd,
            "adagrad" | "adagradoptimizer" => Self::AdaGrad,
            "rmsprop" | "rmspropoptimizer" => Self::RmsProp,
            _ => return Err(EngineError::unsupported(format!("optimizer '{name}'"))),
        };
        Ok(kind)
    }
}

/// `optimizationParameters` of a reset request. Missing values
/// keep burn's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerParams {
    #[serde(alias = "learningRate")]
    pub learning_rate: Option<f64>,
    pub beta1:         Option<f32>,
    pub beta2:         Option<f32>,
    pub epsilon:       Option<f32>,
}

impl OptimizerParams {
    pub fn from_map(map: &Map<String, Value>) -> Result<Self> {
        serde_json::from_value(Value::Object(map.clone())).context("Invalid optimization parameters")
    }
}

pub const DEFAULT_LEARNING_RATE: f64 = 1e-3;

/// An optimizer for `SchemaNetwork<B>` behind a trait object.
pub trait StepOptimizer<B: AutodiffBackend>: Send {
    fn step(&mut self, lr: f64, network: SchemaNetwork<B>, grads: GradientsParams) -> SchemaNetwork<B>;
}

impl<B, O> StepOptimizer<B> for O
where
    B: AutodiffBackend,
    O: Optimizer<SchemaNetwork<B>, B> + Send,
{
    fn step(&mut self, lr: f64, network: SchemaNetwork<B>, grads: GradientsParams) -> SchemaNetwork<B> {
        Optimizer::step(self, lr, network, grads)
    }
}

fn make_optimizer<B: AutodiffBackend>(kind: OptimizerKind, p: &OptimizerParams) -> Box<dyn StepOptimizer<B>> {
    match kind {
        OptimizerKind::Adam => {
            let mut cfg = AdamConfig::new();
            if let Some(b) = p.beta1   { cfg = cfg.with_beta_1(b); }
            if let Some(b) = p.beta2   { cfg = cfg.with_beta_2(b); }
            if let Some(e) = p.epsilon { cfg = cfg.with_epsilon(e); }
            Box::new(cfg.init::<B, SchemaNetwork<B>>())
        }
        OptimizerKind::AdamW => {
            let mut cfg = AdamWConfig::new();
            if let Some(b) = p.beta1   { cfg = cfg.with_beta_1(b); }
            if let Some(b) = p.beta2   { cfg = cfg.with_beta_2(b); }
            if let Some(e) = p.epsilon { cfg = cfg.with_epsilon(e); }
            Box::new(cfg.init::<B, SchemaNetwork<B>>())
        }
        OptimizerKind::Sgd => Box::new(SgdConfig::new().init::<B, SchemaNetwork<B>>()),
        OptimizerKind::AdaGrad => {
            let mut cfg = AdaGradConfig::new();
            if let Some(e) = p.epsilon { cfg = cfg.with_epsilon(e); }
            Box::new(cfg.init::<B, SchemaNetwork<B>>())
        }
        OptimizerKind::RmsProp => {
            let mut cfg = RmsPropConfig::new();
            if let Some(e) = p.epsilon { cfg = cfg.with_epsilon(e); }
            Box::new(cfg.init::<B, SchemaNetwork<B>>())
        }
    }
}

// ─── Session ──────────────────────────────────────────────────────────────────

/// Result of one forward pass over a batch.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub loss:    Option<f64>,
    pub decoded: Map<String, Value>,
}

pub struct TrainingSession<B: AutodiffBackend> {
    graph:         SchemaGraph,
    network:       SchemaNetwork<B>,
    optimizer:     Box<dyn StepOptimizer<B>>,
    kind:          OptimizerKind,
    learning_rate: f64,
    device:        B::Device,
}

impl<B: AutodiffBackend> TrainingSession<B> {
    /// Fresh parameters and a default Adam optimizer.
    pub fn new(graph: SchemaGraph, device: B::Device) -> Self {
        let network = graph.init::<B>(&device);
        Self {
            graph,
            network,
            optimizer: make_optimizer::<B>(OptimizerKind::Adam, &OptimizerParams::default()),
            kind: OptimizerKind::Adam,
            learning_rate: DEFAULT_LEARNING_RATE,
            device,
        }
    }

    pub fn graph(&self) -> &SchemaGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut SchemaGraph {
        &mut self.graph
    }

    pub fn network(&self) -> &SchemaNetwork<B> {
        &self.network
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Rebuild the optimizer, dropping any accumulated state.
    pub fn reset(&mut self, algorithm: &str, params: &OptimizerParams) -> Result<()> {
        self.kind          = OptimizerKind::from_name(algorithm)?;
        self.learning_rate = params.learning_rate.unwrap_or(DEFAULT_LEARNING_RATE);
        self.optimizer     = make_optimizer::<B>(self.kind, params);
        tracing::info!("Optimizer reset: {:?}, lr={}", self.kind, self.learning_rate);
        Ok(())
    }

    /// One optimizer step on a batch with targets.
    pub fn iteration(&mut self, batch: &BatchArtifact) -> Result<(f64, Map<String, Value>)> {
        let out  = self.graph.forward(&self.network, batch, &self.device)?;
        let loss = out
            .loss
            .ok_or_else(|| EngineError::unsupported("iteration on a batch without targets"))?;
        let value   = loss.clone().into_scalar().elem::<f64>();
        let decoded = self.graph.decode(&out.tensors, batch)?;

        // Backward pass + optimizer update
        let grads = GradientsParams::from_grads(loss.backward(), &self.network);
        self.network = self.optimizer.step(self.learning_rate, self.network.clone(), grads);

        tracing::debug!("Iteration on {} examples: loss={:.6}", batch.batch_size, value);
        Ok((value, decoded))
    }

    /// Forward pass on the inner backend, no parameter update.
    pub fn evaluate(&self, batch: &BatchArtifact) -> Result<StepResult> {
        let network = self.network.valid();
        let out     = self.graph.forward(&network, batch, &self.device)?;
        let loss    = match out.loss {
            Some(l) => Some(f64::from(host_values(l)?.first().copied().unwrap_or(f32::NAN))),
            None => None,
        };
        Ok(StepResult { loss, decoded: self.graph.decode(&out.tensors, batch)? })
    }

    /// Convert raw input samples and evaluate them.
    pub fn evaluate_samples(&mut self, samples: &[Value]) -> Result<StepResult> {
        let batch = self.graph.prepare_input_batch(samples)?;
        self.evaluate(&batch)
    }

    // ─── Export / import ──────────────────────────────────────────────────────

    /// Parameters plus the graph description, so `load` can rebuild.
    pub fn export_parameters(&self, dir: &Path) -> Result<()> {
        let ckpt = CheckpointManager::new(dir)?;
        ckpt.save_graph(&self.graph.description())?;
        ckpt.save_network(&self.network, "network")?;
        tracing::info!("Exported parameters to '{}'", dir.display());
        Ok(())
    }

    /// Rebuild the saved graph and load its parameters. The
    /// optimizer is rebuilt with the current algorithm.
    pub fn import_parameters(&mut self, dir: &Path) -> Result<()> {
        let restored = Self::load(dir, self.graph.words().cloned(), self.device.clone())?;
        self.graph     = restored.graph;
        self.network   = restored.network;
        self.optimizer = make_optimizer::<B>(self.kind, &OptimizerParams::default());
        Ok(())
    }

    pub fn load(dir: &Path, words: Option<Arc<WordVectors>>, device: B::Device) -> Result<Self> {
        let ckpt        = CheckpointManager::new(dir)?;
        let description = ckpt.load_graph()?;
        let graph       = SchemaGraph::from_description(description, words)
            .context("Cannot rebuild the saved graph")?;
        let mut session = Self::new(graph, device);
        session.network = ckpt.load_network(session.network.clone(), "network", &session.device)?;
        tracing::info!("Imported parameters from '{}'", dir.display());
        Ok(session)
    }
}

// ─── Epoch loop ───────────────────────────────────────────────────────────────

/// Knobs of `run_training`, a subset of the `train` command's config.
#[derive(Debug, Clone)]
pub struct EpochPlan {
    pub epochs:     usize,
    pub batch_size: usize,
}

fn prepare(session: &mut TrainingSession<impl AutodiffBackend>, examples: &[Example]) -> Result<BatchArtifact> {
    let inputs:  Vec<Value> = examples.iter().map(|e| e.input.clone()).collect();
    let outputs: Vec<Value> = examples.iter().map(|e| e.output.clone()).collect();
    Ok(session.graph_mut().prepare_batch(&inputs, Some(&outputs))?)
}

fn batches(dataset: &ExampleDataset, order: &[usize], batch_size: usize) -> Vec<Vec<Example>> {
    order
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.iter().filter_map(|&i| dataset.get(i)).collect())
        .collect()
}

pub fn run_training<B: AutodiffBackend>(
    session: &mut TrainingSession<B>,
    plan:    &EpochPlan,
    train:   &ExampleDataset,
    val:     &ExampleDataset,
    ckpt:    &CheckpointManager,
    metrics: &MetricsLogger,
) -> Result<()> {
    let mut rng       = rand::thread_rng();
    let mut order: Vec<usize> = (0..train.len()).collect();
    let val_order: Vec<usize> = (0..val.len()).collect();
    let mut best_val  = f64::INFINITY;

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in 1..=plan.epochs {
        let started = Instant::now();

        // ── Training phase ────────────────────────────────────────────────────
        order.shuffle(&mut rng);
        let mut train_loss_sum = 0.0f64;
        let mut train_batches  = 0usize;
        for examples in batches(train, &order, plan.batch_size) {
            let batch     = prepare(session, &examples)?;
            let (loss, _) = session.iteration(&batch)?;
            train_loss_sum += loss;
            train_batches  += 1;
        }
        let avg_train_loss = if train_batches > 0 { train_loss_sum / train_batches as f64 } else { f64::NAN };

        // ── Validation phase ──────────────────────────────────────────────────
        let mut val_loss_sum = 0.0f64;
        let mut val_batches  = 0usize;
        for examples in batches(val, &val_order, plan.batch_size) {
            let batch = prepare(session, &examples)?;
            if let Some(loss) = session.evaluate(&batch)?.loss {
                val_loss_sum += loss;
                val_batches  += 1;
            }
        }
        let avg_val_loss = if val_batches > 0 { val_loss_sum / val_batches as f64 } else { f64::NAN };

        let m = EpochMetrics::new(epoch, avg_train_loss, avg_val_loss, started.elapsed().as_secs_f64());
        println!(
            "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | {:.1}s",
            epoch, plan.epochs, m.train_loss, m.val_loss, m.seconds,
        );
        metrics.log(&m)?;

        ckpt.save_epoch(&session.graph().description(), session.network(), epoch)?;
        if m.is_improvement(best_val) {
            best_val = m.val_loss;
            ckpt.save_network(session.network(), "best")?;
            tracing::info!("New best validation loss {:.4} at epoch {}", best_val, epoch);
        }
    }

    tracing::info!("Training complete!");
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::EngineConfig;
    use burn::backend::{Autodiff, NdArray};
    use serde_json::json;

    type TestBackend = Autodiff<NdArray>;

    fn session() -> TrainingSession<TestBackend> {
        let graph = SchemaGraph::transform(
            json!({"type": "object", "properties": {"x": {"type": "number"}}}),
            json!({"type": "object", "properties": {"y": {"type": "number"}}}),
            EngineConfig::default(),
            None,
        )
        .unwrap();
        TrainingSession::new(graph, Default::default())
    }

    fn batch(s: &mut TrainingSession<TestBackend>) -> BatchArtifact {
        s.graph_mut()
            .prepare_batch(
                &[json!({"x": 1.0}), json!({"x": -1.0})],
                Some(&[json!({"y": 2.0}), json!({"y": -2.0})]),
            )
            .unwrap()
    }

    #[test]
    fn test_optimizer_aliases() {
        assert_eq!(OptimizerKind::from_name("AdamaxOptimizer").unwrap(), OptimizerKind::Adam);
        assert_eq!(OptimizerKind::from_name("RMSPropOptimizer").unwrap(), OptimizerKind::RmsProp);
        assert_eq!(OptimizerKind::from_name("GradientDescentOptimizer").unwrap(), OptimizerKind::Sgd);
        assert!(OptimizerKind::from_name("Lion").is_err());
    }

    #[test]
    fn test_params_accept_both_spellings() {
        let mut map = Map::new();
        map.insert("learningRate".into(), json!(0.05));
        map.insert("beta1".into(), json!(0.8));
        let p = OptimizerParams::from_map(&map).unwrap();
        assert_eq!(p.learning_rate, Some(0.05));
        assert_eq!(p.beta1, Some(0.8));
    }

    #[test]
    fn test_iterations_reduce_loss() {
        let mut s = session();
        s.reset("Adam", &OptimizerParams { learning_rate: Some(0.01), ..Default::default() }).unwrap();
        let b = batch(&mut s);
        let (first, decoded) = s.iteration(&b).unwrap();
        assert_eq!(decoded["objects"].as_array().unwrap().len(), 2);
        let mut last = first;
        for _ in 0..30 {
            last = s.iteration(&b).unwrap().0;
        }
        assert!(last < first, "loss went from {first} to {last}");
    }

    #[test]
    fn test_iteration_requires_targets() {
        let mut s = session();
        let b = s.graph_mut().prepare_input_batch(&[json!({"x": 1.0})]).unwrap();
        assert!(s.iteration(&b).is_err());
        assert!(s.evaluate(&b).unwrap().loss.is_none());
    }

    #[test]
    fn test_export_then_load_gives_same_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session();
        let b = batch(&mut s);
        s.iteration(&b).unwrap();
        s.export_parameters(dir.path()).unwrap();

        let restored = TrainingSession::<TestBackend>::load(dir.path(), None, Default::default()).unwrap();
        assert_eq!(
            s.evaluate(&b).unwrap().decoded,
            restored.evaluate(&b).unwrap().decoded
        );
    }
}

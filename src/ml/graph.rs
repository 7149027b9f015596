// ============================================================
// Layer 5 — Schema Graph (composition root)
// ============================================================
// Wires two component trees and a loss into one trainable
// graph. Two architectures:
//
//   transform : input tree ──encode──► output tree ──► criterion
//               loss = mean of every criterion term
//
//   matching  : primary tree   ──encode─► summary ─► layers ─┐
//               secondary tree ──encode─► summary ─► layers ─┴► contrastive
//               valence -1 (different) / 1 (same), L1 distance,
//               margin from the engine config
//
// Building a graph = build both trees + plan every layer. The
// plan is the only thing `SchemaNetwork::init` needs, and the
// `GraphDescription` is everything needed to rebuild the same
// plan in a fresh process.

use std::{collections::BTreeMap, sync::Arc};

use burn::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::data::artifact::{BatchArtifact, NumericArray};
use crate::domain::{
    config::EngineConfig,
    error::{EngineError, Result, SchemaError},
    schema::{LayerSpec, SchemaNode},
};
use crate::infra::word_vectors::WordVectors;
use crate::ml::{
    components::{build, BuildContext, Component, Feed, NameRegistry, Placeholder},
    network::{plan_network, NetworkContext, PlannedNetwork, TemplateVars},
    params::{NetworkPlan, SchemaNetwork},
    summary::{summarize, summary_shape},
    tensor::{download, host_values, ShapeMap, ShapedTensor, TensorMap},
};

/// Artifact array holding the matching valences.
pub const VALENCES: &str = "valences";
/// Artifact labels holding primary example ids.
pub const PRIMARY_IDS: &str = "primaryIds";
/// Artifact labels holding secondary example ids.
pub const SECONDARY_IDS: &str = "secondaryIds";

// ─── Description ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "architecture", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Architecture {
    Transform {
        input_schema:  Value,
        output_schema: Value,
    },
    Matching {
        primary_schema:   Value,
        secondary_schema: Value,
        primary_layers:   Vec<LayerSpec>,
        secondary_layers: Vec<LayerSpec>,
    },
}

/// Everything needed to rebuild a graph: saved as `graph.json`
/// next to the parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDescription {
    #[serde(flatten)]
    pub architecture: Architecture,
    #[serde(default)]
    pub config:       EngineConfig,
    /// Embedding slot tables of word variables, by machine name.
    #[serde(default)]
    pub oov_tables:   BTreeMap<String, Vec<String>>,
}

// ─── Graph ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Trees {
    Transform {
        input:  Component,
        output: Component,
    },
    Matching {
        primary:        Component,
        secondary:      Component,
        primary_head:   PlannedNetwork,
        secondary_head: PlannedNetwork,
    },
}

/// Forward pass result. `loss` is present only when the batch
/// carried every target.
pub struct GraphOutput<B: Backend> {
    pub loss:    Option<Tensor<B, 1>>,
    pub tensors: TensorMap<B>,
}

#[derive(Debug, Clone)]
pub struct SchemaGraph {
    architecture: Architecture,
    config:       EngineConfig,
    words:        Option<Arc<WordVectors>>,
    plan:         NetworkPlan,
    trees:        Trees,
}

fn build_tree(
    schema:   &Value,
    root:     &str,
    config:   &EngineConfig,
    words:    Option<&Arc<WordVectors>>,
    registry: &mut NameRegistry,
) -> Result<Component> {
    let node    = SchemaNode::from_value(schema)?;
    let mut ctx = BuildContext::new(root, config, words, registry);
    build(&node, &mut ctx)
}

impl SchemaGraph {
    pub fn transform(
        input_schema:  Value,
        output_schema: Value,
        config:        EngineConfig,
        words:         Option<Arc<WordVectors>>,
    ) -> Result<Self> {
        Self::build(Architecture::Transform { input_schema, output_schema }, config, words)
    }

    pub fn matching(
        primary_schema:   Value,
        secondary_schema: Value,
        primary_layers:   Vec<LayerSpec>,
        secondary_layers: Vec<LayerSpec>,
        config:           EngineConfig,
        words:            Option<Arc<WordVectors>>,
    ) -> Result<Self> {
        Self::build(
            Architecture::Matching { primary_schema, secondary_schema, primary_layers, secondary_layers },
            config,
            words,
        )
    }

    /// Rebuild a saved graph, slot tables included.
    pub fn from_description(description: GraphDescription, words: Option<Arc<WordVectors>>) -> Result<Self> {
        let mut graph = Self::build(description.architecture, description.config, words)?;
        for tree in graph.trees_mut() {
            tree.restore_oov_tables(&description.oov_tables);
        }
        Ok(graph)
    }

    fn build(architecture: Architecture, config: EngineConfig, words: Option<Arc<WordVectors>>) -> Result<Self> {
        let mut registry = NameRegistry::default();
        let mut plan     = NetworkPlan::default();

        let trees = match &architecture {
            Architecture::Transform { input_schema, output_schema } => {
                let mut input  = build_tree(input_schema, "input", &config, words.as_ref(), &mut registry)?;
                let mut output = build_tree(output_schema, "output", &config, words.as_ref(), &mut registry)?;
                let encoded = input.plan_input(&mut plan)?;
                output.plan_output(&mut plan, &encoded)?;
                Trees::Transform { input, output }
            }
            Architecture::Matching { primary_schema, secondary_schema, primary_layers, secondary_layers } => {
                let mut primary   = build_tree(primary_schema, "primary", &config, words.as_ref(), &mut registry)?;
                let mut secondary = build_tree(secondary_schema, "secondary", &config, words.as_ref(), &mut registry)?;
                let primary_head   = plan_matching_head(&mut primary, primary_layers, &config, &mut plan)?;
                let secondary_head = plan_matching_head(&mut secondary, secondary_layers, &config, &mut plan)?;
                if primary_head.output_width != secondary_head.output_width {
                    return Err(EngineError::mismatch(
                        format!("secondary output width {}", primary_head.output_width),
                        secondary_head.output_width,
                    ));
                }
                Trees::Matching { primary, secondary, primary_head, secondary_head }
            }
        };

        tracing::info!(
            "Planned {} graph with {} layers",
            match trees { Trees::Transform { .. } => "transform", Trees::Matching { .. } => "matching" },
            plan.layer_count()
        );
        Ok(Self { architecture, config, words, plan, trees })
    }

    fn trees_mut(&mut self) -> [&mut Component; 2] {
        match &mut self.trees {
            Trees::Transform { input, output } => [input, output],
            Trees::Matching { primary, secondary, .. } => [primary, secondary],
        }
    }

    fn trees(&self) -> [&Component; 2] {
        match &self.trees {
            Trees::Transform { input, output } => [input, output],
            Trees::Matching { primary, secondary, .. } => [primary, secondary],
        }
    }

    pub fn plan(&self) -> &NetworkPlan {
        &self.plan
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn words(&self) -> Option<&Arc<WordVectors>> {
        self.words.as_ref()
    }

    pub fn is_matching(&self) -> bool {
        matches!(self.trees, Trees::Matching { .. })
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> SchemaNetwork<B> {
        self.plan.init(device)
    }

    pub fn description(&self) -> GraphDescription {
        GraphDescription {
            architecture: self.architecture.clone(),
            config:       self.config.clone(),
            oov_tables:   self.trees().iter().flat_map(|t| t.oov_tables()).collect(),
        }
    }

    // ─── Batch preparation ───────────────────────────────────────────────────

    fn transform_trees(&mut self) -> Result<(&mut Component, &mut Component)> {
        match &mut self.trees {
            Trees::Transform { input, output } => Ok((input, output)),
            Trees::Matching { .. } => Err(EngineError::unsupported("matching graphs take primary and secondary samples")),
        }
    }

    /// Input-side arrays only.
    pub fn prepare_input_batch(&mut self, samples: &[Value]) -> Result<BatchArtifact> {
        let (input, _) = self.transform_trees()?;
        input.convert_input_in(samples)
    }

    /// Target arrays only.
    pub fn prepare_output_batch(&mut self, samples: &[Value]) -> Result<BatchArtifact> {
        let (_, output) = self.transform_trees()?;
        output.convert_output_in(samples)
    }

    /// Inputs plus, when given, targets in one artifact.
    pub fn prepare_batch(&mut self, samples: &[Value], outputs: Option<&[Value]>) -> Result<BatchArtifact> {
        if let Some(outputs) = outputs {
            if outputs.len() != samples.len() {
                return Err(EngineError::mismatch(format!("{} outputs", samples.len()), outputs.len()));
            }
        }
        let (input, output) = self.transform_trees()?;
        let mut batch = input.convert_input_in(samples)?;
        if let Some(outputs) = outputs {
            batch.merge(output.convert_output_in(outputs)?);
        }
        tracing::debug!("Prepared batch of {} with {} arrays", batch.batch_size, batch.arrays.len());
        Ok(batch)
    }

    pub fn prepare_matching_batch(
        &mut self,
        primary_samples:   &[Value],
        secondary_samples: &[Value],
        primary_ids:       Vec<String>,
        secondary_ids:     Vec<String>,
        valences:          Vec<f32>,
    ) -> Result<BatchArtifact> {
        let Trees::Matching { primary, secondary, .. } = &mut self.trees else {
            return Err(EngineError::unsupported("transform graphs take samples and outputs"));
        };
        let batch_size = primary_samples.len();
        for (what, n) in [
            ("secondary samples", secondary_samples.len()),
            ("primary ids", primary_ids.len()),
            ("secondary ids", secondary_ids.len()),
            ("valences", valences.len()),
        ] {
            if n != batch_size {
                return Err(EngineError::mismatch(format!("{batch_size} {what}"), n));
            }
        }

        let mut batch = primary.convert_input_in(primary_samples)?;
        batch.merge(secondary.convert_input_in(secondary_samples)?);
        batch.insert(VALENCES, NumericArray::vector(valences, 0.0));
        batch.set_labels(PRIMARY_IDS, primary_ids);
        batch.set_labels(SECONDARY_IDS, secondary_ids);
        Ok(batch)
    }

    // ─── Forward ──────────────────────────────────────────────────────────────

    pub fn forward<B: Backend>(
        &self,
        net:    &SchemaNetwork<B>,
        batch:  &BatchArtifact,
        device: &B::Device,
    ) -> Result<GraphOutput<B>> {
        let feed = Feed::new(batch, device);
        match &self.trees {
            Trees::Transform { input, output } => {
                check_all(&input.input_placeholders(0), batch)?;
                let encoded = input.input_stack(net, &feed)?;
                let tensors = output.output_stack(net, &encoded)?;

                let targets = output.output_placeholders(0);
                let loss = if targets.iter().all(|p| batch.contains(&p.name)) {
                    check_all(&targets, batch)?;
                    let terms = output.criterion_stack(&tensors, batch)?;
                    (!terms.is_empty()).then(|| Tensor::cat(terms, 0).mean())
                } else {
                    None
                };
                Ok(GraphOutput { loss, tensors })
            }
            Trees::Matching { primary, secondary, primary_head, secondary_head } => {
                let p = encode_for_matching(primary, primary_head, net, &feed)?;
                let s = encode_for_matching(secondary, secondary_head, net, &feed)?;
                let loss = match batch.get(VALENCES) {
                    Ok(valences) => Some(contrastive_loss(
                        p.tensor.clone(),
                        s.tensor.clone(),
                        valences,
                        self.config.matching_margin,
                    )?),
                    Err(_) => None,
                };
                let tensors = TensorMap::from([("primary".to_string(), p), ("secondary".to_string(), s)]);
                Ok(GraphOutput { loss, tensors })
            }
        }
    }

    // ─── Decode ───────────────────────────────────────────────────────────────

    /// Response fields for a forward pass: `objects` for transform
    /// graphs, `primary` / `secondary` id → vector maps for matching.
    pub fn decode<B: Backend>(&self, tensors: &TensorMap<B>, batch: &BatchArtifact) -> Result<Map<String, Value>> {
        let mut fields = Map::new();
        match &self.trees {
            Trees::Transform { output, .. } => {
                let host    = download(tensors, batch.batch_size)?;
                let objects = output.convert_output_out(&host, batch.batch_size)?;
                fields.insert("objects".to_string(), Value::Array(objects));
            }
            Trees::Matching { .. } => {
                for (key, ids) in [("primary", PRIMARY_IDS), ("secondary", SECONDARY_IDS)] {
                    let t = tensors
                        .get(key)
                        .ok_or_else(|| SchemaError::MissingArray { name: key.to_string() })?;
                    fields.insert(key.to_string(), Value::Object(vectors_by_id(t, batch.labels(ids))?));
                }
            }
        }
        Ok(fields)
    }
}

fn check_all(placeholders: &[Placeholder], batch: &BatchArtifact) -> Result<()> {
    placeholders.iter().try_for_each(|p| p.check(batch))
}

fn plan_matching_head(
    tree:   &mut Component,
    layers: &[LayerSpec],
    config: &EngineConfig,
    plan:   &mut NetworkPlan,
) -> Result<PlannedNetwork> {
    let encoded: ShapeMap = tree.plan_input(plan)?;
    let refs: Vec<_> = encoded.values().collect();
    let summary = summary_shape(&refs, 0)?;
    plan_network(
        layers,
        summary.data_width(),
        NetworkContext::FeedForward,
        &TemplateVars::new().with("outputSize", config.matching_output_size),
        config.unknown_layer_policy,
        plan,
    )
}

fn encode_for_matching<B: Backend>(
    tree: &Component,
    head: &PlannedNetwork,
    net:  &SchemaNetwork<B>,
    feed: &Feed<'_, B>,
) -> Result<ShapedTensor<B>> {
    check_all(&tree.input_placeholders(0), feed.batch)?;
    let encoded = tree.input_stack(net, feed)?;
    let inputs: Vec<&ShapedTensor<B>> = encoded.values().collect();
    let summary = summarize(&inputs, 0)?;
    let rows    = head.forward_rows(net, summary.tensor)?;
    let width   = rows.dims()[1];
    Ok(ShapedTensor::new(rows, summary.extents, summary.shape.with_data_width(width)))
}

/// L1 contrastive loss. Valences are -1 (different) / 1 (same);
/// the label is 1 for different pairs and 0 for same ones.
pub fn contrastive_loss<B: Backend>(
    primary:   Tensor<B, 2>,
    secondary: Tensor<B, 2>,
    valences:  &NumericArray,
    margin:    f32,
) -> Result<Tensor<B, 1>> {
    let rows = primary.dims()[0];
    if valences.data.len() != rows {
        return Err(EngineError::mismatch(format!("{rows} valences"), valences.data.len()));
    }
    let label: Vec<f32> = valences.data.iter().map(|v| (1.0 - v) / 2.0).collect();
    let label    = crate::ml::tensor::column::<B>(label, &primary.device());
    let distance = (primary - secondary).abs().sum_dim(1);
    let different = label.clone() * (distance.clone().neg() + margin).clamp_min(0.0);
    let same      = (label.neg() + 1.0) * distance;
    Ok((different + same).mean())
}

fn vectors_by_id<B: Backend>(t: &ShapedTensor<B>, ids: &[String]) -> Result<Map<String, Value>> {
    let values = host_values(t.tensor.clone())?;
    let width  = t.width().max(1);
    Ok(values
        .chunks(width)
        .enumerate()
        .map(|(i, row)| {
            let id = ids.get(i).cloned().unwrap_or_else(|| i.to_string());
            (id, Value::from(row.iter().map(|&x| f64::from(x)).collect::<Vec<_>>()))
        })
        .collect())
}

// ============================================================
// Layer 5 — Schema Components
// ============================================================
// One component per schema variable, built top-down from the
// schema tree:
//
//   object   → Object   (one child per property)
//   array    → Sequence (one child for the items)
//   number   → Number
//   enum     → Classification (labels)
//   boolean  → Classification (false, true)
//   string   → Word (needs a word vector store)
//   binary   → no component
//
// Every component goes through the same lifecycle:
//
//   convert_*_in    JSON values   → BatchArtifact   (host)
//   plan_input      shapes        → NetworkPlan slots
//   plan_output     upstream      → NetworkPlan slots
//   input_stack     artifact      → encoder TensorMap
//   output_stack    encoder map   → decoder TensorMap
//   criterion_stack decoder map   → loss terms
//   convert_output_out decoded    → JSON values     (host)
//
// Encoder tensors are keyed by machine path so the output tree
// can find the input tensor of the same variable. Artifact
// arrays, decoder tensors and targets are keyed by machine name.

pub mod classification;
pub mod generator;
pub mod head;
pub mod number;
pub mod object;
pub mod sequence;
pub mod word;

use std::{collections::BTreeSet, sync::Arc};

use burn::prelude::*;
use serde_json::Value;

use crate::data::artifact::BatchArtifact;
use crate::domain::{
    config::EngineConfig,
    error::{EngineError, Result, SchemaError},
    schema::{SchemaKind, SchemaNode},
    shape::ShapeDescriptor,
};
use crate::infra::word_vectors::WordVectors;
use crate::ml::{
    params::{NetworkPlan, SchemaNetwork},
    tensor::{ShapeMap, ShapedTensor, TensorMap},
};

use classification::ClassificationComponent;
use number::NumberComponent;
use object::ObjectComponent;
use sequence::SequenceComponent;
use word::WordComponent;

/// Suffix of the per-example length array of a sequence.
pub const LENGTH_SUFFIX: &str = "__length__";
/// Suffix of the per-step existence flags of a sequence.
pub const EXISTS_SUFFIX: &str = "__exists__";
/// Suffix of the embedding slot indices of a word variable.
pub const OOV_SUFFIX: &str = "__oov__";
/// Suffix of the step vector a generated sequence hands its child.
pub const STEP_SUFFIX: &str = "__step__";

/// `root` joined with `path`, or just `root` for the tree's root variable.
pub fn machine_name(root: &str, path: &str) -> String {
    if path.is_empty() {
        root.to_string()
    } else {
        format!("{root}_{path}")
    }
}

// ─── Placeholders ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderKind {
    Value,
    ClassIndex,
    WordVector,
    OovSlot,
    Length,
    Exists,
}

/// One external array slot: the artifact array `name` must have
/// rank `rank` and `width` values per row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub name:  String,
    pub rank:  usize,
    pub width: usize,
    pub kind:  PlaceholderKind,
}

impl Placeholder {
    pub fn new(name: impl Into<String>, rank: usize, width: usize, kind: PlaceholderKind) -> Self {
        Self { name: name.into(), rank, width, kind }
    }

    /// Fails when the artifact lacks this array or its rank differs.
    pub fn check(&self, batch: &BatchArtifact) -> Result<()> {
        let array = batch.get(&self.name)?;
        if array.rank() != self.rank {
            return Err(crate::domain::error::ShapeError::Rank {
                name:     self.name.clone(),
                expected: self.rank,
                got:      array.rank(),
            }
            .into());
        }
        Ok(())
    }
}

// ─── Name registry ────────────────────────────────────────────────────────────

/// Every machine name claimed while building one graph.
#[derive(Debug, Default)]
pub struct NameRegistry {
    names: BTreeSet<String>,
}

impl NameRegistry {
    pub fn claim(&mut self, name: &str) -> Result<String> {
        if !self.names.insert(name.to_string()) {
            return Err(SchemaError::NameCollision { name: name.to_string() }.into());
        }
        Ok(name.to_string())
    }
}

// ─── Build context ────────────────────────────────────────────────────────────

pub struct BuildContext<'a> {
    /// Tree root name: `input`, `output`, `primary` or `secondary`.
    pub root:     &'a str,
    /// Number of enclosing sequences.
    pub depth:    usize,
    pub config:   &'a EngineConfig,
    pub words:    Option<&'a Arc<WordVectors>>,
    pub registry: &'a mut NameRegistry,
}

impl<'a> BuildContext<'a> {
    pub fn new(
        root:     &'a str,
        config:   &'a EngineConfig,
        words:    Option<&'a Arc<WordVectors>>,
        registry: &'a mut NameRegistry,
    ) -> Self {
        Self { root, depth: 0, config, words, registry }
    }

    /// Context for the items of a sequence.
    pub fn deeper(&mut self) -> BuildContext<'_> {
        BuildContext {
            root:     self.root,
            depth:    self.depth + 1,
            config:   self.config,
            words:    self.words,
            registry: &mut *self.registry,
        }
    }

    pub fn name_for(&self, node: &SchemaNode) -> String {
        machine_name(self.root, &node.machine_path())
    }
}

// ─── Feed ─────────────────────────────────────────────────────────────────────

/// A batch artifact bound to the device its tensors are uploaded to.
pub struct Feed<'a, B: Backend> {
    pub batch:  &'a BatchArtifact,
    pub device: B::Device,
}

impl<'a, B: Backend> Feed<'a, B> {
    pub fn new(batch: &'a BatchArtifact, device: &B::Device) -> Self {
        Self { batch, device: device.clone() }
    }

    pub fn upload(&self, name: &str, shape: ShapeDescriptor) -> Result<ShapedTensor<B>> {
        ShapedTensor::from_array(self.batch.get(name)?, shape, &self.device)
    }
}

// ─── Component ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Component {
    Number(NumberComponent),
    Classification(ClassificationComponent),
    Word(WordComponent),
    Object(ObjectComponent),
    Sequence(SequenceComponent),
}

macro_rules! dispatch {
    ($self:expr, $c:ident => $body:expr) => {
        match $self {
            Component::Number($c)         => $body,
            Component::Classification($c) => $body,
            Component::Word($c)           => $body,
            Component::Object($c)         => $body,
            Component::Sequence($c)       => $body,
        }
    };
}

/// Build the component tree for `node`.
pub fn build(node: &SchemaNode, ctx: &mut BuildContext<'_>) -> Result<Component> {
    let component = match node.kind() {
        SchemaKind::Object  => Component::Object(ObjectComponent::new(node, ctx)?),
        SchemaKind::Array   => Component::Sequence(SequenceComponent::new(node, ctx)?),
        SchemaKind::Number  => Component::Number(NumberComponent::new(node, ctx)?),
        SchemaKind::Enum    => Component::Classification(ClassificationComponent::new(node, ctx)?),
        SchemaKind::Boolean => Component::Classification(ClassificationComponent::boolean(node, ctx)?),
        SchemaKind::String  => match ctx.words.cloned() {
            Some(words) => Component::Word(WordComponent::new(node, ctx, words)?),
            None => {
                return Err(EngineError::unsupported(format!(
                    "string variable '{}' needs word vectors",
                    node.variable_path()
                )))
            }
        },
        SchemaKind::Binary => {
            return Err(SchemaError::UnsupportedKind {
                path: node.variable_path().to_string(),
                kind: SchemaKind::Binary.as_str().to_string(),
            }
            .into())
        }
    };
    tracing::debug!(
        "Built {} component for '{}' at depth {}",
        node.kind().as_str(),
        node.variable_path(),
        ctx.depth
    );
    Ok(component)
}

impl Component {
    /// Machine name of this variable.
    pub fn name(&self) -> &str {
        dispatch!(self, c => &c.name)
    }

    /// Machine path of this variable.
    pub fn path(&self) -> &str {
        dispatch!(self, c => &c.path)
    }

    pub fn input_placeholders(&self, extra: usize) -> Vec<Placeholder> {
        dispatch!(self, c => c.input_placeholders(extra))
    }

    pub fn output_placeholders(&self, extra: usize) -> Vec<Placeholder> {
        dispatch!(self, c => c.output_placeholders(extra))
    }

    pub fn convert_input_in(&mut self, values: &[Value]) -> Result<BatchArtifact> {
        dispatch!(self, c => c.convert_input_in(values))
    }

    pub fn convert_output_in(&mut self, values: &[Value]) -> Result<BatchArtifact> {
        dispatch!(self, c => c.convert_output_in(values))
    }

    pub fn plan_input(&mut self, plan: &mut NetworkPlan) -> Result<ShapeMap> {
        dispatch!(self, c => c.plan_input(plan))
    }

    pub fn plan_output(&mut self, plan: &mut NetworkPlan, upstream: &ShapeMap) -> Result<ShapeMap> {
        dispatch!(self, c => c.plan_output(plan, upstream))
    }

    pub fn input_stack<B: Backend>(&self, net: &SchemaNetwork<B>, feed: &Feed<'_, B>) -> Result<TensorMap<B>> {
        dispatch!(self, c => c.input_stack(net, feed))
    }

    pub fn output_stack<B: Backend>(&self, net: &SchemaNetwork<B>, upstream: &TensorMap<B>) -> Result<TensorMap<B>> {
        dispatch!(self, c => c.output_stack(net, upstream))
    }

    pub fn criterion_stack<B: Backend>(
        &self,
        outputs: &TensorMap<B>,
        targets: &BatchArtifact,
    ) -> Result<Vec<Tensor<B, 1>>> {
        dispatch!(self, c => c.criterion_stack(outputs, targets))
    }

    pub fn convert_output_out(&self, decoded: &BatchArtifact, batch: usize) -> Result<Vec<Value>> {
        dispatch!(self, c => c.convert_output_out(decoded, batch))
    }

    /// Every array or output name this subtree can produce.
    pub fn array_names(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .input_placeholders(0)
            .into_iter()
            .chain(self.output_placeholders(0))
            .map(|p| p.name)
            .collect();
        names.into_iter().collect()
    }

    /// Machine paths of every sequence in this subtree, outermost first.
    pub fn sequence_paths(&self) -> Vec<String> {
        match self {
            Component::Sequence(s) => {
                let mut paths = vec![s.path.clone()];
                paths.extend(s.child.sequence_paths());
                paths
            }
            Component::Object(o) => o.children.iter().flat_map(|(_, c)| c.sequence_paths()).collect(),
            _ => Vec::new(),
        }
    }

    /// Embedding slot tables of every word variable, by machine name.
    pub fn oov_tables(&self) -> Vec<(String, Vec<String>)> {
        match self {
            Component::Word(w)     => vec![(w.name.clone(), w.oov_words().to_vec())],
            Component::Object(o)   => o.children.iter().flat_map(|(_, c)| c.oov_tables()).collect(),
            Component::Sequence(s) => s.child.oov_tables(),
            _ => Vec::new(),
        }
    }

    /// Restore tables saved by `oov_tables`.
    pub fn restore_oov_tables(&mut self, tables: &std::collections::BTreeMap<String, Vec<String>>) {
        match self {
            Component::Word(w) => {
                if let Some(words) = tables.get(&w.name) {
                    w.restore_oov(words.clone());
                }
            }
            Component::Object(o) => o.children.iter_mut().for_each(|(_, c)| c.restore_oov_tables(tables)),
            Component::Sequence(s) => s.child.restore_oov_tables(tables),
            _ => {}
        }
    }
}

/// Merge `from` into `into`, failing on a repeated key.
pub(crate) fn merge_unique<T>(into: &mut std::collections::BTreeMap<String, T>, from: std::collections::BTreeMap<String, T>) -> Result<()> {
    for (key, value) in from {
        if into.contains_key(&key) {
            return Err(SchemaError::NameCollision { name: key }.into());
        }
        into.insert(key, value);
    }
    Ok(())
}

/// Turn target arrays into what a perfect network would decode:
/// one-hot rows for class indices, a width axis for everything else.
#[cfg(test)]
pub(crate) fn ideal_decoding(component: &Component, targets: &BatchArtifact) -> BatchArtifact {
    let mut decoded = BatchArtifact::new(targets.batch_size);
    for p in component.output_placeholders(0) {
        let Ok(array) = targets.get(&p.name) else { continue };
        let array = match p.kind {
            PlaceholderKind::ClassIndex => classification::one_hot(array, p.width),
            _ => {
                let mut a = array.clone();
                a.shape.push(1);
                a
            }
        };
        decoded.insert(p.name.clone(), array);
    }
    decoded
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::artifact::NumericArray;
    use serde_json::json;

    fn build_tree(schema: Value, root: &str) -> Result<Component> {
        let node = SchemaNode::from_value(&schema).unwrap();
        let config = EngineConfig::default();
        let mut registry = NameRegistry::default();
        let mut ctx = BuildContext::new(root, &config, None, &mut registry);
        build(&node, &mut ctx)
    }

    #[test]
    fn test_factory_maps_kinds() {
        let c = build_tree(json!({
            "type": "object",
            "properties": {
                "flag":  {"type": "boolean"},
                "tags":  {"type": "array", "items": {"type": "number"}},
                "label": {"type": "string", "enum": ["x", "y"]}
            }
        }), "input")
        .unwrap();
        let Component::Object(o) = &c else { panic!("expected object") };
        assert!(matches!(o.children[0].1, Component::Classification(_)));
        assert!(matches!(o.children[1].1, Component::Sequence(_)));
        assert_eq!(c.sequence_paths(), vec!["tags".to_string()]);
        assert_eq!(o.children[1].1.name(), "input_tags");
    }

    #[test]
    fn test_string_without_word_vectors_is_unsupported() {
        let err = build_tree(json!({"type": "string"}), "input").unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_binary_is_rejected() {
        let err = build_tree(json!({"type": "binary"}), "input").unwrap_err();
        assert!(matches!(err, EngineError::Schema(SchemaError::UnsupportedKind { .. })));
    }

    #[test]
    fn test_colliding_machine_names_are_rejected() {
        // "a-b" and "ab" flatten to the same machine path
        let err = build_tree(json!({
            "type": "object",
            "properties": {"a-b": {"type": "number"}, "ab": {"type": "number"}}
        }), "input")
        .unwrap_err();
        assert!(matches!(err, EngineError::Schema(SchemaError::NameCollision { .. })));
    }

    #[test]
    fn test_placeholder_check() {
        let p = Placeholder::new("input_x", 1, 1, PlaceholderKind::Value);
        let mut batch = BatchArtifact::new(2);
        assert!(matches!(p.check(&batch), Err(EngineError::Schema(SchemaError::MissingArray { .. }))));
        batch.insert("input_x", NumericArray::new(vec![2, 1], vec![0.0, 1.0], 0.0));
        assert!(matches!(p.check(&batch), Err(EngineError::Shape(_))));
        batch.insert("input_x", NumericArray::vector(vec![0.0, 1.0], 0.0));
        assert!(p.check(&batch).is_ok());
    }

    #[test]
    fn test_machine_name() {
        assert_eq!(machine_name("output", "tags_array_"), "output_tags_array_");
        assert_eq!(machine_name("input", ""), "input");
    }
}

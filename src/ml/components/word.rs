// ============================================================
// Layer 5 — Word Component
// ============================================================
// One word-valued string variable.
//
//   known word    → its pretrained vector, embedding slot 0
//   unknown word  → zero vector + a trainable embedding slot
//                   (slots 1..=cap, assigned in order of first
//                   sight; words past the cap share slot 0)
//   missing       → zero vector, slot 0
//
// Slot 0 is masked out, so it never contributes. The slot table
// grows during conversion and is saved with the graph so a
// restored graph maps the same words to the same slots.
//
// Outputs are vectors of the store's width, trained with MSE
// and decoded to the nearest stored word.

use std::{collections::HashMap, sync::Arc};

use burn::{prelude::*, tensor::TensorData};
use serde_json::Value;

use super::{
    head::{mean_squared_error, output, target_like, OutputHead},
    BuildContext, Feed, Placeholder, PlaceholderKind, OOV_SUFFIX,
};
use crate::data::artifact::{BatchArtifact, NumericArray};
use crate::domain::{
    config::UnknownLayerPolicy,
    error::{EngineError, Result},
    schema::SchemaNode,
    shape::ShapeDescriptor,
    traits::WordVectorStore,
};
use crate::infra::word_vectors::WordVectors;
use crate::ml::{
    params::{NetworkPlan, SchemaNetwork},
    tensor::{column, ShapeMap, ShapedTensor, TensorMap},
};

#[derive(Debug, Clone)]
pub struct WordComponent {
    pub name:   String,
    pub path:   String,
    oov_name:   String,
    depth:      usize,
    policy:     UnknownLayerPolicy,
    words:      Arc<WordVectors>,
    cap:        usize,
    oov:        Vec<String>,
    oov_index:  HashMap<String, usize>,
    embedding:  Option<usize>,
    head:       OutputHead,
}

impl WordComponent {
    pub fn new(node: &SchemaNode, ctx: &mut BuildContext<'_>, words: Arc<WordVectors>) -> Result<Self> {
        let name     = ctx.name_for(node);
        let oov_name = format!("{name}{OOV_SUFFIX}");
        ctx.registry.claim(&name)?;
        ctx.registry.claim(&oov_name)?;
        let cap = node
            .component()
            .max_embedding_table_size
            .unwrap_or(ctx.config.max_embedding_table_size);
        let dimension = words.dimension();
        Ok(Self {
            name,
            path: node.machine_path(),
            oov_name,
            depth: ctx.depth,
            policy: ctx.config.unknown_layer_policy,
            words,
            cap,
            oov: Vec::new(),
            oov_index: HashMap::new(),
            embedding: None,
            head: OutputHead::new(node, dimension),
        })
    }

    pub fn dimension(&self) -> usize {
        self.words.dimension()
    }

    /// Out-of-vocabulary words in slot order (slot = position + 1).
    pub fn oov_words(&self) -> &[String] {
        &self.oov
    }

    pub fn restore_oov(&mut self, words: Vec<String>) {
        self.oov_index = words.iter().enumerate().map(|(i, w)| (w.clone(), i + 1)).collect();
        self.oov = words;
    }

    fn slot_for(&mut self, word: &str) -> usize {
        if let Some(&slot) = self.oov_index.get(word) {
            return slot;
        }
        if self.oov.len() >= self.cap {
            tracing::debug!("Embedding table of '{}' is full, '{}' gets no slot", self.name, word);
            return 0;
        }
        self.oov.push(word.to_string());
        let slot = self.oov.len();
        self.oov_index.insert(word.to_string(), slot);
        slot
    }

    fn vectors(&self, values: &[Value]) -> Vec<f32> {
        let dim = self.dimension();
        values
            .iter()
            .flat_map(|v| {
                v.as_str()
                    .and_then(|w| self.words.lookup(w))
                    .map_or_else(|| vec![0.0; dim], <[f32]>::to_vec)
            })
            .collect()
    }

    pub fn input_placeholders(&self, extra: usize) -> Vec<Placeholder> {
        vec![
            Placeholder::new(&self.name, extra + 2, self.dimension(), PlaceholderKind::WordVector),
            Placeholder::new(&self.oov_name, extra + 1, 1, PlaceholderKind::OovSlot),
        ]
    }

    pub fn output_placeholders(&self, extra: usize) -> Vec<Placeholder> {
        vec![Placeholder::new(&self.name, extra + 2, self.dimension(), PlaceholderKind::WordVector)]
    }

    pub fn convert_input_in(&mut self, values: &[Value]) -> Result<BatchArtifact> {
        let vectors = self.vectors(values);
        let mut slots = Vec::with_capacity(values.len());
        for v in values {
            let slot = match v.as_str() {
                Some(w) if !w.is_empty() && self.words.lookup(w).is_none() => self.slot_for(w),
                _ => 0,
            };
            slots.push(slot as f32);
        }
        let mut out = BatchArtifact::new(values.len());
        out.insert(self.name.clone(), NumericArray::new(vec![values.len(), self.dimension()], vectors, 0.0));
        out.insert(self.oov_name.clone(), NumericArray::vector(slots, 0.0));
        Ok(out)
    }

    pub fn convert_output_in(&mut self, values: &[Value]) -> Result<BatchArtifact> {
        let mut out = BatchArtifact::new(values.len());
        out.insert(
            self.name.clone(),
            NumericArray::new(vec![values.len(), self.dimension()], self.vectors(values), 0.0),
        );
        Ok(out)
    }

    pub fn plan_input(&mut self, plan: &mut NetworkPlan) -> Result<ShapeMap> {
        self.embedding = Some(plan.add_embedding(self.cap + 1, self.dimension()));
        Ok(ShapeMap::from([(self.path.clone(), ShapeDescriptor::nested(self.depth, self.dimension()))]))
    }

    pub fn plan_output(&mut self, plan: &mut NetworkPlan, upstream: &ShapeMap) -> Result<ShapeMap> {
        let shape = self.head.plan(plan, upstream, self.policy)?;
        Ok(ShapeMap::from([(self.name.clone(), shape)]))
    }

    pub fn input_stack<B: Backend>(&self, net: &SchemaNetwork<B>, feed: &Feed<'_, B>) -> Result<TensorMap<B>> {
        let slot = self
            .embedding
            .ok_or_else(|| EngineError::unsupported("word input used before planning"))?;
        let vectors = feed.upload(&self.name, ShapeDescriptor::nested(self.depth, self.dimension()))?;
        let slots   = &feed.batch.get(&self.oov_name)?.data;
        let rows    = vectors.rows();
        if slots.len() != rows {
            return Err(EngineError::mismatch(format!("{rows} embedding slots"), slots.len()));
        }

        let index    = Tensor::<B, 2>::from_data(TensorData::new(slots.clone(), [rows, 1]), &feed.device).int();
        let embedded = net.embeddings[slot].forward(index).reshape([rows, self.dimension()]);
        let mask     = column::<B>(slots.iter().map(|&s| if s > 0.0 { 1.0 } else { 0.0 }).collect(), &feed.device);
        let learned  = ShapedTensor::new(embedded, vectors.extents.clone(), vectors.shape.clone()).masked(&mask);

        let encoded = ShapedTensor::new(vectors.tensor + learned.tensor, vectors.extents, vectors.shape);
        Ok(TensorMap::from([(self.path.clone(), encoded)]))
    }

    pub fn output_stack<B: Backend>(&self, net: &SchemaNetwork<B>, upstream: &TensorMap<B>) -> Result<TensorMap<B>> {
        Ok(TensorMap::from([(self.name.clone(), self.head.forward(net, upstream)?)]))
    }

    pub fn criterion_stack<B: Backend>(&self, outputs: &TensorMap<B>, targets: &BatchArtifact) -> Result<Vec<Tensor<B, 1>>> {
        let out    = output(outputs, &self.name)?;
        let target = target_like(out, targets.get(&self.name)?)?;
        Ok(vec![mean_squared_error(out.tensor.clone(), target)])
    }

    pub fn convert_output_out(&self, decoded: &BatchArtifact, _batch: usize) -> Result<Vec<Value>> {
        let array = decoded.get(&self.name)?;
        Ok(self
            .words
            .nearest_batch(&array.data)
            .into_iter()
            .map(|w| w.map_or(Value::Null, Value::String))
            .collect())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::EngineConfig;
    use crate::infra::word_vectors::test_store;
    use crate::ml::components::NameRegistry;
    use burn::backend::NdArray;
    use serde_json::json;

    fn component(cap: usize) -> WordComponent {
        let node = SchemaNode::from_value(&json!({
            "type": "string",
            "configuration": {"component": {"maxEmbeddingTableSize": cap}}
        }))
        .unwrap();
        let config = EngineConfig::default();
        let words  = Arc::new(test_store());
        let mut registry = NameRegistry::default();
        let mut ctx = BuildContext::new("input", &config, Some(&words), &mut registry);
        WordComponent::new(&node, &mut ctx, Arc::clone(&words)).unwrap()
    }

    #[test]
    fn test_unknown_words_get_slots_up_to_the_cap() {
        let mut c = component(1);
        let batch = c
            .convert_input_in(&[json!("dog"), json!("emu"), json!("yak"), json!("emu"), Value::Null])
            .unwrap();
        assert_eq!(batch.get("input__oov__").unwrap().data, vec![0.0, 1.0, 0.0, 1.0, 0.0]);
        assert_eq!(&batch.get("input").unwrap().data[..4], &[0.0, 1.0, 0.0, 0.0]);
        assert_eq!(c.oov_words(), &["emu".to_string()]);
    }

    #[test]
    fn test_restored_table_keeps_slots() {
        let mut c = component(4);
        c.restore_oov(vec!["yak".to_string(), "emu".to_string()]);
        let batch = c.convert_input_in(&[json!("emu")]).unwrap();
        assert_eq!(batch.get("input__oov__").unwrap().data, vec![2.0]);
    }

    #[test]
    fn test_decode_finds_nearest_word() {
        let c = component(4);
        let mut decoded = BatchArtifact::new(2);
        decoded.insert("input", NumericArray::new(vec![2, 2], vec![0.9, 0.1, -0.2, 0.0], 0.0));
        assert_eq!(c.convert_output_out(&decoded, 2).unwrap(), vec![json!("cat"), json!("cow")]);
    }

    #[test]
    fn test_input_stack_adds_masked_embedding() {
        let mut c = component(2);
        let mut plan = NetworkPlan::default();
        c.plan_input(&mut plan).unwrap();
        let device = Default::default();
        let net: SchemaNetwork<NdArray> = plan.init(&device);

        let batch = c.convert_input_in(&[json!("cat"), json!("emu")]).unwrap();
        let map = c.input_stack(&net, &Feed::new(&batch, &device)).unwrap();
        let values = crate::ml::tensor::host_values(map[""].tensor.clone()).unwrap();
        // known word is its vector exactly, the unknown one is the learned row
        assert_eq!(&values[..2], &[1.0, 0.0]);
        assert_eq!(map[""].extents, vec![2]);
    }
}

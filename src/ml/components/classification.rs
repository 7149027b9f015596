// ============================================================
// Layer 5 — Classification Component
// ============================================================
// One categorical variable: an enum over labels, or a boolean
// (two classes, false then true).
//
//   convert_*_in  : label  → class index, -1 when missing/unknown
//   input_stack   : index  → one-hot row (all zero for -1)
//   output_stack  : head   → K logits
//   criterion     : softmax cross-entropy against one-hot targets
//   decode        : argmax → label (or bool)

use burn::prelude::*;
use serde_json::Value;

use super::{
    head::{cross_entropy, host_row, output, OutputHead},
    BuildContext, Feed, Placeholder, PlaceholderKind,
};
use crate::data::artifact::{BatchArtifact, NumericArray};
use crate::domain::{
    config::UnknownLayerPolicy,
    error::{EngineError, Result},
    schema::SchemaNode,
    shape::ShapeDescriptor,
};
use crate::ml::{
    params::{NetworkPlan, SchemaNetwork},
    tensor::{matrix, ShapeMap, ShapedTensor, TensorMap},
};

/// Index of a missing label.
pub const MISSING_CLASS: f32 = -1.0;

#[derive(Debug, Clone)]
pub struct ClassificationComponent {
    pub name: String,
    pub path: String,
    labels:   Vec<String>,
    boolean:  bool,
    depth:    usize,
    policy:   UnknownLayerPolicy,
    head:     OutputHead,
}

impl ClassificationComponent {
    pub fn new(node: &SchemaNode, ctx: &mut BuildContext<'_>) -> Result<Self> {
        Self::with_labels(node, ctx, node.enum_values().to_vec(), false)
    }

    pub fn boolean(node: &SchemaNode, ctx: &mut BuildContext<'_>) -> Result<Self> {
        Self::with_labels(node, ctx, vec!["false".to_string(), "true".to_string()], true)
    }

    fn with_labels(node: &SchemaNode, ctx: &mut BuildContext<'_>, labels: Vec<String>, boolean: bool) -> Result<Self> {
        let name = ctx.name_for(node);
        ctx.registry.claim(&name)?;
        let classes = labels.len();
        Ok(Self {
            name,
            path:   node.machine_path(),
            labels,
            boolean,
            depth:  ctx.depth,
            policy: ctx.config.unknown_layer_policy,
            head:   OutputHead::new(node, classes),
        })
    }

    pub fn classes(&self) -> usize {
        self.labels.len()
    }

    fn index_of(&self, value: &Value) -> Option<usize> {
        let key = match value {
            Value::Null      => return None,
            Value::Bool(b)   => b.to_string(),
            Value::String(s) => s.clone(),
            other            => other.to_string(),
        };
        self.labels.iter().position(|l| *l == key)
    }

    pub fn input_placeholders(&self, extra: usize) -> Vec<Placeholder> {
        vec![Placeholder::new(&self.name, extra + 1, self.classes(), PlaceholderKind::ClassIndex)]
    }

    pub fn output_placeholders(&self, extra: usize) -> Vec<Placeholder> {
        self.input_placeholders(extra)
    }

    pub fn convert_input_in(&mut self, values: &[Value]) -> Result<BatchArtifact> {
        let data = values
            .iter()
            .map(|v| self.index_of(v).map_or(MISSING_CLASS, |i| i as f32))
            .collect();
        let mut out = BatchArtifact::new(values.len());
        out.insert(self.name.clone(), NumericArray::vector(data, MISSING_CLASS));
        Ok(out)
    }

    pub fn convert_output_in(&mut self, values: &[Value]) -> Result<BatchArtifact> {
        self.convert_input_in(values)
    }

    pub fn plan_input(&mut self, _plan: &mut NetworkPlan) -> Result<ShapeMap> {
        Ok(ShapeMap::from([(self.path.clone(), ShapeDescriptor::nested(self.depth, self.classes()))]))
    }

    pub fn plan_output(&mut self, plan: &mut NetworkPlan, upstream: &ShapeMap) -> Result<ShapeMap> {
        let shape = self.head.plan(plan, upstream, self.policy)?;
        Ok(ShapeMap::from([(self.name.clone(), shape)]))
    }

    pub fn input_stack<B: Backend>(&self, _net: &SchemaNetwork<B>, feed: &Feed<'_, B>) -> Result<TensorMap<B>> {
        let indices = feed.batch.get(&self.name)?;
        let encoded = ShapedTensor::from_array(
            &one_hot(indices, self.classes()),
            ShapeDescriptor::nested(self.depth, self.classes()),
            &feed.device,
        )?;
        Ok(TensorMap::from([(self.path.clone(), encoded)]))
    }

    pub fn output_stack<B: Backend>(&self, net: &SchemaNetwork<B>, upstream: &TensorMap<B>) -> Result<TensorMap<B>> {
        Ok(TensorMap::from([(self.name.clone(), self.head.forward(net, upstream)?)]))
    }

    pub fn criterion_stack<B: Backend>(&self, outputs: &TensorMap<B>, targets: &BatchArtifact) -> Result<Vec<Tensor<B, 1>>> {
        let logits  = output(outputs, &self.name)?;
        let indices = targets.get(&self.name)?;
        if indices.data.len() != logits.rows() {
            return Err(EngineError::mismatch(
                format!("{} class indices", logits.rows()),
                indices.data.len(),
            ));
        }
        let target = one_hot(indices, self.classes());
        let target = matrix(target.data, logits.rows(), self.classes(), &logits.device());
        Ok(vec![cross_entropy(logits.tensor.clone(), target)])
    }

    /// Raw argmax per decoded row.
    pub fn decode_indices(&self, decoded: &BatchArtifact) -> Result<Vec<usize>> {
        let array = decoded.get(&self.name)?;
        Ok((0..array.leading()).map(|i| argmax(host_row(array, i))).collect())
    }

    pub fn convert_output_out(&self, decoded: &BatchArtifact, _batch: usize) -> Result<Vec<Value>> {
        Ok(self
            .decode_indices(decoded)?
            .into_iter()
            .map(|i| {
                if self.boolean {
                    Value::Bool(i == 1)
                } else {
                    self.labels.get(i).map_or(Value::Null, |l| Value::String(l.clone()))
                }
            })
            .collect())
    }
}

/// Append a one-hot axis of width `classes`; out-of-range indices
/// (the -1 sentinel included) give an all-zero row.
pub fn one_hot(indices: &NumericArray, classes: usize) -> NumericArray {
    let mut data = vec![0.0; indices.data.len() * classes];
    for (row, &index) in indices.data.iter().enumerate() {
        if index >= 0.0 && (index as usize) < classes {
            data[row * classes + index as usize] = 1.0;
        }
    }
    let mut shape = indices.shape.clone();
    shape.push(classes);
    NumericArray::new(shape, data, 0.0)
}

fn argmax(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map_or(0, |(i, _)| i)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::EngineConfig;
    use crate::ml::components::NameRegistry;
    use serde_json::json;

    fn component(schema: Value) -> ClassificationComponent {
        let node = SchemaNode::from_value(&schema).unwrap();
        let config = EngineConfig::default();
        let mut registry = NameRegistry::default();
        let mut ctx = BuildContext::new("output", &config, None, &mut registry);
        if node.kind() == crate::domain::schema::SchemaKind::Boolean {
            ClassificationComponent::boolean(&node, &mut ctx).unwrap()
        } else {
            ClassificationComponent::new(&node, &mut ctx).unwrap()
        }
    }

    #[test]
    fn test_labels_encode_to_indices_with_sentinel() {
        let mut c = component(json!({"type": "string", "enum": ["A", "B", "C"]}));
        let batch = c.convert_input_in(&[json!("C"), json!("Z"), Value::Null]).unwrap();
        assert_eq!(batch.get("output").unwrap().data, vec![2.0, -1.0, -1.0]);
    }

    #[test]
    fn test_one_hot_zeroes_missing_rows() {
        let hot = one_hot(&NumericArray::vector(vec![1.0, -1.0], -1.0), 3);
        assert_eq!(hot.shape, vec![2, 3]);
        assert_eq!(hot.data, vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_boolean_round_trip() {
        let mut c = component(json!({"type": "boolean"}));
        let batch = c.convert_output_in(&[json!(true), json!(false)]).unwrap();
        assert_eq!(batch.get("output").unwrap().data, vec![1.0, 0.0]);

        let mut decoded = BatchArtifact::new(2);
        decoded.insert("output", one_hot(batch.get("output").unwrap(), 2));
        assert_eq!(c.convert_output_out(&decoded, 2).unwrap(), vec![json!(true), json!(false)]);
    }

    #[test]
    fn test_decode_takes_argmax() {
        let c = component(json!({"type": "string", "enum": ["A", "B", "C"]}));
        let mut decoded = BatchArtifact::new(2);
        decoded.insert("output", NumericArray::new(vec![2, 3], vec![0.9, 0.05, 0.05, 0.1, 0.1, 0.8], 0.0));
        assert_eq!(c.decode_indices(&decoded).unwrap(), vec![0, 2]);
        assert_eq!(c.convert_output_out(&decoded, 2).unwrap(), vec![json!("A"), json!("C")]);
    }
}

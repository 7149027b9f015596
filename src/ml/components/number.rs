// ============================================================
// Layer 5 — Number Component
// ============================================================
// One numeric variable. Encoded as itself (width 1), decoded by
// an output head of width 1 and trained with mean-squared error.
// Missing or non-numeric values encode as 0.

use burn::prelude::*;
use serde_json::Value;

use super::{
    head::{host_row, mean_squared_error, output, target_like, OutputHead},
    BuildContext, Feed, Placeholder, PlaceholderKind,
};
use crate::data::artifact::{BatchArtifact, NumericArray};
use crate::domain::{
    config::UnknownLayerPolicy,
    error::Result,
    schema::SchemaNode,
    shape::ShapeDescriptor,
};
use crate::ml::{
    params::{NetworkPlan, SchemaNetwork},
    tensor::{ShapeMap, TensorMap},
};

#[derive(Debug, Clone)]
pub struct NumberComponent {
    pub name:  String,
    pub path:  String,
    depth:     usize,
    policy:    UnknownLayerPolicy,
    head:      OutputHead,
}

impl NumberComponent {
    pub fn new(node: &SchemaNode, ctx: &mut BuildContext<'_>) -> Result<Self> {
        let name = ctx.name_for(node);
        ctx.registry.claim(&name)?;
        Ok(Self {
            name,
            path:   node.machine_path(),
            depth:  ctx.depth,
            policy: ctx.config.unknown_layer_policy,
            head:   OutputHead::new(node, 1),
        })
    }

    pub fn input_placeholders(&self, extra: usize) -> Vec<Placeholder> {
        vec![Placeholder::new(&self.name, extra + 1, 1, PlaceholderKind::Value)]
    }

    pub fn output_placeholders(&self, extra: usize) -> Vec<Placeholder> {
        self.input_placeholders(extra)
    }

    pub fn convert_input_in(&mut self, values: &[Value]) -> Result<BatchArtifact> {
        let data = values.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect();
        let mut out = BatchArtifact::new(values.len());
        out.insert(self.name.clone(), NumericArray::vector(data, 0.0));
        Ok(out)
    }

    pub fn convert_output_in(&mut self, values: &[Value]) -> Result<BatchArtifact> {
        self.convert_input_in(values)
    }

    pub fn plan_input(&mut self, _plan: &mut NetworkPlan) -> Result<ShapeMap> {
        Ok(ShapeMap::from([(self.path.clone(), ShapeDescriptor::nested(self.depth, 1))]))
    }

    pub fn plan_output(&mut self, plan: &mut NetworkPlan, upstream: &ShapeMap) -> Result<ShapeMap> {
        let shape = self.head.plan(plan, upstream, self.policy)?;
        Ok(ShapeMap::from([(self.name.clone(), shape)]))
    }

    pub fn input_stack<B: Backend>(&self, _net: &SchemaNetwork<B>, feed: &Feed<'_, B>) -> Result<TensorMap<B>> {
        let encoded = feed.upload(&self.name, ShapeDescriptor::nested(self.depth, 1))?;
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
        Ok((0..array.leading())
            .map(|i| host_row(array, i).first().map_or(Value::Null, |x| Value::from(*x as f64)))
            .collect())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::EngineConfig;
    use crate::ml::components::NameRegistry;
    use serde_json::json;

    fn number() -> NumberComponent {
        let node = SchemaNode::from_value(&json!({"type": "number", "metadata": {"variablePath": "score"}})).unwrap();
        let config = EngineConfig::default();
        let mut registry = NameRegistry::default();
        let mut ctx = BuildContext::new("output", &config, None, &mut registry);
        NumberComponent::new(&node, &mut ctx).unwrap()
    }

    #[test]
    fn test_missing_values_encode_as_zero() {
        let mut c = number();
        let batch = c.convert_input_in(&[json!(2.5), Value::Null, json!("x")]).unwrap();
        assert_eq!(batch.get("output_score").unwrap().data, vec![2.5, 0.0, 0.0]);
    }

    #[test]
    fn test_decode_reads_first_column() {
        let c = number();
        let mut decoded = BatchArtifact::new(2);
        decoded.insert("output_score", NumericArray::new(vec![2, 1], vec![1.5, -2.0], 0.0));
        assert_eq!(c.convert_output_out(&decoded, 2).unwrap(), vec![json!(1.5), json!(-2.0)]);
    }
}

// ============================================================
// Layer 5 — Object Component
// ============================================================
// One child per schema property, kept in property order. Every
// operation fans out to the children and merges what they
// return; the children's keys are machine names or paths, so
// they never overlap (checked while planning).

use std::collections::BTreeMap;

use burn::prelude::*;
use serde_json::{Map, Value};

use super::{build, merge_unique, BuildContext, Component, Feed, Placeholder};
use crate::data::artifact::BatchArtifact;
use crate::domain::{error::Result, schema::SchemaNode};
use crate::ml::{
    params::{NetworkPlan, SchemaNetwork},
    tensor::{ShapeMap, TensorMap},
};

#[derive(Debug, Clone)]
pub struct ObjectComponent {
    pub name:     String,
    pub path:     String,
    pub children: Vec<(String, Component)>,
}

impl ObjectComponent {
    pub fn new(node: &SchemaNode, ctx: &mut BuildContext<'_>) -> Result<Self> {
        let mut children = Vec::with_capacity(node.properties().len());
        for (key, child) in node.properties() {
            children.push((key.clone(), build(child, ctx)?));
        }
        Ok(Self { name: ctx.name_for(node), path: node.machine_path(), children })
    }

    pub fn input_placeholders(&self, extra: usize) -> Vec<Placeholder> {
        self.children.iter().flat_map(|(_, c)| c.input_placeholders(extra)).collect()
    }

    pub fn output_placeholders(&self, extra: usize) -> Vec<Placeholder> {
        self.children.iter().flat_map(|(_, c)| c.output_placeholders(extra)).collect()
    }

    /// Values of property `key` across the batch; anything missing is null.
    fn column(values: &[Value], key: &str) -> Vec<Value> {
        values
            .iter()
            .map(|v| v.get(key).cloned().unwrap_or(Value::Null))
            .collect()
    }

    pub fn convert_input_in(&mut self, values: &[Value]) -> Result<BatchArtifact> {
        let mut out = BatchArtifact::new(values.len());
        for (key, child) in &mut self.children {
            out.merge(child.convert_input_in(&Self::column(values, key))?);
        }
        Ok(out)
    }

    pub fn convert_output_in(&mut self, values: &[Value]) -> Result<BatchArtifact> {
        let mut out = BatchArtifact::new(values.len());
        for (key, child) in &mut self.children {
            out.merge(child.convert_output_in(&Self::column(values, key))?);
        }
        Ok(out)
    }

    pub fn plan_input(&mut self, plan: &mut NetworkPlan) -> Result<ShapeMap> {
        let mut shapes = ShapeMap::new();
        for (_, child) in &mut self.children {
            merge_unique(&mut shapes, child.plan_input(plan)?)?;
        }
        Ok(shapes)
    }

    pub fn plan_output(&mut self, plan: &mut NetworkPlan, upstream: &ShapeMap) -> Result<ShapeMap> {
        let mut shapes = ShapeMap::new();
        for (_, child) in &mut self.children {
            merge_unique(&mut shapes, child.plan_output(plan, upstream)?)?;
        }
        Ok(shapes)
    }

    pub fn input_stack<B: Backend>(&self, net: &SchemaNetwork<B>, feed: &Feed<'_, B>) -> Result<TensorMap<B>> {
        let mut tensors = TensorMap::new();
        for (_, child) in &self.children {
            tensors.extend(child.input_stack(net, feed)?);
        }
        Ok(tensors)
    }

    pub fn output_stack<B: Backend>(&self, net: &SchemaNetwork<B>, upstream: &TensorMap<B>) -> Result<TensorMap<B>> {
        let mut tensors = TensorMap::new();
        for (_, child) in &self.children {
            tensors.extend(child.output_stack(net, upstream)?);
        }
        Ok(tensors)
    }

    pub fn criterion_stack<B: Backend>(&self, outputs: &TensorMap<B>, targets: &BatchArtifact) -> Result<Vec<Tensor<B, 1>>> {
        let mut losses = Vec::new();
        for (_, child) in &self.children {
            losses.extend(child.criterion_stack(outputs, targets)?);
        }
        Ok(losses)
    }

    /// As many objects as the longest child decode; an object whose
    /// child decoded fewer values simply lacks that key.
    pub fn convert_output_out(&self, decoded: &BatchArtifact, batch: usize) -> Result<Vec<Value>> {
        let mut columns = BTreeMap::new();
        let mut count   = if self.children.is_empty() { batch } else { 0 };
        for (i, (_, child)) in self.children.iter().enumerate() {
            let values = child.convert_output_out(decoded, batch)?;
            count = count.max(values.len());
            columns.insert(i, values);
        }

        let mut objects = vec![Map::new(); count];
        for (i, (key, _)) in self.children.iter().enumerate() {
            let Some(values) = columns.remove(&i) else { continue };
            for (object, value) in objects.iter_mut().zip(values) {
                object.insert(key.clone(), value);
            }
        }
        Ok(objects.into_iter().map(Value::Object).collect())
    }
}

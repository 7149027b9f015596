// ============================================================
// Layer 5 — Sequence Component
// ============================================================
// A repeated variable with one child component for its items.
//
// Host arrays (depth d = number of enclosing sequences):
//
//   {name}__length__   [T_outer×d, B]        items per example (capped)
//   {name}__exists__   [T_outer×d, T, B]     1 where an item exists
//   child arrays       [T_outer×d, T, B, ..] one slice per step
//
// T is the longest (capped) list in the batch, at least 1.
//
// Encoder: child features are reduced to this sequence's row
// space, masked, and run through the sequence network with the
// per-example lengths. The result is keyed by this sequence's
// machine path together with its existence flags.
//
// Decoder, decided while planning:
//   conditioned — the encoder map holds this sequence's path and
//                 its existence flags: the tensors of this
//                 sequence and of the nested sequences the child
//                 also decodes are cut into steps, and the child
//                 decodes each step; the input's existence flags
//                 are reused.
//   generative  — no such pair: a step network unrolled by a
//                 GenerationLoop emits one existence score and
//                 one step vector per step.
//
// Loss: child losses over the first min(actual, expected) steps
// plus an existence MSE over every produced step, targeting 0
// past the expected length.

use std::collections::{BTreeMap, BTreeSet};

use burn::{prelude::*, tensor::activation};
use serde_json::Value;

use super::{
    build,
    generator::{GenerationLoop, EXISTENCE_THRESHOLD},
    head::{mean_squared_error, output},
    BuildContext, Component, Feed, Placeholder, PlaceholderKind, EXISTS_SUFFIX, LENGTH_SUFFIX, STEP_SUFFIX,
};
use crate::data::artifact::{BatchArtifact, NumericArray};
use crate::domain::{
    config::UnknownLayerPolicy,
    error::{EngineError, Result, SchemaError},
    schema::{LayerSpec, SchemaNode},
    shape::{AxisName, DimSize, ShapeDescriptor},
};
use crate::ml::{
    network::{
        default_decoder_layers, default_sequence_layers, plan_network, NetworkContext, PlannedNetwork, TemplateVars,
    },
    params::{NetworkPlan, SchemaNetwork},
    summary::{summarize, summary_shape},
    tensor::{column, host_values, matrix, select, ShapeMap, ShapedTensor, TensorMap},
};

#[derive(Debug, Clone)]
struct Generator {
    step:      PlannedNetwork,
    existence: usize,
    max_steps: usize,
}

#[derive(Debug, Clone)]
enum OutputMode {
    Unplanned,
    Conditioned,
    Generative(Generator),
}

#[derive(Debug, Clone)]
pub struct SequenceComponent {
    pub name:       String,
    pub path:       String,
    pub child:      Box<Component>,
    length_name:    String,
    exists_name:    String,
    depth:          usize,
    cap:            Option<usize>,
    max_generated:  usize,
    policy:         UnknownLayerPolicy,
    layers:         Vec<LayerSpec>,
    decoder_layers: Vec<LayerSpec>,
    encoder:        Option<PlannedNetwork>,
    mode:           OutputMode,
    /// Upstream keys whose leading axis is this sequence's time axis.
    sliced:         BTreeSet<String>,
}

fn exists_key(path: &str) -> String {
    format!("{path}{EXISTS_SUFFIX}")
}

impl SequenceComponent {
    pub fn new(node: &SchemaNode, ctx: &mut BuildContext<'_>) -> Result<Self> {
        let name        = ctx.name_for(node);
        let length_name = format!("{name}{LENGTH_SUFFIX}");
        let exists_name = format!("{name}{EXISTS_SUFFIX}");
        ctx.registry.claim(&name)?;
        ctx.registry.claim(&length_name)?;
        ctx.registry.claim(&exists_name)?;

        let items = node.items().ok_or_else(|| SchemaError::MissingField {
            path:  node.variable_path().to_string(),
            field: "items",
        })?;
        let child = {
            let mut inner = ctx.deeper();
            build(items, &mut inner)?
        };

        let component = node.component();
        let cap       = component.sequence_cap();
        let path      = node.machine_path();
        let sliced    = std::iter::once(path.clone())
            .chain(child.sequence_paths())
            .flat_map(|p| [exists_key(&p), p])
            .collect();
        Ok(Self {
            name,
            path,
            child: Box::new(child),
            length_name,
            exists_name,
            depth: ctx.depth,
            cap,
            max_generated: cap.unwrap_or(ctx.config.default_max_generated_length),
            policy: ctx.config.unknown_layer_policy,
            layers: component.layers.clone().unwrap_or_else(default_sequence_layers),
            decoder_layers: component.decoder_layers.clone().unwrap_or_else(default_decoder_layers),
            encoder: None,
            mode: OutputMode::Unplanned,
            sliced,
        })
    }

    /// True once planning has chosen generative decoding.
    pub fn is_generative(&self) -> bool {
        matches!(self.mode, OutputMode::Generative(_))
    }

    /// Upstream keys that carry this sequence's time axis first.
    fn is_sliced(&self, key: &str) -> bool {
        self.sliced.contains(key)
    }

    // ─── Placeholders and conversion ──────────────────────────────────────────

    fn own_placeholders(&self, extra: usize) -> [Placeholder; 2] {
        [
            Placeholder::new(&self.length_name, extra + 1, 1, PlaceholderKind::Length),
            Placeholder::new(&self.exists_name, extra + 2, 1, PlaceholderKind::Exists),
        ]
    }

    pub fn input_placeholders(&self, extra: usize) -> Vec<Placeholder> {
        let mut out = self.child.input_placeholders(extra + 1);
        out.extend(self.own_placeholders(extra));
        out
    }

    pub fn output_placeholders(&self, extra: usize) -> Vec<Placeholder> {
        let mut out = self.child.output_placeholders(extra + 1);
        out.extend(self.own_placeholders(extra));
        out
    }

    fn convert(&mut self, values: &[Value], target: bool) -> Result<BatchArtifact> {
        let batch = values.len();
        let lists: Vec<&[Value]> = values
            .iter()
            .map(|v| v.as_array().map_or(&[][..], Vec::as_slice))
            .collect();
        let lengths: Vec<usize> = lists
            .iter()
            .map(|l| self.cap.map_or(l.len(), |cap| l.len().min(cap)))
            .collect();
        let steps = lengths.iter().copied().max().unwrap_or(0).max(1);

        let mut per_step = Vec::with_capacity(steps);
        let mut exists   = Vec::with_capacity(steps * batch);
        for t in 0..steps {
            let slice: Vec<Value> = lists
                .iter()
                .zip(&lengths)
                .map(|(list, &n)| if t < n { list[t].clone() } else { Value::Null })
                .collect();
            exists.extend(lengths.iter().map(|&n| if t < n { 1.0 } else { 0.0 }));
            per_step.push(if target {
                self.child.convert_output_in(&slice)?
            } else {
                self.child.convert_input_in(&slice)?
            });
        }

        let mut out = BatchArtifact::stack_steps(&per_step, batch)?;
        out.insert(
            self.length_name.clone(),
            NumericArray::vector(lengths.iter().map(|&n| n as f32).collect(), 0.0),
        );
        out.insert(self.exists_name.clone(), NumericArray::new(vec![steps, batch], exists, 0.0));
        Ok(out)
    }

    pub fn convert_input_in(&mut self, values: &[Value]) -> Result<BatchArtifact> {
        self.convert(values, false)
    }

    pub fn convert_output_in(&mut self, values: &[Value]) -> Result<BatchArtifact> {
        self.convert(values, true)
    }

    // ─── Encoder ──────────────────────────────────────────────────────────────

    pub fn plan_input(&mut self, plan: &mut NetworkPlan) -> Result<ShapeMap> {
        let child_shapes = self.child.plan_input(plan)?;
        let refs: Vec<&ShapeDescriptor> = child_shapes.values().collect();
        let features = summary_shape(&refs, self.depth + 1)?;
        let encoder  = plan_network(
            &self.layers,
            features.data_width(),
            NetworkContext::Sequence,
            &TemplateVars::new(),
            self.policy,
            plan,
        )?;

        let mut shapes = ShapeMap::new();
        shapes.insert(self.path.clone(), ShapeDescriptor::nested(self.depth + 1, encoder.output_width));
        shapes.insert(exists_key(&self.path), ShapeDescriptor::nested(self.depth + 1, 1));
        for key in self.passed_through() {
            if let Some(shape) = child_shapes.get(&key) {
                shapes.insert(key, shape.clone());
            }
        }
        self.encoder = Some(encoder);
        Ok(shapes)
    }

    /// Encoder keys of descendant sequences, kept for nested conditioned decoding.
    fn passed_through(&self) -> Vec<String> {
        self.child
            .sequence_paths()
            .into_iter()
            .flat_map(|p| [exists_key(&p), p])
            .collect()
    }

    pub fn input_stack<B: Backend>(&self, net: &SchemaNetwork<B>, feed: &Feed<'_, B>) -> Result<TensorMap<B>> {
        let encoder = self
            .encoder
            .as_ref()
            .ok_or_else(|| EngineError::unsupported("sequence encoder used before planning"))?;

        let child_map = self.child.input_stack(net, feed)?;
        let exists    = feed.upload(&self.exists_name, ShapeDescriptor::nested(self.depth + 1, 1))?;
        let inputs: Vec<&ShapedTensor<B>> = child_map.values().collect();
        let features  = summarize(&inputs, self.depth + 1)?;
        if features.extents != exists.extents {
            return Err(EngineError::mismatch(format!("{:?}", exists.extents), format!("{:?}", features.extents)));
        }
        let features  = features.masked(&exists.tensor);

        // [O, T, B, F] → [O·B, T, F]
        let lead    = exists.extents.len();
        let batch   = exists.extents[lead - 1];
        let steps   = exists.extents[lead - 2];
        let outer   = exists.extents[..lead - 2].iter().product::<usize>();
        let width   = features.width();
        let lengths: Vec<usize> = feed
            .batch
            .get(&self.length_name)?
            .data
            .iter()
            .map(|&n| (n.max(0.0) as usize).min(steps))
            .collect();
        if lengths.len() != outer * batch {
            return Err(EngineError::mismatch(format!("{} lengths", outer * batch), lengths.len()));
        }

        let x = features
            .tensor
            .reshape([outer, steps, batch, width])
            .swap_dims(1, 2)
            .reshape([outer * batch, steps, width]);
        let y      = encoder.forward_sequence(net, x, &lengths)?;
        let hidden = y.dims()[2];
        let y = y
            .reshape([outer, batch, steps, hidden])
            .swap_dims(1, 2)
            .reshape([outer * steps * batch, hidden]);

        let encoded = ShapedTensor::new(y, exists.extents.clone(), ShapeDescriptor::nested(self.depth + 1, hidden))
            .masked(&exists.tensor);

        let mut out = TensorMap::new();
        for key in self.passed_through() {
            if let Some(t) = child_map.get(&key) {
                out.insert(key, t.clone());
            }
        }
        out.insert(self.path.clone(), encoded);
        out.insert(exists_key(&self.path), exists);
        Ok(out)
    }

    // ─── Decoder ──────────────────────────────────────────────────────────────

    pub fn plan_output(&mut self, plan: &mut NetworkPlan, upstream: &ShapeMap) -> Result<ShapeMap> {
        let conditioning = upstream
            .get(&exists_key(&self.path))
            .filter(|_| upstream.contains_key(&self.path))
            .cloned();
        let (child_shapes, exists_shape) = if let Some(exists) = conditioning {
            let mut step = ShapeMap::new();
            for (key, shape) in upstream {
                let shape = if self.is_sliced(key) { shape.remove_time_axis(0)? } else { shape.clone() };
                step.insert(key.clone(), shape);
            }
            self.mode = OutputMode::Conditioned;
            tracing::debug!("Sequence '{}' decodes conditioned on its input", self.name);
            (self.child.plan_output(plan, &step)?, exists)
        } else {
            let refs: Vec<&ShapeDescriptor> = upstream.values().collect();
            let context = summary_shape(&refs, 0)?;
            let step = plan_network(
                &self.decoder_layers,
                context.data_width(),
                NetworkContext::Step,
                &TemplateVars::new(),
                self.policy,
                plan,
            )?;
            let hidden    = step.output_width;
            let existence = plan.add_linear(hidden, 1);
            let step_map  = ShapeMap::from([(self.step_key(), ShapeDescriptor::batch_data(hidden))]);
            let child     = self.child.plan_output(plan, &step_map)?;
            tracing::debug!(
                "Sequence '{}' decodes generatively, at most {} steps",
                self.name, self.max_generated
            );
            self.mode = OutputMode::Generative(Generator { step, existence, max_steps: self.max_generated });
            (child, ShapeDescriptor::time_batch_data(1))
        };

        let mut shapes: ShapeMap = child_shapes
            .into_iter()
            .map(|(k, s)| (k, s.push_dimension(DimSize::Variable, AxisName::Time)))
            .collect();
        shapes.insert(self.exists_name.clone(), exists_shape);
        Ok(shapes)
    }

    fn step_key(&self) -> String {
        format!("{}{STEP_SUFFIX}", self.path)
    }

    pub fn output_stack<B: Backend>(&self, net: &SchemaNetwork<B>, upstream: &TensorMap<B>) -> Result<TensorMap<B>> {
        match &self.mode {
            OutputMode::Conditioned => self.conditioned(net, upstream),
            OutputMode::Generative(generator) => self.generate(net, upstream, generator),
            OutputMode::Unplanned => Err(EngineError::unsupported("sequence decoder used before planning")),
        }
    }

    fn conditioned<B: Backend>(&self, net: &SchemaNetwork<B>, upstream: &TensorMap<B>) -> Result<TensorMap<B>> {
        let key    = exists_key(&self.path);
        let exists = upstream
            .get(&key)
            .ok_or_else(|| SchemaError::MissingArray { name: key.clone() })?;
        let steps = exists.extents.first().copied().unwrap_or(0);

        let mut per_step = Vec::with_capacity(steps);
        for t in 0..steps {
            let mut step = TensorMap::new();
            for (k, v) in upstream {
                let v = if self.is_sliced(k) { v.time_step(t)? } else { v.clone() };
                step.insert(k.clone(), v);
            }
            per_step.push(self.child.output_stack(net, &step)?);
        }

        let mut out = stack_maps(per_step)?;
        out.insert(self.exists_name.clone(), exists.clone());
        Ok(out)
    }

    fn generate<B: Backend>(
        &self,
        net:       &SchemaNetwork<B>,
        upstream:  &TensorMap<B>,
        generator: &Generator,
    ) -> Result<TensorMap<B>> {
        let inputs: Vec<&ShapedTensor<B>> = upstream.values().collect();
        let context = summarize(&inputs, 0)?;
        let batch   = context.rows();
        let device  = context.device();
        let hidden  = generator.step.output_width;

        let mut generation = GenerationLoop::new(batch, generator.max_steps);
        let mut states     = Vec::new();
        let mut per_step   = Vec::new();
        let mut existence  = Vec::new();

        while let Some(alive) = generation.begin_step() {
            let (h, next) = generator.step.step(net, context.tensor.clone(), states)?;
            states = next;

            let score = activation::sigmoid(net.linears[generator.existence].forward(h.clone()))
                * column::<B>(alive, &device);
            generation.record(&host_values(score.clone())?);

            let step = TensorMap::from([(
                self.step_key(),
                ShapedTensor::new(h, vec![batch], ShapeDescriptor::batch_data(hidden)),
            )]);
            per_step.push(self.child.output_stack(net, &step)?);
            existence.push(ShapedTensor::new(score, vec![batch], ShapeDescriptor::batch_data(1)));
        }
        tracing::debug!("Generated {} steps for '{}'", generation.steps(), self.name);

        let mut out = stack_maps(per_step)?;
        out.insert(self.exists_name.clone(), ShapedTensor::stack_time(existence)?);
        Ok(out)
    }

    // ─── Loss ─────────────────────────────────────────────────────────────────

    pub fn criterion_stack<B: Backend>(&self, outputs: &TensorMap<B>, targets: &BatchArtifact) -> Result<Vec<Tensor<B, 1>>> {
        let exists   = output(outputs, &self.exists_name)?;
        let expected = targets.get(&self.exists_name)?;
        let actual   = exists.extents.first().copied().unwrap_or(0);
        let cutoff   = actual.min(expected.leading());
        let names    = self.child.array_names();

        let mut losses = Vec::new();
        for t in 0..cutoff {
            let step_outputs = select(outputs, &names)
                .into_iter()
                .map(|(k, v)| Ok((k, v.time_step(t)?)))
                .collect::<Result<TensorMap<B>>>()?;
            let step_targets = targets.slice_leading(&names, t)?;
            losses.extend(self.child.criterion_stack(&step_outputs, &step_targets)?);
        }

        let rows = exists.rows();
        let per  = expected.row_width();
        if actual == 0 || rows != actual * per {
            return Err(EngineError::mismatch(
                format!("{actual} steps of {per} existence flags"),
                format!("{rows} rows"),
            ));
        }
        let mut flags = vec![0.0; rows];
        flags[..cutoff * per].copy_from_slice(&expected.data[..cutoff * per]);
        let target = matrix(flags, rows, 1, &exists.device());
        losses.push(mean_squared_error(exists.tensor.clone(), target));
        Ok(losses)
    }

    // ─── Decode ───────────────────────────────────────────────────────────────

    pub fn convert_output_out(&self, decoded: &BatchArtifact, batch: usize) -> Result<Vec<Value>> {
        let exists = decoded.get(&self.exists_name)?;
        let steps  = exists.leading();
        let per    = exists.row_width();
        let names  = self.child.array_names();

        let mut lists = vec![Vec::new(); batch];
        for t in 0..steps {
            let step  = decoded.slice_leading(&names, t)?;
            let items = self.child.convert_output_out(&step, batch)?;
            for (b, item) in items.into_iter().enumerate().take(batch) {
                if exists.data.get(t * per + b).copied().unwrap_or(0.0) > EXISTENCE_THRESHOLD {
                    lists[b].push(item);
                }
            }
        }
        Ok(lists.into_iter().map(Value::Array).collect())
    }
}

/// Key-wise `stack_time` over per-step maps.
fn stack_maps<B: Backend>(steps: Vec<TensorMap<B>>) -> Result<TensorMap<B>> {
    let mut columns: BTreeMap<String, Vec<ShapedTensor<B>>> = BTreeMap::new();
    for step in steps {
        for (key, tensor) in step {
            columns.entry(key).or_default().push(tensor);
        }
    }
    columns
        .into_iter()
        .map(|(key, tensors)| Ok((key, ShapedTensor::stack_time(tensors)?)))
        .collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::EngineConfig;
    use crate::ml::components::{ideal_decoding, NameRegistry};
    use crate::ml::tensor::download;
    use burn::backend::NdArray;
    use serde_json::json;

    type TestBackend = NdArray;

    fn tree(schema: Value, root: &str, registry: &mut NameRegistry) -> Component {
        let node = SchemaNode::from_value(&schema).unwrap();
        let config = EngineConfig::default();
        let mut ctx = BuildContext::new(root, &config, None, registry);
        build(&node, &mut ctx).unwrap()
    }

    fn numbers() -> Value {
        json!({"type": "array", "items": {"type": "number"}})
    }

    fn lists() -> Vec<Value> {
        vec![json!([1.0, 2.0]), json!([1.0, 2.0, 3.0, 4.0, 5.0]), json!([])]
    }

    fn lengths(decoded: &[Value]) -> Vec<usize> {
        decoded.iter().map(|v| v.as_array().map_or(0, Vec::len)).collect()
    }

    #[test]
    fn test_encoding_pads_to_longest() {
        let mut registry = NameRegistry::default();
        let mut c = tree(numbers(), "input", &mut registry);
        let batch = c.convert_input_in(&lists()).unwrap();
        assert_eq!(batch.get("input__length__").unwrap().data, vec![2.0, 5.0, 0.0]);
        let exists = batch.get("input__exists__").unwrap();
        assert_eq!(exists.shape, vec![5, 3]);
        assert_eq!(&exists.data[..6], &[1.0, 1.0, 0.0, 1.0, 1.0, 0.0]);
        assert_eq!(batch.get("input__array_").unwrap().shape, vec![5, 3]);
    }

    #[test]
    fn test_all_empty_batch_has_one_masked_step() {
        let mut registry = NameRegistry::default();
        let mut c = tree(numbers(), "input", &mut registry);
        let batch = c.convert_input_in(&[json!([]), Value::Null]).unwrap();
        assert_eq!(batch.get("input__exists__").unwrap().data, vec![0.0, 0.0]);
    }

    #[test]
    fn test_length_cap_is_enforced() {
        let mut registry = NameRegistry::default();
        let mut c = tree(json!({
            "type": "array",
            "items": {"type": "number"},
            "configuration": {"component": {"enforceSequenceLengthLimit": true, "maxSequenceLength": 3}}
        }), "input", &mut registry);
        let batch = c.convert_input_in(&lists()).unwrap();
        assert_eq!(batch.get("input__length__").unwrap().data, vec![2.0, 3.0, 0.0]);
        assert_eq!(batch.get("input__exists__").unwrap().shape, vec![3, 3]);
    }

    #[test]
    fn test_padding_survives_host_round_trip() {
        let mut registry = NameRegistry::default();
        let mut c = tree(numbers(), "output", &mut registry);
        let targets = c.convert_output_in(&lists()).unwrap();
        let decoded = c.convert_output_out(&ideal_decoding(&c, &targets), 3).unwrap();
        assert_eq!(lengths(&decoded), vec![2, 5, 0]);
        assert_eq!(decoded, lists());
    }

    #[test]
    fn test_nested_sequences_round_trip() {
        let mut registry = NameRegistry::default();
        let schema = json!({"type": "array", "items": {"type": "array", "items": {"type": "string", "enum": ["a", "b"]}}});
        let values = vec![json!([["a"], ["b", "a", "b"]]), json!([[]]), json!([])];
        let mut c = tree(schema, "output", &mut registry);
        let targets = c.convert_output_in(&values).unwrap();
        assert_eq!(targets.get("output__array___exists__").unwrap().shape, vec![2, 3, 3]);
        let decoded = c.convert_output_out(&ideal_decoding(&c, &targets), 3).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_conditioned_decode_reuses_input_existence() {
        let device = Default::default();
        let mut registry = NameRegistry::default();
        let mut input  = tree(numbers(), "input", &mut registry);
        let mut output = tree(numbers(), "output", &mut registry);

        let mut plan = NetworkPlan::default();
        let encoded  = input.plan_input(&mut plan).unwrap();
        let decoded  = output.plan_output(&mut plan, &encoded).unwrap();
        assert_eq!(decoded["output__array_"], ShapeDescriptor::time_batch_data(1));
        let Component::Sequence(s) = &output else { panic!("expected sequence") };
        assert!(!s.is_generative());

        let net: SchemaNetwork<TestBackend> = plan.init(&device);
        let batch   = input.convert_input_in(&lists()).unwrap();
        let tensors = input.input_stack(&net, &Feed::new(&batch, &device)).unwrap();
        assert_eq!(tensors[""].extents, vec![5, 3]);
        assert_eq!(tensors[""].width(), 200);

        let outputs = output.output_stack(&net, &tensors).unwrap();
        assert_eq!(outputs["output__array_"].extents, vec![5, 3]);
        let host = download(&outputs, 3).unwrap();
        assert_eq!(lengths(&output.convert_output_out(&host, 3).unwrap()), vec![2, 5, 0]);
    }

    #[test]
    fn test_sliced_keys_are_this_and_nested_sequences() {
        let mut registry = NameRegistry::default();
        let c = tree(json!({"type": "object", "properties": {
            "a": {"type": "array", "items": {"type": "array", "items": {"type": "number"}}}
        }}), "output", &mut registry);
        let Component::Object(o) = &c else { panic!("expected object") };
        let Component::Sequence(s) = &o.children[0].1 else { panic!("expected sequence") };

        for key in ["a", "a__exists__", "a_array_", "a_array___exists__"] {
            assert!(s.is_sliced(key), "{key}");
        }
        assert!(!s.is_sliced("a_array_x"));
        assert!(!s.is_sliced("a_array__array_"));
    }

    #[test]
    fn test_upstream_without_existence_decodes_generatively() {
        let mut registry = NameRegistry::default();
        let mut output = tree(json!({"type": "object", "properties": {"x": numbers()}}), "output", &mut registry);
        let mut plan = NetworkPlan::default();
        let upstream = ShapeMap::from([("x".to_string(), ShapeDescriptor::batch_data(1))]);
        output.plan_output(&mut plan, &upstream).unwrap();

        let Component::Object(o) = &output else { panic!("expected object") };
        let Component::Sequence(s) = &o.children[0].1 else { panic!("expected sequence") };
        assert!(s.is_generative());
    }

    #[test]
    fn test_generated_length_is_bounded() {
        let device = Default::default();
        let mut registry = NameRegistry::default();
        let mut output = tree(json!({
            "type": "array",
            "items": {"type": "number"},
            "configuration": {"component": {
                "enforceSequenceLengthLimit": true,
                "maxSequenceLength": 3,
                "decoderLayers": [{"name": "gru", "outputSize": 4}]
            }}
        }), "output", &mut registry);

        let mut plan = NetworkPlan::default();
        let upstream = ShapeMap::from([("x".to_string(), ShapeDescriptor::batch_data(2))]);
        output.plan_output(&mut plan, &upstream).unwrap();
        let Component::Sequence(s) = &output else { panic!("expected sequence") };
        assert!(s.is_generative());

        let net: SchemaNetwork<TestBackend> = plan.init(&device);
        let x = ShapedTensor::new(matrix::<TestBackend>(vec![0.5, -0.5, 1.0, 2.0], 2, 2, &device), vec![2], ShapeDescriptor::batch_data(2));
        let outputs = output.output_stack(&net, &TensorMap::from([("x".to_string(), x)])).unwrap();
        let steps = outputs["output__exists__"].extents[0];
        assert!((1..=3).contains(&steps));

        let host = download(&outputs, 2).unwrap();
        assert!(lengths(&output.convert_output_out(&host, 2).unwrap()).iter().all(|&n| n <= 3));
    }

    #[test]
    fn test_zero_existence_decodes_to_empty_lists() {
        let mut registry = NameRegistry::default();
        let c = tree(numbers(), "output", &mut registry);
        let mut decoded = BatchArtifact::new(2);
        decoded.insert("output__exists__", NumericArray::new(vec![1, 2, 1], vec![0.0, 0.3], 0.0));
        decoded.insert("output__array_", NumericArray::new(vec![1, 2, 1], vec![4.0, 5.0], 0.0));
        assert_eq!(c.convert_output_out(&decoded, 2).unwrap(), vec![json!([]), json!([])]);
    }

    #[test]
    fn test_criterion_truncates_to_shorter_side() {
        let device = Default::default();
        let mut registry = NameRegistry::default();
        let mut c = tree(numbers(), "output", &mut registry);
        // expected lengths 4 and 2, produced 7 steps
        let targets = c
            .convert_output_in(&[json!([1.0, 1.0, 1.0, 1.0]), json!([1.0, 1.0])])
            .unwrap();
        let ones  = |rows| matrix::<TestBackend>(vec![1.0; rows], rows, 1, &device);
        let outputs = TensorMap::from([
            ("output__array_".to_string(), ShapedTensor::new(ones(14), vec![7, 2], ShapeDescriptor::time_batch_data(1))),
            ("output__exists__".to_string(), ShapedTensor::new(ones(14), vec![7, 2], ShapeDescriptor::time_batch_data(1))),
        ]);

        let losses = c.criterion_stack(&outputs, &targets).unwrap();
        // 4 per-step child losses + 1 existence loss
        assert_eq!(losses.len(), 5);
        // existence targets: 6 ones among 14 rows, every output is 1
        let existence = host_values(losses[4].clone()).unwrap()[0];
        assert!((existence - 8.0 / 14.0).abs() < 1e-6);
    }
}

// ============================================================
// Layer 5 — Elementary Network Builder
// ============================================================
// Turns a declarative layer list from a schema, e.g.
//
//   [{"name": "dense", "units": 300},
//    {"name": "elu"},
//    {"name": "dense", "units": "outputSize"}]
//
// into a PlannedNetwork: the resolved layer chain with parameter
// slots registered in the NetworkPlan, and its output width.
//
// Parameter values may be numbers, numeric strings, or names of
// template variables (`outputSize`, ...) resolved while planning.
// `sequenceLengths` is the one runtime template: the recurrent
// layers receive the per-example lengths at forward time.
//
// Three contexts:
//   FeedForward — rows only, no recurrent layers
//   Sequence    — [N, T, F], backward directions reverse each
//                 example within its own length
//   Step        — one autoregressive step, unidirectional cells
//                 carrying explicit state

use std::collections::BTreeMap;

use burn::{nn::lstm::LstmState, prelude::*, tensor::{activation, TensorData}};
use serde_json::Value;

use crate::domain::{
    config::UnknownLayerPolicy,
    error::{EngineError, Result},
    schema::LayerSpec,
};
use crate::ml::params::{NetworkPlan, SchemaNetwork};

/// Runtime template bound to the per-example sequence lengths.
pub const SEQUENCE_LENGTHS: &str = "sequenceLengths";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkContext {
    FeedForward,
    Sequence,
    Step,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Sigmoid,
    Tanh,
    Elu,
    Softplus,
    Softsign,
    Relu,
    Relu6,
    Crelu,
}

impl Activation {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sigmoid"  => Activation::Sigmoid,
            "tanh"     => Activation::Tanh,
            "elu"      => Activation::Elu,
            "softplus" => Activation::Softplus,
            "softsign" => Activation::Softsign,
            "relu"     => Activation::Relu,
            "relu6"    => Activation::Relu6,
            "crelu"    => Activation::Crelu,
            _          => return None,
        })
    }

    /// Output width for an input of width `w`.
    fn width(self, w: usize) -> usize {
        if self == Activation::Crelu { 2 * w } else { w }
    }

    pub fn apply<B: Backend, const D: usize>(self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Sigmoid  => activation::sigmoid(x),
            Activation::Tanh     => activation::tanh(x),
            Activation::Elu      => activation::relu(x.clone()) + x.clamp_max(0.0).exp() - 1.0,
            // relu(x) + log(1 + e^-|x|) never overflows
            Activation::Softplus => activation::relu(x.clone()) + x.abs().neg().exp().log1p(),
            Activation::Softsign => x.clone() / (x.abs() + 1.0),
            Activation::Relu     => activation::relu(x),
            Activation::Relu6    => activation::relu(x).clamp_max(6.0),
            Activation::Crelu    => Tensor::cat(vec![activation::relu(x.clone()), activation::relu(x.neg())], D - 1),
        }
    }
}

/// One resolved layer; numbers are slots in the NetworkPlan.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedLayer {
    Activation(Activation),
    Dropout(usize),
    Dense(usize),
    Lstm(usize),
    Gru(usize),
    BiLstm { forward: usize, backward: usize },
    BiGru { forward: usize, backward: usize },
}

impl PlannedLayer {
    fn is_recurrent(&self) -> bool {
        !matches!(self, PlannedLayer::Activation(_) | PlannedLayer::Dropout(_) | PlannedLayer::Dense(_))
    }
}

/// Planning-time template variables.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: BTreeMap<String, f64>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: usize) -> Self {
        self.values.insert(name.to_string(), value as f64);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// Recurrent state of one layer in a Step network.
#[derive(Debug, Clone)]
pub enum CellState<B: Backend> {
    Lstm { cell: Tensor<B, 2>, hidden: Tensor<B, 2> },
    Gru { hidden: Tensor<B, 2> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedNetwork {
    pub layers:       Vec<PlannedLayer>,
    pub context:      NetworkContext,
    pub input_width:  usize,
    pub output_width: usize,
}

// ─── Default layer lists ──────────────────────────────────────────────────────

/// Decoder head used when a leaf schema names no layers.
pub fn default_output_layers() -> Vec<LayerSpec> {
    vec![
        LayerSpec::new("dense").with("units", 300),
        LayerSpec::new("elu"),
        LayerSpec::new("dense").with("units", "outputSize"),
    ]
}

/// Sequence encoder used when an array schema names no layers.
pub fn default_sequence_layers() -> Vec<LayerSpec> {
    vec![LayerSpec::new("bidirectional_lstm").with("outputSize", 100)]
}

/// Step network used to generate a sequence without decoder layers.
pub fn default_decoder_layers() -> Vec<LayerSpec> {
    vec![LayerSpec::new("lstm").with("outputSize", 100)]
}

// ─── Planning ─────────────────────────────────────────────────────────────────

pub fn plan_network(
    specs:       &[LayerSpec],
    input_width: usize,
    context:     NetworkContext,
    vars:        &TemplateVars,
    policy:      UnknownLayerPolicy,
    plan:        &mut NetworkPlan,
) -> Result<PlannedNetwork> {
    let mut layers = Vec::with_capacity(specs.len());
    let mut width  = input_width;

    for spec in specs {
        let name = spec.name.as_str();

        if let Some(act) = Activation::from_name(name) {
            layers.push(PlannedLayer::Activation(act));
            width = act.width(width);
            continue;
        }

        let layer = match name {
            "dropout" => {
                let keep = param(spec, "keep_prob", vars)?;
                if !(0.0..=1.0).contains(&keep) || keep == 0.0 {
                    return Err(layer_error(spec, "keep_prob", format!("{keep} is not in (0, 1]")));
                }
                PlannedLayer::Dropout(plan.add_dropout(1.0 - keep))
            }
            "dense" => {
                let units = size_param(spec, "units", vars)?;
                let slot  = plan.add_linear(width, units);
                width = units;
                PlannedLayer::Dense(slot)
            }
            "lstm" | "gru" | "bidirectional_lstm" | "bidirectional_gru" => {
                if context == NetworkContext::FeedForward {
                    return Err(EngineError::unsupported(format!(
                        "recurrent layer '{name}' in a feed-forward network"
                    )));
                }
                let bidirectional = name.starts_with("bidirectional");
                if bidirectional && context == NetworkContext::Step {
                    return Err(EngineError::GenerativeModeUnsupported(format!(
                        "'{name}' cannot run one step at a time"
                    )));
                }
                let hidden = size_param(spec, "outputSize", vars)?;
                let layer = match name {
                    "lstm" => PlannedLayer::Lstm(plan.add_lstm(width, hidden)),
                    "gru"  => PlannedLayer::Gru(plan.add_gru(width, hidden)),
                    "bidirectional_lstm" => PlannedLayer::BiLstm {
                        forward:  plan.add_lstm(width, hidden),
                        backward: plan.add_lstm(width, hidden),
                    },
                    _ => PlannedLayer::BiGru {
                        forward:  plan.add_gru(width, hidden),
                        backward: plan.add_gru(width, hidden),
                    },
                };
                width = if bidirectional { 2 * hidden } else { hidden };
                layer
            }
            unknown => match policy {
                UnknownLayerPolicy::Skip => {
                    tracing::warn!("Unknown layer type '{}', skipping it", unknown);
                    continue;
                }
                UnknownLayerPolicy::Reject => return Err(EngineError::UnknownLayerKind(unknown.to_string())),
            },
        };
        layers.push(layer);
    }

    tracing::debug!("Planned {:?} network: {} layers, {} → {}", context, layers.len(), input_width, width);
    Ok(PlannedNetwork { layers, context, input_width, output_width: width })
}

/// Plan `specs` and, when the chain ends at the wrong width, add
/// a dense projection to `required`.
pub fn plan_head(
    specs:       &[LayerSpec],
    input_width: usize,
    required:    usize,
    policy:      UnknownLayerPolicy,
    plan:        &mut NetworkPlan,
) -> Result<PlannedNetwork> {
    let vars = TemplateVars::new().with("outputSize", required);
    let mut net = plan_network(specs, input_width, NetworkContext::FeedForward, &vars, policy, plan)?;
    if net.output_width != required {
        tracing::warn!(
            "Layer list ends at width {} but {} is needed, adding a projection",
            net.output_width, required
        );
        net.layers.push(PlannedLayer::Dense(plan.add_linear(net.output_width, required)));
        net.output_width = required;
    }
    Ok(net)
}

fn layer_error(spec: &LayerSpec, parameter: &str, reason: impl Into<String>) -> EngineError {
    EngineError::LayerParameter {
        layer:     spec.name.clone(),
        parameter: parameter.to_string(),
        reason:    reason.into(),
    }
}

fn param(spec: &LayerSpec, key: &str, vars: &TemplateVars) -> Result<f64> {
    match spec.params.get(key) {
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| layer_error(spec, key, "not a finite number")),
        Some(Value::String(s)) => {
            if let Some(v) = vars.get(s) {
                Ok(v)
            } else if s == SEQUENCE_LENGTHS {
                Err(layer_error(spec, key, "sequence lengths are only known at run time"))
            } else {
                s.trim()
                    .parse::<f64>()
                    .map_err(|_| layer_error(spec, key, format!("unknown template variable '{s}'")))
            }
        }
        Some(other) => Err(layer_error(spec, key, format!("unexpected value {other}"))),
        None        => Err(layer_error(spec, key, "missing")),
    }
}

fn size_param(spec: &LayerSpec, key: &str, vars: &TemplateVars) -> Result<usize> {
    let v = param(spec, key, vars)?;
    if v < 1.0 || v.fract() != 0.0 {
        return Err(layer_error(spec, key, format!("{v} is not a positive whole number")));
    }
    Ok(v as usize)
}

// ─── Forward passes ───────────────────────────────────────────────────────────

impl PlannedNetwork {
    /// Feed-forward pass over rows `[N, F]`.
    pub fn forward_rows<B: Backend>(&self, net: &SchemaNetwork<B>, x: Tensor<B, 2>) -> Result<Tensor<B, 2>> {
        let mut x = x;
        for layer in &self.layers {
            x = match layer {
                PlannedLayer::Activation(a) => a.apply(x),
                PlannedLayer::Dropout(slot) => net.dropouts[*slot].forward(x),
                PlannedLayer::Dense(slot)   => net.linears[*slot].forward(x),
                other => {
                    return Err(EngineError::unsupported(format!("{other:?} in a feed-forward pass")));
                }
            };
        }
        Ok(x)
    }

    /// Pass over `[N, T, F]` where example `n` has `lengths[n]` real steps.
    pub fn forward_sequence<B: Backend>(
        &self,
        net:     &SchemaNetwork<B>,
        x:       Tensor<B, 3>,
        lengths: &[usize],
    ) -> Result<Tensor<B, 3>> {
        let mut x = x;
        for layer in &self.layers {
            x = match layer {
                PlannedLayer::Activation(a) => a.apply(x),
                PlannedLayer::Dropout(slot) => net.dropouts[*slot].forward(x),
                PlannedLayer::Dense(slot)   => net.linears[*slot].forward(x),
                PlannedLayer::Lstm(slot)    => net.lstms[*slot].forward(x, None).0,
                PlannedLayer::Gru(slot)     => net.grus[*slot].forward(x, None),
                PlannedLayer::BiLstm { forward, backward } => {
                    let fwd = net.lstms[*forward].forward(x.clone(), None).0;
                    let rev = reverse_within_length(x, lengths);
                    let bwd = reverse_within_length(net.lstms[*backward].forward(rev, None).0, lengths);
                    Tensor::cat(vec![fwd, bwd], 2)
                }
                PlannedLayer::BiGru { forward, backward } => {
                    let fwd = net.grus[*forward].forward(x.clone(), None);
                    let rev = reverse_within_length(x, lengths);
                    let bwd = reverse_within_length(net.grus[*backward].forward(rev, None), lengths);
                    Tensor::cat(vec![fwd, bwd], 2)
                }
            };
        }
        Ok(x)
    }

    /// One autoregressive step over `[N, F]`. `states` holds one
    /// entry per recurrent layer in layer order (empty on the
    /// first step); the updated list is returned.
    pub fn step<B: Backend>(
        &self,
        net:    &SchemaNetwork<B>,
        x:      Tensor<B, 2>,
        states: Vec<CellState<B>>,
    ) -> Result<(Tensor<B, 2>, Vec<CellState<B>>)> {
        let mut previous = states.into_iter();
        let mut next     = Vec::new();
        let mut x        = x;

        for layer in &self.layers {
            x = match layer {
                PlannedLayer::Activation(a) => a.apply(x),
                PlannedLayer::Dropout(slot) => net.dropouts[*slot].forward(x),
                PlannedLayer::Dense(slot)   => net.linears[*slot].forward(x),
                PlannedLayer::Lstm(slot) => {
                    let state = match previous.next() {
                        Some(CellState::Lstm { cell, hidden }) => Some(LstmState::new(cell, hidden)),
                        _ => None,
                    };
                    let [n, w]       = x.dims();
                    let (out, state) = net.lstms[*slot].forward(x.reshape([n, 1, w]), state);
                    let h            = out.dims()[2];
                    next.push(CellState::Lstm { cell: state.cell, hidden: state.hidden });
                    out.reshape([n, h])
                }
                PlannedLayer::Gru(slot) => {
                    let state = match previous.next() {
                        Some(CellState::Gru { hidden }) => Some(hidden),
                        _ => None,
                    };
                    let [n, w] = x.dims();
                    let out    = net.grus[*slot].forward(x.reshape([n, 1, w]), state);
                    let h      = out.dims()[2];
                    let hidden = out.reshape([n, h]);
                    next.push(CellState::Gru { hidden: hidden.clone() });
                    hidden
                }
                other => {
                    return Err(EngineError::GenerativeModeUnsupported(format!("{other:?} in a step network")));
                }
            };
        }
        Ok((x, next))
    }

    pub fn recurrent_layers(&self) -> usize {
        self.layers.iter().filter(|l| l.is_recurrent()).count()
    }
}

/// Source position for every step of a sequence of `steps`
/// where the first `len` are real: `[len-1, ..., 0, len, ..., steps-1]`.
pub fn reversed_positions(len: usize, steps: usize) -> Vec<usize> {
    let len = len.min(steps);
    (0..steps).map(|s| if s < len { len - 1 - s } else { s }).collect()
}

/// Reverse each example's first `lengths[n]` steps, leaving padding in place.
pub fn reverse_within_length<B: Backend>(x: Tensor<B, 3>, lengths: &[usize]) -> Tensor<B, 3> {
    let [n, t, f] = x.dims();
    let mut index = Vec::with_capacity(n * t * f);
    for i in 0..n {
        let len = lengths.get(i).copied().unwrap_or(t);
        for src in reversed_positions(len, t) {
            index.extend(std::iter::repeat(src as f32).take(f));
        }
    }
    let index = Tensor::<B, 3>::from_data(TensorData::new(index, [n, t, f]), &x.device()).int();
    x.gather(1, index)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::tensor::host_values;
    use burn::backend::NdArray;
    use serde_json::json;

    type TestBackend = NdArray;

    fn specs(v: serde_json::Value) -> Vec<LayerSpec> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_widths_follow_the_catalogue() {
        let mut plan = NetworkPlan::default();
        let layers = specs(json!([
            {"name": "dense", "units": 8},
            {"name": "crelu"},
            {"name": "dropout", "keep_prob": 0.5},
            {"name": "bidirectional_gru", "outputSize": "3"}
        ]));
        let net = plan_network(&layers, 4, NetworkContext::Sequence, &TemplateVars::new(), UnknownLayerPolicy::Skip, &mut plan)
            .unwrap();
        assert_eq!(net.output_width, 6);
        assert_eq!(plan.linears[0].d_input, 4);
        assert_eq!(plan.grus.len(), 2);
        assert_eq!(plan.grus[0].d_input, 16);
        assert!((plan.dropouts[0] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_template_variable_is_resolved() {
        let mut plan = NetworkPlan::default();
        let vars = TemplateVars::new().with("outputSize", 3);
        let net = plan_network(&default_output_layers(), 10, NetworkContext::FeedForward, &vars, UnknownLayerPolicy::Skip, &mut plan)
            .unwrap();
        assert_eq!(net.output_width, 3);
        assert_eq!(plan.linears.len(), 2);
    }

    #[test]
    fn test_recurrent_layer_in_feed_forward_fails() {
        let mut plan = NetworkPlan::default();
        let err = plan_network(&default_decoder_layers(), 4, NetworkContext::FeedForward, &TemplateVars::new(), UnknownLayerPolicy::Skip, &mut plan)
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_bidirectional_layer_in_step_fails() {
        let mut plan = NetworkPlan::default();
        let err = plan_network(&default_sequence_layers(), 4, NetworkContext::Step, &TemplateVars::new(), UnknownLayerPolicy::Skip, &mut plan)
            .unwrap_err();
        assert!(matches!(err, EngineError::GenerativeModeUnsupported(_)));
    }

    #[test]
    fn test_unknown_layer_policy() {
        let layers = specs(json!([{"name": "maxout"}, {"name": "tanh"}]));
        let mut plan = NetworkPlan::default();
        let net = plan_network(&layers, 4, NetworkContext::FeedForward, &TemplateVars::new(), UnknownLayerPolicy::Skip, &mut plan)
            .unwrap();
        assert_eq!(net.layers, vec![PlannedLayer::Activation(Activation::Tanh)]);

        let err = plan_network(&layers, 4, NetworkContext::FeedForward, &TemplateVars::new(), UnknownLayerPolicy::Reject, &mut plan)
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownLayerKind(name) if name == "maxout"));
    }

    #[test]
    fn test_missing_parameter_is_reported() {
        let layers = specs(json!([{"name": "dense"}]));
        let mut plan = NetworkPlan::default();
        let err = plan_network(&layers, 4, NetworkContext::FeedForward, &TemplateVars::new(), UnknownLayerPolicy::Skip, &mut plan)
            .unwrap_err();
        assert!(matches!(err, EngineError::LayerParameter { .. }));
    }

    #[test]
    fn test_head_projects_to_required_width() {
        let layers = specs(json!([{"name": "dense", "units": 7}]));
        let mut plan = NetworkPlan::default();
        let net = plan_head(&layers, 4, 2, UnknownLayerPolicy::Skip, &mut plan).unwrap();
        assert_eq!(net.output_width, 2);
        assert_eq!(plan.linears.len(), 2);
    }

    #[test]
    fn test_reversed_positions() {
        assert_eq!(reversed_positions(3, 5), vec![2, 1, 0, 3, 4]);
        assert_eq!(reversed_positions(0, 2), vec![0, 1]);
    }

    #[test]
    fn test_reverse_within_length_keeps_padding() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::from_data(TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3, 1]), &device);
        let r = reverse_within_length(x, &[2, 3]);
        assert_eq!(host_values(r).unwrap(), vec![2.0, 1.0, 3.0, 6.0, 5.0, 4.0]);
    }

    #[test]
    fn test_activations() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![-1.0f32, 8.0], [1, 2]), &device);
        let relu6 = host_values(Activation::Relu6.apply(x.clone())).unwrap();
        assert_eq!(relu6, vec![0.0, 6.0]);
        let crelu = Activation::Crelu.apply(x.clone());
        assert_eq!(crelu.dims(), [1, 4]);
        let softsign = host_values(Activation::Softsign.apply(x.clone())).unwrap();
        assert!((softsign[0] + 0.5).abs() < 1e-6);
        let elu = host_values(Activation::Elu.apply(x)).unwrap();
        assert!((elu[0] - ((-1.0f32).exp() - 1.0)).abs() < 1e-6);
        assert!((elu[1] - 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_sequence_and_step_forward_shapes() {
        let device = Default::default();
        let mut plan = NetworkPlan::default();
        let encoder = plan_network(&default_sequence_layers(), 3, NetworkContext::Sequence, &TemplateVars::new(), UnknownLayerPolicy::Skip, &mut plan)
            .unwrap();
        let layers  = specs(json!([{"name": "gru", "outputSize": 4}, {"name": "lstm", "outputSize": 5}]));
        let decoder = plan_network(&layers, 3, NetworkContext::Step, &TemplateVars::new(), UnknownLayerPolicy::Skip, &mut plan)
            .unwrap();
        let net: SchemaNetwork<TestBackend> = plan.init(&device);

        let x = Tensor::<TestBackend, 3>::zeros([2, 4, 3], &device);
        let y = encoder.forward_sequence(&net, x, &[4, 1]).unwrap();
        assert_eq!(y.dims(), [2, 4, 200]);

        let step_in = Tensor::<TestBackend, 2>::zeros([2, 3], &device);
        let (h, states) = decoder.step(&net, step_in.clone(), Vec::new()).unwrap();
        assert_eq!(h.dims(), [2, 5]);
        assert_eq!(states.len(), decoder.recurrent_layers());
        assert!(matches!(states[0], CellState::Gru { .. }));
        assert!(matches!(states[1], CellState::Lstm { .. }));
        let (h2, states) = decoder.step(&net, step_in, states).unwrap();
        assert_eq!(h2.dims(), [2, 5]);
        assert_eq!(states.len(), 2);
    }
}

// ============================================================
// Layer 5 — Leaf Output Head and Losses
// ============================================================
// Every output leaf decodes the same way:
//
//   upstream TensorMap ─► summary (keep batch only) ─► head ─► [B, W]
//
// where the head is the leaf's layer list (or the default
// dense 300 → elu → dense W) planned as a feed-forward network.
// The losses shared by the leaves live here as well.

use burn::{
    nn::loss::{MseLoss, Reduction},
    prelude::*,
    tensor::activation,
};

use crate::data::artifact::NumericArray;
use crate::domain::{
    config::UnknownLayerPolicy,
    error::{EngineError, Result, SchemaError},
    schema::{LayerSpec, SchemaNode},
    shape::ShapeDescriptor,
};
use crate::ml::{
    network::{default_output_layers, plan_head, PlannedNetwork},
    params::{NetworkPlan, SchemaNetwork},
    summary::{summarize, summary_shape},
    tensor::{matrix, ShapeMap, ShapedTensor, TensorMap},
};

#[derive(Debug, Clone)]
pub struct OutputHead {
    layers:  Vec<LayerSpec>,
    width:   usize,
    network: Option<PlannedNetwork>,
}

impl OutputHead {
    pub fn new(node: &SchemaNode, width: usize) -> Self {
        let layers = node.component().layers.clone().unwrap_or_else(default_output_layers);
        Self { layers, width, network: None }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn plan(&mut self, plan: &mut NetworkPlan, upstream: &ShapeMap, policy: UnknownLayerPolicy) -> Result<ShapeDescriptor> {
        let shapes: Vec<&ShapeDescriptor> = upstream.values().collect();
        let context = summary_shape(&shapes, 0)?;
        self.network = Some(plan_head(&self.layers, context.data_width(), self.width, policy, plan)?);
        Ok(ShapeDescriptor::batch_data(self.width))
    }

    pub fn forward<B: Backend>(&self, net: &SchemaNetwork<B>, upstream: &TensorMap<B>) -> Result<ShapedTensor<B>> {
        let network = self
            .network
            .as_ref()
            .ok_or_else(|| EngineError::unsupported("output head used before planning"))?;
        let inputs: Vec<&ShapedTensor<B>> = upstream.values().collect();
        let context = summarize(&inputs, 0)?;
        let out     = network.forward_rows(net, context.tensor)?;
        Ok(ShapedTensor::new(out, context.extents, ShapeDescriptor::batch_data(self.width)))
    }
}

// ─── Losses ───────────────────────────────────────────────────────────────────

/// Output tensor `name`, or MissingArray.
pub fn output<'a, B: Backend>(outputs: &'a TensorMap<B>, name: &str) -> Result<&'a ShapedTensor<B>> {
    outputs
        .get(name)
        .ok_or_else(|| SchemaError::MissingArray { name: name.to_string() }.into())
}

/// Upload a host target with the same `[rows, width]` layout as `out`.
pub fn target_like<B: Backend>(out: &ShapedTensor<B>, target: &NumericArray) -> Result<Tensor<B, 2>> {
    let rows  = out.rows();
    let width = out.width();
    if target.data.len() != rows * width {
        return Err(EngineError::mismatch(
            format!("{rows} rows of width {width}"),
            format!("target of shape {:?}", target.shape),
        ));
    }
    Ok(matrix(target.data.clone(), rows, width, &out.device()))
}

pub fn mean_squared_error<B: Backend>(out: Tensor<B, 2>, target: Tensor<B, 2>) -> Tensor<B, 1> {
    MseLoss::new().forward(out, target, Reduction::Mean)
}

/// Softmax cross-entropy against one-hot targets. All-zero target
/// rows (missing labels) contribute nothing.
pub fn cross_entropy<B: Backend>(logits: Tensor<B, 2>, one_hot: Tensor<B, 2>) -> Tensor<B, 1> {
    let log_probs = activation::log_softmax(logits, 1);
    (one_hot * log_probs).sum_dim(1).neg().mean()
}

/// Row `i` of a `[rows, width]` host array.
pub fn host_row(array: &NumericArray, i: usize) -> &[f32] {
    let width = array.row_width().max(1);
    &array.data[i * width..((i + 1) * width).min(array.data.len())]
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::tensor::host_values;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_cross_entropy_ignores_missing_rows() {
        let device = Default::default();
        let logits  = matrix::<TestBackend>(vec![0.0, 0.0, 5.0, -5.0], 2, 2, &device);
        let one_hot = matrix::<TestBackend>(vec![1.0, 0.0, 0.0, 0.0], 2, 2, &device);
        let loss = host_values(cross_entropy(logits, one_hot)).unwrap();
        // ln 2 on the first row, nothing on the second, averaged over 2 rows
        assert!((loss[0] - std::f32::consts::LN_2 / 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_mse() {
        let device = Default::default();
        let a = matrix::<TestBackend>(vec![1.0, 3.0], 2, 1, &device);
        let b = matrix::<TestBackend>(vec![0.0, 1.0], 2, 1, &device);
        let loss = host_values(mean_squared_error(a, b)).unwrap();
        assert!((loss[0] - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_host_row() {
        let a = NumericArray::new(vec![2, 3], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0], 0.0);
        assert_eq!(host_row(&a, 1), &[3.0, 4.0, 5.0]);
    }
}

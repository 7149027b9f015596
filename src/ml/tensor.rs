// ============================================================
// Layer 5 — Shaped Tensors
// ============================================================
// Burn tensors have a compile-time rank, but the rank of a
// schema variable depends on how deeply it is nested inside
// sequences. Every tensor flowing between components is
// therefore kept as a 2-D matrix
//
//   [rows, width]     rows = product of the leading [Time..., Batch] extents
//
// together with the runtime extents of those leading axes and
// its ShapeDescriptor. Reshaping to a fixed rank only happens
// locally (e.g. the recurrent encoder works on [N, T, F]).

use std::collections::BTreeMap;

use burn::{prelude::*, tensor::TensorData};

use crate::data::artifact::{padding_index, BatchArtifact, NumericArray};
use crate::domain::{
    error::{EngineError, Result, ShapeError},
    shape::{AxisName, DimSize, ShapeDescriptor},
};

/// Tensors keyed by machine path (encoder side) or machine name (decoder side).
pub type TensorMap<B> = BTreeMap<String, ShapedTensor<B>>;

/// Shape-only mirror of a TensorMap, used while planning.
pub type ShapeMap = BTreeMap<String, ShapeDescriptor>;

#[derive(Debug, Clone)]
pub struct ShapedTensor<B: Backend> {
    pub tensor:  Tensor<B, 2>,
    pub extents: Vec<usize>,
    pub shape:   ShapeDescriptor,
}

impl<B: Backend> ShapedTensor<B> {
    pub fn new(tensor: Tensor<B, 2>, extents: Vec<usize>, shape: ShapeDescriptor) -> Self {
        Self { tensor, extents, shape }
    }

    /// Upload a host array. The descriptor's leading rank decides
    /// how many array axes become rows; the rest are flattened into
    /// the width.
    pub fn from_array(array: &NumericArray, shape: ShapeDescriptor, device: &B::Device) -> Result<Self> {
        let lead = shape.leading_rank();
        if array.rank() < lead {
            return Err(ShapeError::Rank {
                name:     shape.to_string(),
                expected: lead,
                got:      array.rank(),
            }
            .into());
        }
        let extents = array.shape[..lead].to_vec();
        let rows    = extents.iter().product::<usize>();
        let width   = array.shape[lead..].iter().product::<usize>();
        if rows * width != array.data.len() {
            return Err(ShapeError::Mismatch {
                expected: format!("{} values", rows * width),
                got:      array.data.len().to_string(),
            }
            .into());
        }
        let tensor  = Tensor::from_data(TensorData::new(array.data.clone(), [rows, width]), device);
        Ok(Self { tensor, extents, shape })
    }

    /// Download into a host array of shape `extents + [width]`.
    pub fn to_array(&self) -> Result<NumericArray> {
        let mut shape = self.extents.clone();
        shape.push(self.width());
        Ok(NumericArray::new(shape, host_values(self.tensor.clone())?, 0.0))
    }

    pub fn rows(&self) -> usize {
        self.extents.iter().product()
    }

    pub fn width(&self) -> usize {
        self.tensor.dims()[1]
    }

    pub fn device(&self) -> B::Device {
        self.tensor.device()
    }

    /// Rows of index `t` on the leading time axis.
    pub fn time_step(&self, t: usize) -> Result<Self> {
        let steps = match self.shape.leading() {
            Some(d) if d.name == AxisName::Time => self.extents[0],
            _ => return Err(ShapeError::NoTimeAxis { shape: self.shape.clone(), axis: 0 }.into()),
        };
        if t >= steps {
            return Err(EngineError::mismatch(format!("time index < {steps}"), t));
        }
        let per    = self.rows() / steps;
        let width  = self.width();
        let tensor = self.tensor.clone().slice([t * per..(t + 1) * per, 0..width]);
        Ok(Self {
            tensor,
            extents: self.extents[1..].to_vec(),
            shape:   self.shape.remove_time_axis(0)?,
        })
    }

    /// Grow the leading extents to `target`; new rows are zero.
    pub fn pad_extents(&self, target: &[usize]) -> Self {
        if self.extents == target {
            return self.clone();
        }
        let device  = self.device();
        let width   = self.width();
        let zero    = self.rows();
        let source  = Tensor::cat(vec![self.tensor.clone(), Tensor::zeros([1, width], &device)], 0);
        let index: Vec<f32> = padding_index(&self.extents, target)
            .into_iter()
            .map(|i| i.unwrap_or(zero) as f32)
            .collect();
        let n       = index.len();
        let index   = Tensor::<B, 1>::from_data(TensorData::new(index, [n]), &device).int();
        Self {
            tensor:  source.select(0, index),
            extents: target.to_vec(),
            shape:   self.shape.clone(),
        }
    }

    /// Stack per-step tensors on a new leading time axis, padding
    /// ragged inner extents with zero rows.
    pub fn stack_time(steps: Vec<Self>) -> Result<Self> {
        let first = steps.first().ok_or(ShapeError::Empty)?;
        let mut target = first.extents.clone();
        for s in &steps {
            if s.extents.len() != target.len() || s.width() != first.width() {
                return Err(EngineError::mismatch(&first.shape, &s.shape));
            }
            for (t, e) in target.iter_mut().zip(&s.extents) {
                *t = (*t).max(*e);
            }
        }
        let shape   = first.shape.push_dimension(DimSize::Variable, AxisName::Time);
        let mut extents = vec![steps.len()];
        extents.extend(target.iter().copied());
        let parts: Vec<Tensor<B, 2>> = steps.iter().map(|s| s.pad_extents(&target).tensor).collect();
        Ok(Self { tensor: Tensor::cat(parts, 0), extents, shape })
    }

    /// Zero every row whose flag is 0. `mask` is a width-1 tensor
    /// with the same rows.
    pub fn masked(self, mask: &Tensor<B, 2>) -> Self {
        let [rows, width] = self.tensor.dims();
        let tensor = self.tensor * mask.clone().expand([rows, width]);
        Self { tensor, ..self }
    }
}

/// Column vector `[n, 1]` built from host values.
pub fn column<B: Backend>(values: Vec<f32>, device: &B::Device) -> Tensor<B, 2> {
    let n = values.len();
    Tensor::from_data(TensorData::new(values, [n, 1]), device)
}

/// Matrix `[rows, width]` built from host values.
pub fn matrix<B: Backend>(values: Vec<f32>, rows: usize, width: usize, device: &B::Device) -> Tensor<B, 2> {
    Tensor::from_data(TensorData::new(values, [rows, width]), device)
}

/// Read any float tensor back to the host.
pub fn host_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| EngineError::Tensor(format!("{e:?}")))
}

/// Download a whole tensor map into a batch of host arrays.
pub fn download<B: Backend>(tensors: &TensorMap<B>, batch_size: usize) -> Result<BatchArtifact> {
    let mut out = BatchArtifact::new(batch_size);
    for (name, t) in tensors {
        out.insert(name.clone(), t.to_array()?);
    }
    Ok(out)
}

/// Entries of `map` whose key is in `names`.
pub fn select<B: Backend>(map: &TensorMap<B>, names: &[String]) -> TensorMap<B> {
    names
        .iter()
        .filter_map(|n| map.get(n).map(|t| (n.clone(), t.clone())))
        .collect()
}

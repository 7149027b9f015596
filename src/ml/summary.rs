// ============================================================
// Layer 5 — Summary Reducer
// ============================================================
// Collapses a set of tensors into one flat matrix per example
// (or per example and outer time step) so a dense or recurrent
// network can consume them.
//
//   keep = 0 : [T, T, B, 4] + [B, 3]  →  [B, 7]
//   keep = 1 : [T, T, B, 4] + [T, B, 3]  →  [T·B, 7]
//
// Every leading axis at position ≥ keep other than the batch
// axis is summed away. Padded positions are zero, so sums only
// see real items.

use burn::prelude::*;

use crate::domain::{
    error::{Result, ShapeError},
    shape::ShapeDescriptor,
};
use crate::ml::tensor::ShapedTensor;

/// Reduce and concatenate along the feature axis.
pub fn summarize<B: Backend>(inputs: &[&ShapedTensor<B>], keep: usize) -> Result<ShapedTensor<B>> {
    if inputs.is_empty() {
        return Err(ShapeError::EmptySummary.into());
    }

    let mut parts   = Vec::with_capacity(inputs.len());
    let mut extents: Option<Vec<usize>> = None;

    for input in inputs {
        let (reduced, kept) = reduce(input, keep)?;
        match &extents {
            Some(e) if *e != kept => {
                return Err(ShapeError::Mismatch {
                    expected: format!("{e:?}"),
                    got:      format!("{kept:?}"),
                }
                .into())
            }
            Some(_) => {}
            None => extents = Some(kept),
        }
        parts.push(reduced);
    }

    let extents = extents.unwrap_or_default();
    let tensor  = Tensor::cat(parts, 1);
    let width   = tensor.dims()[1];
    let shape   = ShapeDescriptor::nested(keep, width);
    Ok(ShapedTensor::new(tensor, extents, shape))
}

/// Shape-only counterpart of `summarize`, used while planning.
pub fn summary_shape(inputs: &[&ShapeDescriptor], keep: usize) -> Result<ShapeDescriptor> {
    if inputs.is_empty() {
        return Err(ShapeError::EmptySummary.into());
    }
    for s in inputs {
        if s.leading_rank() < keep + 1 {
            return Err(ShapeError::Mismatch {
                expected: format!("at least {} leading axes", keep + 1),
                got:      s.to_string(),
            }
            .into());
        }
    }
    let width = inputs.iter().map(|s| s.summarized(keep).data_width()).sum();
    Ok(ShapeDescriptor::nested(keep, width))
}

fn reduce<B: Backend>(input: &ShapedTensor<B>, keep: usize) -> Result<(Tensor<B, 2>, Vec<usize>)> {
    let lead = input.extents.len();
    if lead < keep + 1 {
        return Err(ShapeError::Mismatch {
            expected: format!("at least {} leading axes", keep + 1),
            got:      input.shape.to_string(),
        }
        .into());
    }

    let prefix: usize = input.extents[..keep].iter().product();
    let middle: usize = input.extents[keep..lead - 1].iter().product();
    let batch         = input.extents[lead - 1];
    let width         = input.width();

    let mut kept = input.extents[..keep].to_vec();
    kept.push(batch);

    if middle == 1 {
        return Ok((input.tensor.clone(), kept));
    }

    // Row index is ((p·M) + m)·B + b, so [P, M, B·W] is a pure reshape.
    let summed = input
        .tensor
        .clone()
        .reshape([prefix, middle, batch * width])
        .sum_dim(1)
        .reshape([prefix * batch, width]);
    Ok((summed, kept))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::artifact::NumericArray;
    use crate::ml::tensor::host_values;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn shaped(shape: Vec<usize>, data: Vec<f32>, depth: usize) -> ShapedTensor<TestBackend> {
        let width = shape[depth + 1..].iter().product();
        let array = NumericArray::new(shape, data, 0.0);
        ShapedTensor::from_array(&array, ShapeDescriptor::nested(depth, width), &Default::default()).unwrap()
    }

    #[test]
    fn test_summary_sums_time_and_concatenates() {
        // [T=2, B=2, 1]: per-example sums are 1+3 and 2+4
        let seq   = shaped(vec![2, 2, 1], vec![1.0, 2.0, 3.0, 4.0], 1);
        let plain = shaped(vec![2, 2], vec![10.0, 20.0, 30.0, 40.0], 0);
        let out   = summarize(&[&seq, &plain], 0).unwrap();
        assert_eq!(out.extents, vec![2]);
        assert_eq!(out.width(), 3);
        assert_eq!(host_values(out.tensor).unwrap(), vec![4.0, 10.0, 20.0, 6.0, 30.0, 40.0]);
    }

    #[test]
    fn test_summary_keeps_outer_time_axis() {
        // [T=2, T=2, B=1, 1], keep the outer time axis
        let nested = shaped(vec![2, 2, 1, 1], vec![1.0, 2.0, 3.0, 4.0], 2);
        let out    = summarize(&[&nested], 1).unwrap();
        assert_eq!(out.extents, vec![2, 1]);
        assert_eq!(host_values(out.tensor).unwrap(), vec![3.0, 7.0]);
    }

    #[test]
    fn test_summary_rejects_mismatched_batches() {
        let a = shaped(vec![2], vec![1.0, 2.0], 0);
        let b = shaped(vec![3], vec![1.0, 2.0, 3.0], 0);
        assert!(summarize(&[&a, &b], 0).is_err());
    }

    #[test]
    fn test_empty_summary_fails() {
        let inputs: Vec<&ShapedTensor<TestBackend>> = Vec::new();
        assert!(matches!(
            summarize(&inputs, 0),
            Err(crate::domain::error::EngineError::Shape(ShapeError::EmptySummary))
        ));
        assert!(summary_shape(&[], 0).is_err());
    }

    #[test]
    fn test_summary_shape_width() {
        let a = ShapeDescriptor::nested(2, 4);
        let b = ShapeDescriptor::batch_data(3);
        assert_eq!(summary_shape(&[&a, &b], 0).unwrap(), ShapeDescriptor::batch_data(7));
    }
}

// ============================================================
// Layer 4 — Batch Artifact
// ============================================================
// Host-side numeric arrays produced by the `convert_*_in`
// conversions, keyed by machine name:
//
//   input_score              [batch]
//   input_tokens__length__   [batch]
//   input_tokens__exists__   [time, batch]
//   input_tokens_array_word  [time, batch, 50]
//
// A prepared batch is written to disk as JSON so batch
// preparation and training can run as separate driver stages.
//
// Arrays are row-major. Stacking arrays of different extents
// pads every missing position with the array's fill value
// (-1 for class indices, 0 for everything else).

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::{
    error::{SchemaError, ShapeError},
    traits::Persistable,
};

// ─── NumericArray ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericArray {
    pub shape: Vec<usize>,
    pub data:  Vec<f32>,
    #[serde(default)]
    pub fill:  f32,
}

impl NumericArray {
    pub fn new(shape: Vec<usize>, data: Vec<f32>, fill: f32) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), data.len());
        Self { shape, data, fill }
    }

    /// One-dimensional array, one value per example.
    pub fn vector(values: Vec<f32>, fill: f32) -> Self {
        Self::new(vec![values.len()], values, fill)
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Fails when `data` does not hold exactly one value per
    /// position of `shape`.
    pub fn validate(&self) -> Result<(), ShapeError> {
        let expected = self.shape.iter().product::<usize>();
        if expected != self.data.len() {
            return Err(ShapeError::Mismatch {
                expected: format!("{expected} values for shape {:?}", self.shape),
                got:      self.data.len().to_string(),
            });
        }
        Ok(())
    }

    /// Extent of the leading axis (0 for a scalar).
    pub fn leading(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Number of values under one index of the leading axis.
    pub fn row_width(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    /// Sub-array at index `i` of the leading axis.
    pub fn index_leading(&self, i: usize) -> Result<Self, ShapeError> {
        if i >= self.leading() {
            return Err(ShapeError::Mismatch {
                expected: format!("leading index < {}", self.leading()),
                got:      i.to_string(),
            });
        }
        let width = self.row_width();
        Ok(Self {
            shape: self.shape[1..].to_vec(),
            data:  self.data[i * width..(i + 1) * width].to_vec(),
            fill:  self.fill,
        })
    }

    /// Grow every axis to `target`, writing the fill value into new positions.
    pub fn pad_to(&self, target: &[usize]) -> Self {
        if self.shape == target {
            return self.clone();
        }
        let data = padding_index(&self.shape, target)
            .into_iter()
            .map(|src| src.map_or(self.fill, |i| self.data[i]))
            .collect();
        Self { shape: target.to_vec(), data, fill: self.fill }
    }

    /// Stack arrays of equal rank on a new leading axis, padding
    /// every axis to the largest extent found.
    pub fn stack(arrays: &[NumericArray]) -> Result<Self, ShapeError> {
        let first = arrays.first().ok_or(ShapeError::Empty)?;
        let mut target = first.shape.clone();
        for a in arrays {
            if a.rank() != target.len() {
                return Err(ShapeError::Rank {
                    name:     "stacked array".to_string(),
                    expected: target.len(),
                    got:      a.rank(),
                });
            }
            for (t, e) in target.iter_mut().zip(&a.shape) {
                *t = (*t).max(*e);
            }
        }

        let mut data = Vec::with_capacity(arrays.len() * target.iter().product::<usize>());
        for a in arrays {
            data.extend(a.pad_to(&target).data);
        }
        let mut shape = vec![arrays.len()];
        shape.extend(target);
        Ok(Self { shape, data, fill: first.fill })
    }
}

/// For every row-major position of `target`, the flat index of the
/// same coordinates inside `old`, or None when they fall outside it.
pub fn padding_index(old: &[usize], target: &[usize]) -> Vec<Option<usize>> {
    let total: usize = target.iter().product();
    let mut out    = Vec::with_capacity(total);
    let mut coords = vec![0usize; target.len()];

    for _ in 0..total {
        let inside = coords.iter().zip(old).all(|(c, o)| c < o) && old.len() == target.len();
        out.push(inside.then(|| coords.iter().zip(old).fold(0, |acc, (c, o)| acc * o + c)));

        for axis in (0..coords.len()).rev() {
            coords[axis] += 1;
            if coords[axis] < target[axis] {
                break;
            }
            coords[axis] = 0;
        }
    }
    out
}

// ─── BatchArtifact ────────────────────────────────────────────────────────────
/// Named arrays for one batch, plus string labels (example ids).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchArtifact {
    pub batch_size: usize,
    pub arrays:     BTreeMap<String, NumericArray>,
    #[serde(default)]
    pub labels:     BTreeMap<String, Vec<String>>,
}

impl BatchArtifact {
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size, ..Self::default() }
    }

    pub fn insert(&mut self, name: impl Into<String>, array: NumericArray) {
        self.arrays.insert(name.into(), array);
    }

    pub fn get(&self, name: &str) -> Result<&NumericArray, SchemaError> {
        self.arrays
            .get(name)
            .ok_or_else(|| SchemaError::MissingArray { name: name.to_string() })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.arrays.contains_key(name)
    }

    pub fn set_labels(&mut self, name: impl Into<String>, labels: Vec<String>) {
        self.labels.insert(name.into(), labels);
    }

    pub fn labels(&self, name: &str) -> &[String] {
        self.labels.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Fold another batch's arrays and labels into this one.
    pub fn merge(&mut self, other: BatchArtifact) {
        self.batch_size = self.batch_size.max(other.batch_size);
        self.arrays.extend(other.arrays);
        self.labels.extend(other.labels);
    }

    /// Check every array against its own shape.
    pub fn validate(&self) -> Result<(), ShapeError> {
        for (name, array) in &self.arrays {
            array.validate().map_err(|e| match e {
                ShapeError::Mismatch { expected, got } => ShapeError::Mismatch {
                    expected: format!("{expected} in '{name}'"),
                    got,
                },
                other => other,
            })?;
        }
        Ok(())
    }

    /// Key-wise stack of per-step artifacts on a new leading time axis.
    pub fn stack_steps(steps: &[BatchArtifact], batch_size: usize) -> Result<Self, ShapeError> {
        let mut out = Self::new(batch_size);
        let Some(first) = steps.first() else {
            return Ok(out);
        };
        for name in first.arrays.keys() {
            let column: Vec<NumericArray> = steps
                .iter()
                .filter_map(|s| s.arrays.get(name).cloned())
                .collect();
            out.insert(name.clone(), NumericArray::stack(&column)?);
        }
        Ok(out)
    }

    /// The arrays named in `names`, each indexed at `t` on its
    /// leading axis. Names absent from this batch are skipped.
    pub fn slice_leading(&self, names: &[String], t: usize) -> Result<Self, ShapeError> {
        let mut out = Self::new(self.batch_size);
        for name in names {
            if let Some(array) = self.arrays.get(name) {
                out.insert(name.clone(), array.index_leading(t)?);
            }
        }
        Ok(out)
    }
}

impl Persistable for BatchArtifact {
    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(self)?;
        fs::write(path, json)
            .with_context(|| format!("Cannot write batch to '{}'", path.display()))?;
        tracing::debug!("Saved batch of {} ({} arrays) to '{}'", self.batch_size, self.arrays.len(), path.display());
        Ok(())
    }

    fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read batch from '{}'", path.display()))?;
        let batch: Self = serde_json::from_str(&json)
            .with_context(|| format!("'{}' is not a batch file", path.display()))?;
        batch
            .validate()
            .with_context(|| format!("Corrupt batch file '{}'", path.display()))?;
        Ok(batch)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_index_marks_new_positions() {
        let idx = padding_index(&[1, 2], &[2, 3]);
        assert_eq!(idx, vec![Some(0), Some(1), None, None, None, None]);
    }

    #[test]
    fn test_stack_pads_ragged_arrays_with_fill() {
        let a = NumericArray::new(vec![1, 2], vec![1.0, 2.0], -1.0);
        let b = NumericArray::new(vec![2, 2], vec![3.0, 4.0, 5.0, 6.0], -1.0);
        let s = NumericArray::stack(&[a, b]).unwrap();
        assert_eq!(s.shape, vec![2, 2, 2]);
        assert_eq!(s.data, vec![1.0, 2.0, -1.0, -1.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_stack_rejects_rank_mismatch() {
        let a = NumericArray::vector(vec![1.0], 0.0);
        let b = NumericArray::new(vec![1, 1], vec![1.0], 0.0);
        assert!(matches!(NumericArray::stack(&[a, b]), Err(ShapeError::Rank { .. })));
    }

    #[test]
    fn test_index_leading() {
        let a = NumericArray::new(vec![3, 2], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0], 0.0);
        let row = a.index_leading(1).unwrap();
        assert_eq!(row.shape, vec![2]);
        assert_eq!(row.data, vec![2.0, 3.0]);
        assert!(a.index_leading(3).is_err());
    }

    #[test]
    fn test_missing_array_is_reported_by_name() {
        let batch = BatchArtifact::new(2);
        assert_eq!(batch.get("input_x"), Err(SchemaError::MissingArray { name: "input_x".to_string() }));
    }

    #[test]
    fn test_save_and_load_batch() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("batches").join("batch_0.json");

        let mut batch = BatchArtifact::new(2);
        batch.insert("input_x", NumericArray::vector(vec![0.5, 1.5], 0.0));
        batch.set_labels("primaryIds", vec!["a".to_string(), "b".to_string()]);
        batch.save(&path).unwrap();

        let loaded = BatchArtifact::load(&path).unwrap();
        assert_eq!(loaded, batch);
        assert_eq!(loaded.labels("primaryIds"), &["a", "b"]);
    }

    #[test]
    fn test_load_rejects_data_shorter_than_shape() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.json");
        fs::write(&path, r#"{"batch_size": 2, "arrays": {"input_x": {"shape": [2], "data": [1.0]}}}"#).unwrap();

        let err = BatchArtifact::load(&path).unwrap_err();
        let shape_err = err.downcast_ref::<ShapeError>().unwrap();
        assert!(matches!(shape_err, ShapeError::Mismatch { .. }));
        assert!(format!("{err:#}").contains("input_x"));
    }
}

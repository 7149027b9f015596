// ============================================================
// Layer 3 — Shape Descriptor
// ============================================================
// Labeled-dimension shape metadata for the tensors flowing
// between components. Pure value type, no tensor dependency.
//
// Every tensor in the engine has the layout
//
//   [Time..., Batch, Data]
//
// where the leading Time/Batch axes have a variable size that
// is only known per batch, and the trailing Data axis has a
// fixed width decided when the graph is planned.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::error::ShapeError;

/// Size of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DimSize {
    Fixed(usize),
    Variable,
}

impl DimSize {
    pub fn is_variable(self) -> bool {
        matches!(self, DimSize::Variable)
    }
}

/// Role of one axis. `Batch`, `Time` and `Data` are reserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisName {
    Batch,
    Time,
    Data,
    Named(String),
}

impl fmt::Display for AxisName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisName::Batch     => write!(f, "batch"),
            AxisName::Time      => write!(f, "time"),
            AxisName::Data      => write!(f, "data"),
            AxisName::Named(n)  => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimension {
    pub size: DimSize,
    pub name: AxisName,
}

/// Ordered list of labeled axes.
///
/// `push_dimension` and `pop_dimension` return a new descriptor
/// with the leading axis added or removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ShapeDescriptor {
    dims: Vec<Dimension>,
}

impl ShapeDescriptor {
    pub fn new(dims: Vec<Dimension>) -> Self {
        Self { dims }
    }

    /// `[Batch, Data(width)]`: one vector per example.
    pub fn batch_data(width: usize) -> Self {
        Self::new(vec![
            Dimension { size: DimSize::Variable,     name: AxisName::Batch },
            Dimension { size: DimSize::Fixed(width), name: AxisName::Data },
        ])
    }

    /// `[Time, Batch, Data(width)]`.
    pub fn time_batch_data(width: usize) -> Self {
        Self::batch_data(width).push_dimension(DimSize::Variable, AxisName::Time)
    }

    /// `[Time × depth, Batch, Data(width)]`: the layout of a value
    /// nested inside `depth` sequences.
    pub fn nested(depth: usize, width: usize) -> Self {
        (0..depth).fold(Self::batch_data(width), |s, _| s.push_dimension(DimSize::Variable, AxisName::Time))
    }

    /// New descriptor with an added leading axis.
    pub fn push_dimension(&self, size: DimSize, name: AxisName) -> Self {
        let mut dims = Vec::with_capacity(self.dims.len() + 1);
        dims.push(Dimension { size, name });
        dims.extend(self.dims.iter().cloned());
        Self { dims }
    }

    /// New descriptor with the leading axis removed.
    pub fn pop_dimension(&self) -> Result<Self, ShapeError> {
        if self.dims.is_empty() {
            return Err(ShapeError::Empty);
        }
        Ok(Self { dims: self.dims[1..].to_vec() })
    }

    /// Removes the axis at `index`, which must be a time axis.
    pub fn remove_time_axis(&self, index: usize) -> Result<Self, ShapeError> {
        match self.dims.get(index) {
            Some(d) if d.name == AxisName::Time => {
                let mut dims = self.dims.clone();
                dims.remove(index);
                Ok(Self { dims })
            }
            _ => Err(ShapeError::NoTimeAxis { shape: self.clone(), axis: index }),
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn leading(&self) -> Option<&Dimension> {
        self.dims.first()
    }

    /// Number of leading variable axes (the tensor's row space).
    pub fn leading_rank(&self) -> usize {
        self.dims.iter().take_while(|d| d.size.is_variable()).count()
    }

    /// Number of time axes anywhere in the shape.
    pub fn time_axes(&self) -> usize {
        self.dims.iter().filter(|d| d.name == AxisName::Time).count()
    }

    /// Flat per-row width: product of every fixed extent.
    pub fn data_width(&self) -> usize {
        self.dims
            .iter()
            .filter_map(|d| match d.size {
                DimSize::Fixed(n) => Some(n),
                DimSize::Variable => None,
            })
            .product()
    }

    /// Shape left after the summary reducer has collapsed every
    /// variable non-batch axis at position `keep` or later.
    pub fn summarized(&self, keep: usize) -> Self {
        let dims = self
            .dims
            .iter()
            .enumerate()
            .filter(|(i, d)| *i < keep || !d.size.is_variable() || d.name == AxisName::Batch)
            .map(|(_, d)| d.clone())
            .collect::<Vec<_>>();
        let width = Self { dims: dims.clone() }.data_width();
        let mut leading: Vec<Dimension> = dims.into_iter().filter(|d| d.size.is_variable()).collect();
        leading.push(Dimension { size: DimSize::Fixed(width), name: AxisName::Data });
        Self { dims: leading }
    }

    /// Same leading axes, new data width.
    pub fn with_data_width(&self, width: usize) -> Self {
        let mut dims: Vec<Dimension> = self.dims.iter().filter(|d| d.size.is_variable()).cloned().collect();
        dims.push(Dimension { size: DimSize::Fixed(width), name: AxisName::Data });
        Self { dims }
    }
}

impl fmt::Display for ShapeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .dims
            .iter()
            .map(|d| match d.size {
                DimSize::Fixed(n) => format!("{n}:{}", d.name),
                DimSize::Variable => format!("*:{}", d.name),
            })
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

// ============================================================
// Layer 3 — Engine Errors
// ============================================================
// Typed errors for graph construction and execution.
//
// Construction-time errors (schema, shape, unsupported
// operation) abort graph initialisation: no partially built
// graph is ever handed back to the caller. The application
// layer wraps these in anyhow::Error with extra context.

use thiserror::Error;

use crate::domain::shape::ShapeDescriptor;

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Malformed or unrecognised schema documents.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    #[error("schema node at '{path}' has no recognised type (got {found:?})")]
    UnrecognizedKind { path: String, found: Vec<String> },

    #[error("no component can model a '{kind}' variable (at '{path}')")]
    UnsupportedKind { path: String, kind: String },

    #[error("schema node at '{path}' is missing '{field}'")]
    MissingField { path: String, field: &'static str },

    #[error("schema node at '{path}' is invalid: {reason}")]
    Invalid { path: String, reason: String },

    #[error("machine name '{name}' is produced by more than one variable")]
    NameCollision { name: String },

    #[error("batch artifact has no array named '{name}'")]
    MissingArray { name: String },
}

/// Dimension bookkeeping failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ShapeError {
    #[error("cannot pop a dimension from an empty shape")]
    Empty,

    #[error("shape mismatch: expected {expected}, got {got}")]
    Mismatch { expected: String, got: String },

    #[error("array '{name}' has rank {got}, expected {expected}")]
    Rank { name: String, expected: usize, got: usize },

    #[error("cannot summarise an empty set of tensors")]
    EmptySummary,

    #[error("shape {shape} has no time axis at position {axis}")]
    NoTimeAxis { shape: ShapeDescriptor, axis: usize },
}

/// Every failure the engine can report.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("generative decoding is not supported here: {0}")]
    GenerativeModeUnsupported(String),

    #[error("unknown layer kind '{0}'")]
    UnknownLayerKind(String),

    #[error("layer '{layer}' has a bad '{parameter}' parameter: {reason}")]
    LayerParameter { layer: String, parameter: String, reason: String },

    #[error("tensor data could not be read back: {0}")]
    Tensor(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation(message.into())
    }

    pub fn mismatch(expected: impl ToString, got: impl ToString) -> Self {
        Self::Shape(ShapeError::Mismatch {
            expected: expected.to_string(),
            got:      got.to_string(),
        })
    }
}

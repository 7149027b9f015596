// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between JSON values and tensors that does not
// need a backend:
//
//   examples.jsonl
//       │
//       ▼
//   ExampleDataset    → one (input, output) pair per line
//       │
//       ▼
//   split_train_val   → shuffled train / validation sets
//       │
//       ▼
//   graph components  → BatchArtifact (named numeric arrays)
//       │
//       ▼
//   batch file (JSON) → can be prepared once, iterated later
//
// Reference: Burn Book §4 (Datasets)
//            Rust Book §13 (Iterators and Closures)

/// Named numeric arrays for one batch, and their file format
pub mod artifact;

/// Implements Burn's Dataset trait for JSON-lines examples
pub mod dataset;

/// Shuffles and splits data into train/validation sets
pub mod splitter;

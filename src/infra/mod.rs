// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns that don't belong in any specific
// business layer:
//
//   checkpoint.rs   — Saving and loading network parameters
//                     with Burn's NamedMpkGzFileRecorder, plus the
//                     graph description and train config as
//                     JSON so a fresh process can rebuild the
//                     same network.
//
//   word_vectors.rs — Pretrained word vectors loaded from a
//                     GloVe-style text file, with a lazily built
//                     nearest-neighbour index for decoding.
//
//   metrics.rs      — Epoch-level train/validation loss written
//                     to a CSV file.
//
// Reference: Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Parameter checkpoint saving and loading
pub mod checkpoint;

/// Word vector store
pub mod word_vectors;

/// Training metrics CSV logger
pub mod metrics;

// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The engine only sees these traits, not the concrete stores:
//   - WordVectors (infra) implements WordVectorStore
//   - BatchArtifact (data) implements Persistable
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use std::path::Path;

use anyhow::Result;

// ─── WordVectorStore ──────────────────────────────────────────────────────────
/// Read-only table of pretrained word vectors.
///
/// Implementations:
///   - WordVectors → in-memory table loaded from a GloVe text file
pub trait WordVectorStore: Send + Sync {
    /// Width of every vector in the table.
    fn dimension(&self) -> usize;

    /// Vector for `word`, or None when the word is out of vocabulary.
    fn lookup(&self, word: &str) -> Option<&[f32]>;

    /// Every (word, vector) pair, in table order.
    fn entries(&self) -> Box<dyn Iterator<Item = (&str, &[f32])> + '_>;
}

// ─── Persistable ──────────────────────────────────────────────────────────────
/// Anything whose state can be saved and restored from disk.
///
/// Implementations:
///   - BatchArtifact → prepared batches shared between driver stages
pub trait Persistable: Sized {
    /// Save this value to the given path
    fn save(&self, path: &Path) -> Result<()>;

    /// Load a value from the given path.
    fn load(path: &Path) -> Result<Self>;
}

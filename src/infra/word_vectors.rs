// ============================================================
// Layer 6 — Word Vector Store
// ============================================================
// In-memory table of pretrained word vectors loaded from a
// GloVe-style text file, one word per line:
//
//   the 0.418 0.24968 -0.41242 ...
//   , 0.013441 0.23682 -0.16899 ...
//
// Decoding a word variable needs the nearest stored word for
// every predicted vector. The unit-normalised index used for
// that search is built once, on first use, and never changes
// afterwards; searches over a batch run on a small rayon pool
// owned by the store.
//
// The store is shared as `Arc<WordVectors>` by every word
// component of a graph.

use std::{
    collections::HashMap,
    fs,
    io,
    path::Path,
    sync::{Arc, OnceLock},
};

use anyhow::{bail, Context, Result};
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};

use crate::domain::{config::EngineConfig, traits::WordVectorStore};

pub struct WordVectors {
    dimension:  usize,
    words:      Vec<String>,
    vectors:    Vec<f32>,
    lookup:     HashMap<String, usize>,
    normalized: OnceLock<Vec<f32>>,
    pool:       ThreadPool,
}

impl std::fmt::Debug for WordVectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordVectors")
            .field("dimension", &self.dimension)
            .field("words", &self.words.len())
            .finish()
    }
}

impl WordVectors {
    /// Build a store from `(word, vector)` pairs. Later duplicates of
    /// a word are ignored.
    pub fn from_entries(
        dimension: usize,
        entries:   impl IntoIterator<Item = (String, Vec<f32>)>,
        threads:   usize,
    ) -> Result<Self> {
        let mut words   = Vec::new();
        let mut vectors = Vec::new();
        let mut lookup  = HashMap::new();

        for (word, vector) in entries {
            if vector.len() != dimension {
                bail!("Vector for '{}' has {} values, expected {}", word, vector.len(), dimension);
            }
            if lookup.contains_key(&word) {
                continue;
            }
            lookup.insert(word.clone(), words.len());
            words.push(word);
            vectors.extend(vector);
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("word-decode-{i}"))
            .build()
            .map_err(io::Error::other)?;

        Ok(Self { dimension, words, vectors, lookup, normalized: OnceLock::new(), pool })
    }

    /// Load a GloVe text file. The dimension is taken from the first line.
    pub fn load(path: &Path, threads: usize) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Cannot read word vectors from '{}'", path.display()))?;

        let mut entries   = Vec::new();
        let mut dimension = None;

        for (line_no, line) in text.lines().enumerate() {
            let mut parts = line.split_whitespace();
            let Some(word) = parts.next() else { continue };
            let vector = parts
                .map(str::parse::<f32>)
                .collect::<std::result::Result<Vec<f32>, _>>()
                .with_context(|| format!("Bad number on line {} of '{}'", line_no + 1, path.display()))?;
            let dim = *dimension.get_or_insert(vector.len());
            if vector.len() != dim {
                tracing::warn!("Skipping line {}: {} values, expected {}", line_no + 1, vector.len(), dim);
                continue;
            }
            entries.push((word.to_string(), vector));
        }

        let Some(dimension) = dimension else {
            bail!("Word vector file '{}' is empty", path.display());
        };
        let store = Self::from_entries(dimension, entries, threads)?;
        tracing::info!("Loaded {} word vectors of width {} from '{}'", store.len(), dimension, path.display());
        Ok(store)
    }

    /// The store named by `config.word_vectors`, if any, shared.
    pub fn from_config(config: &EngineConfig) -> Result<Option<Arc<Self>>> {
        config
            .word_vectors
            .as_deref()
            .map(|path| Self::load(path, config.decode_threads).map(Arc::new))
            .transpose()
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    fn vector(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.dimension..(i + 1) * self.dimension]
    }

    fn index(&self) -> &[f32] {
        self.normalized.get_or_init(|| {
            tracing::debug!("Building nearest-neighbour index over {} words", self.words.len());
            self.vectors
                .chunks(self.dimension.max(1))
                .flat_map(|v| {
                    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                    v.iter().map(move |x| if norm > 0.0 { x / norm } else { 0.0 })
                })
                .collect()
        })
    }

    /// Stored word with the highest cosine similarity to `query`.
    pub fn nearest(&self, query: &[f32]) -> Option<&str> {
        let index = self.index();
        let norm  = query.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 || self.words.is_empty() {
            return None;
        }
        index
            .chunks(self.dimension.max(1))
            .enumerate()
            .map(|(i, v)| (i, v.iter().zip(query).map(|(a, b)| a * b).sum::<f32>()))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| self.words[i].as_str())
    }

    /// `nearest` for every row of `queries` (row width = dimension),
    /// run on the store's thread pool.
    pub fn nearest_batch(&self, queries: &[f32]) -> Vec<Option<String>> {
        self.index();
        self.pool.install(|| {
            queries
                .par_chunks(self.dimension.max(1))
                .map(|q| self.nearest(q).map(str::to_string))
                .collect()
        })
    }
}

impl WordVectorStore for WordVectors {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn lookup(&self, word: &str) -> Option<&[f32]> {
        self.lookup.get(word).map(|&i| self.vector(i))
    }

    fn entries(&self) -> Box<dyn Iterator<Item = (&str, &[f32])> + '_> {
        Box::new(self.words.iter().enumerate().map(|(i, w)| (w.as_str(), self.vector(i))))
    }
}

/// Three orthogonal-ish 2-d words, shared by the component tests.
#[cfg(test)]
pub(crate) fn test_store() -> WordVectors {
    WordVectors::from_entries(
        2,
        vec![
            ("cat".to_string(), vec![1.0, 0.0]),
            ("dog".to_string(), vec![0.0, 1.0]),
            ("cow".to_string(), vec![-1.0, 0.0]),
        ],
        2,
    )
    .expect("valid test vectors")
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tiny() -> WordVectors {
        test_store()
    }

    #[test]
    fn test_lookup_and_dimension() {
        let store = tiny();
        assert_eq!(store.dimension(), 2);
        assert_eq!(store.lookup("dog"), Some(&[0.0, 1.0][..]));
        assert_eq!(store.lookup("emu"), None);
        assert_eq!(store.entries().count(), 3);
    }

    #[test]
    fn test_nearest_uses_cosine_similarity() {
        let store = tiny();
        assert_eq!(store.nearest(&[5.0, 0.5]), Some("cat"));
        assert_eq!(store.nearest(&[0.0, 0.0]), None);
        let batch = store.nearest_batch(&[0.1, 3.0, -2.0, 0.1]);
        assert_eq!(batch, vec![Some("dog".to_string()), Some("cow".to_string())]);
    }

    #[test]
    fn test_load_glove_text() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "the 0.1 0.2 0.3").unwrap();
        writeln!(file, "of 0.4 0.5 0.6").unwrap();
        let store = WordVectors::load(file.path(), 1).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.dimension(), 3);
    }

    #[test]
    fn test_mismatched_width_is_rejected() {
        let err = WordVectors::from_entries(2, vec![("a".to_string(), vec![1.0])], 1);
        assert!(err.is_err());
    }
}

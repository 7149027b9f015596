// ============================================================
// Layer 3 — Engine Configuration
// ============================================================
// Knobs that shape how a graph is built from a schema.
//
// Serialisable so it can be loaded from a JSON file (`--config`)
// and saved next to checkpoints. Every field has a default, so
// a config file only needs to mention what it changes:
//
//   { "unknown_layer_policy": "reject", "decode_threads": 8 }

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Sequences without an enforced length limit stop generating here.
pub const DEFAULT_MAX_GENERATED_LENGTH: usize = 50;

/// Default cap on out-of-vocabulary embedding slots per word variable.
pub const DEFAULT_MAX_EMBEDDING_TABLE_SIZE: usize = 10_000;

/// What to do with a layer name outside the catalogue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownLayerPolicy {
    /// Log a warning and leave the layer out.
    #[default]
    Skip,
    /// Abort graph construction.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub unknown_layer_policy:         UnknownLayerPolicy,
    pub default_max_generated_length: usize,
    pub max_embedding_table_size:     usize,
    pub decode_threads:               usize,
    pub matching_margin:              f32,
    pub matching_output_size:         usize,
    /// GloVe-style text file backing string variables.
    pub word_vectors:                 Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unknown_layer_policy:         UnknownLayerPolicy::Skip,
            default_max_generated_length: DEFAULT_MAX_GENERATED_LENGTH,
            max_embedding_table_size:     DEFAULT_MAX_EMBEDDING_TABLE_SIZE,
            decode_threads:               4,
            matching_margin:              14.0,
            matching_output_size:         200,
            word_vectors:                 None,
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"unknown_layer_policy": "reject", "decode_threads": 8}"#).unwrap();
        assert_eq!(cfg.unknown_layer_policy, UnknownLayerPolicy::Reject);
        assert_eq!(cfg.decode_threads, 8);
        assert_eq!(cfg.default_max_generated_length, 50);
        assert_eq!(cfg.matching_output_size, 200);
    }
}

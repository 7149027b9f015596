// ============================================================
// Layer 4 — Example Dataset
// ============================================================
// Training data for the `train` and `prepare` commands: one JSON
// object per line, each holding an input and an output value
// that match the graph's two schemas.
//
//   {"input": {"name": "A", "score": 1.0}, "output": {"flag": true}}
//
// Blank lines are skipped; any other malformed line fails with
// its line number.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One (input, output) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub input:  Value,
    #[serde(default)]
    pub output: Value,
}

pub struct ExampleDataset {
    examples: Vec<Example>,
}

impl ExampleDataset {
    pub fn new(examples: Vec<Example>) -> Self { Self { examples } }

    /// Read a JSON-lines file.
    pub fn load_jsonl(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Cannot read dataset '{}'", path.display()))?;

        let mut examples = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let example: Example = serde_json::from_str(line)
                .with_context(|| format!("{}:{}: not an example object", path.display(), i + 1))?;
            examples.push(example);
        }
        tracing::info!("Loaded {} examples from '{}'", examples.len(), path.display());
        Ok(Self::new(examples))
    }

    pub fn examples(&self) -> &[Example] { &self.examples }

    pub fn into_examples(self) -> Vec<Example> { self.examples }
}

impl Dataset<Example> for ExampleDataset {
    fn get(&self, index: usize) -> Option<Example> {
        self.examples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.examples.len()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_load_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"input": {{"x": 1}}, "output": {{"y": 2}}}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"input": {{"x": 3}}}}"#).unwrap();

        let ds = ExampleDataset::load_jsonl(file.path()).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.get(0).unwrap().output, json!({"y": 2}));
        assert_eq!(ds.get(1).unwrap().output, Value::Null);
    }

    #[test]
    fn test_bad_line_reports_its_number() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"input": 1}}"#).unwrap();
        writeln!(file, "not json").unwrap();
        let err = ExampleDataset::load_jsonl(file.path()).err().unwrap();
        assert!(format!("{err}").ends_with(":2: not an example object"));
    }
}

// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records training metrics to a CSV file after each epoch.
//
// Metrics recorded per epoch:
//   - epoch:      the epoch number (1, 2, 3, ...)
//   - train_loss: mean graph loss over the training batches
//   - val_loss:   mean graph loss over the validation batches
//   - seconds:    wall time of the epoch
//
// Output file: {checkpoint_dir}/metrics.csv
//
//   epoch,train_loss,val_loss,seconds
//   1,3.124500,3.089200,12.402000
//   2,2.890100,2.854300,12.187000
//
// The loss mixes every output variable's criterion, so only its
// trend is meaningful: if val_loss rises while train_loss falls
// the graph is overfitting.
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::Result;
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// The epoch number (starts at 1)
    pub epoch: usize,

    /// Mean loss over all training batches
    pub train_loss: f64,

    /// Mean loss on the validation set, NaN without validation data
    pub val_loss: f64,

    pub seconds: f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train_loss: f64, val_loss: f64, seconds: f64) -> Self {
        Self { epoch, train_loss, val_loss, seconds }
    }

    /// Returns true if this epoch improved over the previous best val_loss
    pub fn is_improvement(&self, best_val_loss: f64) -> bool {
        self.val_loss < best_val_loss
    }
}

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet, so
    /// repeated runs append to the same log.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "epoch,train_loss,val_loss,seconds")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row in the CSV.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)?;

        writeln!(
            f,
            "{},{:.6},{:.6},{:.6}",
            m.epoch,
            m.train_loss,
            m.val_loss,
            m.seconds,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, val_loss={:.4}",
            m.epoch,
            m.train_loss,
            m.val_loss,
        );

        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_improvement() {
        let m = EpochMetrics::new(2, 2.5, 2.3, 1.0);
        // 2.3 < 3.0 → this is an improvement
        assert!(m.is_improvement(3.0));
        assert!(!m.is_improvement(2.0));
        // NaN validation loss never counts
        assert!(!EpochMetrics::new(1, 1.0, f64::NAN, 1.0).is_improvement(f64::INFINITY));
    }

    #[test]
    fn test_rows_are_appended_after_header() {
        let dir = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();
        logger.log(&EpochMetrics::new(1, 0.5, 0.25, 2.0)).unwrap();
        MetricsLogger::new(dir.path()).unwrap().log(&EpochMetrics::new(2, 0.4, 0.2, 2.0)).unwrap();

        let text = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "epoch,train_loss,val_loss,seconds");
        assert_eq!(lines[1], "1,0.500000,0.250000,2.000000");
        assert_eq!(lines.len(), 3);
    }
}

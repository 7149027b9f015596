// ============================================================
// Layer 4 — Train/Validation Splitter
// ============================================================
// Shuffles examples and splits them into a training set and a
// validation set. Datasets exported from a data source are
// often ordered (by id, by date), so splitting without a
// shuffle would validate on one slice of the data only.
//
// A seed makes the split reproducible between runs, so a
// resumed `train` validates on the same examples.
//
// Reference: rand crate documentation (SliceRandom, SeedableRng)

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Shuffle `samples` and split into (train, validation).
/// `train_fraction` is clamped to [0, 1].
pub fn split_train_val<T>(mut samples: Vec<T>, train_fraction: f64, seed: Option<u64>) -> (Vec<T>, Vec<T>) {
    match seed {
        Some(seed) => samples.shuffle(&mut StdRng::seed_from_u64(seed)),
        None       => samples.shuffle(&mut rand::thread_rng()),
    }

    let total    = samples.len();
    let fraction = train_fraction.clamp(0.0, 1.0);
    let split_at = ((total as f64) * fraction).round() as usize;
    let val      = samples.split_off(split_at.min(total));

    tracing::debug!(
        "Dataset split: {} training, {} validation",
        samples.len(),
        val.len(),
    );

    (samples, val)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correct_split_sizes() {
        let items: Vec<usize> = (0..100).collect();
        let (train, val)      = split_train_val(items, 0.8, None);
        assert_eq!(train.len(), 80);
        assert_eq!(val.len(),   20);
    }

    #[test]
    fn test_seed_makes_split_reproducible() {
        let a = split_train_val((0..30).collect::<Vec<usize>>(), 0.5, Some(7));
        let b = split_train_val((0..30).collect::<Vec<usize>>(), 0.5, Some(7));
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_dataset() {
        let (train, val) = split_train_val(Vec::<usize>::new(), 0.8, Some(1));
        assert!(train.is_empty());
        assert!(val.is_empty());
    }

    #[test]
    fn test_fraction_is_clamped() {
        let (train, val) = split_train_val((0..10).collect::<Vec<usize>>(), 1.5, None);
        assert_eq!(train.len(), 10);
        assert!(val.is_empty());
    }
}

// ============================================================
// Layer 5 — Generation Loop
// ============================================================
// Bookkeeping for decoding a sequence one step at a time when
// no input sequence of the same variable exists.
//
//   AwaitingStep ──begin_step──► Emitting ──record──► AwaitingStep
//        │                                               │
//        └──────── bound reached / nobody alive ─────────┴──► Terminated
//
// An example stays alive while every existence score it has
// emitted is above EXISTENCE_THRESHOLD, the same cut decoding
// uses to keep an item. Dead examples keep being computed with the
// rest of the batch; their scores are multiplied by the alive
// mask, so everything after the first 0 is 0 as well.
//
// The first step always runs so the outputs are never empty;
// with a bound of 0 nobody starts alive, so that one step is
// fully masked and every example decodes to an empty list.

/// Existence score an item must exceed to be kept.
pub const EXISTENCE_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingStep,
    Emitting,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct GenerationLoop {
    phase:     Phase,
    alive:     Vec<bool>,
    index:     usize,
    max_steps: usize,
}

impl GenerationLoop {
    pub fn new(batch: usize, max_steps: usize) -> Self {
        Self {
            phase: Phase::AwaitingStep,
            alive: vec![max_steps > 0; batch],
            index: 0,
            max_steps,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Steps emitted so far.
    pub fn steps(&self) -> usize {
        self.index
    }

    /// Start the next step. Returns the alive mask (1.0 / 0.0 per
    /// example) to apply to this step's existence scores, or None
    /// once the loop has terminated.
    pub fn begin_step(&mut self) -> Option<Vec<f32>> {
        if self.phase != Phase::AwaitingStep {
            return None;
        }
        let more = self.index == 0
            || (self.index < self.max_steps && self.alive.iter().any(|&a| a));
        if !more {
            self.phase = Phase::Terminated;
            return None;
        }
        self.phase = Phase::Emitting;
        Some(self.alive.iter().map(|&a| if a { 1.0 } else { 0.0 }).collect())
    }

    /// Record the (masked) existence scores of the step just emitted.
    pub fn record(&mut self, existence: &[f32]) {
        if self.phase != Phase::Emitting {
            return;
        }
        for (alive, &e) in self.alive.iter_mut().zip(existence) {
            *alive &= e > EXISTENCE_THRESHOLD;
        }
        self.index += 1;
        self.phase = Phase::AwaitingStep;
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_first_existence_stops_after_one_step() {
        let mut g = GenerationLoop::new(2, 10);
        assert_eq!(g.begin_step(), Some(vec![1.0, 1.0]));
        g.record(&[0.0, 0.2]);
        assert_eq!(g.begin_step(), None);
        assert_eq!(g.phase(), Phase::Terminated);
        assert_eq!(g.steps(), 1);
    }

    #[test]
    fn test_dead_examples_are_masked() {
        let mut g = GenerationLoop::new(2, 10);
        g.begin_step();
        g.record(&[0.9, 0.1]);
        assert_eq!(g.begin_step(), Some(vec![1.0, 0.0]));
    }

    #[test]
    fn test_zero_bound_runs_one_dead_step() {
        let mut g = GenerationLoop::new(3, 0);
        assert_eq!(g.begin_step(), Some(vec![0.0, 0.0, 0.0]));
        g.record(&[0.0, 0.0, 0.0]);
        assert_eq!(g.begin_step(), None);
    }

    #[test]
    fn test_score_at_threshold_ends_the_example() {
        let mut g = GenerationLoop::new(2, 10);
        g.begin_step();
        g.record(&[EXISTENCE_THRESHOLD, 0.51]);
        assert_eq!(g.begin_step(), Some(vec![0.0, 1.0]));
    }

    #[test]
    fn test_record_out_of_phase_is_ignored() {
        let mut g = GenerationLoop::new(1, 3);
        g.record(&[1.0]);
        assert_eq!(g.steps(), 0);
    }

    proptest! {
        #[test]
        fn prop_steps_never_exceed_bound(max in 1usize..20, scores in prop::collection::vec(0.0f32..1.0, 1..40)) {
            let mut g = GenerationLoop::new(1, max);
            let mut i = 0;
            while let Some(mask) = g.begin_step() {
                g.record(&[scores[i % scores.len()] * mask[0]]);
                i += 1;
            }
            prop_assert!(g.steps() <= max);
        }
    }
}

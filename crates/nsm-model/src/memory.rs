//! Bounded history of past body states.

use std::collections::VecDeque;

use nalgebra::DVector;

/// Ring buffer of committed `(q, v)` pairs, newest first.
///
/// Depth is fixed at construction and is at least 1: the scheme always
/// needs the state at the beginning of the previous step. Pushing beyond
/// the depth drops the oldest entry.
#[derive(Debug, Clone)]
pub struct StateMemory {
    depth: usize,
    slots: VecDeque<(DVector<f64>, DVector<f64>)>,
}

impl StateMemory {
    /// Create a memory with the given depth (clamped to >= 1).
    #[must_use]
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            depth,
            slots: VecDeque::with_capacity(depth),
        }
    }

    /// The configured depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of committed states currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no state has been committed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Commit a state pair, evicting the oldest entry when full.
    pub fn push(&mut self, q: DVector<f64>, v: DVector<f64>) {
        if self.slots.len() == self.depth {
            self.slots.pop_back();
        }
        self.slots.push_front((q, v));
    }

    /// Get the state committed `steps_back` commits ago (0 = most recent).
    #[must_use]
    pub fn get(&self, steps_back: usize) -> Option<(&DVector<f64>, &DVector<f64>)> {
        self.slots.get(steps_back).map(|(q, v)| (q, v))
    }

    /// The most recently committed state.
    #[must_use]
    pub fn last(&self) -> Option<(&DVector<f64>, &DVector<f64>)> {
        self.get(0)
    }

    /// Drop all committed states.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

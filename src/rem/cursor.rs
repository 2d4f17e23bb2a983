//! Endless batch stream over a loader.

use crate::data::{Batch, DataLoader};

/// Yields the loader's batches in order and starts a new pass when one is
/// exhausted. Never ends unless the loader has no batches.
#[derive(Debug, Clone)]
pub struct CyclicCursor<'l, 'a> {
    loader: &'l DataLoader<'a>,
    next: usize,
    passes: usize,
}

impl<'l, 'a> CyclicCursor<'l, 'a> {
    pub fn new(loader: &'l DataLoader<'a>) -> Self {
        Self {
            loader,
            next: 0,
            passes: 0,
        }
    }

    /// Number of completed passes.
    pub fn passes(&self) -> usize {
        self.passes
    }
}

impl Iterator for CyclicCursor<'_, '_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let count = self.loader.num_batches();
        if count == 0 {
            return None;
        }
        let batch = self.loader.batch(self.next);
        self.next += 1;
        if self.next == count {
            self.next = 0;
            self.passes += 1;
        }
        Some(batch)
    }
}

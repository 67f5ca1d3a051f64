//! Lookahead policy.

use std::ops::Range;

use tracing::trace;

use super::job::Priority;
use super::state::State;

/// Keeps the blocks `current..current + depth` resident or in flight.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Scheduler {
    depth: u64,
}

impl Scheduler {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth as u64,
        }
    }

    /// Blocks that should be resident with the consumer in `current`.
    pub fn horizon(&self, state: &State, current: u64) -> Range<u64> {
        let mut end = current.saturating_add(self.depth);
        if let Some(size) = state.size_bound {
            end = end.min(state.translator.block_count(size));
        }
        current..end.max(current)
    }

    /// The consumer moved into `current` by reading; top up the horizon.
    ///
    /// Returns the number of new jobs queued.
    pub fn advance(&self, state: &mut State, current: u64) -> usize {
        state.position_block = current;

        let mut queued = 0;
        for block in self.horizon(state, current) {
            if state.table.lookup(block).is_some() {
                continue;
            }
            if state.submit(block, Priority::Prefetch).is_none() {
                // No slot to spare; try again on the next advance
                break;
            }
            queued += 1;
        }
        queued
    }

    /// The consumer jumped to `current`; drop lookahead that no longer applies.
    ///
    /// Queued jobs outside the new horizon are dropped, running ones are
    /// flagged for discard, and running ones inside it are kept. Failed
    /// blocks outside the horizon are forgotten so a later visit fetches
    /// them again.
    pub fn recenter(&self, state: &mut State, current: u64) -> usize {
        state.position_block = current;
        let horizon = self.horizon(state, current);

        let mut cancelled = 0;
        for block in state.queue.outstanding() {
            if horizon.contains(&block) {
                state.submit(block, Priority::Prefetch);
            } else if state.cancel(block) {
                cancelled += 1;
            }
        }

        for idx in state.table.failed_outside(&horizon) {
            state.table.release(idx);
        }

        trace!(
            block = current,
            horizon_end = horizon.end,
            cancelled,
            resident = state.table.occupied(),
            jobs = state.queue.len(),
            "recentered horizon"
        );
        self.advance(state, current)
    }
}

//! Fetch jobs and the two-class job queue.

use std::collections::{HashMap, VecDeque};

use tracing::trace;

use super::slot::SlotTable;

/// Urgency of a fetch. Ordered so that `Demand > Prefetch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Speculative lookahead
    Prefetch,
    /// The consumer is blocked on this block
    Demand,
}

/// "Populate slot `slot` with block `block`."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FetchJob {
    pub block: u64,
    pub slot: usize,
    /// Generation of the slot claim this job fills
    pub generation: u64,
    pub priority: Priority,
    pub started: bool,
}

/// Outstanding jobs, keyed by block.
///
/// Queue entries are block indices; an entry whose job is gone, already
/// started, or re-queued after a promotion is skipped when popped.
#[derive(Debug, Default)]
pub(crate) struct JobQueue {
    jobs: HashMap<u64, FetchJob>,
    demand: VecDeque<u64>,
    prefetch: VecDeque<u64>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request `block` at `priority`, returning the slot that will hold it.
    ///
    /// An existing job is promoted (never demoted) and any pending discard
    /// on its slot is lifted. Otherwise a slot is allocated and a new job
    /// queued; `None` means no slot can be had right now.
    pub fn submit(
        &mut self,
        table: &mut SlotTable,
        block: u64,
        position_block: u64,
        priority: Priority,
    ) -> Option<usize> {
        if let Some(job) = self.jobs.get_mut(&block) {
            if priority > job.priority {
                job.priority = priority;
                if !job.started {
                    self.demand.push_back(block);
                }
            }
            table.slot_mut(job.slot).discard = false;
            return Some(job.slot);
        }
        if let Some(slot) = table.lookup(block) {
            // Already fetched
            return Some(slot);
        }

        let slot = match table.allocate(block, position_block, priority) {
            Some(slot) => slot,
            None if priority == Priority::Demand => self.reclaim(table, block, position_block)?,
            None => return None,
        };
        self.jobs.insert(
            block,
            FetchJob {
                block,
                slot,
                generation: table.slot(slot).generation,
                priority,
                started: false,
            },
        );
        match priority {
            Priority::Demand => self.demand.push_back(block),
            Priority::Prefetch => self.prefetch.push_back(block),
        }
        Some(slot)
    }

    /// Every slot is mid-fetch. Take back the best-ranked slot whose job
    /// has not started; if all of them are running, flag one for release.
    fn reclaim(&mut self, table: &mut SlotTable, block: u64, position_block: u64) -> Option<usize> {
        let queued = table
            .eviction_order(block, position_block, Priority::Demand)
            .into_iter()
            .filter_map(|idx| table.slot(idx).owner)
            .find(|owner| self.jobs.get(owner).is_some_and(|job| !job.started));

        match queued {
            Some(victim) => {
                trace!(victim, block, "reclaiming slot of queued job");
                self.cancel(table, victim);
                table.allocate(block, position_block, Priority::Demand)
            }
            None => {
                table.defer_eviction(block, position_block);
                None
            }
        }
    }

    /// Pop the next job to run, demand first, and mark it started.
    pub fn next(&mut self) -> Option<FetchJob> {
        while let Some(block) = self.demand.pop_front().or_else(|| self.prefetch.pop_front()) {
            if let Some(job) = self.jobs.get_mut(&block) {
                if !job.started {
                    job.started = true;
                    return Some(*job);
                }
            }
        }
        None
    }

    /// Withdraw the job for `block`.
    ///
    /// A queued job is dropped and its slot released. A running job cannot
    /// be interrupted, so its slot is flagged to be released on completion.
    pub fn cancel(&mut self, table: &mut SlotTable, block: u64) -> bool {
        match self.jobs.get(&block).copied() {
            None => false,
            Some(job) if !job.started => {
                self.jobs.remove(&block);
                table.release(job.slot);
                true
            }
            Some(job) => {
                table.slot_mut(job.slot).discard = true;
                true
            }
        }
    }

    pub fn cancel_all(&mut self, table: &mut SlotTable) {
        for block in self.outstanding() {
            self.cancel(table, block);
        }
        self.demand.clear();
        self.prefetch.clear();
    }

    /// Forget a running job once its worker reports back.
    pub fn finish(&mut self, block: u64) -> Option<FetchJob> {
        self.jobs.remove(&block)
    }

    /// Blocks with a queued or running job
    pub fn outstanding(&self) -> Vec<u64> {
        self.jobs.keys().copied().collect()
    }

    pub fn get(&self, block: u64) -> Option<&FetchJob> {
        self.jobs.get(&block)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }
}

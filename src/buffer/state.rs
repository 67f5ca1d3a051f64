//! State shared between the consumer and the fetch workers.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::{debug, warn};

use super::block::BlockTranslator;
use super::job::{FetchJob, JobQueue, Priority};
use super::slot::{FetchFailure, SlotState, SlotTable};
use crate::error::StreamError;

/// Counters describing the work a stream buffer has done.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Jobs created because the consumer was waiting
    pub demand_fetches: u64,
    /// Jobs created speculatively by the scheduler
    pub prefetch_fetches: u64,
    /// Fetches whose result was published to a slot
    pub completed: u64,
    /// Fetches that ended in an error slot
    pub failed: u64,
    /// Fetches whose result was dropped after cancellation or eviction
    pub discarded: u64,
    /// Bytes read from the source, published or not
    pub bytes_fetched: u64,
}

/// Everything guarded by the single stream lock.
#[derive(Debug)]
pub(crate) struct State {
    pub table: SlotTable,
    pub queue: JobQueue,
    pub translator: BlockTranslator,
    /// Exact source length, once reported or proven
    pub known_size: Option<u64>,
    /// The source ends at or before this offset
    pub size_bound: Option<u64>,
    /// The source reaches at least this far
    pub size_floor: u64,
    /// Block under the consumer's position, as last seen by the scheduler
    pub position_block: u64,
    pub closed: bool,
    pub stats: BufferStats,
}

impl State {
    pub fn new(slot_count: usize, translator: BlockTranslator, known_size: Option<u64>) -> Self {
        Self {
            table: SlotTable::new(slot_count),
            queue: JobQueue::new(),
            translator,
            known_size,
            size_bound: known_size,
            size_floor: known_size.unwrap_or(0),
            position_block: 0,
            closed: false,
            stats: BufferStats::default(),
        }
    }

    pub fn submit(&mut self, block: u64, priority: Priority) -> Option<usize> {
        let fresh = self.queue.get(block).is_none() && self.table.lookup(block).is_none();
        let slot = self
            .queue
            .submit(&mut self.table, block, self.position_block, priority)?;
        if fresh {
            match priority {
                Priority::Demand => self.stats.demand_fetches += 1,
                Priority::Prefetch => self.stats.prefetch_fetches += 1,
            }
        }
        Some(slot)
    }

    pub fn cancel(&mut self, block: u64) -> bool {
        self.queue.cancel(&mut self.table, block)
    }

    /// Hand the next job to a worker together with the slot's buffer.
    pub fn take_job(&mut self) -> Option<(FetchJob, Vec<u8>)> {
        let job = self.queue.next()?;
        let buf = std::mem::take(&mut self.table.slot_mut(job.slot).data);
        Some((job, buf))
    }

    /// Publish (or drop) the outcome of a fetch.
    pub fn finish_fetch(&mut self, job: FetchJob, buf: Vec<u8>, outcome: Result<usize, FetchFailure>) {
        self.queue.finish(job.block);
        if let Ok(n) = outcome {
            self.stats.bytes_fetched += n as u64;
        }

        let block_size = self.translator.block_size();
        let start = self.translator.block_start(job.block);
        let slot = self.table.slot_mut(job.slot);
        if slot.generation != job.generation || slot.owner != Some(job.block) {
            debug!(block = job.block, slot = job.slot, "slot reassigned during fetch, dropping result");
            self.stats.discarded += 1;
            return;
        }
        slot.data = buf;

        if slot.discard {
            debug!(block = job.block, slot = job.slot, "discarding cancelled fetch");
            self.table.release(job.slot);
            self.stats.discarded += 1;
            return;
        }

        let extent = match outcome {
            Ok(n) if n >= block_size => {
                slot.state = SlotState::Ready;
                slot.valid_len = block_size;
                Some((block_size, true))
            }
            Ok(n) => {
                slot.state = SlotState::PartialEof;
                slot.valid_len = n;
                Some((n, false))
            }
            Err(failure) => {
                warn!(block = job.block, slot = job.slot, failure = ?failure, "block fetch failed");
                slot.state = SlotState::Error;
                slot.valid_len = 0;
                slot.failure = Some(failure);
                self.stats.failed += 1;
                None
            }
        };
        if let Some((n, full)) = extent {
            self.note_extent(start, n, full);
        }
        self.stats.completed += 1;
        self.table.touch(job.slot);
    }

    /// Fold what a fetch of `n` bytes at `start` shows about the source length.
    ///
    /// Bytes read prove the source reaches their end; a short read caps it.
    /// The length is known once floor and cap meet, so a zero-byte read
    /// past the real end only lowers the cap.
    fn note_extent(&mut self, start: u64, n: usize, full: bool) {
        let end = start + n as u64;
        if n > 0 {
            self.size_floor = self.size_floor.max(end);
        }
        if !full && self.size_bound.is_none_or(|bound| end < bound) {
            self.size_bound = Some(end);
        }

        if let Some(bound) = self.size_bound {
            if bound <= self.size_floor && self.known_size != Some(bound) {
                debug!(size = bound, "discovered source length");
                self.known_size = Some(bound);
            }
        }
    }
}

/// Shared handle: one lock, one condition for consumers, one notifier for workers.
#[derive(Debug)]
pub(crate) struct Shared {
    state: Mutex<State>,
    /// Signalled on every slot transition
    pub slot_changed: Condvar,
    /// Signalled when jobs are queued or the stream closes
    pub work_ready: Notify,
}

impl Shared {
    pub fn new(state: State) -> Self {
        Self {
            state: Mutex::new(state),
            slot_changed: Condvar::new(),
            work_ready: Notify::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until `block` is settled in some slot, demand-fetching it as needed.
    ///
    /// Returns the slot index; the slot cannot change while the guard is
    /// held. A waiter whose fetch got discarded finds the block missing on
    /// wake-up and submits it again.
    pub fn wait_for_block<'a>(
        &'a self,
        mut state: MutexGuard<'a, State>,
        block: u64,
    ) -> (MutexGuard<'a, State>, Result<usize, StreamError>) {
        loop {
            if state.closed {
                return (state, Err(StreamError::Closed));
            }

            match state.table.lookup(block) {
                Some(idx) => {
                    let slot_state = state.table.slot(idx).state;
                    match slot_state {
                        SlotState::Ready | SlotState::PartialEof => {
                            state.table.touch(idx);
                            return (state, Ok(idx));
                        }
                        SlotState::Error => {
                            let err = state
                                .table
                                .slot(idx)
                                .failure
                                .as_ref()
                                .map(|f| f.to_error(block))
                                .unwrap_or(StreamError::Read {
                                    block,
                                    message: "unknown failure".into(),
                                });
                            return (state, Err(err));
                        }
                        SlotState::Fetching | SlotState::Empty => {
                            // Promote a prefetch we are now waiting on
                            if state.submit(block, Priority::Demand).is_some() {
                                self.work_ready.notify_waiters();
                            }
                        }
                    }
                }
                None => {
                    if state.submit(block, Priority::Demand).is_some() {
                        self.work_ready.notify_waiters();
                    }
                }
            }

            state = self
                .slot_changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> State {
        State::new(4, BlockTranslator::new(10), None)
    }

    fn run(state: &mut State, block: u64, outcome: Result<usize, FetchFailure>) -> usize {
        state.submit(block, Priority::Prefetch).unwrap();
        let (job, mut buf) = state.take_job().unwrap();
        buf.resize(10, 7);
        state.finish_fetch(job, buf, outcome);
        job.slot
    }

    #[test]
    fn test_full_fetch_is_ready() {
        let mut state = state();
        let idx = run(&mut state, 0, Ok(10));
        let slot = state.table.slot(idx);
        assert_eq!(slot.state, SlotState::Ready);
        assert_eq!(slot.bytes(), &[7u8; 10]);
        assert_eq!(state.known_size, None);
        assert_eq!(state.stats.completed, 1);
        assert_eq!(state.stats.bytes_fetched, 10);
    }

    #[test]
    fn test_short_fetch_fixes_known_size() {
        let mut state = state();
        run(&mut state, 2, Ok(4));
        assert_eq!(state.known_size, Some(24));
        assert_eq!(state.size_bound, Some(24));

        // A later empty block does not raise it
        run(&mut state, 5, Ok(0));
        assert_eq!(state.known_size, Some(24));
    }

    #[test]
    fn test_empty_fetch_only_caps_size() {
        let mut state = state();
        let idx = run(&mut state, 3, Ok(0));
        assert_eq!(state.table.slot(idx).state, SlotState::PartialEof);
        assert_eq!(state.size_bound, Some(30));
        assert_eq!(state.known_size, None);

        // A full block right before it proves the source ends exactly there
        run(&mut state, 2, Ok(10));
        assert_eq!(state.known_size, Some(30));
    }

    #[test]
    fn test_empty_first_block_is_exact() {
        let mut state = state();
        run(&mut state, 0, Ok(0));
        assert_eq!(state.known_size, Some(0));
    }

    #[test]
    fn test_reported_size_lowered_by_short_read() {
        let mut state = State::new(4, BlockTranslator::new(10), Some(50));
        run(&mut state, 1, Ok(3));
        assert_eq!(state.known_size, Some(13));
        assert_eq!(state.size_bound, Some(13));
    }

    #[test]
    fn test_failed_fetch_is_sticky_error() {
        let mut state = state();
        let idx = run(&mut state, 1, Err(FetchFailure::Remote("reset by peer".into())));
        let slot = state.table.slot(idx);
        assert_eq!(slot.state, SlotState::Error);
        assert!(matches!(
            slot.failure.as_ref().unwrap().to_error(1),
            StreamError::Read { block: 1, .. }
        ));
        assert_eq!(state.stats.failed, 1);
    }

    #[test]
    fn test_discarded_fetch_releases_slot() {
        let mut state = state();
        state.submit(2, Priority::Prefetch).unwrap();
        let (job, buf) = state.take_job().unwrap();
        assert!(state.cancel(2));
        state.finish_fetch(job, buf, Ok(10));

        assert_eq!(state.table.lookup(2), None);
        assert_eq!(state.table.slot(job.slot).state, SlotState::Empty);
        assert_eq!(state.stats.discarded, 1);
        assert_eq!(state.stats.completed, 0);
    }

    #[test]
    fn test_wait_for_settled_block() {
        let shared = Shared::new(state());
        {
            let mut guard = shared.lock();
            run(&mut guard, 0, Ok(10));
        }
        let (_guard, result) = shared.wait_for_block(shared.lock(), 0);
        assert!(result.is_ok());
    }

    #[test]
    fn test_wait_when_closed() {
        let shared = Shared::new(state());
        shared.lock().closed = true;
        let (_guard, result) = shared.wait_for_block(shared.lock(), 0);
        assert!(matches!(result, Err(StreamError::Closed)));
    }
}

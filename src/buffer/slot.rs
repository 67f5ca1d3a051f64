//! Fixed-size table of block slots.
//!
//! Slots are addressed by index only. A slot's `generation` moves every time
//! it is claimed or released, so a fetch that finishes for an old claim can
//! tell its result no longer belongs there.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::time::Duration;

use tracing::trace;

use super::job::Priority;
use crate::error::StreamError;

/// Lifecycle of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    /// Claimed for a block; the fetch is queued or in flight
    Fetching,
    /// Holds a full block
    Ready,
    /// Holds the short final block (possibly zero bytes)
    PartialEof,
    /// The fetch failed; kept so the failure stays visible for the block
    Error,
}

impl SlotState {
    /// Whether the fetch for this slot has finished, one way or another
    pub fn is_settled(&self) -> bool {
        matches!(self, SlotState::Ready | SlotState::PartialEof | SlotState::Error)
    }
}

/// Why a fetch ended in [`SlotState::Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FetchFailure {
    Remote(String),
    Timeout(Duration),
}

impl FetchFailure {
    pub fn to_error(&self, block: u64) -> StreamError {
        match self {
            FetchFailure::Remote(message) => StreamError::Read {
                block,
                message: message.clone(),
            },
            FetchFailure::Timeout(timeout) => StreamError::Timeout {
                block,
                timeout: *timeout,
            },
        }
    }
}

#[derive(Debug)]
pub(crate) struct Slot {
    pub owner: Option<u64>,
    pub state: SlotState,
    /// Taken out by the worker while the fetch runs
    pub data: Vec<u8>,
    pub valid_len: usize,
    pub last_touched: u64,
    pub generation: u64,
    /// Release instead of publish when the running fetch completes
    pub discard: bool,
    pub failure: Option<FetchFailure>,
    pub origin: Priority,
}

impl Slot {
    fn new() -> Self {
        Self {
            owner: None,
            state: SlotState::Empty,
            data: Vec::new(),
            valid_len: 0,
            last_touched: 0,
            generation: 0,
            discard: false,
            failure: None,
            origin: Priority::Prefetch,
        }
    }

    /// Bytes of the block held by this slot
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.valid_len]
    }
}

/// Point-in-time view of one occupied slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub slot: usize,
    pub block: u64,
    pub state: SlotState,
    pub valid_len: usize,
    /// Whether the block was claimed for the consumer or for lookahead
    pub origin: Priority,
}

/// Owner of all slot memory and of the block → slot index.
#[derive(Debug)]
pub(crate) struct SlotTable {
    slots: Vec<Slot>,
    index: HashMap<u64, usize>,
    clock: u64,
}

impl SlotTable {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: (0..slot_count).map(|_| Slot::new()).collect(),
            index: HashMap::with_capacity(slot_count),
            clock: 0,
        }
    }

    pub fn slot(&self, idx: usize) -> &Slot {
        &self.slots[idx]
    }

    pub fn slot_mut(&mut self, idx: usize) -> &mut Slot {
        &mut self.slots[idx]
    }

    pub fn lookup(&self, block: u64) -> Option<usize> {
        self.index.get(&block).copied()
    }

    pub fn touch(&mut self, idx: usize) {
        self.clock += 1;
        self.slots[idx].last_touched = self.clock;
    }

    /// Claim a slot for `block`, evicting if every slot is taken.
    ///
    /// Returns `None` when nothing can be evicted right now, which for a
    /// demand request means every candidate is mid-fetch.
    pub fn allocate(&mut self, block: u64, position_block: u64, priority: Priority) -> Option<usize> {
        debug_assert!(!self.index.contains_key(&block));

        let idx = match self.slots.iter().position(|s| s.state == SlotState::Empty) {
            Some(idx) => idx,
            None => self.evict(block, position_block, priority)?,
        };

        let slot = &mut self.slots[idx];
        slot.owner = Some(block);
        slot.state = SlotState::Fetching;
        slot.valid_len = 0;
        slot.generation += 1;
        slot.discard = false;
        slot.failure = None;
        slot.origin = priority;
        self.index.insert(block, idx);
        self.touch(idx);

        Some(idx)
    }

    /// Eviction candidates for `block`, best first.
    ///
    /// Blocks behind the consumer go first, farthest first, then blocks
    /// ahead, farthest first; ties go to the least recently touched.
    pub fn eviction_order(&self, block: u64, position_block: u64, priority: Priority) -> Vec<usize> {
        let mut ranked: Vec<usize> = (0..self.slots.len())
            .filter(|&i| match self.slots[i].owner {
                // Lookahead must not push out anything it would need sooner
                Some(owner) => {
                    priority == Priority::Demand || owner < position_block || owner > block
                }
                None => false,
            })
            .collect();
        ranked.sort_by_key(|&i| {
            let slot = &self.slots[i];
            let owner = slot.owner.unwrap_or_default();
            if owner < position_block {
                (0u8, Reverse(position_block - owner), slot.last_touched)
            } else {
                (1u8, Reverse(owner - position_block), slot.last_touched)
            }
        });
        ranked
    }

    fn evict(&mut self, block: u64, position_block: u64, priority: Priority) -> Option<usize> {
        let victim = self
            .eviction_order(block, position_block, priority)
            .into_iter()
            .find(|&i| self.slots[i].state != SlotState::Fetching)?;
        trace!(
            slot = victim,
            evicted = self.slots[victim].owner,
            block,
            "evicting slot"
        );
        self.release(victim);
        Some(victim)
    }

    /// Flag the best in-flight candidate to be released when its read
    /// returns. At most one such discard is pending at a time.
    pub fn defer_eviction(&mut self, block: u64, position_block: u64) -> Option<usize> {
        if self.slots.iter().any(|s| s.discard) {
            return None;
        }
        let victim = *self
            .eviction_order(block, position_block, Priority::Demand)
            .first()?;
        trace!(slot = victim, block, "deferring eviction of in-flight slot");
        self.slots[victim].discard = true;
        Some(victim)
    }

    /// Return a slot to [`SlotState::Empty`].
    pub fn release(&mut self, idx: usize) {
        let slot = &mut self.slots[idx];
        if let Some(owner) = slot.owner.take() {
            if self.index.get(&owner) == Some(&idx) {
                self.index.remove(&owner);
            }
        }
        slot.state = SlotState::Empty;
        slot.valid_len = 0;
        slot.generation += 1;
        slot.discard = false;
        slot.failure = None;
    }

    /// Release every settled slot and drop all buffers.
    ///
    /// In-flight slots keep their claim; their workers release them.
    pub fn clear(&mut self) {
        for idx in 0..self.slots.len() {
            if self.slots[idx].state != SlotState::Fetching {
                self.release(idx);
                self.slots[idx].data = Vec::new();
            }
        }
    }

    /// Occupied slots whose block lies outside `keep` and failed to fetch
    pub fn failed_outside(&self, keep: &std::ops::Range<u64>) -> Vec<usize> {
        self.index
            .iter()
            .filter(|(block, idx)| {
                !keep.contains(*block) && self.slots[**idx].state == SlotState::Error
            })
            .map(|(_, idx)| *idx)
            .collect()
    }

    pub fn occupied(&self) -> usize {
        self.index.len()
    }

    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        let mut out: Vec<SlotSnapshot> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                s.owner.map(|block| SlotSnapshot {
                    slot: i,
                    block,
                    state: s.state,
                    valid_len: s.valid_len,
                    origin: s.origin,
                })
            })
            .collect();
        out.sort_by_key(|s| s.block);
        out
    }
}

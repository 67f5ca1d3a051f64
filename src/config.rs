//! Construction parameters for a stream buffer instance.

use std::time::Duration;

use crate::error::StreamError;

/// Access mode requested when opening a stream.
///
/// Only [`OpenMode::Read`] is accepted; the others exist so callers coming
/// from a general file API get a typed rejection instead of a silent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
    Append,
}

/// Sizing of one stream buffer instance.
///
/// Every instance owns its own slots, queue and worker runtime, all sized
/// from this struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    /// Bytes per resident block
    pub block_size: usize,
    /// Number of resident blocks cached (N)
    pub slot_count: usize,
    /// Background fetch concurrency (M)
    pub worker_count: usize,
    /// Lookahead block count (K)
    pub horizon_depth: usize,
    /// Upper bound on a single remote block read
    pub fetch_timeout: Option<Duration>,
}

impl BufferConfig {
    /// Create a configuration with the horizon set to half the slot table.
    pub fn new(block_size: usize, slot_count: usize, worker_count: usize) -> Self {
        Self {
            block_size,
            slot_count,
            worker_count,
            horizon_depth: (slot_count / 2).max(1),
            fetch_timeout: None,
        }
    }

    pub fn with_horizon_depth(mut self, horizon_depth: usize) -> Self {
        self.horizon_depth = horizon_depth;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Check the parameters describe a usable buffer.
    ///
    /// A horizon deeper than the slot table would make prefetches evict
    /// each other before the consumer gets to them.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.block_size == 0 {
            return Err(StreamError::InvalidConfig("block_size must be positive".into()));
        }
        if self.slot_count == 0 {
            return Err(StreamError::InvalidConfig("slot_count must be positive".into()));
        }
        if self.worker_count == 0 {
            return Err(StreamError::InvalidConfig("worker_count must be positive".into()));
        }
        if self.horizon_depth == 0 || self.horizon_depth > self.slot_count {
            return Err(StreamError::InvalidConfig(format!(
                "horizon_depth must be in 1..={}, got {}",
                self.slot_count, self.horizon_depth
            )));
        }
        if self.fetch_timeout.is_some_and(|t| t.is_zero()) {
            return Err(StreamError::InvalidConfig("fetch_timeout must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for BufferConfig {
    /// One megabyte blocks, ten slots, two workers.
    fn default() -> Self {
        Self::new(1_000_000, 10, 2)
    }
}

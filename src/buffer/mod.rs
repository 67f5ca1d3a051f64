//! Block-structured prefetching buffer.
//!
//! ## Architecture
//!
//! - [`block`]: offset ↔ block arithmetic
//! - [`slot`]: the fixed table of block slots and its eviction policy
//! - [`job`]: fetch jobs, split into demand and prefetch queues
//! - [`worker`]: tasks that perform the remote reads
//! - [`scheduler`]: the lookahead horizon and seek-time cancellation
//! - [`stream`]: the blocking read/seek/tell front end
//!
//! ## Concurrency
//!
//! The slot table and the job queue live behind one mutex. Consumers wait
//! on a condition variable that is signalled on every slot transition;
//! workers wait on a [`tokio::sync::Notify`]. A running fetch cannot be
//! interrupted. Cancelling it only flags its slot so the result is dropped
//! when the read returns.

mod block;
mod job;
mod scheduler;
mod slot;
mod state;
mod stream;
mod worker;

pub use block::BlockTranslator;
pub use job::Priority;
pub use slot::{SlotSnapshot, SlotState};
pub use state::BufferStats;
pub use stream::{StreamBuffer, StreamStatus};

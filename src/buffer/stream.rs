//! Public read/seek/tell surface.

use std::future::Future;
use std::io::SeekFrom;
use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::block::BlockTranslator;
use super::scheduler::Scheduler;
use super::slot::SlotSnapshot;
use super::state::{BufferStats, Shared, State};
use super::worker::spawn_workers;
use crate::config::{BufferConfig, OpenMode};
use crate::error::StreamError;
use crate::io::{open_source, ReadAt};

/// The three status flags of a stream.
///
/// - `eof`: the position reached the end of the source
/// - `fail`: a recoverable failure (rejected seek, read at end of source)
/// - `bad`: a block could not be fetched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatus {
    pub eof: bool,
    pub fail: bool,
    pub bad: bool,
}

/// A read-only, seekable view of a slow byte source.
///
/// Blocks of the source are cached in a fixed number of slots and fetched
/// ahead of the read position by background workers running on a runtime
/// owned by this instance. All methods block the calling thread, so the
/// stream must not be driven from inside an async task.
///
/// ## Example
///
/// ```no_run
/// use std::io::SeekFrom;
/// use streambuf::{BufferConfig, OpenMode, StreamBuffer};
///
/// # fn main() -> Result<(), streambuf::StreamError> {
/// let mut stream = StreamBuffer::open(
///     "https://example.com/large.bin",
///     OpenMode::Read,
///     BufferConfig::new(1_000_000, 10, 2),
/// )?;
///
/// let mut buf = vec![0u8; 100_000];
/// let n = stream.read(&mut buf)?;
/// stream.seek(SeekFrom::Current(-50_000))?;
/// println!("read {} bytes, now at {}", n, stream.tell());
/// # Ok(())
/// # }
/// ```
pub struct StreamBuffer {
    shared: Arc<Shared>,
    source: Arc<dyn ReadAt>,
    translator: BlockTranslator,
    scheduler: Scheduler,
    runtime: Option<Runtime>,
    workers: Vec<JoinHandle<()>>,
    position: u64,
    status: StreamStatus,
    closed: bool,
}

impl StreamBuffer {
    /// Open `uri` for reading.
    ///
    /// Any mode other than [`OpenMode::Read`] is rejected before the source
    /// is contacted.
    pub fn open(uri: &str, mode: OpenMode, config: BufferConfig) -> Result<Self, StreamError> {
        if mode != OpenMode::Read {
            return Err(StreamError::UnsupportedMode(mode));
        }
        config.validate()?;

        let runtime = build_runtime(&config)?;
        let source = block_on(&runtime, open_source(uri))
            .map_err(|e| StreamError::Open {
                uri: uri.to_string(),
                source: e.into(),
            })?;

        debug!(uri, size = ?source.size(), "opened stream source");
        Ok(Self::start(runtime, source, &config))
    }

    /// Wrap an already opened source.
    pub fn with_source(source: Arc<dyn ReadAt>, config: BufferConfig) -> Result<Self, StreamError> {
        config.validate()?;
        let runtime = build_runtime(&config)?;
        Ok(Self::start(runtime, source, &config))
    }

    fn start(runtime: Runtime, source: Arc<dyn ReadAt>, config: &BufferConfig) -> Self {
        let translator = BlockTranslator::new(config.block_size);
        let scheduler = Scheduler::new(config.horizon_depth);
        let shared = Arc::new(Shared::new(State::new(
            config.slot_count,
            translator,
            source.size(),
        )));

        let workers = spawn_workers(
            &runtime,
            config.worker_count,
            &shared,
            &source,
            translator,
            config.fetch_timeout,
        );

        scheduler.recenter(&mut shared.lock(), 0);
        shared.work_ready.notify_waiters();

        Self {
            shared,
            source,
            translator,
            scheduler,
            runtime: Some(runtime),
            workers,
            position: 0,
            status: StreamStatus::default(),
            closed: false,
        }
    }

    /// Read up to `buf.len()` bytes from the current position.
    ///
    /// Fewer bytes are returned only at end of source (setting `eof`) or
    /// when a block that failed to fetch is reached (setting `bad`). A read
    /// at end of source returns 0 and also sets `fail`. If a failed block is
    /// hit before any byte was copied, its error is returned instead; the
    /// position is never moved past the start of that block.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let mut filled = 0;
        let mut state = self.shared.lock();

        while filled < buf.len() {
            if state.size_bound.is_some_and(|bound| self.position >= bound) {
                break;
            }

            let (block, intra) = self.translator.to_block(self.position);
            let (guard, result) = self.shared.wait_for_block(state, block);
            state = guard;

            let idx = match result {
                Ok(idx) => idx,
                Err(StreamError::Closed) => return Err(StreamError::Closed),
                Err(err) => {
                    self.status.bad = true;
                    if filled > 0 {
                        return Ok(filled);
                    }
                    return Err(err);
                }
            };

            let bytes = state.table.slot(idx).bytes();
            if intra >= bytes.len() {
                // Past the short final block
                break;
            }
            let n = (bytes.len() - intra).min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&bytes[intra..intra + n]);
            filled += n;
            self.position += n as u64;

            let (next_block, _) = self.translator.to_block(self.position);
            if next_block != block && self.scheduler.advance(&mut state, next_block) > 0 {
                self.shared.work_ready.notify_waiters();
            }
        }
        drop(state);

        if filled < buf.len() {
            self.status.eof = true;
            if filled == 0 {
                self.status.fail = true;
            }
        }
        Ok(filled)
    }

    /// Move the read position.
    ///
    /// Targets before the start, or past a proven end of the source, are
    /// rejected with [`StreamError::OutOfRange`]; the position is left
    /// unchanged and `fail` is set. A successful seek clears `eof` and
    /// `fail`.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }

        let mut state = self.shared.lock();
        let known_size = state.known_size;
        let size_bound = state.size_bound;

        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
            SeekFrom::End(delta) => match known_size {
                Some(size) => size as i128 + delta as i128,
                None => {
                    self.status.fail = true;
                    return Err(StreamError::UnknownLength);
                }
            },
        };

        if target < 0 || size_bound.is_some_and(|bound| target > bound as i128) {
            self.status.fail = true;
            return Err(StreamError::OutOfRange {
                target,
                size: known_size,
            });
        }

        self.position = target as u64;
        self.status.eof = false;
        self.status.fail = false;

        let (block, _) = self.translator.to_block(self.position);
        if self.scheduler.recenter(&mut state, block) > 0 {
            self.shared.work_ready.notify_waiters();
        }
        Ok(self.position)
    }

    /// Current position.
    pub fn tell(&self) -> u64 {
        self.position
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    pub fn eof(&self) -> bool {
        self.status.eof
    }

    pub fn fail(&self) -> bool {
        self.status.fail
    }

    pub fn bad(&self) -> bool {
        self.status.bad
    }

    /// No flag is set
    pub fn good(&self) -> bool {
        self.status == StreamStatus::default()
    }

    /// Reset all status flags.
    pub fn clear(&mut self) {
        self.status = StreamStatus::default();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Exact source length, once reported by the source or proven by the
    /// fetched blocks. A single empty read past the end is not enough.
    pub fn known_size(&self) -> Option<u64> {
        self.shared.lock().known_size
    }

    pub fn block_size(&self) -> usize {
        self.translator.block_size()
    }

    pub fn stats(&self) -> BufferStats {
        self.shared.lock().stats.clone()
    }

    /// Occupied slots, ordered by block
    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        self.shared.lock().table.snapshot()
    }

    /// Stop all fetching and release the source.
    ///
    /// Blocked readers are woken with [`StreamError::Closed`]. Workers are
    /// joined once their current read returns; afterwards nothing touches
    /// the slot table again. Calling `close` twice is a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        {
            let mut state = self.shared.lock();
            state.closed = true;
            let State { queue, table, .. } = &mut *state;
            queue.cancel_all(table);
        }
        self.shared.slot_changed.notify_all();
        self.shared.work_ready.notify_waiters();

        if let Some(runtime) = self.runtime.take() {
            let workers = std::mem::take(&mut self.workers);
            let source = self.source.clone();
            let closed = block_on(&runtime, async move {
                for handle in workers {
                    if let Err(e) = handle.await {
                        warn!(error = %e, "fetch worker ended abnormally");
                    }
                }
                source.close().await
            });
            if let Err(e) = closed {
                warn!(error = %e, "failed to close stream source");
            }
            if Handle::try_current().is_ok() {
                // Dropping a runtime blocks, which is not allowed in async context
                runtime.shutdown_background();
            } else {
                drop(runtime);
            }
        }

        self.shared.lock().table.clear();
        debug!(position = self.position, "stream closed");
    }
}

impl Drop for StreamBuffer {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::io::Read for StreamBuffer {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        StreamBuffer::read(self, buf).map_err(Into::into)
    }
}

impl std::io::Seek for StreamBuffer {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        StreamBuffer::seek(self, pos).map_err(Into::into)
    }

    fn stream_position(&mut self) -> std::io::Result<u64> {
        Ok(self.tell())
    }
}

impl std::fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("block_size", &self.translator.block_size())
            .field("position", &self.position)
            .field("status", &self.status)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Drive `future` on the stream's runtime.
///
/// `Runtime::block_on` panics when the calling thread is already inside a
/// runtime, so in that case the future is driven from a scoped thread.
fn block_on<F>(runtime: &Runtime, future: F) -> F::Output
where
    F: Future + Send,
    F::Output: Send,
{
    if Handle::try_current().is_err() {
        return runtime.block_on(future);
    }
    std::thread::scope(|scope| {
        scope
            .spawn(|| runtime.block_on(future))
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
    })
}

fn build_runtime(config: &BufferConfig) -> Result<Runtime, StreamError> {
    Builder::new_multi_thread()
        .worker_threads(config.worker_count)
        .thread_name("streambuf-fetch")
        .enable_all()
        .build()
        .map_err(StreamError::Runtime)
}

//! Background fetch workers.
//!
//! Each worker is a task on the stream's private runtime. A worker owns the
//! slot buffer for the duration of its read and never holds the stream lock
//! across the remote call.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::block::BlockTranslator;
use super::slot::FetchFailure;
use super::state::Shared;
use crate::io::{read_full, ReadAt};

/// Spawn `count` workers onto `runtime`.
pub(crate) fn spawn_workers(
    runtime: &Runtime,
    count: usize,
    shared: &Arc<Shared>,
    source: &Arc<dyn ReadAt>,
    translator: BlockTranslator,
    timeout: Option<Duration>,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|id| {
            runtime.spawn(run_worker(
                id,
                shared.clone(),
                source.clone(),
                translator,
                timeout,
            ))
        })
        .collect()
}

async fn run_worker(
    id: usize,
    shared: Arc<Shared>,
    source: Arc<dyn ReadAt>,
    translator: BlockTranslator,
    timeout: Option<Duration>,
) {
    debug!(worker = id, "fetch worker started");

    loop {
        // Register before checking the queue so a notify in between is not lost
        let notified = shared.work_ready.notified();

        let next = {
            let mut state = shared.lock();
            if state.closed {
                break;
            }
            state.take_job()
        };

        let Some((job, mut buf)) = next else {
            notified.await;
            continue;
        };

        trace!(
            worker = id,
            block = job.block,
            slot = job.slot,
            priority = ?job.priority,
            "fetching block"
        );

        buf.resize(translator.block_size(), 0);
        let offset = translator.block_start(job.block);
        let outcome = fetch(source.as_ref(), offset, &mut buf, timeout).await;

        shared.lock().finish_fetch(job, buf, outcome);
        shared.slot_changed.notify_all();
    }

    debug!(worker = id, "fetch worker stopped");
}

/// One block read, bounded by `timeout` when set.
async fn fetch(
    source: &dyn ReadAt,
    offset: u64,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> Result<usize, FetchFailure> {
    let read = read_full(source, offset, buf);
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, read).await {
            Ok(result) => result,
            Err(_) => return Err(FetchFailure::Timeout(limit)),
        },
        None => read.await,
    };
    result.map_err(|e| FetchFailure::Remote(format!("{:#}", e)))
}

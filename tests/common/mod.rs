//! In-memory source with latency and fault injection.

#![allow(dead_code)]

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use streambuf::ReadAt;

/// Deterministic test content of `len` bytes.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len as u64).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}

pub struct MemorySource {
    data: Vec<u8>,
    report_size: bool,
    latency: Duration,
    fail_range: Option<Range<u64>>,
    failures_left: AtomicUsize,
    stall: Option<(Range<u64>, Duration)>,
    reads: AtomicUsize,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            report_size: true,
            latency: Duration::ZERO,
            fail_range: None,
            failures_left: AtomicUsize::new(0),
            stall: None,
            reads: AtomicUsize::new(0),
        }
    }

    /// Do not report a size up front
    pub fn unsized_source(mut self) -> Self {
        self.report_size = false;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the first `times` reads starting inside `range`
    pub fn failing(mut self, range: Range<u64>, times: usize) -> Self {
        self.fail_range = Some(range);
        self.failures_left = AtomicUsize::new(times);
        self
    }

    /// Delay reads starting inside `range` by `delay`
    pub fn stalling(mut self, range: Range<u64>, delay: Duration) -> Self {
        self.stall = Some((range, delay));
        self
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn into_arc(self) -> Arc<dyn ReadAt> {
        Arc::new(self)
    }
}

#[async_trait]
impl ReadAt for MemorySource {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some((range, delay)) = &self.stall {
            if range.contains(&offset) {
                tokio::time::sleep(*delay).await;
            }
        }
        if let Some(range) = &self.fail_range {
            if range.contains(&offset)
                && self
                    .failures_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                bail!("injected failure at offset {}", offset);
            }
        }

        let start = (offset as usize).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> Option<u64> {
        self.report_size.then_some(self.data.len() as u64)
    }
}

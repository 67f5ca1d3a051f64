//! Error taxonomy of the stream buffer.

use std::time::Duration;

use thiserror::Error;

use crate::config::OpenMode;

/// Errors returned by [`StreamBuffer`](crate::StreamBuffer) operations.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The remote handle could not be established.
    #[error("failed to open {uri}: {source}")]
    Open {
        uri: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Only [`OpenMode::Read`] is supported.
    #[error("unsupported open mode {0:?}: the stream buffer is read-only")]
    UnsupportedMode(OpenMode),

    /// The fetch of a block failed. Sticky until the block leaves the horizon.
    #[error("fetch of block {block} failed: {message}")]
    Read { block: u64, message: String },

    /// Seek target lies before the start or past the known end.
    #[error("seek target {target} is outside the source bounds (size {size:?})")]
    OutOfRange { target: i128, size: Option<u64> },

    /// Seeking relative to the end before the source length is known.
    #[error("source length is not known yet, cannot seek relative to the end")]
    UnknownLength,

    /// The stream was closed.
    #[error("stream is closed")]
    Closed,

    /// The fetch of a block did not finish within the configured timeout.
    #[error("fetch of block {block} timed out after {timeout:?}")]
    Timeout { block: u64, timeout: Duration },

    #[error("invalid buffer configuration: {0}")]
    InvalidConfig(String),

    /// The fetch runtime could not be started.
    #[error("failed to start fetch workers: {0}")]
    Runtime(#[source] std::io::Error),
}

impl StreamError {
    /// Whether this error leaves the stream unusable for further reads
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            StreamError::Read { .. } | StreamError::Timeout { .. } | StreamError::Closed
        )
    }
}

impl From<StreamError> for std::io::Error {
    fn from(err: StreamError) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            StreamError::Open { source, .. } => io_kind(&**source).unwrap_or(ErrorKind::Other),
            StreamError::UnsupportedMode(_) => ErrorKind::Unsupported,
            StreamError::Read { .. } => ErrorKind::Other,
            StreamError::OutOfRange { .. } | StreamError::UnknownLength => ErrorKind::InvalidInput,
            StreamError::Closed => ErrorKind::NotConnected,
            StreamError::Timeout { .. } => ErrorKind::TimedOut,
            StreamError::InvalidConfig(_) => ErrorKind::InvalidInput,
            StreamError::Runtime(_) => ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

/// Kind of the first `std::io::Error` in an error's source chain
fn io_kind(err: &(dyn std::error::Error + 'static)) -> Option<std::io::ErrorKind> {
    std::iter::successors(Some(err), |e| e.source())
        .find_map(|e| e.downcast_ref::<std::io::Error>())
        .map(std::io::Error::kind)
}

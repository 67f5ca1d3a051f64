//! # streambuf
//!
//! Read a high-latency remote byte source as if it were a local, seekable file.
//!
//! [`StreamBuffer`] splits the source into fixed-size blocks, keeps a fixed
//! number of them resident, and fetches the blocks ahead of the read
//! position in the background. Reads that hit a resident block never touch
//! the network; seeks drop lookahead that no longer applies.
//!
//! ## Features
//!
//! - HTTP/HTTPS sources through Range requests, local files through `pread`
//! - Demand fetches always run before speculative ones
//! - Sticky per-block errors with `eof`/`fail`/`bad` status flags
//! - Implements [`std::io::Read`] and [`std::io::Seek`]
//!
//! ## Example
//!
//! ```no_run
//! use std::io::{Read, SeekFrom};
//! use streambuf::{BufferConfig, OpenMode, StreamBuffer};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = BufferConfig::new(1_000_000, 10, 2).with_horizon_depth(4);
//!     let mut stream = StreamBuffer::open("https://example.com/run.evio", OpenMode::Read, config)?;
//!
//!     let mut header = [0u8; 64];
//!     stream.read_exact(&mut header)?;
//!     stream.seek(SeekFrom::End(-64))?;
//!     stream.read_exact(&mut header)?;
//!
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod cli;
pub mod config;
pub mod error;
pub mod io;

pub use buffer::{BufferStats, StreamBuffer, StreamStatus};
pub use cli::Cli;
pub use config::{BufferConfig, OpenMode};
pub use error::StreamError;
pub use io::{HttpRangeReader, LocalFileReader, ReadAt};

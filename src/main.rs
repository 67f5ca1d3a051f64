//! Demonstration binary for the stream buffer.
//!
//! Reads a source in fixed-size chunks, jumping a random distance back or
//! forth after every chunk, and reports which status flag ended the loop.

use std::io::SeekFrom;

use anyhow::Result;
use clap::Parser;
use rand::Rng;
use tracing_subscriber::fmt;

use streambuf::{Cli, OpenMode, StreamBuffer};

/// Application entry point.
///
/// Not async: the stream buffer runs its own fetch runtime and blocks the
/// calling thread on reads.
fn main() -> Result<()> {
    let cli = Cli::parse();

    fmt::Subscriber::builder()
        .with_max_level(cli.log_level())
        .with_writer(std::io::stderr)
        .init();

    let mut stream = StreamBuffer::open(&cli.source, OpenMode::Read, cli.buffer_config())?;
    let count = read_with_jumps(&mut stream, &cli)?;

    println!("{} total blocks read", count);
    println!("{}", termination_reason(&stream));

    if !cli.quiet {
        let stats = stream.stats();
        eprintln!(
            "fetches: {} demand, {} prefetch, {} discarded, {} failed; {} bytes fetched",
            stats.demand_fetches,
            stats.prefetch_fetches,
            stats.discarded,
            stats.failed,
            stats.bytes_fetched
        );
    }

    stream.close();
    Ok(())
}

/// Read chunks until one comes back short, seeking randomly in between.
///
/// A rejected relative seek falls back to the last byte of the source,
/// which makes the following read the final one.
fn read_with_jumps(stream: &mut StreamBuffer, cli: &Cli) -> Result<usize> {
    let mut rng = rand::thread_rng();
    let mut buf = vec![0u8; cli.chunk];
    let mut count = 0;

    loop {
        let got = match stream.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.is_unrecoverable() => break,
            Err(e) => return Err(e.into()),
        };
        if got < buf.len() {
            break;
        }

        let jump = if cli.max_jump > 0 {
            rng.gen_range(-cli.max_jump..cli.max_jump)
        } else {
            0
        };
        if stream.seek(SeekFrom::Current(jump)).is_err() {
            stream.seek(SeekFrom::End(-1))?;
        }

        if !cli.quiet {
            println!("{}: got {} bytes, now at offset {}", count, got, stream.tell());
        }
        count += 1;
    }

    Ok(count)
}

/// Explain why the read loop stopped, one flag at a time.
fn termination_reason(stream: &StreamBuffer) -> &'static str {
    if stream.bad() {
        "loop terminated at bad input"
    } else if stream.eof() {
        "loop terminated with eof"
    } else if stream.fail() {
        "loop terminated at input error"
    } else {
        "loop terminated for no apparent reason"
    }
}

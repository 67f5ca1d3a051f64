use clap::Parser;

use crate::config::BufferConfig;

#[derive(Parser, Debug)]
#[command(name = "streambuf")]
#[command(version)]
#[command(about = "Read a remote source through the prefetching stream buffer", long_about = None)]
#[command(after_help = "Examples:\n  \
  streambuf https://example.com/run.evio          chunked read with random seeks\n  \
  streambuf -b 4194304 -s 16 -w 4 data.bin        larger blocks, more slots and workers\n  \
  streambuf -c 65536 -j 0 data.bin                plain sequential read")]
pub struct Cli {
    /// Source path or HTTP URL
    #[arg(value_name = "SOURCE")]
    pub source: String,

    /// Bytes per resident block
    #[arg(short = 'b', long, default_value_t = 1_000_000)]
    pub block_size: usize,

    /// Number of resident blocks
    #[arg(short = 's', long, default_value_t = 10)]
    pub slots: usize,

    /// Background fetch workers
    #[arg(short = 'w', long, default_value_t = 2)]
    pub workers: usize,

    /// Lookahead depth in blocks (default: half the slots)
    #[arg(short = 'k', long)]
    pub horizon: Option<usize>,

    /// Per-block fetch timeout in seconds
    #[arg(short = 't', long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Bytes requested per read
    #[arg(short = 'c', long, default_value_t = 100_000)]
    pub chunk: usize,

    /// Largest random relative seek after each read, in either direction
    #[arg(short = 'j', long, default_value_t = 150_000)]
    pub max_jump: i64,

    /// More log output (-vv => trace)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode, only print the summary
    #[arg(short = 'q')]
    pub quiet: bool,
}

impl Cli {
    /// Buffer parameters selected on the command line
    pub fn buffer_config(&self) -> BufferConfig {
        let mut config = BufferConfig::new(self.block_size, self.slots, self.workers);
        if let Some(horizon) = self.horizon {
            config = config.with_horizon_depth(horizon);
        }
        if let Some(secs) = self.timeout {
            config = config.with_fetch_timeout(std::time::Duration::from_secs(secs));
        }
        config
    }

    pub fn log_level(&self) -> tracing::Level {
        match (self.quiet, self.verbose) {
            (true, _) => tracing::Level::ERROR,
            (false, 0) => tracing::Level::WARN,
            (false, 1) => tracing::Level::DEBUG,
            (false, _) => tracing::Level::TRACE,
        }
    }
}

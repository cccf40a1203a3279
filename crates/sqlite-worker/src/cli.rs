use std::time::Duration;

use clap::Parser;
use sqlite_worker::EngineOptions;

#[derive(Parser, Debug, Clone)]
#[command(name = "sqlite-worker")]
pub struct Args {
    /// Logging level (stderr). Also supports RUST_LOG.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// SQLite busy timeout applied when the database is opened.
    #[arg(long, default_value_t = 2_000)]
    pub busy_timeout_ms: u64,

    /// Requests that may wait for the worker before senders block.
    #[arg(long, default_value_t = 64)]
    pub queue_capacity: usize,

    /// How long close waits for the worker before detaching it.
    #[arg(long, default_value_t = 5_000)]
    pub close_timeout_ms: u64,
}

impl Args {
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            queue_capacity: self.queue_capacity,
            close_timeout: Duration::from_millis(self.close_timeout_ms),
        }
    }
}

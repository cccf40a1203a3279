use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Reserved path token for a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub busy_timeout: Duration,
    /// Bound of the worker's request queue; senders wait once it is full.
    pub queue_capacity: usize,
    /// How long `close` waits for the worker to acknowledge before detaching it.
    pub close_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(2_000),
            queue_capacity: 64,
            close_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbPath {
    Memory,
    File(PathBuf),
}

impl DbPath {
    pub fn parse(path: &str) -> Self {
        if path == MEMORY_PATH {
            DbPath::Memory
        } else {
            DbPath::File(PathBuf::from(path))
        }
    }

    pub fn display(&self) -> std::path::Display<'_> {
        match self {
            DbPath::Memory => Path::new(MEMORY_PATH).display(),
            DbPath::File(p) => p.display(),
        }
    }
}

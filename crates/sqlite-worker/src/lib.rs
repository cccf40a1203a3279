//! Non-blocking access to an embedded SQLite database.
//!
//! A single background thread owns the connection; callers talk to it through
//! [`Database`], which sends each request with its own reply channel and
//! layers nested-call transactions on top of the native ones.

pub mod adapters;
pub mod core;
pub mod error;

pub use crate::core::{
    connection::Database,
    options::{DbPath, EngineOptions, MEMORY_PATH},
    types::{ExecResult, Row, Value},
};
pub use crate::error::{DbError, DbResult};

pub mod connection;
pub mod envelope;
pub mod options;
pub mod query;
pub mod types;
mod worker;

//! SurrealDB persistence for jobs and their event logs.
//!
//! This crate provides an explicit [`Store`] handle plus repositories for
//! the durable job records and the append-only per-job event log.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, Store};
pub use repositories::{EventRepository, JobRepository};
pub use schema::init_schema;

//! Storage engine for SoulSnaps
//!
//! Local SQLite database: memories with sync bookkeeping, the sync queue and
//! a small key-value table.

mod connection;
pub mod kv;
mod migrations;
pub mod queries;

pub use connection::Storage;
pub use kv::{KeyValueStore, MemoryKeyValueStore};
pub use migrations::SCHEMA_VERSION;

//! Local persistence for fieldsync
//!
//! SQLite-backed staging tables for unconfirmed writes plus a read cache of
//! remote records for offline reads.

mod cache;
mod connection;
mod migrations;
mod staging;

pub use cache::{CachedRecord, RemoteCache};
pub use connection::Storage;
pub use migrations::SCHEMA_VERSION;
pub use staging::{RawPendingRecord, StagingStore};

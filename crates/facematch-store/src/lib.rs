//! facematch-store: Durable storage for face descriptor records.
//!
//! One SQLite database holding one record collection, with a single
//! versioned migration routine and JSON export/restore.

pub mod backup;
pub mod schema;
pub mod store;

pub use backup::{BackupDocument, BackupError, RestoreSummary};
pub use schema::{RECORD_STORE, SCHEMA_VERSION};
pub use store::{now_timestamp, DescriptorStore, StoreError};

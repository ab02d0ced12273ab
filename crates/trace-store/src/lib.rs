//! Persistent store (C2): session registry plus time- and agent-indexed
//! event retrieval, snapshot storage, and retention.

pub mod error;
pub mod models;
pub mod schema;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::{
    PersistentStore, PostgresStore, SnapshotMeta, StoreConfig, StoreStats, TraceQuery,
};

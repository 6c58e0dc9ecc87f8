//! bitframe core - distributed bitmap index engine
//!
//! Stores, per frame, a bitset of column ids for every row id, plus attribute
//! maps on rows and on columns, and answers queries over them.
//!
//! # Architecture
//!
//! - **Bitset**: compressed set of column ids (roaring)
//! - **Fragment**: the rows of one frame within one slice of `SLICE_WIDTH`
//!   columns, persisted as a snapshot plus an operation log
//! - **Attribute store**: persistent id -> attribute map with merge writes
//! - **Cluster**: slice -> partition -> node assignment and node clients
//! - **Query**: parser for the call language and a map-reduce executor

pub mod bitset;
pub mod cluster;
pub mod query;
pub mod storage;
pub mod wal;

mod error;
mod types;

pub use error::{Error, Result};
pub use types::*;

/// bitframe version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Columns per slice (2^20)
    pub const SLICE_WIDTH: u64 = 1 << 20;

    /// Partitions slices are hashed into
    pub const DEFAULT_PARTITION_N: usize = 16;

    /// Nodes holding each partition
    pub const DEFAULT_REPLICA_N: usize = 1;

    /// Argument name that addresses columns in queries
    pub const DEFAULT_COLUMN_LABEL: &str = "profileID";

    /// Logged operations before a snapshot is rewritten
    pub const MAX_OP_N: usize = 10_000;
}

use thiserror::Error;

use crate::common::config::{RowId, WalSeq};

/// Errors surfaced by the multi-level cache system.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("key not found")]
    NotFound,
    #[error("entry of {size} bytes exceeds level capacity of {max} bytes")]
    CapacityExceeded { size: u64, max: u64 },
    #[error("level {0} does not exist")]
    InvalidLevel(usize),
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Eviction found no victim. Every resident entry was pinned.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EvictionError {
    #[error("no evictable entry: all candidates are pinned")]
    NoEvictableEntry,
}

/// Errors from the write-ahead log.
#[derive(Error, Debug)]
pub enum WalError {
    #[error("wal full: record needs {needed} bytes, {available} available")]
    Full { needed: usize, available: usize },
    #[error("table name exceeds 64 bytes")]
    TableNameTooLong,
    #[error("wal backing file is corrupt: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from replaying the write-ahead log against a database handle.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("wal record {seq} references unknown table '{table}'")]
    UnknownTable { table: String, seq: WalSeq },
    #[error("wal record {0} carries a malformed payload")]
    MalformedPayload(WalSeq),
    #[error(transparent)]
    Wal(#[from] WalError),
}

/// Errors from the catalog boundary model.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CatalogError {
    #[error("table '{0}' already exists")]
    DuplicateTable(String),
    #[error("unknown table '{0}'")]
    UnknownTable(String),
    #[error("unknown row {0}")]
    UnknownRow(RowId),
    #[error("row has {got} values, table expects {expected}")]
    ColumnCountMismatch { expected: usize, got: usize },
}

/// Errors from the persistence manager and the on-disk formats.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("corruption detected: {0}")]
    CorruptionDetected(String),
    #[error("operation timed out")]
    Timeout,
    #[error("persistence manager is closed")]
    Closed,
    #[error("range {offset}..{offset}+{len} is out of page bounds")]
    PageBounds { offset: usize, len: usize },
    #[error("invalid table name '{0}'")]
    InvalidTableName(String),
    #[error(transparent)]
    Wal(#[from] WalError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

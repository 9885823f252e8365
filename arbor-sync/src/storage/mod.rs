//! Ordered key-value storage behind the adapter.
//!
//! ```text
//! ┌──────────┐  open(location)  ┌─────────────┐
//! │ Backend  │ ───────────────► │ Handle      │  put / get / delete
//! │          │                  │ (one per    │  batch (atomic)
//! │          │  destroy(loc)    │  operation) │  scan (key order)
//! └──────────┘                  └─────────────┘
//! ```
//!
//! A handle lives for exactly one logical operation and is closed at its end.
//! All calls are synchronous; async callers run them on the blocking pool.

pub mod memory;
pub mod rocks;

pub use memory::{MemoryBackend, MemoryStats};
pub use rocks::{RocksBackend, StoreConfig};

use std::path::Path;

use thiserror::Error;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Key not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt entry at '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One operation of an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOp {
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// A stored entry as raw bytes.
pub type RawEntry = (Vec<u8>, Vec<u8>);

/// Opens handles on storage locations.
pub trait Backend: Send + Sync {
    fn open(&self, location: &Path) -> StoreResult<Box<dyn Handle>>;

    /// Irreversibly remove everything stored at `location`. Wiping a location
    /// that holds nothing succeeds.
    fn destroy(&self, location: &Path) -> StoreResult<()>;
}

/// An open storage location.
pub trait Handle: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Fails with [`StoreError::NotFound`] when `key` is absent.
    fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>>;

    /// Deleting an absent key succeeds.
    fn delete(&self, key: &[u8]) -> StoreResult<()>;

    /// Apply every operation, in order, or none of them.
    fn batch(&self, ops: Vec<BatchOp>) -> StoreResult<()>;

    /// Entries whose key starts with `prefix`, in key order. Iteration stops
    /// at the first error.
    fn scan<'a>(
        &'a self,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = StoreResult<RawEntry>> + 'a>;

    /// Flush anything pending. The handle is released when dropped.
    fn close(&self) -> StoreResult<()>;
}

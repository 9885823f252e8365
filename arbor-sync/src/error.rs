use arbor_core::SchemaError;
use thiserror::Error;

use crate::adapter::Mode;
use crate::codec::CodecError;
use crate::key::KeyError;
use crate::storage::StoreError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Malformed {mode} layout key '{key}'")]
    MalformedKey { key: String, mode: Mode },
    #[error("Storage holds {found} layout data but the adapter is in {expected} mode")]
    LayoutMismatch { expected: Mode, found: String },
    #[error("Live sync fell behind and lost {0} mutations")]
    Lagged(u64),
    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SyncError {
    /// A targeted get hit a missing key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Store(StoreError::NotFound(_)))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

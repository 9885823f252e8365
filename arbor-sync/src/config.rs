use std::path::PathBuf;

use crate::error::{SyncError, SyncResult};
use crate::key::{DEFAULT_SEPARATOR, RESERVED_PREFIX};
use crate::storage::StoreConfig;

/// Adapter configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Storage location. Required; the default is empty and fails validation.
    pub path: PathBuf,
    /// Path segment separator (default: '.')
    pub separator: char,
    /// Concurrent gets during a record layout fetch (default: 1, sequential)
    pub fetch_concurrency: usize,
    /// RocksDB tuning, used when the adapter opens its own backend
    pub store: StoreConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            separator: DEFAULT_SEPARATOR,
            fetch_concurrency: 1,
            store: StoreConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Small caches, for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            store: StoreConfig::for_testing(),
            ..Self::default()
        }
    }

    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency;
        self
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(SyncError::Config("no storage location supplied".into()));
        }
        if self.fetch_concurrency == 0 {
            return Err(SyncError::Config("fetch_concurrency must be at least 1".into()));
        }
        if self.separator == RESERVED_PREFIX || self.separator.is_control() {
            return Err(SyncError::Config(format!(
                "separator {:?} is a control character",
                self.separator
            )));
        }
        Ok(())
    }
}

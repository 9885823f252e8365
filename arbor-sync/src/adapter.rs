//! Attaching storage to a record or a collection.
//!
//! The host decides the mode once, at attach time: a [`Record`] host gives
//! record layout keys (`pet.name`), a [`Collection`] host gives collection
//! layout keys (`<record key>.pet.name`). Nothing changes it afterwards.

use std::path::Path;
use std::sync::Arc;

use arbor_core::{Collection, Mutation, Record, Schema};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, RwLock};

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::flatten::Flattener;
use crate::key::KeyCodec;
use crate::live::{LiveEvent, LiveSync};
use crate::session::blocking;
use crate::storage::{Backend, RocksBackend};

/// Storage layout, fixed by the kind of host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Record,
    Collection,
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Record => "record",
            Mode::Collection => "collection",
        }
    }

    /// Leading key segments that are not field names.
    pub(crate) fn key_prefix_len(&self) -> usize {
        match self {
            Mode::Record => 0,
            Mode::Collection => 1,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The object a [`LevelSync`] persists. Shared with the application, which
/// keeps mutating it through its own clone of the lock.
#[derive(Debug, Clone)]
pub enum Host {
    Record(Arc<RwLock<Record>>),
    Collection(Arc<RwLock<Collection>>),
}

impl From<Arc<RwLock<Record>>> for Host {
    fn from(record: Arc<RwLock<Record>>) -> Self {
        Host::Record(record)
    }
}

impl From<Arc<RwLock<Collection>>> for Host {
    fn from(collection: Arc<RwLock<Collection>>) -> Self {
        Host::Collection(collection)
    }
}

impl From<Record> for Host {
    fn from(record: Record) -> Self {
        Host::Record(Arc::new(RwLock::new(record)))
    }
}

impl From<Collection> for Host {
    fn from(collection: Collection) -> Self {
        Host::Collection(Arc::new(RwLock::new(collection)))
    }
}

impl Host {
    pub fn mode(&self) -> Mode {
        match self {
            Host::Record(_) => Mode::Record,
            Host::Collection(_) => Mode::Collection,
        }
    }

    pub fn record(&self) -> Option<&Arc<RwLock<Record>>> {
        match self {
            Host::Record(record) => Some(record),
            Host::Collection(_) => None,
        }
    }

    pub fn collection(&self) -> Option<&Arc<RwLock<Collection>>> {
        match self {
            Host::Collection(collection) => Some(collection),
            Host::Record(_) => None,
        }
    }

    pub async fn schema(&self) -> Arc<Schema> {
        match self {
            Host::Record(record) => record.read().await.schema().clone(),
            Host::Collection(collection) => collection.read().await.schema().clone(),
        }
    }

    pub(crate) async fn subscribe(&self) -> broadcast::Receiver<Mutation> {
        match self {
            Host::Record(record) => record.write().await.subscribe(),
            Host::Collection(collection) => collection.write().await.subscribe(),
        }
    }
}

/// Persistence adapter between one host and one storage location.
///
/// Storage is opened per operation and closed when it ends; no handle is
/// kept between calls. Bulk operations and live sync must not run
/// concurrently against the same location.
pub struct LevelSync {
    pub(crate) config: SyncConfig,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) host: Host,
    pub(crate) flattener: Arc<Flattener>,
    pub(crate) live: Option<LiveSync>,
    pub(crate) events: Option<mpsc::Receiver<LiveEvent>>,
}

impl LevelSync {
    /// Attach to `host` with RocksDB storage at `config.path`.
    pub async fn attach(config: SyncConfig, host: impl Into<Host>) -> SyncResult<Self> {
        let backend = Arc::new(RocksBackend::new(config.store.clone()));
        Self::attach_with_backend(config, host, backend).await
    }

    /// Attach to `host` with any storage backend.
    ///
    /// Fails before touching storage when the configuration is invalid or a
    /// declared field name cannot be stored under the configured separator.
    pub async fn attach_with_backend(
        config: SyncConfig,
        host: impl Into<Host>,
        backend: Arc<dyn Backend>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let host = host.into();
        let schema = host.schema().await;
        schema.validate(config.separator)?;

        let flattener = Flattener::for_schema(&schema, KeyCodec::new(config.separator));
        log::debug!(
            "Attached {} sync for '{}' at {}",
            host.mode(),
            schema.name(),
            config.path.display()
        );

        Ok(Self {
            config,
            backend,
            host,
            flattener: Arc::new(flattener),
            live: None,
            events: None,
        })
    }

    pub fn mode(&self) -> Mode {
        self.host.mode()
    }

    pub fn location(&self) -> &Path {
        &self.config.path
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn flattener(&self) -> &Flattener {
        &self.flattener
    }

    /// Wipe everything stored at the location.
    pub async fn destroy(&self) -> SyncResult<()> {
        let backend = self.backend.clone();
        let location = self.config.path.clone();
        blocking(move || Ok(backend.destroy(&location)?)).await?;
        log::info!("Destroyed storage at {}", self.config.path.display());
        Ok(())
    }
}

impl Drop for LevelSync {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            live.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::storage::MemoryBackend;
    use arbor_core::FieldType;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new("person").field("firstname", FieldType::String))
    }

    #[tokio::test]
    async fn test_mode_follows_host() {
        let backend = Arc::new(MemoryBackend::new());
        let sync = LevelSync::attach_with_backend(
            SyncConfig::new("people"),
            Collection::new(schema()),
            backend.clone(),
        )
        .await
        .unwrap();
        assert_eq!(sync.mode(), Mode::Collection);
        assert_eq!(sync.location(), Path::new("people"));

        let sync =
            LevelSync::attach_with_backend(SyncConfig::new("doctor"), Record::new(schema()), backend)
                .await
                .unwrap();
        assert_eq!(sync.mode(), Mode::Record);
        assert!(sync.host().record().is_some());
    }

    #[tokio::test]
    async fn test_attach_rejects_bad_config_and_schema() {
        let backend = Arc::new(MemoryBackend::new());
        let result = LevelSync::attach_with_backend(
            SyncConfig::default(),
            Record::new(schema()),
            backend.clone(),
        )
        .await;
        assert!(matches!(result, Err(SyncError::Config(_))));

        let bad = Schema::new("person").field("first.name", FieldType::String);
        let result =
            LevelSync::attach_with_backend(SyncConfig::new("db"), Record::new(bad), backend.clone())
                .await;
        assert!(matches!(result, Err(SyncError::Schema(_))));
        assert_eq!(backend.stats().opens, 0);
    }

    #[test]
    fn test_mode_names() {
        assert_eq!(Mode::Record.to_string(), "record");
        assert_eq!(Mode::Collection.name(), "collection");
    }
}

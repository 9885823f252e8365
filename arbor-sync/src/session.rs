//! Typed access to one open storage location.
//!
//! A [`Session`] wraps a backend handle for the length of a single logical
//! operation (one save, one fetch, one live mutation) and speaks in string
//! keys and [`StoredValue`]s instead of bytes. Keys starting with the
//! reserved prefix are bookkeeping and never show up in scans.

use std::path::{Path, PathBuf};

use crate::codec::StoredValue;
use crate::error::SyncResult;
use crate::flatten::WriteOp;
use crate::key::KeyCodec;
use crate::storage::{Backend, BatchOp, Handle, StoreError};

pub struct Session {
    handle: Box<dyn Handle>,
    location: PathBuf,
}

impl Session {
    pub fn open(backend: &dyn Backend, location: &Path) -> SyncResult<Self> {
        let handle = backend.open(location)?;
        Ok(Self {
            handle,
            location: location.to_path_buf(),
        })
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn put(&self, key: &str, value: &StoredValue) -> SyncResult<()> {
        self.handle.put(key.as_bytes(), &value.to_bytes()?)?;
        Ok(())
    }

    /// Fails with a not-found storage error when `key` is absent.
    pub fn get(&self, key: &str) -> SyncResult<StoredValue> {
        let raw = self.handle.get(key.as_bytes())?;
        Ok(decode_entry(key, &raw)?)
    }

    /// Raw bytes under `key`, `None` when absent.
    pub fn get_raw(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        match self.handle.get(key.as_bytes()) {
            Ok(raw) => Ok(Some(raw)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete(&self, key: &str) -> SyncResult<()> {
        self.handle.delete(key.as_bytes())?;
        Ok(())
    }

    /// Apply a batch atomically. Returns the number of operations applied.
    pub fn apply(&self, batch: Batch) -> SyncResult<usize> {
        let count = batch.ops.len();
        if count > 0 {
            self.handle.batch(batch.ops)?;
        }
        Ok(count)
    }

    /// Non-reserved entries under `prefix`, in key order. The first bad
    /// entry aborts the scan.
    pub fn entries(&self, prefix: &str) -> SyncResult<Vec<(String, StoredValue)>> {
        let mut entries = Vec::new();
        for item in self.handle.scan(prefix.as_bytes()) {
            let (raw_key, raw_value) = item?;
            let key = utf8_key(raw_key)?;
            if KeyCodec::is_reserved(&key) {
                continue;
            }
            let value = decode_entry(&key, &raw_value)?;
            entries.push((key, value));
        }
        Ok(entries)
    }

    /// Non-reserved keys under `prefix`, in key order.
    pub fn keys(&self, prefix: &str) -> SyncResult<Vec<String>> {
        let mut keys = Vec::new();
        for item in self.handle.scan(prefix.as_bytes()) {
            let key = utf8_key(item?.0)?;
            if !KeyCodec::is_reserved(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    pub fn close(self) -> SyncResult<()> {
        self.handle.close()?;
        Ok(())
    }
}

/// Operations to apply together through [`Session::apply`].
#[derive(Debug, Clone, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &str, value: &StoredValue) -> SyncResult<()> {
        self.put_raw(key, value.to_bytes()?);
        Ok(())
    }

    pub fn put_raw(&mut self, key: &str, value: Vec<u8>) {
        self.ops.push(BatchOp::Put {
            key: key.as_bytes().to_vec(),
            value,
        });
    }

    pub fn delete(&mut self, key: &str) {
        self.ops.push(BatchOp::Delete {
            key: key.as_bytes().to_vec(),
        });
    }

    pub fn write_all(&mut self, ops: &[WriteOp]) -> SyncResult<()> {
        for op in ops {
            self.put(&op.key, &op.value)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Run a storage closure on the blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> SyncResult<T>
where
    F: FnOnce() -> SyncResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

fn utf8_key(raw: Vec<u8>) -> Result<String, StoreError> {
    String::from_utf8(raw).map_err(|e| StoreError::Corrupt {
        key: String::from_utf8_lossy(e.as_bytes()).into_owned(),
        reason: "key is not UTF-8".to_string(),
    })
}

fn decode_entry(key: &str, raw: &[u8]) -> Result<StoredValue, StoreError> {
    StoredValue::from_bytes(raw).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Encoding;
    use crate::error::SyncError;
    use crate::storage::MemoryBackend;

    #[test]
    fn test_typed_put_get_delete() {
        let backend = MemoryBackend::new();
        let session = Session::open(&backend, Path::new("db")).unwrap();
        let value = StoredValue::new(Encoding::String, "Doctor");

        session.put("lastname", &value).unwrap();
        assert_eq!(session.get("lastname").unwrap(), value);

        session.delete("lastname").unwrap();
        let err = session.get("lastname").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(session.get_raw("lastname").unwrap(), None);
        session.close().unwrap();
    }

    #[test]
    fn test_scans_skip_reserved_keys() {
        let backend = MemoryBackend::new();
        let session = Session::open(&backend, Path::new("db")).unwrap();
        let mut batch = Batch::new();
        batch.put_raw("\u{0}layout", b"record".to_vec());
        batch.put("pet.name", &StoredValue::new(Encoding::String, "K-9")).unwrap();
        batch.put("firstname", &StoredValue::new(Encoding::String, "The")).unwrap();
        assert_eq!(session.apply(batch).unwrap(), 3);

        assert_eq!(session.keys("").unwrap(), vec!["firstname", "pet.name"]);
        let entries = session.entries("pet.").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.raw, "K-9");
    }

    #[test]
    fn test_corrupt_value_aborts_scan() {
        let backend = MemoryBackend::new();
        let session = Session::open(&backend, Path::new("db")).unwrap();
        let mut batch = Batch::new();
        batch.put_raw("broken", vec![0xff, 0xff, 0xff]);
        session.apply(batch).unwrap();

        assert!(matches!(
            session.entries(""),
            Err(SyncError::Store(StoreError::Corrupt { ref key, .. })) if key == "broken"
        ));
    }

    #[test]
    fn test_empty_batch_is_not_written() {
        let backend = MemoryBackend::new();
        let session = Session::open(&backend, Path::new("db")).unwrap();
        assert_eq!(session.apply(Batch::new()).unwrap(), 0);
        assert_eq!(backend.stats().batches, 0);
    }
}

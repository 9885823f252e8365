//! In-memory storage backend for testing.
//!
//! Locations are kept in a shared map, so a location survives its handle
//! being closed and can be reopened like a directory on disk. Operation
//! counters let tests assert exactly how many writes a sync performed.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Backend, BatchOp, Handle, RawEntry, StoreError, StoreResult};

type Table = Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>;

/// Snapshot of operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub opens: u64,
    pub puts: u64,
    pub deletes: u64,
    pub batches: u64,
}

#[derive(Debug, Default)]
struct Counters {
    opens: AtomicU64,
    puts: AtomicU64,
    deletes: AtomicU64,
    batches: AtomicU64,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<PathBuf, Table>>,
    counters: Arc<Counters>,
    failing: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            opens: self.counters.opens.load(Ordering::SeqCst),
            puts: self.counters.puts.load(Ordering::SeqCst),
            deletes: self.counters.deletes.load(Ordering::SeqCst),
            batches: self.counters.batches.load(Ordering::SeqCst),
        }
    }

    /// Make every subsequent operation, on open handles too, fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Copy of everything stored at `location`, keys and values as UTF-8.
    pub fn dump(&self, location: &Path) -> BTreeMap<String, Vec<u8>> {
        self.tables
            .read()
            .get(location)
            .map(|table| {
                table
                    .read()
                    .iter()
                    .map(|(k, v)| (String::from_utf8_lossy(k).into_owned(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn check(failing: &AtomicBool) -> StoreResult<()> {
        if failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other(
                "memory backend is failing",
            )));
        }
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn open(&self, location: &Path) -> StoreResult<Box<dyn Handle>> {
        Self::check(&self.failing)?;
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        let table = self
            .tables
            .write()
            .entry(location.to_path_buf())
            .or_default()
            .clone();
        Ok(Box::new(MemoryHandle {
            table,
            counters: self.counters.clone(),
            failing: self.failing.clone(),
        }))
    }

    fn destroy(&self, location: &Path) -> StoreResult<()> {
        Self::check(&self.failing)?;
        if let Some(table) = self.tables.write().remove(location) {
            table.write().clear();
        }
        Ok(())
    }
}

struct MemoryHandle {
    table: Table,
    counters: Arc<Counters>,
    failing: Arc<AtomicBool>,
}

impl Handle for MemoryHandle {
    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        MemoryBackend::check(&self.failing)?;
        self.counters.puts.fetch_add(1, Ordering::SeqCst);
        self.table.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        MemoryBackend::check(&self.failing)?;
        self.table
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(String::from_utf8_lossy(key).into_owned()))
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        MemoryBackend::check(&self.failing)?;
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        self.table.write().remove(key);
        Ok(())
    }

    fn batch(&self, ops: Vec<BatchOp>) -> StoreResult<()> {
        MemoryBackend::check(&self.failing)?;
        self.counters.batches.fetch_add(1, Ordering::SeqCst);
        let mut table = self.table.write();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    table.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    table.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan<'a>(
        &'a self,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = StoreResult<RawEntry>> + 'a> {
        if let Err(e) = MemoryBackend::check(&self.failing) {
            return Box::new(std::iter::once(Err(e)));
        }
        // Snapshot, so writers are not blocked while a scan is consumed
        let entries: Vec<RawEntry> = self
            .table
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Box::new(entries.into_iter().map(Ok))
    }

    fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_survives_reopen() {
        let backend = MemoryBackend::new();
        let location = Path::new("people");
        backend.open(location).unwrap().put(b"0.name", b"K-9").unwrap();

        let handle = backend.open(location).unwrap();
        assert_eq!(handle.get(b"0.name").unwrap(), b"K-9");
        assert!(backend.open(Path::new("other")).unwrap().get(b"0.name").is_err());
        assert_eq!(backend.stats().opens, 3);
        assert_eq!(backend.stats().puts, 1);
    }

    #[test]
    fn test_scan_prefix() {
        let backend = MemoryBackend::new();
        let handle = backend.open(Path::new("db")).unwrap();
        handle
            .batch(vec![
                BatchOp::Put { key: b"1.b".to_vec(), value: vec![] },
                BatchOp::Put { key: b"1.a".to_vec(), value: vec![] },
                BatchOp::Put { key: b"10.a".to_vec(), value: vec![] },
            ])
            .unwrap();
        let keys: Vec<_> = handle.scan(b"1.").map(|e| e.unwrap().0).collect();
        assert_eq!(keys, vec![b"1.a".to_vec(), b"1.b".to_vec()]);
        assert_eq!(backend.stats().batches, 1);
    }

    #[test]
    fn test_failing_backend() {
        let backend = MemoryBackend::new();
        let handle = backend.open(Path::new("db")).unwrap();
        backend.set_failing(true);
        assert!(matches!(handle.put(b"k", b"v"), Err(StoreError::Io(_))));
        assert!(handle.scan(b"").next().is_some_and(|e| e.is_err()));
        assert!(backend.open(Path::new("db")).is_err());
        backend.set_failing(false);
        assert!(handle.put(b"k", b"v").is_ok());
    }

    #[test]
    fn test_destroy() {
        let backend = MemoryBackend::new();
        let location = Path::new("db");
        backend.open(location).unwrap().put(b"k", b"v").unwrap();
        backend.destroy(location).unwrap();
        assert!(backend.dump(location).is_empty());
    }
}

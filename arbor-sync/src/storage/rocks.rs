//! RocksDB-backed storage.
//!
//! One database directory per storage location, default column family only.
//! Keys sort bytewise, which for UTF-8 keys is lexicographic order.

use std::path::Path;

use rocksdb::{
    BlockBasedOptions, Cache, DBCompressionType, DBWithThreadMode, IteratorMode, Options,
    ReadOptions, SingleThreaded, WriteBatch, WriteOptions,
};

use super::{Backend, BatchOp, Handle, RawEntry, StoreError, StoreResult};

/// RocksDB tuning.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size (default: 32MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 32 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches for tests.
    pub fn for_testing() -> Self {
        Self {
            block_cache_size: 4 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 2 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RocksBackend {
    config: StoreConfig,
}

impl RocksBackend {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn options(&self) -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(self.config.max_open_files);
        opts.set_keep_log_file_num(5);
        opts.increase_parallelism(num_cpus());

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(self.config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(self.config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(self.config.write_buffer_size);
        opts
    }
}

impl Backend for RocksBackend {
    fn open(&self, location: &Path) -> StoreResult<Box<dyn Handle>> {
        if let Some(parent) = location.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = DBWithThreadMode::<SingleThreaded>::open(&self.options(), location)?;
        log::trace!("Opened RocksDB at {}", location.display());
        Ok(Box::new(RocksHandle {
            db,
            sync_writes: self.config.sync_writes,
        }))
    }

    fn destroy(&self, location: &Path) -> StoreResult<()> {
        if !location.exists() {
            return Ok(());
        }
        DBWithThreadMode::<SingleThreaded>::destroy(&Options::default(), location)?;
        log::debug!("Destroyed RocksDB at {}", location.display());
        Ok(())
    }
}

/// Open database. Dropping it releases the directory lock.
pub struct RocksHandle {
    db: DBWithThreadMode<SingleThreaded>,
    sync_writes: bool,
}

impl RocksHandle {
    fn write_opts(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }
}

impl Handle for RocksHandle {
    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.db.put_opt(key, value, &self.write_opts())?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.db
            .get(key)?
            .ok_or_else(|| StoreError::NotFound(String::from_utf8_lossy(key).into_owned()))
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.db.delete_opt(key, &self.write_opts())?;
        Ok(())
    }

    fn batch(&self, ops: Vec<BatchOp>) -> StoreResult<()> {
        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => batch.put(key, value),
                BatchOp::Delete { key } => batch.delete(key),
            }
        }
        self.db.write_opt(batch, &self.write_opts())?;
        Ok(())
    }

    fn scan<'a>(
        &'a self,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = StoreResult<RawEntry>> + 'a> {
        let prefix = prefix.to_vec();
        let mut read_opts = ReadOptions::default();
        read_opts.set_iterate_lower_bound(prefix.clone());
        let iter = self.db.iterator_opt(IteratorMode::Start, read_opts);

        Box::new(
            iter.map(|item| {
                item.map(|(key, value)| (key.into_vec(), value.into_vec()))
                    .map_err(StoreError::from)
            })
            .take_while(move |item| match item {
                Ok((key, _)) => key.starts_with(&prefix),
                Err(_) => true,
            }),
        )
    }

    fn close(&self) -> StoreResult<()> {
        if self.sync_writes {
            self.db.flush_wal(true)?;
        }
        Ok(())
    }
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

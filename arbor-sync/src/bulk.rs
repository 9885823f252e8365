//! Whole-dataset save and fetch.
//!
//! Each call opens storage, does its work and closes storage again. The
//! returned future resolving to `Ok` is the completion signal; on any error
//! it resolves to that error and the host is left untouched.

use std::sync::Arc;

use arbor_core::FieldMap;
use futures_util::stream::{self, StreamExt, TryStreamExt};

use crate::adapter::{Host, LevelSync, Mode};
use crate::codec::StoredValue;
use crate::error::{SyncError, SyncResult};
use crate::layout;
use crate::session::{blocking, Batch, Session};

impl LevelSync {
    /// Write the whole host to storage in one atomic batch.
    ///
    /// In collection mode the location is wiped first, so records removed
    /// since the last save disappear. In record mode existing keys are
    /// overwritten in place. Returns the number of fields written.
    pub async fn save(&self) -> SyncResult<usize> {
        let mode = self.mode();
        let (ops, order) = match &self.host {
            Host::Record(record) => (self.flattener.flatten_record(&*record.read().await)?, None),
            Host::Collection(collection) => {
                let collection = collection.read().await;
                let order: Vec<String> = collection.keys().map(str::to_string).collect();
                (self.flattener.flatten_collection(&collection)?, Some(order))
            }
        };
        let written = ops.len();

        let backend = self.backend.clone();
        let location = self.config.path.clone();
        blocking(move || {
            if mode == Mode::Collection {
                backend.destroy(&location)?;
            }
            let session = Session::open(backend.as_ref(), &location)?;
            layout::check(&session, mode)?;

            let mut batch = Batch::new();
            batch.write_all(&ops)?;
            if let Some(order) = &order {
                layout::write_order(&mut batch, order)?;
            }
            layout::stamp(&mut batch, mode);
            session.apply(batch)?;
            session.close()
        })
        .await?;

        log::info!(
            "Saved {written} fields in {mode} layout to {}",
            self.config.path.display()
        );
        Ok(written)
    }

    /// Replace the host's contents with what is stored.
    ///
    /// Returns the number of records loaded in collection mode, or the
    /// number of top-level fields loaded in record mode.
    pub async fn fetch(&self) -> SyncResult<usize> {
        let count = match &self.host {
            Host::Collection(collection) => {
                let records = self.fetch_collection().await?;
                let count = records.len();
                collection
                    .write()
                    .await
                    .reload(records.into_iter().map(|(_, map)| map));
                count
            }
            Host::Record(record) => {
                let map = self.fetch_record().await?;
                let count = map.len();
                record.write().await.load(map);
                count
            }
        };
        log::info!(
            "Fetched {count} {} from {}",
            match self.mode() {
                Mode::Record => "fields",
                Mode::Collection => "records",
            },
            self.config.path.display()
        );
        Ok(count)
    }

    /// One full scan, regrouped into records and put back in stored order.
    async fn fetch_collection(&self) -> SyncResult<Vec<(String, FieldMap)>> {
        let backend = self.backend.clone();
        let location = self.config.path.clone();
        let flattener = self.flattener.clone();
        blocking(move || {
            let session = Session::open(backend.as_ref(), &location)?;
            layout::check(&session, Mode::Collection)?;
            let entries = session.entries("")?;
            let order = layout::read_order(&session)?;
            session.close()?;

            let records = flattener.unflatten_collection(entries)?;
            Ok(layout::apply_order(records, &order))
        })
        .await
    }

    /// Every key, then one get per key with at most `fetch_concurrency` in
    /// flight. Results are gathered in key order whatever order the gets
    /// complete in.
    async fn fetch_record(&self) -> SyncResult<FieldMap> {
        let backend = self.backend.clone();
        let location = self.config.path.clone();
        let session = blocking(move || {
            let session = Session::open(backend.as_ref(), &location)?;
            layout::check(&session, Mode::Record)?;
            Ok(session)
        })
        .await?;
        let session = Arc::new(session);

        let keys = {
            let session = session.clone();
            blocking(move || session.keys("")).await?
        };

        let entries: Vec<(String, StoredValue)> = stream::iter(keys)
            .map(|key| {
                let session = session.clone();
                async move {
                    tokio::task::yield_now().await;
                    let lookup = key.clone();
                    let stored = blocking(move || session.get(&lookup)).await?;
                    Ok::<_, SyncError>((key, stored))
                }
            })
            .buffered(self.config.fetch_concurrency)
            .try_collect()
            .await?;

        if let Ok(session) = Arc::try_unwrap(session) {
            blocking(move || session.close()).await?;
        }
        self.flattener.unflatten_record(entries)
    }
}

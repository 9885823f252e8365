//! Mirroring host mutations to storage as they happen.
//!
//! ```text
//! host.set(..) ──► broadcast<Mutation> ──► live task ──► one storage op
//!                                               │
//!                                               └──► mpsc<LiveEvent>
//! ```
//!
//! Every mutation is its own storage operation with its own open and close.
//! Nothing spans two mutations, so a crash between them can leave storage
//! holding the first but not the second.

use std::path::PathBuf;
use std::sync::Arc;

use arbor_core::{Mutation, MutationKind};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::adapter::{LevelSync, Mode};
use crate::error::{SyncError, SyncResult};
use crate::flatten::Flattener;
use crate::layout;
use crate::session::{blocking, Batch, Session};
use crate::storage::Backend;

/// Buffer for applied-mutation notifications. When nobody drains it,
/// notifications are dropped; storage writes are not affected.
const EVENT_BUFFER: usize = 256;

/// What a single mutation did to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    /// One key written
    Put { key: String },
    /// A key removed, together with any keys below it
    Delete { key: String, removed: usize },
    /// A sub-record or record written under `prefix` in one batch
    Batch { prefix: String, written: usize },
    /// Every record removed
    Clear { removed: usize },
}

impl LevelSync {
    /// Start mirroring host mutations to storage. Returns `false` when live
    /// sync is already running.
    pub async fn enable_live_sync(&mut self) -> SyncResult<bool> {
        if self.live_sync_enabled() {
            return Ok(false);
        }
        if let Some(stale) = self.live.take() {
            if let Err(e) = stale.stop().await {
                log::warn!("Previous live sync ended with: {e}");
            }
        }

        let mutations = self.host.subscribe().await;
        let writer = Writer {
            backend: self.backend.clone(),
            location: self.config.path.clone(),
            flattener: self.flattener.clone(),
            mode: self.mode(),
        };

        let stamper = writer.clone();
        blocking(move || stamper.stamp()).await?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        self.events = Some(events_rx);
        self.live = Some(LiveSync::spawn(writer, mutations, events_tx));
        log::info!(
            "Live sync enabled in {} layout for {}",
            self.mode(),
            self.config.path.display()
        );
        Ok(true)
    }

    /// Stop mirroring. Mutations already reported are written first.
    /// Returns how many mutations the task applied, or the error that
    /// stopped it.
    pub async fn disable_live_sync(&mut self) -> SyncResult<u64> {
        self.events = None;
        match self.live.take() {
            Some(live) => live.stop().await,
            None => Ok(0),
        }
    }

    pub fn live_sync_enabled(&self) -> bool {
        self.live.as_ref().is_some_and(|live| !live.is_finished())
    }

    /// Notifications of applied mutations. Handed out once per enable.
    pub fn take_live_events(&mut self) -> Option<mpsc::Receiver<LiveEvent>> {
        self.events.take()
    }
}

/// A running live sync task.
pub(crate) struct LiveSync {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<SyncResult<u64>>,
}

impl LiveSync {
    fn spawn(
        writer: Writer,
        mutations: broadcast::Receiver<Mutation>,
        events: mpsc::Sender<LiveEvent>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(writer, mutations, shutdown_rx, events));
        Self {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub(crate) async fn stop(mut self) -> SyncResult<u64> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        (&mut self.task).await?
    }

    pub(crate) fn abort(&self) {
        self.task.abort();
    }
}

async fn run(
    writer: Writer,
    mut mutations: broadcast::Receiver<Mutation>,
    mut shutdown: oneshot::Receiver<()>,
    events: mpsc::Sender<LiveEvent>,
) -> SyncResult<u64> {
    let mut applied = 0u64;
    loop {
        tokio::select! {
            biased;

            received = mutations.recv() => match received {
                Ok(mutation) => {
                    writer.apply(mutation, &events).await?;
                    applied += 1;
                }
                Err(RecvError::Lagged(lost)) => {
                    log::error!("Live sync lost {lost} mutations, stopping");
                    return Err(SyncError::Lagged(lost));
                }
                Err(RecvError::Closed) => break,
            },

            _ = &mut shutdown => {
                loop {
                    match mutations.try_recv() {
                        Ok(mutation) => {
                            writer.apply(mutation, &events).await?;
                            applied += 1;
                        }
                        Err(TryRecvError::Lagged(lost)) => {
                            log::error!("Live sync lost {lost} mutations, stopping");
                            return Err(SyncError::Lagged(lost));
                        }
                        Err(_) => break,
                    }
                }
                break;
            }
        }
    }
    log::debug!("Live sync stopped after {applied} mutations");
    Ok(applied)
}

/// Everything needed to turn one mutation into one storage operation.
#[derive(Clone)]
struct Writer {
    backend: Arc<dyn Backend>,
    location: PathBuf,
    flattener: Arc<Flattener>,
    mode: Mode,
}

impl Writer {
    async fn apply(&self, mutation: Mutation, events: &mpsc::Sender<LiveEvent>) -> SyncResult<()> {
        let writer = self.clone();
        let path = mutation.path.clone();
        match blocking(move || writer.write(mutation)).await {
            Ok(event) => {
                log::debug!("Live sync applied {event:?}");
                if events.try_send(event).is_err() {
                    log::trace!("Live event dropped, no receiver or buffer full");
                }
                Ok(())
            }
            Err(e) => {
                log::error!("Live sync failed at {path:?}: {e}");
                Err(e)
            }
        }
    }

    /// Refuse storage written in the other layout, then claim it.
    fn stamp(&self) -> SyncResult<()> {
        let session = Session::open(self.backend.as_ref(), &self.location)?;
        layout::check(&session, self.mode)?;
        let mut batch = Batch::new();
        layout::stamp(&mut batch, self.mode);
        session.apply(batch)?;
        session.close()
    }

    fn write(&self, mutation: Mutation) -> SyncResult<LiveEvent> {
        let Mutation { path, kind } = mutation;
        let keys = self.flattener.keys();
        let skip = self.mode.key_prefix_len();
        let session = Session::open(self.backend.as_ref(), &self.location)?;

        let event = match kind {
            MutationKind::FieldChanged(value) | MutationKind::FieldCreated(value) => {
                let op = self.flattener.value_op(&path, skip, &value)?;
                session.put(&op.key, &op.value)?;
                LiveEvent::Put { key: op.key }
            }
            MutationKind::FieldRemoved => {
                let key = keys.encode(&path)?;
                let below = session.keys(&keys.prefix(&path)?)?;
                if below.is_empty() {
                    session.delete(&key)?;
                } else {
                    let mut batch = Batch::new();
                    batch.delete(&key);
                    for child in &below {
                        batch.delete(child);
                    }
                    session.apply(batch)?;
                }
                LiveEvent::Delete {
                    key,
                    removed: below.len() + 1,
                }
            }
            MutationKind::RelationshipAttached(record) => {
                let ops = self.flattener.flatten_at(&path, skip, &record)?;
                let mut batch = Batch::new();
                batch.write_all(&ops)?;
                session.apply(batch)?;
                LiveEvent::Batch {
                    prefix: keys.encode(&path)?,
                    written: ops.len(),
                }
            }
            MutationKind::RecordAdded(record) => {
                let record_key = keys.encode(&path)?;
                let mut batch = Batch::new();
                // A replaced record may have had fields the new one lacks
                for stale in session.keys(&keys.prefix(&path)?)? {
                    batch.delete(&stale);
                }
                let ops = self.flattener.flatten_at(&path, skip, &record)?;
                batch.write_all(&ops)?;

                let mut order = layout::read_order(&session)?;
                if !order.contains(&record_key) {
                    order.push(record_key.clone());
                }
                layout::write_order(&mut batch, &order)?;
                session.apply(batch)?;
                LiveEvent::Batch {
                    prefix: record_key,
                    written: ops.len(),
                }
            }
            MutationKind::RecordRemoved => {
                let record_key = keys.encode(&path)?;
                let stale = session.keys(&keys.prefix(&path)?)?;
                let mut batch = Batch::new();
                for key in &stale {
                    batch.delete(key);
                }
                let mut order = layout::read_order(&session)?;
                order.retain(|key| key != &record_key);
                layout::write_order(&mut batch, &order)?;
                session.apply(batch)?;
                LiveEvent::Delete {
                    key: record_key,
                    removed: stale.len(),
                }
            }
            MutationKind::Cleared => {
                let stale = session.keys("")?;
                let mut batch = Batch::new();
                for key in &stale {
                    batch.delete(key);
                }
                layout::write_order::<&str>(&mut batch, &[])?;
                session.apply(batch)?;
                LiveEvent::Clear {
                    removed: stale.len(),
                }
            }
        };

        session.close()?;
        Ok(event)
    }
}

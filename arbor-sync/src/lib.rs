//! # arbor-sync — ordered key-value persistence for arbor records
//!
//! Flattens a record, or a whole collection of records, into a flat ordered
//! key space and back, either in bulk or one mutation at a time.
//!
//! ## Architecture
//!
//! ```text
//!                      save()                       ┌──────────────┐
//! ┌─────────────┐ ──► Flattener ──► atomic batch ──►│              │
//! │ Record /    │                                   │  Backend     │
//! │ Collection  │ ◄── Unflattener ◄── scan / get ◄──│  (RocksDB,   │
//! │ (host)      │      fetch()                      │   memory)    │
//! └──────┬──────┘                                   │              │
//!        │ broadcast<Mutation>                      │              │
//!        ▼                                          │              │
//! ┌─────────────┐     one put / delete / batch      │              │
//! │ live task   │ ─────────────────────────────────►│              │
//! └─────────────┘                                   └──────────────┘
//! ```
//!
//! Record layout keys are field paths (`pet.name`); collection layout keys
//! lead with the record key (`0.pet.name`).
//!
//! ## Modules
//!
//! - [`key`] — field path ⇄ storage key
//! - [`codec`] — field value ⇄ stored envelope, declared type lookup
//! - [`flatten`] — record tree ⇄ key/value entries
//! - [`storage`] — backend and handle traits, RocksDB and in-memory backends
//! - [`session`] — typed per-operation access to one location
//! - [`layout`] — reserved bookkeeping keys
//! - [`adapter`] — [`LevelSync`], attaching storage to a host
//! - [`bulk`] — whole-dataset save and fetch
//! - [`live`] — per-mutation writes

pub mod adapter;
pub mod bulk;
pub mod codec;
pub mod config;
pub mod error;
pub mod flatten;
pub mod key;
pub mod layout;
pub mod live;
pub mod session;
pub mod storage;

// Re-exports for convenience
pub use adapter::{Host, LevelSync, Mode};
pub use codec::{CodecError, Encoding, StoredValue, TypeTable};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use flatten::{Flattener, WriteOp};
pub use key::{KeyCodec, KeyError, DEFAULT_SEPARATOR};
pub use live::LiveEvent;
pub use storage::{
    Backend, BatchOp, Handle, MemoryBackend, MemoryStats, RocksBackend, StoreConfig, StoreError,
};

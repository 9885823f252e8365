//! Mutation notifications for records and collections.
//!
//! Every record tree (or collection) that has been subscribed to shares one
//! tokio broadcast channel. Each bound record carries the path prefix it lives
//! under, so a mutation deep inside a sub-record is reported with its full
//! path from the subscription root.

use serde_json::Value;
use tokio::sync::broadcast;

use crate::record::Record;

/// Default buffer for the mutation channel. A subscriber that falls further
/// behind than this loses events.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// A single change to a record tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// Path segments from the subscription root to the affected field.
    /// For collections the first segment is the record key.
    pub path: Vec<String>,
    pub kind: MutationKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationKind {
    /// An existing field got a different value
    FieldChanged(Value),
    /// A field that did not exist was set
    FieldCreated(Value),
    /// A field (value or sub-record) was removed
    FieldRemoved,
    /// A sub-record was attached; carries a detached copy of it
    RelationshipAttached(Record),
    /// A record joined a collection; carries a detached copy of it
    RecordAdded(Record),
    /// A record left a collection
    RecordRemoved,
    /// A collection was emptied
    Cleared,
}

/// Where a record reports its mutations.
#[derive(Debug, Clone)]
pub(crate) struct Binding {
    sender: broadcast::Sender<Mutation>,
    prefix: Vec<String>,
}

impl Binding {
    pub(crate) fn root(capacity: usize) -> (Self, broadcast::Receiver<Mutation>) {
        let (sender, receiver) = broadcast::channel(capacity.max(1));
        (
            Self {
                sender,
                prefix: Vec::new(),
            },
            receiver,
        )
    }

    pub(crate) fn child(&self, segment: &str) -> Self {
        let mut prefix = self.prefix.clone();
        prefix.push(segment.to_string());
        Self {
            sender: self.sender.clone(),
            prefix,
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Mutation> {
        self.sender.subscribe()
    }

    /// Report a mutation of `segment` relative to this binding's prefix.
    pub(crate) fn emit(&self, segment: &str, kind: MutationKind) {
        let mut path = self.prefix.clone();
        path.push(segment.to_string());
        self.send(Mutation { path, kind });
    }

    /// Report a mutation of the bound object itself.
    pub(crate) fn emit_self(&self, kind: MutationKind) {
        self.send(Mutation {
            path: self.prefix.clone(),
            kind,
        });
    }

    fn send(&self, mutation: Mutation) {
        if self.sender.send(mutation).is_err() {
            log::trace!("No subscribers for mutation under {:?}", self.prefix);
        }
    }
}

//! # arbor-core — hierarchical records and collections
//!
//! The in-memory model that `arbor-sync` persists:
//!
//! ```text
//! Collection ── key ──► Record ── field ──► Value (null, bool, number, string, array, object)
//!                          │
//!                          └──── field ──► Record (relationship, nested fields)
//! ```
//!
//! ## Modules
//!
//! - [`schema`] — declared field types and the identity attribute
//! - [`record`] — a single record with ordered fields and sub-records
//! - [`collection`] — ordered, identity-keyed records
//! - [`event`] — mutation notifications delivered over a broadcast channel

pub mod collection;
pub mod event;
pub mod record;
pub mod schema;

pub use collection::Collection;
pub use event::{Mutation, MutationKind, DEFAULT_EVENT_CAPACITY};
pub use record::{Field, FieldMap, Record};
pub use schema::{FieldType, Schema, SchemaError, DEFAULT_ID_ATTRIBUTE};

//! Bookkeeping stored beside the data.
//!
//! - `\0layout` holds the mode that wrote the location, so a location written
//!   by one mode is refused by the other instead of being misread.
//! - `\0order` holds the collection's record keys in collection order, since
//!   key order is lexicographic (`"10"` sorts before `"2"`).
//!
//! Both keys start with NUL, which no field path may contain.

use arbor_core::FieldMap;
use indexmap::IndexMap;

use crate::adapter::Mode;
use crate::codec::CodecError;
use crate::error::{SyncError, SyncResult};
use crate::session::{Batch, Session};

pub const LAYOUT_KEY: &str = "\u{0}layout";
pub const ORDER_KEY: &str = "\u{0}order";

/// Record the writing mode.
pub fn stamp(batch: &mut Batch, mode: Mode) {
    batch.put_raw(LAYOUT_KEY, mode.name().as_bytes().to_vec());
}

/// Refuse a location stamped by the other mode. Unstamped locations pass.
pub fn check(session: &Session, mode: Mode) -> SyncResult<()> {
    let Some(raw) = session.get_raw(LAYOUT_KEY)? else {
        return Ok(());
    };
    let found = String::from_utf8_lossy(&raw);
    if found == mode.name() {
        return Ok(());
    }
    Err(SyncError::LayoutMismatch {
        expected: mode,
        found: found.into_owned(),
    })
}

/// Stored record order; empty when none was stored.
pub fn read_order(session: &Session) -> SyncResult<Vec<String>> {
    match session.get_raw(ORDER_KEY)? {
        Some(raw) => Ok(serde_json::from_slice(&raw).map_err(CodecError::from)?),
        None => Ok(Vec::new()),
    }
}

pub fn write_order<S: AsRef<str>>(batch: &mut Batch, order: &[S]) -> SyncResult<()> {
    let keys: Vec<&str> = order.iter().map(|key| key.as_ref()).collect();
    let raw = serde_json::to_vec(&keys).map_err(CodecError::from)?;
    batch.put_raw(ORDER_KEY, raw);
    Ok(())
}

/// Put reconstructed records into stored order. Records the order does not
/// mention keep their relative position after the ordered ones.
pub fn apply_order(
    records: Vec<(String, FieldMap)>,
    order: &[String],
) -> Vec<(String, FieldMap)> {
    let mut by_key: IndexMap<String, FieldMap> = records.into_iter().collect();
    let mut ordered = Vec::with_capacity(by_key.len());
    for key in order {
        if let Some(map) = by_key.shift_remove(key) {
            ordered.push((key.clone(), map));
        }
    }
    ordered.extend(by_key);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use std::path::Path;

    fn record(key: &str) -> (String, FieldMap) {
        (key.to_string(), FieldMap::new())
    }

    #[test]
    fn test_stamp_and_check() {
        let backend = MemoryBackend::new();
        let session = Session::open(&backend, Path::new("db")).unwrap();
        check(&session, Mode::Record).unwrap();

        let mut batch = Batch::new();
        stamp(&mut batch, Mode::Collection);
        session.apply(batch).unwrap();

        check(&session, Mode::Collection).unwrap();
        assert!(matches!(
            check(&session, Mode::Record),
            Err(SyncError::LayoutMismatch { expected: Mode::Record, ref found }) if found == "collection"
        ));
    }

    #[test]
    fn test_order_roundtrip() {
        let backend = MemoryBackend::new();
        let session = Session::open(&backend, Path::new("db")).unwrap();
        assert!(read_order(&session).unwrap().is_empty());

        let mut batch = Batch::new();
        write_order(&mut batch, &["2", "10", "master"]).unwrap();
        session.apply(batch).unwrap();
        assert_eq!(read_order(&session).unwrap(), vec!["2", "10", "master"]);
    }

    #[test]
    fn test_apply_order() {
        let scanned = vec![record("10"), record("2"), record("a"), record("z")];
        let order = vec!["2".to_string(), "10".to_string(), "gone".to_string(), "a".to_string()];
        let keys: Vec<_> = apply_order(scanned, &order)
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec!["2", "10", "a", "z"]);
    }
}

//! Record tree ⇄ flat ordered key space.
//!
//! Record layout keys are field paths (`pet.name`). Collection layout keys
//! carry the record key as their first segment (`0.pet.name`). Type lookups
//! always use the path *inside* the record, so the `skip` arguments below say
//! how many leading segments are not field names.

use arbor_core::{Collection, Field, FieldMap, Record, Schema};
use serde_json::{Map, Value};

use crate::adapter::Mode;
use crate::codec::{decode_value, encode_value, Encoding, StoredValue, TypeTable};
use crate::error::{SyncError, SyncResult};
use crate::key::KeyCodec;

/// One key/value pair to write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    pub key: String,
    pub value: StoredValue,
}

/// Flattening rules for one schema.
#[derive(Debug, Clone)]
pub struct Flattener {
    keys: KeyCodec,
    types: TypeTable,
    id_attribute: String,
    id_encoding: Encoding,
}

impl Flattener {
    pub fn for_schema(schema: &Schema, keys: KeyCodec) -> Self {
        Self {
            types: TypeTable::from_schema(schema, &keys),
            keys,
            id_attribute: schema.id_attribute().to_string(),
            id_encoding: Encoding::declared(schema.field_type(schema.id_attribute())),
        }
    }

    pub fn keys(&self) -> &KeyCodec {
        &self.keys
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    // ─── Flatten ──────────────────────────────────────────────────────

    /// Every field of `record`, keyed by its path.
    pub fn flatten_record(&self, record: &Record) -> SyncResult<Vec<WriteOp>> {
        self.flatten_at::<&str>(&[], 0, record)
    }

    /// Every field of every record, in collection order, keyed under the
    /// record's collection key.
    pub fn flatten_collection(&self, collection: &Collection) -> SyncResult<Vec<WriteOp>> {
        let mut ops = Vec::new();
        for (key, record) in collection.entries() {
            ops.extend(self.flatten_at(&[key], 1, record)?);
        }
        Ok(ops)
    }

    /// Every field of `record`, keyed under `prefix`. The first `skip`
    /// segments of `prefix` are not part of the field path.
    pub fn flatten_at<S: AsRef<str>>(
        &self,
        prefix: &[S],
        skip: usize,
        record: &Record,
    ) -> SyncResult<Vec<WriteOp>> {
        let mut path: Vec<String> = prefix.iter().map(|s| s.as_ref().to_string()).collect();
        let mut ops = Vec::with_capacity(record.len());
        self.walk(record, &mut path, skip, &mut ops)?;
        Ok(ops)
    }

    fn walk(
        &self,
        record: &Record,
        path: &mut Vec<String>,
        skip: usize,
        ops: &mut Vec<WriteOp>,
    ) -> SyncResult<()> {
        for (name, field) in record.fields() {
            path.push(name.to_string());
            match field {
                Field::Value(value) => ops.push(self.value_op(path, skip, value)?),
                Field::Record(nested) => self.walk(nested, path, skip, ops)?,
            }
            path.pop();
        }
        Ok(())
    }

    /// A single value stored at `path`.
    pub fn value_op<S: AsRef<str>>(
        &self,
        path: &[S],
        skip: usize,
        value: &Value,
    ) -> SyncResult<WriteOp> {
        let key = self.keys.encode(path)?;
        let declared = self.types.resolve(path.get(skip..).unwrap_or_default());
        Ok(WriteOp {
            key,
            value: encode_value(value, declared)?,
        })
    }

    // ─── Unflatten ────────────────────────────────────────────────────

    /// Rebuild one record's plain shape from record layout entries.
    pub fn unflatten_record<I>(&self, entries: I) -> SyncResult<FieldMap>
    where
        I: IntoIterator<Item = (String, StoredValue)>,
    {
        let mut map = Map::new();
        for (key, stored) in entries {
            let path = self.keys.decode(&key);
            let value = decode_value(&stored, self.types.resolve(&path))?;
            insert_path(&mut map, &path, value);
        }
        Ok(map)
    }

    /// Rebuild every record from collection layout entries, which must be in
    /// key order. Returns `(record key, plain shape)` pairs in that order.
    pub fn unflatten_collection<I>(&self, entries: I) -> SyncResult<Vec<(String, FieldMap)>>
    where
        I: IntoIterator<Item = (String, StoredValue)>,
    {
        let mut records = Vec::new();
        let mut current: Option<(String, FieldMap)> = None;

        for (key, stored) in entries {
            let path = self.keys.decode(&key);
            let (id, field_path) = match path.split_first() {
                Some((id, rest)) if !rest.is_empty() => (id, rest),
                _ => {
                    return Err(SyncError::MalformedKey {
                        key,
                        mode: Mode::Collection,
                    })
                }
            };

            if !matches!(&current, Some((open, _)) if open == id) {
                if let Some(done) = current.take() {
                    records.push(self.finish(done)?);
                }
                current = Some((id.clone(), Map::new()));
            }

            let value = decode_value(&stored, self.types.resolve(field_path))?;
            if let Some((_, map)) = current.as_mut() {
                insert_path(map, field_path, value);
            }
        }

        if let Some(done) = current {
            records.push(self.finish(done)?);
        }
        Ok(records)
    }

    /// Give a reconstructed record its identity from the key segment when it
    /// has none stored.
    fn finish(&self, (id, mut map): (String, FieldMap)) -> SyncResult<(String, FieldMap)> {
        if !map.contains_key(&self.id_attribute) {
            let segment = StoredValue::new(Encoding::String, id.as_str());
            let identity = decode_value(&segment, self.id_encoding)?;
            map.insert(self.id_attribute.clone(), identity);
        }
        Ok((id, map))
    }
}

/// Assign `value` at `path`, creating intermediate objects. An intermediate
/// that already holds a non-object value is replaced.
fn insert_path(map: &mut FieldMap, path: &[String], value: Value) {
    match path {
        [] => {}
        [leaf] => {
            map.insert(leaf.clone(), value);
        }
        [head, rest @ ..] => {
            let slot = map
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(inner) = slot {
                insert_path(inner, rest, value);
            }
        }
    }
}

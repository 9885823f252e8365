//! Field value ⇄ stored envelope.
//!
//! Every stored value is a [`StoredValue`]: the raw text, the encoding it was
//! written with, and a separate null flag. Keeping null out of the raw text
//! means a real string `"null"` can never be mistaken for a missing value.
//!
//! Decoding is driven by the field's *declared* type, resolved once per
//! schema into a [`TypeTable`]. Fields with no scalar declaration resolve to
//! [`Encoding::Json`].

use std::collections::HashMap;

use arbor_core::{FieldType, Schema};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;

use crate::key::KeyCodec;

/// Encoding tag stored with each value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    String,
    Number,
    Boolean,
    Json,
}

impl Encoding {
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::String => "string",
            Encoding::Number => "number",
            Encoding::Boolean => "boolean",
            Encoding::Json => "json",
        }
    }

    /// Storage encoding for a declared field type. Undeclared, object, array
    /// and relationship fields are all JSON.
    pub fn declared(field_type: Option<&FieldType>) -> Self {
        match field_type {
            Some(FieldType::String) => Encoding::String,
            Some(FieldType::Number) => Encoding::Number,
            Some(FieldType::Boolean) => Encoding::Boolean,
            _ => Encoding::Json,
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Envelope serialization error: {0}")]
    Serialization(String),
    #[error("Envelope deserialization error: {0}")]
    Deserialization(String),
    #[error("Invalid number '{0}'")]
    InvalidNumber(String),
    #[error("Invalid JSON value: {0}")]
    Json(#[from] serde_json::Error),
}

/// A value as it sits in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredValue {
    pub encoding: Encoding,
    pub null: bool,
    pub raw: String,
}

impl StoredValue {
    pub fn new(encoding: Encoding, raw: impl Into<String>) -> Self {
        Self {
            encoding,
            null: false,
            raw: raw.into(),
        }
    }

    pub fn null(encoding: Encoding) -> Self {
        Self {
            encoding,
            null: true,
            raw: String::new(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CodecError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CodecError::Deserialization(e.to_string()))?;
        Ok(value)
    }
}

/// Encode a field value given its declared encoding.
///
/// Null keeps the declared encoding; arrays and objects are always JSON;
/// scalars are tagged with their own runtime type.
pub fn encode_value(value: &Value, declared: Encoding) -> Result<StoredValue, CodecError> {
    let stored = match value {
        Value::Null => StoredValue::null(declared),
        Value::Bool(b) => StoredValue::new(Encoding::Boolean, b.to_string()),
        Value::Number(n) => StoredValue::new(Encoding::Number, n.to_string()),
        Value::String(s) => StoredValue::new(Encoding::String, s.as_str()),
        Value::Array(_) | Value::Object(_) => {
            StoredValue::new(Encoding::Json, serde_json::to_string(value)?)
        }
    };
    Ok(stored)
}

/// Decode a stored value given its field's declared encoding.
///
/// Declared booleans and numbers always parse as such. Otherwise JSON-tagged
/// values are deserialized, and when nothing scalar was declared the stored
/// tag decides. A declared string keeps the raw text.
pub fn decode_value(stored: &StoredValue, declared: Encoding) -> Result<Value, CodecError> {
    if stored.null {
        return Ok(Value::Null);
    }
    match declared {
        Encoding::Boolean => return Ok(Value::Bool(stored.raw == "true")),
        Encoding::Number => return parse_number(&stored.raw),
        Encoding::String | Encoding::Json => {}
    }
    match (stored.encoding, declared) {
        (Encoding::Json, _) => Ok(serde_json::from_str(&stored.raw)?),
        (Encoding::Number, Encoding::Json) => parse_number(&stored.raw),
        (Encoding::Boolean, Encoding::Json) => Ok(Value::Bool(stored.raw == "true")),
        _ => Ok(Value::String(stored.raw.clone())),
    }
}

/// Integer when there is no decimal point, floating point otherwise.
pub fn parse_number(raw: &str) -> Result<Value, CodecError> {
    let invalid = || CodecError::InvalidNumber(raw.to_string());
    if !raw.contains('.') {
        if let Ok(i) = raw.parse::<i64>() {
            return Ok(Value::from(i));
        }
        if let Ok(u) = raw.parse::<u64>() {
            return Ok(Value::from(u));
        }
    }
    let float = raw.parse::<f64>().map_err(|_| invalid())?;
    Number::from_f64(float).map(Value::Number).ok_or_else(invalid)
}

/// Declared encodings of every field path reachable from a schema, resolved
/// once at attach time.
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    separator: char,
    types: HashMap<String, Encoding>,
}

impl TypeTable {
    pub fn from_schema(schema: &Schema, keys: &KeyCodec) -> Self {
        let mut table = Self {
            separator: keys.separator(),
            types: HashMap::new(),
        };
        table.collect(schema, "");
        table
    }

    fn collect(&mut self, schema: &Schema, prefix: &str) {
        for (name, field_type) in schema.fields() {
            let path = if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}{}{name}", self.separator)
            };
            self.types.insert(path.clone(), Encoding::declared(Some(field_type)));
            if let Some(nested) = field_type.relationship() {
                self.collect(nested, &path);
            }
        }
    }

    /// Declared encoding of a field path; JSON when nothing is declared.
    pub fn resolve<S: AsRef<str>>(&self, path: &[S]) -> Encoding {
        let mut joined = String::new();
        for (i, segment) in path.iter().enumerate() {
            if i > 0 {
                joined.push(self.separator);
            }
            joined.push_str(segment.as_ref());
        }
        self.types.get(&joined).copied().unwrap_or(Encoding::Json)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

//! Declared field types for records.
//!
//! A [`Schema`] names the identity attribute of a record type and declares a
//! type for each known field. Fields that are set on a record without being
//! declared are still allowed; storage treats them as opaque JSON.

use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

/// Conventional name of the identity attribute.
pub const DEFAULT_ID_ATTRIBUTE: &str = "id";

/// Declared type of a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    /// Plain nested object, stored as a single value.
    Object,
    /// Array of anything, stored as a single value.
    Array,
    /// Nested sub-record whose own fields are stored under this field's path.
    Relationship(Arc<Schema>),
}

impl FieldType {
    /// Schema of the nested record, if this is a relationship.
    pub fn relationship(&self) -> Option<&Arc<Schema>> {
        match self {
            FieldType::Relationship(schema) => Some(schema),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Empty field name in schema '{0}'")]
    EmptyFieldName(String),
    #[error("Field name '{name}' contains the path separator '{separator}'")]
    SeparatorInName { name: String, separator: char },
    #[error("Field name '{0}' starts with a control character")]
    ControlCharacter(String),
}

/// Field declarations for one record type.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    name: String,
    id_attribute: String,
    fields: IndexMap<String, FieldType>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_attribute: DEFAULT_ID_ATTRIBUTE.to_string(),
            fields: IndexMap::new(),
        }
    }

    /// Use a different field as the record identity.
    pub fn with_id_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.id_attribute = attribute.into();
        self
    }

    /// Declare a field. Re-declaring a name replaces its type.
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    /// Declare a nested sub-record field.
    pub fn relationship(self, name: impl Into<String>, schema: impl Into<Arc<Schema>>) -> Self {
        self.field(name, FieldType::Relationship(schema.into()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id_attribute(&self) -> &str {
        &self.id_attribute
    }

    pub fn field_type(&self, name: &str) -> Option<&FieldType> {
        self.fields.get(name)
    }

    /// Declared fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldType)> {
        self.fields.iter().map(|(name, ty)| (name.as_str(), ty))
    }

    /// Check every declared name, including those of nested schemas, against
    /// the storage path separator.
    pub fn validate(&self, separator: char) -> Result<(), SchemaError> {
        let names = std::iter::once(self.id_attribute.as_str())
            .chain(self.fields.keys().map(String::as_str));
        for name in names {
            if name.is_empty() {
                return Err(SchemaError::EmptyFieldName(self.name.clone()));
            }
            if name.contains(separator) {
                return Err(SchemaError::SeparatorInName {
                    name: name.to_string(),
                    separator,
                });
            }
            if name.starts_with(char::is_control) {
                return Err(SchemaError::ControlCharacter(name.to_string()));
            }
        }
        for field_type in self.fields.values() {
            if let Some(nested) = field_type.relationship() {
                nested.validate(separator)?;
            }
        }
        Ok(())
    }
}

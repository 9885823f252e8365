use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::event::{Binding, Mutation, MutationKind, DEFAULT_EVENT_CAPACITY};
use crate::schema::{FieldType, Schema};

/// Plain record shape: field name to JSON value, nested records as objects.
pub type FieldMap = Map<String, Value>;

/// Value held by a record field.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Value(Value),
    Record(Record),
}

/// A hierarchical record: ordered named fields, some of which may be nested
/// sub-records.
///
/// Mutating methods report to subscribers once [`Record::subscribe`] has been
/// called on the record (or on the collection that owns it). The `_silent`
/// and `load` paths never report.
#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<Schema>,
    fields: IndexMap<String, Field>,
    binding: Option<Binding>,
}

// Equality is about content; subscriptions are not part of it.
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name() == other.schema.name() && self.fields == other.fields
    }
}

impl Serialize for Record {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_map().serialize(serializer)
    }
}

impl Record {
    pub fn new(schema: impl Into<Arc<Schema>>) -> Self {
        Self {
            schema: schema.into(),
            fields: IndexMap::new(),
            binding: None,
        }
    }

    /// Build a record from its plain shape. Objects under relationship fields
    /// become nested records; everything else is kept as a value.
    pub fn from_map(schema: impl Into<Arc<Schema>>, map: FieldMap) -> Self {
        let mut record = Self::new(schema);
        record.fields = Self::build_fields(&record.schema, map);
        record
    }

    fn build_fields(schema: &Schema, map: FieldMap) -> IndexMap<String, Field> {
        map.into_iter()
            .map(|(name, value)| {
                let field = match (schema.field_type(&name), value) {
                    (Some(FieldType::Relationship(nested)), Value::Object(inner)) => {
                        Field::Record(Record::from_map(nested.clone(), inner))
                    }
                    (_, value) => Field::Value(value),
                };
                (name, field)
            })
            .collect()
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Identity of this record, rendered as a key segment.
    ///
    /// Only string and number identities count; a missing or null identity
    /// yields `None`.
    pub fn id(&self) -> Option<String> {
        match self.value(self.schema.id_attribute())? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.fields.get(name)? {
            Field::Value(value) => Some(value),
            Field::Record(_) => None,
        }
    }

    pub fn relationship(&self, name: &str) -> Option<&Record> {
        match self.fields.get(name)? {
            Field::Record(record) => Some(record),
            Field::Value(_) => None,
        }
    }

    /// Mutable access to a sub-record. Mutations through it are reported
    /// under this record's path.
    pub fn relationship_mut(&mut self, name: &str) -> Option<&mut Record> {
        match self.fields.get_mut(name)? {
            Field::Record(record) => Some(record),
            Field::Value(_) => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(name, field)| (name.as_str(), field))
    }

    /// Set a field value.
    ///
    /// Reports `FieldCreated` for a new field and `FieldChanged` for a
    /// different value. Setting the current value reports nothing. Replacing
    /// a sub-record with a value reports its removal first.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        let previous = self
            .fields
            .insert(name.clone(), Field::Value(value.clone()));

        let Some(binding) = &self.binding else {
            return;
        };
        match previous {
            None => binding.emit(&name, MutationKind::FieldCreated(value)),
            Some(Field::Value(old)) if old == value => {}
            Some(Field::Value(_)) => binding.emit(&name, MutationKind::FieldChanged(value)),
            Some(Field::Record(_)) => {
                binding.emit(&name, MutationKind::FieldRemoved);
                binding.emit(&name, MutationKind::FieldCreated(value));
            }
        }
    }

    /// Set a field value without reporting it.
    pub fn set_silent(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), Field::Value(value.into()));
    }

    /// Remove a field, reporting `FieldRemoved` if it existed.
    pub fn unset(&mut self, name: &str) -> Option<Field> {
        let mut removed = self.fields.shift_remove(name)?;
        if let Field::Record(record) = &mut removed {
            record.unbind();
        }
        if let Some(binding) = &self.binding {
            binding.emit(name, MutationKind::FieldRemoved);
        }
        Some(removed)
    }

    /// Attach a sub-record under `name`.
    ///
    /// Reports `RelationshipAttached` with a copy of the sub-record, preceded
    /// by `FieldRemoved` when something was already stored under `name`. The
    /// attached record's later mutations are reported under `name`.
    pub fn attach(&mut self, name: impl Into<String>, mut record: Record) {
        let name = name.into();
        if let Some(binding) = &self.binding {
            record.bind(binding.child(&name));
        }
        let snapshot = self.binding.as_ref().map(|_| record.detached());
        let previous = self.fields.insert(name.clone(), Field::Record(record));

        if let (Some(binding), Some(snapshot)) = (&self.binding, snapshot) {
            if previous.is_some() {
                binding.emit(&name, MutationKind::FieldRemoved);
            }
            binding.emit(&name, MutationKind::RelationshipAttached(snapshot));
        }
    }

    /// Replace every field at once from a plain shape, without reporting.
    pub fn load(&mut self, map: FieldMap) {
        self.fields = Self::build_fields(&self.schema, map);
        if let Some(binding) = self.binding.clone() {
            self.bind(binding);
        }
    }

    /// Plain shape of this record, sub-records rendered as objects.
    pub fn to_map(&self) -> FieldMap {
        self.fields
            .iter()
            .map(|(name, field)| {
                let value = match field {
                    Field::Value(value) => value.clone(),
                    Field::Record(record) => Value::Object(record.to_map()),
                };
                (name.clone(), value)
            })
            .collect()
    }

    /// Receive this record's mutations, including those of its sub-records.
    pub fn subscribe(&mut self) -> broadcast::Receiver<Mutation> {
        self.subscribe_with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Like [`Record::subscribe`]; `capacity` only applies when this call
    /// creates the channel.
    pub fn subscribe_with_capacity(&mut self, capacity: usize) -> broadcast::Receiver<Mutation> {
        if let Some(binding) = &self.binding {
            return binding.subscribe();
        }
        let (binding, receiver) = Binding::root(capacity);
        self.bind(binding);
        receiver
    }

    pub fn is_subscribed(&self) -> bool {
        self.binding.is_some()
    }

    pub(crate) fn bind(&mut self, binding: Binding) {
        for (name, field) in self.fields.iter_mut() {
            if let Field::Record(record) = field {
                record.bind(binding.child(name));
            }
        }
        self.binding = Some(binding);
    }

    pub(crate) fn unbind(&mut self) {
        self.binding = None;
        for field in self.fields.values_mut() {
            if let Field::Record(record) = field {
                record.unbind();
            }
        }
    }

    /// Copy of this record that reports to nobody.
    pub(crate) fn detached(&self) -> Record {
        let mut copy = self.clone();
        copy.unbind();
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pet_schema() -> Arc<Schema> {
        Arc::new(
            Schema::new("pet")
                .field("name", FieldType::String)
                .field("breed", FieldType::String),
        )
    }

    fn person_schema() -> Arc<Schema> {
        Arc::new(
            Schema::new("person")
                .field("firstname", FieldType::String)
                .field("lastname", FieldType::String)
                .relationship("pet", pet_schema()),
        )
    }

    fn drain(rx: &mut broadcast::Receiver<Mutation>) -> Vec<Mutation> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    #[test]
    fn test_from_map_builds_relationships() {
        let map = json!({
            "firstname": "The",
            "pet": {"name": "K-9", "breed": "Robodog"},
            "tags": {"a": 1}
        });
        let record = Record::from_map(person_schema(), map.as_object().unwrap().clone());

        let pet = record.relationship("pet").expect("pet should be a sub-record");
        assert_eq!(pet.value("name"), Some(&json!("K-9")));
        // Undeclared objects stay plain values
        assert_eq!(record.value("tags"), Some(&json!({"a": 1})));
        assert_eq!(Value::Object(record.to_map()), map);
    }

    #[test]
    fn test_id_rendering() {
        let mut record = Record::new(person_schema());
        assert_eq!(record.id(), None);
        record.set("id", 7);
        assert_eq!(record.id().as_deref(), Some("7"));
        record.set("id", "doctor");
        assert_eq!(record.id().as_deref(), Some("doctor"));
        record.set("id", Value::Null);
        assert_eq!(record.id(), None);
    }

    #[test]
    fn test_unsubscribed_record_is_quiet() {
        let mut record = Record::new(person_schema());
        record.set("firstname", "The");
        assert!(!record.is_subscribed());
        assert_eq!(record.value("firstname"), Some(&json!("The")));
    }

    #[test]
    fn test_set_reports_created_then_changed() {
        let mut record = Record::new(person_schema());
        let mut rx = record.subscribe();

        record.set("firstname", "The");
        record.set("firstname", "The");
        record.set("firstname", "Da");

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2, "unchanged set must not report");
        assert_eq!(events[0].kind, MutationKind::FieldCreated(json!("The")));
        assert_eq!(events[1].kind, MutationKind::FieldChanged(json!("Da")));
        assert_eq!(events[1].path, vec!["firstname"]);
    }

    #[test]
    fn test_silent_paths_do_not_report() {
        let mut record = Record::new(person_schema());
        let mut rx = record.subscribe();

        record.set_silent("firstname", "The");
        record.load(json!({"lastname": "Doctor"}).as_object().unwrap().clone());

        assert!(drain(&mut rx).is_empty());
        assert!(!record.contains("firstname"));
        assert_eq!(record.value("lastname"), Some(&json!("Doctor")));
    }

    #[test]
    fn test_unset_reports_removal() {
        let mut record = Record::new(person_schema());
        record.set("lastname", "Doctor");
        let mut rx = record.subscribe();

        assert!(record.unset("lastname").is_some());
        assert!(record.unset("lastname").is_none());

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, MutationKind::FieldRemoved);
    }

    #[test]
    fn test_attach_and_nested_mutation_paths() {
        let mut person = Record::new(person_schema());
        let mut rx = person.subscribe();

        let mut pet = Record::new(pet_schema());
        pet.set("name", "K-9");
        person.attach("pet", pet);

        person
            .relationship_mut("pet")
            .unwrap()
            .set("breed", "Robodog");

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        match &events[0].kind {
            MutationKind::RelationshipAttached(snapshot) => {
                assert_eq!(snapshot.value("name"), Some(&json!("K-9")));
                assert!(!snapshot.is_subscribed());
            }
            other => panic!("unexpected mutation {other:?}"),
        }
        assert_eq!(events[1].path, vec!["pet", "breed"]);
        assert_eq!(events[1].kind, MutationKind::FieldCreated(json!("Robodog")));
    }

    #[test]
    fn test_reattach_reports_removal_first() {
        let mut person = Record::new(person_schema());
        person.attach("pet", Record::new(pet_schema()));
        let mut rx = person.subscribe();

        person.attach("pet", Record::new(pet_schema()));

        let kinds: Vec<_> = drain(&mut rx).into_iter().map(|m| m.kind).collect();
        assert_eq!(kinds.len(), 2);
        assert_eq!(kinds[0], MutationKind::FieldRemoved);
        assert!(matches!(kinds[1], MutationKind::RelationshipAttached(_)));
    }

    #[test]
    fn test_replacing_relationship_with_value() {
        let mut person = Record::new(person_schema());
        person.attach("pet", Record::new(pet_schema()));
        let mut rx = person.subscribe();

        person.set("pet", Value::Null);

        let kinds: Vec<_> = drain(&mut rx).into_iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MutationKind::FieldRemoved,
                MutationKind::FieldCreated(Value::Null)
            ]
        );
    }

    #[test]
    fn test_serialize_as_plain_shape() {
        let mut person = Record::new(person_schema());
        person.set("firstname", "The");
        let mut pet = Record::new(pet_schema());
        pet.set("name", "Drums");
        person.attach("pet", pet);

        let json = serde_json::to_value(&person).unwrap();
        assert_eq!(json, json!({"firstname": "The", "pet": {"name": "Drums"}}));
    }
}

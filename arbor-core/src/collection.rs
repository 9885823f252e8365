use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::broadcast;

use crate::event::{Binding, Mutation, MutationKind, DEFAULT_EVENT_CAPACITY};
use crate::record::{FieldMap, Record};
use crate::schema::Schema;

/// Ordered, identity-keyed set of records sharing one schema.
///
/// Each record is stored under a key fixed when it joins: its identity, or
/// the first free ordinal position when it has none.
#[derive(Debug, Clone)]
pub struct Collection {
    schema: Arc<Schema>,
    records: IndexMap<String, Record>,
    binding: Option<Binding>,
}

impl Collection {
    pub fn new(schema: impl Into<Arc<Schema>>) -> Self {
        Self {
            schema: schema.into(),
            records: IndexMap::new(),
            binding: None,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in collection order.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// `(key, record)` pairs in collection order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Record)> {
        self.records.iter().map(|(key, record)| (key.as_str(), record))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.records.get(key)
    }

    /// Mutable access to a member. Its mutations are reported under its key.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Record> {
        self.records.get_mut(key)
    }

    pub fn at(&self, index: usize) -> Option<&Record> {
        self.records.get_index(index).map(|(_, record)| record)
    }

    pub fn first(&self) -> Option<&Record> {
        self.records.first().map(|(_, record)| record)
    }

    pub fn last(&self) -> Option<&Record> {
        self.records.last().map(|(_, record)| record)
    }

    /// Add a record and return the key it is stored under. A record with the
    /// same identity as an existing member replaces it in place.
    pub fn add(&mut self, mut record: Record) -> String {
        let key = self.key_for(&record);
        if let Some(binding) = &self.binding {
            record.bind(binding.child(&key));
            binding.emit(&key, MutationKind::RecordAdded(record.detached()));
        }
        if let Some(mut replaced) = self.records.insert(key.clone(), record) {
            replaced.unbind();
        }
        key
    }

    /// Remove the record stored under `key`.
    pub fn remove(&mut self, key: &str) -> Option<Record> {
        let mut record = self.records.shift_remove(key)?;
        record.unbind();
        if let Some(binding) = &self.binding {
            binding.emit(key, MutationKind::RecordRemoved);
        }
        Some(record)
    }

    /// Remove every record.
    pub fn clear(&mut self) {
        for record in self.records.values_mut() {
            record.unbind();
        }
        self.records.clear();
        if let Some(binding) = &self.binding {
            binding.emit_self(MutationKind::Cleared);
        }
    }

    /// Replace the whole dataset from plain shapes, without reporting.
    pub fn reload<I>(&mut self, maps: I)
    where
        I: IntoIterator<Item = FieldMap>,
    {
        for record in self.records.values_mut() {
            record.unbind();
        }
        self.records.clear();
        for map in maps {
            let mut record = Record::from_map(self.schema.clone(), map);
            let key = self.key_for(&record);
            if let Some(binding) = &self.binding {
                record.bind(binding.child(&key));
            }
            self.records.insert(key, record);
        }
        log::debug!(
            "Reloaded collection '{}' with {} records",
            self.schema.name(),
            self.records.len()
        );
    }

    /// Plain shapes of every record in order.
    pub fn to_maps(&self) -> Vec<FieldMap> {
        self.records.values().map(Record::to_map).collect()
    }

    /// Receive mutations of the collection and of every member.
    pub fn subscribe(&mut self) -> broadcast::Receiver<Mutation> {
        self.subscribe_with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn subscribe_with_capacity(&mut self, capacity: usize) -> broadcast::Receiver<Mutation> {
        if let Some(binding) = &self.binding {
            return binding.subscribe();
        }
        let (binding, receiver) = Binding::root(capacity);
        for (key, record) in self.records.iter_mut() {
            record.bind(binding.child(key));
        }
        self.binding = Some(binding);
        receiver
    }

    pub fn is_subscribed(&self) -> bool {
        self.binding.is_some()
    }

    fn key_for(&self, record: &Record) -> String {
        if let Some(id) = record.id() {
            return id;
        }
        (self.records.len()..)
            .map(|ordinal| ordinal.to_string())
            .find(|candidate| !self.records.contains_key(candidate))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use serde_json::json;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new("person")
                .field("firstname", FieldType::String)
                .field("lastname", FieldType::String),
        )
    }

    fn person(id: Option<&str>, lastname: &str) -> Record {
        let mut record = Record::new(schema());
        if let Some(id) = id {
            record.set("id", id);
        }
        record.set("lastname", lastname);
        record
    }

    #[test]
    fn test_keys_use_identity_or_ordinal() {
        let mut people = Collection::new(schema());
        assert_eq!(people.add(person(None, "Doctor")), "0");
        assert_eq!(people.add(person(Some("master"), "Master")), "master");
        assert_eq!(people.add(person(None, "Pond")), "2");

        assert_eq!(people.first().unwrap().value("lastname"), Some(&json!("Doctor")));
        assert_eq!(people.last().unwrap().value("lastname"), Some(&json!("Pond")));
        assert_eq!(people.get("master").unwrap().value("lastname"), Some(&json!("Master")));
    }

    #[test]
    fn test_ordinal_skips_taken_keys() {
        let mut people = Collection::new(schema());
        people.add(person(Some("1"), "One"));
        assert_eq!(people.add(person(None, "Anon")), "2");
    }

    #[test]
    fn test_same_identity_replaces() {
        let mut people = Collection::new(schema());
        people.add(person(Some("a"), "First"));
        people.add(person(Some("a"), "Second"));
        assert_eq!(people.len(), 1);
        assert_eq!(people.get("a").unwrap().value("lastname"), Some(&json!("Second")));
    }

    #[test]
    fn test_member_mutations_report_under_key() {
        let mut people = Collection::new(schema());
        people.add(person(Some("doctor"), "Doctor"));
        let mut rx = people.subscribe();

        people.get_mut("doctor").unwrap().set("firstname", "The");

        let mutation = rx.try_recv().unwrap();
        assert_eq!(mutation.path, vec!["doctor", "firstname"]);
        assert_eq!(mutation.kind, MutationKind::FieldCreated(json!("The")));
    }

    #[test]
    fn test_add_remove_clear_report() {
        let mut people = Collection::new(schema());
        let mut rx = people.subscribe();

        let key = people.add(person(None, "Doctor"));
        let removed = people.remove(&key).unwrap();
        assert!(!removed.is_subscribed());
        people.add(person(None, "Master"));
        people.clear();

        let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| m.kind)
            .collect();
        assert_eq!(kinds.len(), 4);
        assert!(matches!(kinds[0], MutationKind::RecordAdded(_)));
        assert_eq!(kinds[1], MutationKind::RecordRemoved);
        assert!(matches!(kinds[2], MutationKind::RecordAdded(_)));
        assert_eq!(kinds[3], MutationKind::Cleared);
        assert!(people.is_empty());
    }

    #[test]
    fn test_reload_is_silent_and_rebinds() {
        let mut people = Collection::new(schema());
        let mut rx = people.subscribe();

        people.reload(vec![
            json!({"id": "a", "lastname": "Doctor"}).as_object().unwrap().clone(),
            json!({"id": "b", "lastname": "Master"}).as_object().unwrap().clone(),
        ]);
        assert!(rx.try_recv().is_err());
        assert_eq!(people.keys().collect::<Vec<_>>(), vec!["a", "b"]);

        people.get_mut("b").unwrap().set("lastname", "Missy");
        let mutation = rx.try_recv().unwrap();
        assert_eq!(mutation.path, vec!["b", "lastname"]);
    }
}

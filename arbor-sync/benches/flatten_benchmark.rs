use std::hint::black_box;
use std::sync::Arc;

use arbor_core::{Collection, FieldType, Record, Schema};
use arbor_sync::{Flattener, KeyCodec, LevelSync, StoredValue, SyncConfig};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use tokio::runtime::Runtime;

fn pet_schema() -> Arc<Schema> {
    Arc::new(
        Schema::new("pet")
            .field("name", FieldType::String)
            .field("age", FieldType::Number),
    )
}

fn person_schema() -> Arc<Schema> {
    Arc::new(
        Schema::new("person")
            .field("firstname", FieldType::String)
            .field("lastname", FieldType::String)
            .field("age", FieldType::Number)
            .field("active", FieldType::Boolean)
            .relationship("pet", pet_schema()),
    )
}

fn people(count: usize) -> Collection {
    let schema = person_schema();
    let mut collection = Collection::new(schema.clone());
    for i in 0..count {
        let mut pet = Record::new(pet_schema());
        pet.set("name", format!("pet-{i}"));
        pet.set("age", i as u64 % 15);

        let mut person = Record::new(schema.clone());
        person.set("firstname", format!("first-{i}"));
        person.set("lastname", format!("last-{i}"));
        person.set("age", 20 + i as u64 % 60);
        person.set("active", i % 2 == 0);
        person.attach("pet", pet);
        collection.add(person);
    }
    collection
}

fn sorted_entries(flattener: &Flattener, collection: &Collection) -> Vec<(String, StoredValue)> {
    let mut entries: Vec<(String, StoredValue)> = flattener
        .flatten_collection(collection)
        .unwrap()
        .into_iter()
        .map(|op| (op.key, op.value))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

fn bench_flatten_collection(c: &mut Criterion) {
    let collection = people(1_000);
    let flattener = Flattener::for_schema(collection.schema(), KeyCodec::default());

    c.bench_function("flatten_collection_1000", |b| {
        b.iter(|| {
            black_box(flattener.flatten_collection(black_box(&collection)).unwrap());
        })
    });
}

fn bench_unflatten_collection(c: &mut Criterion) {
    let collection = people(1_000);
    let flattener = Flattener::for_schema(collection.schema(), KeyCodec::default());
    let entries = sorted_entries(&flattener, &collection);

    c.bench_function("unflatten_collection_1000", |b| {
        b.iter_batched(
            || entries.clone(),
            |entries| black_box(flattener.unflatten_collection(entries).unwrap()),
            BatchSize::SmallInput,
        )
    });
}

fn bench_save_fetch_rocksdb(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people");
    let sync = rt
        .block_on(LevelSync::attach(SyncConfig::for_testing(&path), people(200)))
        .unwrap();

    c.bench_function("rocksdb_save_200", |b| {
        b.iter(|| black_box(rt.block_on(sync.save()).unwrap()))
    });

    rt.block_on(sync.save()).unwrap();
    c.bench_function("rocksdb_fetch_200", |b| {
        b.iter(|| black_box(rt.block_on(sync.fetch()).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_flatten_collection,
    bench_unflatten_collection,
    bench_save_fetch_rocksdb,
);
criterion_main!(benches);

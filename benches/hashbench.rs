#![allow(
    missing_docs,
    clippy::missing_docs_in_private_items,
    clippy::unwrap_used,
    clippy::similar_names
)]
use std::collections::HashMap;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use hashbench::{Algorithm, HashTable, TableConfig, build_table};
use proptest::{
    prelude::{Strategy, any},
    strategy::ValueTree,
    test_runner::TestRunner,
};
use strum::IntoEnumIterator;

const ITEMS_AMOUNT: usize = 1000;
const NUM_BUCKETS: usize = 1250;
const SAMPLE_SIZE: usize = 10;

fn new_table(algorithm: Algorithm) -> Box<dyn HashTable<String, String>> {
    let config = TableConfig::new(algorithm).with_num_buckets(NUM_BUCKETS);
    build_table(&config).unwrap()
}

fn hash_table_benches(c: &mut Criterion) {
    let mut runner = TestRunner::default();
    let items = proptest::collection::hash_map(any::<String>(), any::<String>(), ITEMS_AMOUNT)
        .new_tree(&mut runner)
        .unwrap()
        .current();

    let mut group = c.benchmark_group("Open addressing comparison benchmark");
    group.sample_size(SAMPLE_SIZE);

    for algorithm in Algorithm::iter() {
        group.bench_function(format!("{algorithm} insert"), |b| {
            b.iter_batched(
                || new_table(algorithm),
                |mut table| {
                    for (key, value) in items.clone() {
                        let _inserted = table.put(key, value);
                    }
                    table
                },
                BatchSize::SmallInput,
            );
        });

        let mut table = new_table(algorithm);
        for (key, value) in items.clone() {
            let _inserted = table.put(key, value);
        }
        group.bench_function(format!("{algorithm} get"), |b| {
            b.iter(|| {
                for key in items.keys() {
                    let _found = table.get(key).is_ok();
                }
            });
        });
    }

    let mut rust_map = HashMap::new();
    group.bench_function("rust std insert", |b| {
        b.iter(|| {
            for (key, value) in items.clone() {
                rust_map.insert(key, value);
            }
        });
    });
    group.bench_function("rust std get", |b| {
        b.iter(|| {
            for key in items.keys() {
                let _found = rust_map.get(key);
            }
        });
    });
    group.finish();
}

criterion_group!(benches, hash_table_benches);

criterion_main!(benches);

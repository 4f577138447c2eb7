#![allow(missing_docs, clippy::unwrap_used, clippy::missing_docs_in_private_items)]
use std::collections::HashMap;

use hashbench::{
    Algorithm, Error, HashTable, HopscotchBitmapTable, HopscotchShadowTable, TableConfig, Workload,
    build_table,
    monitoring::Metric,
};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use strum::IntoEnumIterator;

fn table(algorithm: Algorithm, num_buckets: usize) -> Box<dyn HashTable<String, String>> {
    build_table(&TableConfig::new(algorithm).with_num_buckets(num_buckets)).unwrap()
}

#[test]
fn test_random_round_trip() {
    for algorithm in [Algorithm::Linear, Algorithm::RobinHood] {
        let mut table = table(algorithm, 10_000);
        let mut workload = Workload::new(42);
        let mut failures = 0;
        for i in 0..8000 {
            let key = workload.fresh_key();
            if table.put(key, format!("value{i}")).is_err() {
                failures += 1;
            }
        }
        assert_eq!(failures, 0, "{algorithm}");
        assert_eq!(table.len(), 8000);
        for (i, key) in workload.live_keys().iter().enumerate() {
            assert_eq!(
                table.get(key).ok(),
                Some(&format!("value{i}")),
                "{algorithm} lost {key}"
            );
        }
    }
}

#[test]
fn test_bitmap_insert_then_remove_some() {
    let mut table = HopscotchBitmapTable::new(10_000, 4096).unwrap();
    let mut workload = Workload::new(9);
    let mut expected = HashMap::new();
    for i in 0..8000 {
        let key = workload.fresh_key();
        table.put(key.clone(), i).unwrap();
        expected.insert(key, i);
    }

    let mut keys: Vec<String> = expected.keys().cloned().collect();
    keys.sort();
    keys.shuffle(&mut StdRng::seed_from_u64(9));
    let (removed, kept) = keys.split_at(1000);
    for key in removed {
        assert_eq!(table.remove(key).unwrap(), expected[key]);
    }

    for key in removed {
        assert!(matches!(table.get(key), Err(Error::KeyNotFound)));
    }
    for key in kept {
        assert_eq!(*table.get(key).unwrap(), expected[key]);
    }
    assert_eq!(table.len(), 7000);
}

#[test]
fn test_every_algorithm_honors_the_contract() {
    for algorithm in Algorithm::iter() {
        let mut table = table(algorithm, 64);
        assert_eq!(table.metadata()["name"], algorithm.to_string());
        assert_eq!(table.num_buckets(), 64);

        assert_eq!(table.put("k".to_string(), "v1".to_string()).unwrap(), None);
        assert_eq!(
            table.put("k".to_string(), "v2".to_string()).unwrap(),
            Some("v1".to_string())
        );
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&"k".to_string()).unwrap(), "v2");

        table.put("other".to_string(), "x".to_string()).unwrap();
        let before = table.len();
        assert_eq!(table.remove(&"k".to_string()).unwrap(), "v2");
        assert_eq!(table.len(), before - 1);
        assert!(matches!(table.get(&"k".to_string()), Err(Error::KeyNotFound)));
        assert!(matches!(table.remove(&"k".to_string()), Err(Error::KeyNotFound)));
        assert_eq!(table.get(&"other".to_string()).unwrap(), "x");

        table.close();
        assert!(matches!(table.get(&"other".to_string()), Err(Error::NotOpen)));
        table.open();
        assert!(table.is_empty());
    }
}

#[test]
fn test_hopscotch_density_matches_occupancy() {
    let tables: Vec<Box<dyn HashTable<String, u32>>> = vec![
        Box::new(HopscotchBitmapTable::new(1000, 1000).unwrap()),
        Box::new(HopscotchShadowTable::new(1000, 1000, 8, 64).unwrap()),
    ];
    for mut table in tables {
        let mut workload = Workload::new(3);
        for i in 0..700 {
            let key = workload.fresh_key();
            if table.put(key.clone(), i).is_err() {
                workload.discard(&key);
            }
        }
        for _ in 0..100 {
            let key = workload.evict_random().unwrap();
            table.remove(&key).unwrap();
        }

        let monitoring = table.monitoring();
        let occupied: usize = monitoring.density().values().map(|block| block.occupied).sum();
        assert_eq!(occupied, table.len());
        assert_eq!(monitoring.num_occupied(), workload.len());
    }
}

#[test]
fn test_snapshots_written_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let mut table = table(Algorithm::Shadow, 100);
    for i in 0..50 {
        table.put(format!("key{i}"), format!("value{i}")).unwrap();
    }
    for i in 0..60 {
        let _found = table.get(&format!("key{i}"));
    }

    let monitoring = table.monitoring_mut();
    monitoring.set_instance(1);
    monitoring.set_cycle(2);
    monitoring.set_load_factor(0.5);

    let density = dir.path().join("density.json");
    let psl = dir.path().join("psl.json");
    let blocks = dir.path().join("blocks.json");
    let monitoring = table.monitoring();
    monitoring.print_density(&density).unwrap();
    monitoring.print_probing_sequence_length_search(&psl).unwrap();
    monitoring.print_num_scanned_blocks(&blocks).unwrap();

    let density: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(density).unwrap()).unwrap();
    assert_eq!(density["occupied"], 50);
    assert_eq!(density["instance"], 1);
    assert_eq!(density["cycle"], 2);

    let psl: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(psl).unwrap()).unwrap();
    assert_eq!(psl["count"], 50);
    assert_eq!(psl["metric"], Metric::Psl.to_string());
    assert!(blocks.exists());
}

use std::{borrow::Borrow, hash::Hash, mem};

use tracing::{debug, trace};

use crate::{
    Algorithm, HashTable, Metadata, TableConfig,
    error::{Error, Result},
    hash_table::{bucket_at, bucket_before, hash_key, home_bucket},
    monitoring::{Event, Monitoring, SlotState},
};

/// A bucket of the linear probing table
#[derive(Debug, Clone)]
enum Slot<K, V> {
    /// Never used since the last clean
    Empty,
    /// Holds a live entry
    Occupied(K, V),
    /// Held an entry that was removed; searches continue past it
    Tombstone,
}

impl<K, V> Slot<K, V> {
    /// The monitoring category of this slot
    fn state(&self) -> SlotState {
        match self {
            Self::Empty => SlotState::Empty,
            Self::Occupied(..) => SlotState::Occupied,
            Self::Tombstone => SlotState::Tombstone,
        }
    }
}

/// A hash table resolving collisions by linear probing.
///
/// Insertion scans forward from the home bucket for at most `max_probe_length` buckets;
/// beyond that the insertion is reported as a clustering failure rather than growing the
/// table. Removal leaves a tombstone so that keys further down the cluster stay reachable;
/// tombstones directly in front of an empty bucket are cleaned immediately.
#[derive(Debug, Clone)]
pub struct LinearProbingTable<K, V> {
    /// The buckets, empty while the table is closed
    buckets: Vec<Slot<K, V>>,
    /// Number of buckets allocated by `open`
    num_buckets: usize,
    /// Insertion probing bound
    max_probe_length: usize,
    /// Number of live entries
    size: usize,
    /// Number of tombstones
    tombstones: usize,
    /// Whether `open` was called since the last `close`
    is_open: bool,
    /// Density and search statistics
    monitoring: Monitoring,
}

impl<K, V> LinearProbingTable<K, V>
where
    K: Hash + Eq,
{
    /// Creates an open table with `num_buckets` buckets
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` if either parameter is zero.
    pub fn new(num_buckets: usize, max_probe_length: usize) -> Result<Self> {
        let config = TableConfig::new(Algorithm::Linear)
            .with_num_buckets(num_buckets)
            .with_max_probe_length(max_probe_length);
        Self::with_config(&config)
    }

    /// Creates an open table from the linear probing fields of `config`
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` if the fields are unusable.
    pub fn with_config(config: &TableConfig) -> Result<Self> {
        config.validate_for(Algorithm::Linear)?;
        let mut table = Self {
            buckets: Vec::new(),
            num_buckets: config.num_buckets,
            max_probe_length: config.max_probe_length,
            size: 0,
            tombstones: 0,
            is_open: false,
            monitoring: Monitoring::new(config.num_buckets, config.density_block_size),
        };
        table.open();
        Ok(table)
    }

    /// Allocates empty buckets
    pub fn open(&mut self) {
        self.buckets = (0..self.num_buckets).map(|_| Slot::Empty).collect();
        self.size = 0;
        self.tombstones = 0;
        self.is_open = true;
        self.monitoring.reset_density();
        debug!(num_buckets = self.num_buckets, "opened linear probing table");
    }

    /// Releases the buckets
    pub fn close(&mut self) {
        self.buckets = Vec::new();
        self.size = 0;
        self.tombstones = 0;
        self.is_open = false;
        self.monitoring.reset_density();
    }

    /// Inserts a key-value pair, or updates the value if the key is present
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` if neither the key nor a free bucket appears within
    /// `max_probe_length` buckets, `NotOpen` on a closed table.
    pub fn put(&mut self, key: K, value: V) -> Result<Option<V>> {
        self.ensure_open()?;
        let home = home_bucket(hash_key(&key), self.num_buckets);
        let limit = self.probe_limit();
        let mut first_tombstone = None;
        let mut vacancy = None;

        for step in 0..limit {
            let index = bucket_at(home, step, self.num_buckets);
            let Some(slot) = self.buckets.get_mut(index) else { break };
            match slot {
                Slot::Occupied(k, v) if *k == key => return Ok(Some(mem::replace(v, value))),
                Slot::Occupied(..) => {}
                Slot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                Slot::Empty => {
                    vacancy = Some(first_tombstone.unwrap_or(index));
                    break;
                }
            }
        }

        // The whole window was scanned without meeting the key, so a tombstone is safe to reuse
        match vacancy.or(first_tombstone) {
            Some(index) => {
                self.place(index, key, value);
                Ok(None)
            }
            None => {
                debug!(home, probes = limit, "linear probing insertion hit the probe bound");
                Err(Error::CapacityExceeded { probes: limit })
            }
        }
    }

    /// Retrieves the value for a given key
    ///
    /// # Errors
    ///
    /// `KeyNotFound` on a miss, `NotOpen` on a closed table.
    pub fn get<Q>(&mut self, key: &Q) -> Result<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.ensure_open()?;
        let home = home_bucket(hash_key(key), self.num_buckets);
        let (found, probes) = self.find(home, key);
        self.monitoring.record(Event::Search { home, probes, span: probes, found: found.is_some() });

        match found.and_then(|index| self.buckets.get(index)) {
            Some(Slot::Occupied(_, value)) => Ok(value),
            _ => Err(Error::KeyNotFound),
        }
    }

    /// Removes a key and returns its value
    ///
    /// # Errors
    ///
    /// `KeyNotFound` on a miss, `NotOpen` on a closed table.
    pub fn remove<Q>(&mut self, key: &Q) -> Result<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.ensure_open()?;
        let home = home_bucket(hash_key(key), self.num_buckets);
        let (Some(index), _) = self.find(home, key) else {
            return Err(Error::KeyNotFound);
        };
        let Some(slot) = self.buckets.get_mut(index) else {
            return Err(Error::KeyNotFound);
        };
        let Slot::Occupied(_, value) = mem::replace(slot, Slot::Tombstone) else {
            return Err(Error::KeyNotFound);
        };

        self.size = self.size.saturating_sub(1);
        self.tombstones = self.tombstones.saturating_add(1);
        self.monitoring.record(Event::Transition {
            bucket: index,
            from: SlotState::Occupied,
            to: SlotState::Tombstone,
        });
        self.clean_tombstones(index);
        Ok(value)
    }

    /// Number of live entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns true if the table holds no entry
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of tombstones currently in the table
    #[must_use]
    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    /// Scans from `home` for `key`, returning its bucket and the number of buckets examined
    fn find<Q>(&self, home: usize, key: &Q) -> (Option<usize>, usize)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let limit = self.probe_limit();
        for step in 0..limit {
            let index = bucket_at(home, step, self.num_buckets);
            match self.buckets.get(index) {
                None | Some(Slot::Empty) => return (None, step.saturating_add(1)),
                Some(Slot::Occupied(k, _)) if k.borrow() == key => {
                    return (Some(index), step.saturating_add(1));
                }
                Some(_) => {}
            }
        }
        (None, limit)
    }

    /// Stores an entry in an empty or tombstone bucket
    fn place(&mut self, index: usize, key: K, value: V) {
        let Some(slot) = self.buckets.get_mut(index) else { return };
        let from = slot.state();
        *slot = Slot::Occupied(key, value);
        if from == SlotState::Tombstone {
            self.tombstones = self.tombstones.saturating_sub(1);
        }
        self.size = self.size.saturating_add(1);
        self.monitoring.record(Event::Transition { bucket: index, from, to: SlotState::Occupied });
    }

    /// Turns the run of tombstones ending at `index` back into empty buckets when the next
    /// bucket is empty, since no search can continue past it anyway
    fn clean_tombstones(&mut self, index: usize) {
        let next = bucket_at(index, 1, self.num_buckets);
        if !matches!(self.buckets.get(next), Some(Slot::Empty)) {
            return;
        }

        let mut current = index;
        let mut cleaned: usize = 0;
        while cleaned < self.num_buckets {
            let Some(slot) = self.buckets.get_mut(current) else { break };
            if !matches!(slot, Slot::Tombstone) {
                break;
            }
            *slot = Slot::Empty;
            self.tombstones = self.tombstones.saturating_sub(1);
            self.monitoring.record(Event::Transition {
                bucket: current,
                from: SlotState::Tombstone,
                to: SlotState::Empty,
            });
            cleaned = cleaned.saturating_add(1);
            current = bucket_before(current, 1, self.num_buckets);
        }
        trace!(index, cleaned, "cleaned tombstones");
    }

    /// Number of buckets a single probe sequence may visit
    fn probe_limit(&self) -> usize {
        self.max_probe_length.min(self.num_buckets)
    }

    /// Fails with `NotOpen` on a closed table
    fn ensure_open(&self) -> Result<()> {
        if self.is_open { Ok(()) } else { Err(Error::NotOpen) }
    }
}

impl<K, V> HashTable<K, V> for LinearProbingTable<K, V>
where
    K: Hash + Eq,
{
    fn open(&mut self) {
        Self::open(self);
    }

    fn close(&mut self) {
        Self::close(self);
    }

    fn put(&mut self, key: K, value: V) -> Result<Option<V>> {
        Self::put(self, key, value)
    }

    fn get(&mut self, key: &K) -> Result<&V> {
        Self::get(self, key)
    }

    fn remove(&mut self, key: &K) -> Result<V> {
        Self::remove(self, key)
    }

    fn metadata(&self) -> Metadata {
        Metadata::from([
            ("name".to_string(), Algorithm::Linear.to_string()),
            ("num_buckets".to_string(), self.num_buckets.to_string()),
            ("max_probe_length".to_string(), self.max_probe_length.to_string()),
        ])
    }

    fn monitoring(&self) -> &Monitoring {
        &self.monitoring
    }

    fn monitoring_mut(&mut self) -> &mut Monitoring {
        &mut self.monitoring
    }

    fn len(&self) -> usize {
        self.size
    }

    fn num_buckets(&self) -> usize {
        self.num_buckets
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    /// Keys whose home bucket is `home` in a table of `num_buckets`
    fn keys_homed_at(home: usize, num_buckets: usize, count: usize) -> Vec<String> {
        (0..)
            .map(|i| format!("key{i}"))
            .filter(|key| home_bucket(hash_key(key.as_str()), num_buckets) == home)
            .take(count)
            .collect()
    }

    #[test]
    fn test_insert_and_get() {
        let mut table = LinearProbingTable::new(64, 64).unwrap();
        assert_eq!(table.put("key1".to_string(), 1).unwrap(), None);
        assert_eq!(table.put("key2".to_string(), 2).unwrap(), None);

        assert_eq!(table.get("key1").ok(), Some(&1));
        assert_eq!(table.get("key2").ok(), Some(&2));
        assert!(matches!(table.get("key3"), Err(Error::KeyNotFound)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_update_in_place() {
        let mut table = LinearProbingTable::new(64, 64).unwrap();
        table.put("key1".to_string(), 1).unwrap();
        assert_eq!(table.put("key1".to_string(), 10).unwrap(), Some(1));
        assert_eq!(table.get("key1").ok(), Some(&10));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_keeps_cluster_reachable() {
        let keys = keys_homed_at(3, 16, 3);
        let mut table = LinearProbingTable::new(16, 16).unwrap();
        for (i, key) in keys.iter().enumerate() {
            table.put(key.clone(), i).unwrap();
        }

        assert_eq!(table.remove(keys[0].as_str()).unwrap(), 0);
        assert_eq!(table.tombstones(), 1);
        assert_eq!(table.get(keys[1].as_str()).ok(), Some(&1));
        assert_eq!(table.get(keys[2].as_str()).ok(), Some(&2));
        assert!(matches!(table.remove(keys[0].as_str()), Err(Error::KeyNotFound)));

        // Reinsertion reuses the tombstone
        table.put(keys[0].clone(), 7).unwrap();
        assert_eq!(table.tombstones(), 0);
        assert_eq!(table.monitoring().num_occupied(), 3);
    }

    #[test]
    fn test_tail_tombstones_are_cleaned() {
        let keys = keys_homed_at(3, 16, 3);
        let mut table = LinearProbingTable::new(16, 16).unwrap();
        for (i, key) in keys.iter().enumerate() {
            table.put(key.clone(), i).unwrap();
        }

        table.remove(keys[1].as_str()).unwrap();
        assert_eq!(table.tombstones(), 1);
        // Removing the cluster tail also clears the tombstone in front of it
        table.remove(keys[2].as_str()).unwrap();
        assert_eq!(table.tombstones(), 0);
        assert_eq!(table.monitoring().num_tombstones(), 0);
        assert_eq!(table.get(keys[0].as_str()).ok(), Some(&0));
    }

    #[test]
    fn test_probe_bound_reports_clustering() {
        let keys = keys_homed_at(0, 32, 5);
        let mut table = LinearProbingTable::new(32, 4).unwrap();
        for key in keys.iter().take(4) {
            table.put(key.clone(), 0).unwrap();
        }

        let result = table.put(keys[4].clone(), 0);
        assert!(matches!(result, Err(Error::CapacityExceeded { probes: 4 })));
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_full_table() {
        let mut table = LinearProbingTable::new(8, 100).unwrap();
        for i in 0..8 {
            table.put(i.to_string(), i).unwrap();
        }
        assert!(matches!(table.put("8".to_string(), 8), Err(Error::CapacityExceeded { .. })));
        for i in 0..8 {
            assert_eq!(table.get(&i.to_string()).ok(), Some(&i));
        }
    }

    #[test]
    fn test_closed_table() {
        let mut table = LinearProbingTable::new(8, 8).unwrap();
        table.put("a".to_string(), 1).unwrap();
        table.close();
        assert!(matches!(table.get("a"), Err(Error::NotOpen)));
        assert!(matches!(table.put("a".to_string(), 1), Err(Error::NotOpen)));
        table.close();

        table.open();
        assert!(table.is_empty());
        assert!(matches!(table.get("a"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn test_searches_are_monitored() {
        let mut table = LinearProbingTable::new(64, 64).unwrap();
        table.put("a".to_string(), 1).unwrap();
        table.get("a").unwrap();
        assert!(table.get("b").is_err());

        assert_eq!(table.monitoring().psl_histogram().values().sum::<u64>(), 1);
        assert_eq!(table.monitoring().psl_missing_histogram().values().sum::<u64>(), 1);
    }

    #[test]
    fn test_metadata() {
        let table = LinearProbingTable::<String, String>::new(100, 50).unwrap();
        let metadata = table.metadata();
        assert_eq!(metadata["name"], "linear");
        assert_eq!(metadata["num_buckets"], "100");
        assert_eq!(metadata["max_probe_length"], "50");
    }

    #[test]
    fn test_invalid_configuration() {
        assert!(matches!(
            LinearProbingTable::<String, String>::new(0, 10),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            LinearProbingTable::<String, String>::new(10, 0),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_matches_std_hashmap(
            max_probe_length in prop::sample::select(vec![3_usize, 8, 64]),
            ops in proptest::collection::vec((0_u8..3, 0_u32..80), 1..400),
        ) {
            let mut table = LinearProbingTable::new(64, max_probe_length).unwrap();
            let mut model = HashMap::new();
            for (op, k) in ops {
                let key = format!("key{k}");
                match op {
                    0 => match table.put(key.clone(), k) {
                        Ok(previous) => {
                            prop_assert_eq!(previous, model.insert(key, k));
                        }
                        Err(error) => {
                            let capacity = matches!(error, Error::CapacityExceeded { .. });
                            prop_assert!(capacity, "unexpected error: {}", error);
                            prop_assert!(!model.contains_key(&key));
                        }
                    },
                    1 => {
                        let removed = table.remove(key.as_str()).ok();
                        prop_assert_eq!(removed, model.remove(&key));
                    }
                    _ => {
                        let found = table.get(key.as_str()).ok().copied();
                        prop_assert_eq!(found, model.get(&key).copied());
                    }
                }
                prop_assert_eq!(table.len(), model.len());
                prop_assert_eq!(table.monitoring().num_tombstones(), table.tombstones());
                prop_assert_eq!(table.monitoring().num_occupied(), table.len());
            }
            for (key, value) in &model {
                prop_assert_eq!(table.get(key.as_str()).ok(), Some(value));
            }
        }
    }
}

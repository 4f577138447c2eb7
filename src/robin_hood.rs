use std::{borrow::Borrow, hash::Hash, mem};

use tracing::debug;

use crate::{
    Algorithm, HashTable, Metadata, TableConfig,
    error::{Error, Result},
    hash_table::{bucket_at, hash_key, home_bucket},
    monitoring::{Event, Monitoring, SlotState},
};

/// An entry together with its distance from its home bucket
#[derive(Debug, Clone)]
struct Entry<K, V> {
    /// The key in the key-value pair
    key: K,
    /// The value associated with the key
    value: V,
    /// Number of buckets between the home bucket and the bucket holding the entry
    distance: usize,
}

/// A hash table resolving collisions with Robin Hood hashing.
///
/// While inserting, an entry that is further from its home bucket than the resident it
/// meets takes the resident's bucket, and the resident continues the walk. Removal shifts
/// the following displaced entries one bucket back, so no tombstones are needed.
#[derive(Debug, Clone)]
pub struct RobinHoodTable<K, V> {
    /// The buckets, empty while the table is closed
    buckets: Vec<Option<Entry<K, V>>>,
    /// Number of buckets allocated by `open`
    num_buckets: usize,
    /// Number of live entries
    size: usize,
    /// Whether `open` was called since the last `close`
    is_open: bool,
    /// Density and search statistics
    monitoring: Monitoring,
}

impl<K, V> RobinHoodTable<K, V>
where
    K: Hash + Eq,
{
    /// Creates an open table with `num_buckets` buckets
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` if `num_buckets` is zero.
    pub fn new(num_buckets: usize) -> Result<Self> {
        Self::with_config(&TableConfig::new(Algorithm::RobinHood).with_num_buckets(num_buckets))
    }

    /// Creates an open table from the Robin Hood fields of `config`
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` if the fields are unusable.
    pub fn with_config(config: &TableConfig) -> Result<Self> {
        config.validate_for(Algorithm::RobinHood)?;
        let mut table = Self {
            buckets: Vec::new(),
            num_buckets: config.num_buckets,
            size: 0,
            is_open: false,
            monitoring: Monitoring::new(config.num_buckets, config.density_block_size),
        };
        table.open();
        Ok(table)
    }

    /// Allocates empty buckets
    pub fn open(&mut self) {
        self.buckets = (0..self.num_buckets).map(|_| None).collect();
        self.size = 0;
        self.is_open = true;
        self.monitoring.reset_density();
        debug!(num_buckets = self.num_buckets, "opened robin hood table");
    }

    /// Releases the buckets
    pub fn close(&mut self) {
        self.buckets = Vec::new();
        self.size = 0;
        self.is_open = false;
        self.monitoring.reset_density();
    }

    /// Inserts a key-value pair, or updates the value if the key is present
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` if every bucket is occupied, `NotOpen` on a closed table.
    pub fn put(&mut self, key: K, value: V) -> Result<Option<V>> {
        self.ensure_open()?;
        let home = home_bucket(hash_key(&key), self.num_buckets);
        if let (Some(index), _) = self.find(home, &key) {
            if let Some(Some(entry)) = self.buckets.get_mut(index) {
                return Ok(Some(mem::replace(&mut entry.value, value)));
            }
        }

        // A free bucket is always reached within one wraparound once this check passes,
        // so the walk below never strands a displaced entry
        if self.size >= self.num_buckets {
            debug!(home, "robin hood table is full");
            return Err(Error::CapacityExceeded { probes: self.num_buckets });
        }

        let mut carried = Entry { key, value, distance: 0 };
        let mut index = home;
        for _ in 0..self.num_buckets {
            let Some(slot) = self.buckets.get_mut(index) else { break };
            match slot {
                None => {
                    *slot = Some(carried);
                    self.size = self.size.saturating_add(1);
                    self.monitoring.record(Event::Transition {
                        bucket: index,
                        from: SlotState::Empty,
                        to: SlotState::Occupied,
                    });
                    return Ok(None);
                }
                Some(resident) => {
                    if resident.distance < carried.distance {
                        mem::swap(resident, &mut carried);
                    }
                }
            }
            carried.distance = carried.distance.saturating_add(1);
            index = bucket_at(index, 1, self.num_buckets);
        }

        Err(Error::CapacityExceeded { probes: self.num_buckets })
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
            Some(Some(entry)) => Ok(&entry.value),
            _ => Err(Error::KeyNotFound),
        }
    }

    /// Removes a key and returns its value, shifting the rest of the cluster back
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
        let Some(removed) = self.buckets.get_mut(index).and_then(Option::take) else {
            return Err(Error::KeyNotFound);
        };

        let mut hole = index;
        for _ in 1..self.num_buckets {
            let next = bucket_at(hole, 1, self.num_buckets);
            let displaced = matches!(self.buckets.get(next), Some(Some(entry)) if entry.distance > 0);
            if !displaced {
                break;
            }
            let Some(mut entry) = self.buckets.get_mut(next).and_then(Option::take) else { break };
            entry.distance = entry.distance.saturating_sub(1);
            if let Some(slot) = self.buckets.get_mut(hole) {
                *slot = Some(entry);
            }
            hole = next;
        }

        self.size = self.size.saturating_sub(1);
        self.monitoring.record(Event::Transition {
            bucket: hole,
            from: SlotState::Occupied,
            to: SlotState::Empty,
        });
        Ok(removed.value)
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

    /// Walks from `home` until the key, an empty bucket, or a resident closer to its home
    /// than the key would be. Returns the bucket and the number of buckets examined.
    fn find<Q>(&self, home: usize, key: &Q) -> (Option<usize>, usize)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut index = home;
        for distance in 0..self.num_buckets {
            let probes = distance.saturating_add(1);
            match self.buckets.get(index) {
                Some(Some(entry)) if entry.distance >= distance => {
                    if entry.key.borrow() == key {
                        return (Some(index), probes);
                    }
                }
                _ => return (None, probes),
            }
            index = bucket_at(index, 1, self.num_buckets);
        }
        (None, self.num_buckets)
    }

    /// Fails with `NotOpen` on a closed table
    fn ensure_open(&self) -> Result<()> {
        if self.is_open { Ok(()) } else { Err(Error::NotOpen) }
    }
}

impl<K, V> HashTable<K, V> for RobinHoodTable<K, V>
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
            ("name".to_string(), Algorithm::RobinHood.to_string()),
            ("num_buckets".to_string(), self.num_buckets.to_string()),
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

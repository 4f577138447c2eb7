use std::{borrow::Borrow, hash::Hash, mem};

use tracing::debug;

use crate::{
    Algorithm, HashTable, Metadata, TableConfig,
    error::{Error, Result},
    hash_table::{bucket_at, bucket_before, distance, hash_key, home_bucket},
    monitoring::{Event, Monitoring, SlotState},
};

/// An entry and its distance from its home bucket.
///
/// The stored offset is the "shadow" of the neighborhood: the home bucket of any occupant is
/// `index - offset`, so home buckets carry no membership data and each occupant carries two
/// bytes instead of a bitmap. Offsets stay below `size_nh_end`, which is capped at
/// [`crate::MAX_SHADOW_NEIGHBORHOOD`].
#[derive(Debug, Clone)]
struct Entry<K, V> {
    /// Distance from the home bucket, compared before the key itself
    offset: u16,
    /// The key in the key-value pair
    key: K,
    /// The value associated with the key
    value: V,
}

/// A hopscotch hash table without per-bucket bitmaps, with a neighborhood that grows under
/// displacement pressure.
///
/// The neighborhood starts at `size_nh_start` buckets. When no entry can be displaced to
/// bring a free bucket into reach, the neighborhood doubles, up to `size_nh_end`, before the
/// insertion is reported as failed. It never shrinks until the table is opened again.
#[derive(Debug, Clone)]
pub struct HopscotchShadowTable<K, V> {
    /// The buckets, empty while the table is closed
    buckets: Vec<Option<Entry<K, V>>>,
    /// Number of buckets allocated by `open`
    num_buckets: usize,
    /// Current neighborhood size
    size_neighborhood: usize,
    /// Initial neighborhood size
    size_nh_start: usize,
    /// Largest neighborhood size
    size_nh_end: usize,
    /// Maximum distance from the home bucket searched for a free bucket
    size_probing: usize,
    /// Number of live entries
    size: usize,
    /// Whether `open` was called since the last `close`
    is_open: bool,
    /// Density and search statistics
    monitoring: Monitoring,
}

impl<K, V> HopscotchShadowTable<K, V>
where
    K: Hash + Eq,
{
    /// Creates an open table
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` if a parameter is zero, `size_nh_start > size_nh_end`, or the
    /// table is narrower than `size_nh_end`.
    pub fn new(
        num_buckets: usize,
        size_probing: usize,
        size_nh_start: usize,
        size_nh_end: usize,
    ) -> Result<Self> {
        let config = TableConfig::new(Algorithm::Shadow)
            .with_num_buckets(num_buckets)
            .with_size_probing(size_probing)
            .with_neighborhood_range(size_nh_start, size_nh_end);
        Self::with_config(&config)
    }

    /// Creates an open table from the shadow hopscotch fields of `config`
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` if the fields are unusable.
    pub fn with_config(config: &TableConfig) -> Result<Self> {
        config.validate_for(Algorithm::Shadow)?;
        let mut table = Self {
            buckets: Vec::new(),
            num_buckets: config.num_buckets,
            size_neighborhood: config.size_nh_start,
            size_nh_start: config.size_nh_start,
            size_nh_end: config.size_nh_end,
            size_probing: config.size_probing,
            size: 0,
            is_open: false,
            monitoring: Monitoring::new(config.num_buckets, config.density_block_size),
        };
        table.open();
        Ok(table)
    }

    /// Allocates empty buckets and resets the neighborhood to its initial size
    pub fn open(&mut self) {
        self.buckets = (0..self.num_buckets).map(|_| None).collect();
        self.size = 0;
        self.size_neighborhood = self.size_nh_start;
        self.is_open = true;
        self.monitoring.reset_density();
        debug!(
            num_buckets = self.num_buckets,
            size_nh_start = self.size_nh_start,
            size_nh_end = self.size_nh_end,
            "opened shadow hopscotch table"
        );
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
    /// `CapacityExceeded` if no free bucket is found within `size_probing` buckets or it
    /// cannot be brought within `size_nh_end` of the home bucket, `NotOpen` on a closed table.
    pub fn put(&mut self, key: K, value: V) -> Result<Option<V>> {
        self.ensure_open()?;
        let home = home_bucket(hash_key(&key), self.num_buckets);
        if let (Some(index), _) = self.find(home, &key) {
            if let Some(Some(entry)) = self.buckets.get_mut(index) {
                return Ok(Some(mem::replace(&mut entry.value, value)));
            }
        }

        let limit = self.size_probing.min(self.num_buckets);
        let Some(mut offset) = (0..limit).find(|&offset| {
            let index = bucket_at(home, offset, self.num_buckets);
            matches!(self.buckets.get(index), Some(None))
        }) else {
            debug!(home, probes = limit, "no free bucket within the probing window");
            return Err(Error::CapacityExceeded { probes: limit });
        };

        let mut free = bucket_at(home, offset, self.num_buckets);
        while offset >= self.size_neighborhood {
            if let Some(vacated) = self.move_free_bucket_closer(free) {
                free = vacated;
                offset = distance(home, free, self.num_buckets);
            } else if self.size_neighborhood < self.size_nh_end {
                self.size_neighborhood = self.size_neighborhood.saturating_mul(2).min(self.size_nh_end);
                debug!(size_neighborhood = self.size_neighborhood, "grew neighborhood");
            } else {
                debug!(home, offset, "no entry can be displaced towards the home bucket");
                return Err(Error::CapacityExceeded { probes: limit });
            }
        }

        let Some(offset) = shadow_offset(offset) else {
            return Err(Error::CapacityExceeded { probes: limit });
        };
        if let Some(slot) = self.buckets.get_mut(free) {
            *slot = Some(Entry { offset, key, value });
        }
        self.size = self.size.saturating_add(1);
        self.monitoring.record(Event::Transition {
            bucket: free,
            from: SlotState::Empty,
            to: SlotState::Occupied,
        });
        Ok(None)
    }

    /// Retrieves the value for a given key, inspecting only the home neighborhood
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
        let Some(entry) = self.buckets.get_mut(index).and_then(Option::take) else {
            return Err(Error::KeyNotFound);
        };
        self.size = self.size.saturating_sub(1);
        self.monitoring.record(Event::Transition {
            bucket: index,
            from: SlotState::Occupied,
            to: SlotState::Empty,
        });
        Ok(entry.value)
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

    /// The current neighborhood size
    #[must_use]
    pub fn size_neighborhood(&self) -> usize {
        self.size_neighborhood
    }

    /// Scans the current neighborhood of `home` for `key`.
    ///
    /// Returns the bucket and the number of buckets examined. Empty buckets do not end the
    /// scan since entries may sit beyond a bucket freed by a removal.
    fn find<Q>(&self, home: usize, key: &Q) -> (Option<usize>, usize)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        for offset in 0..self.size_neighborhood {
            let index = bucket_at(home, offset, self.num_buckets);
            let matches = matches!(
                self.buckets.get(index),
                Some(Some(entry))
                    if usize::from(entry.offset) == offset && entry.key.borrow() == key
            );
            if matches {
                return (Some(index), offset.saturating_add(1));
            }
        }
        (None, self.size_neighborhood)
    }

    /// Moves the entry of one of the buckets preceding `free` into it, provided the entry
    /// stays inside the neighborhood of its own home. Returns the bucket it was moved out of.
    fn move_free_bucket_closer(&mut self, free: usize) -> Option<usize> {
        for back in (1..self.size_neighborhood).rev() {
            let candidate = bucket_before(free, back, self.num_buckets);
            let Some(Some(entry)) = self.buckets.get(candidate) else { continue };
            let home = bucket_before(candidate, usize::from(entry.offset), self.num_buckets);
            let Some(offset) = shadow_offset(distance(home, free, self.num_buckets))
                .filter(|&offset| usize::from(offset) < self.size_neighborhood)
            else {
                continue;
            };

            let mut moved = self.buckets.get_mut(candidate)?.take()?;
            moved.offset = offset;
            *self.buckets.get_mut(free)? = Some(moved);
            self.monitoring.record(Event::Transition {
                bucket: candidate,
                from: SlotState::Occupied,
                to: SlotState::Empty,
            });
            self.monitoring.record(Event::Transition {
                bucket: free,
                from: SlotState::Empty,
                to: SlotState::Occupied,
            });
            return Some(candidate);
        }
        None
    }

    /// Fails with `NotOpen` on a closed table
    fn ensure_open(&self) -> Result<()> {
        if self.is_open { Ok(()) } else { Err(Error::NotOpen) }
    }
}

/// Narrows a neighborhood offset for storage
fn shadow_offset(offset: usize) -> Option<u16> {
    u16::try_from(offset).ok()
}

impl<K, V> HashTable<K, V> for HopscotchShadowTable<K, V>
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
            ("name".to_string(), Algorithm::Shadow.to_string()),
            ("num_buckets".to_string(), self.num_buckets.to_string()),
            ("size_probing".to_string(), self.size_probing.to_string()),
            ("size_nh_start".to_string(), self.size_nh_start.to_string()),
            ("size_nh_end".to_string(), self.size_nh_end.to_string()),
            ("size_neighborhood".to_string(), self.size_neighborhood.to_string()),
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

    /// Checks that every entry is within the current neighborhood of its home
    fn assert_invariants(table: &HopscotchShadowTable<String, u32>) {
        let n = table.num_buckets;
        let mut occupied = 0;
        for (index, slot) in table.buckets.iter().enumerate() {
            let Some(entry) = slot else { continue };
            occupied += 1;
            let home = home_bucket(hash_key(entry.key.as_str()), n);
            let offset = distance(home, index, n);
            assert_eq!(usize::from(entry.offset), offset, "stale offset at {index}");
            assert!(offset < table.size_neighborhood, "entry at {index} is {offset} from home");
        }
        assert!(table.size_neighborhood >= table.size_nh_start);
        assert!(table.size_neighborhood <= table.size_nh_end);
        assert_eq!(occupied, table.len());
        assert_eq!(table.monitoring.num_occupied(), table.len());
    }

    /// Keys whose home bucket is `home` in a table of `num_buckets`
    fn keys_homed_at(home: usize, num_buckets: usize, count: usize) -> Vec<String> {
        (0..)
            .map(|i| format!("key{i}"))
            .filter(|key| home_bucket(hash_key(key.as_str()), num_buckets) == home)
            .take(count)
            .collect()
    }

    #[test]
    fn test_insert_get_remove() {
        let mut table = HopscotchShadowTable::new(128, 128, 8, 32).unwrap();
        assert_eq!(table.put("key1".to_string(), 1).unwrap(), None);
        assert_eq!(table.put("key1".to_string(), 2).unwrap(), Some(1));
        assert_eq!(table.get("key1").ok(), Some(&2));
        assert_eq!(table.remove("key1").unwrap(), 2);
        assert!(matches!(table.get("key1"), Err(Error::KeyNotFound)));
        assert!(matches!(table.remove("key1"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn test_neighborhood_grows_under_pressure() {
        let mut table = HopscotchShadowTable::new(64, 64, 2, 8).unwrap();
        let keys = keys_homed_at(20, 64, 5);
        for (i, key) in keys.iter().enumerate() {
            table.put(key.clone(), u32::try_from(i).unwrap()).unwrap();
        }

        // Five entries sharing a home need a neighborhood of at least five buckets
        assert_eq!(table.size_neighborhood(), 8);
        assert_eq!(table.metadata()["size_neighborhood"], "8");
        assert_invariants(&table);
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(table.get(key.as_str()).ok(), Some(&u32::try_from(i).unwrap()));
        }
    }

    #[test]
    fn test_fails_once_fully_grown() {
        let mut table = HopscotchShadowTable::new(64, 64, 2, 4).unwrap();
        let keys = keys_homed_at(7, 64, 5);
        for key in keys.iter().take(4) {
            table.put(key.clone(), 0).unwrap();
        }
        assert!(matches!(table.put(keys[4].clone(), 0), Err(Error::CapacityExceeded { .. })));
        assert_eq!(table.size_neighborhood(), 4);
        assert_invariants(&table);
    }

    #[test]
    fn test_displacement_rewrites_offsets() {
        let mut table = HopscotchShadowTable::new(64, 64, 4, 4).unwrap();
        let at_twelve = keys_homed_at(12, 64, 3);
        let at_eleven = keys_homed_at(11, 64, 2);
        let at_ten = keys_homed_at(10, 64, 1);
        for key in at_twelve.iter().chain(&at_ten).chain(at_eleven.iter().take(1)) {
            table.put(key.clone(), 1).unwrap();
        }

        // Buckets 10 to 14 are full, so the second key homed at 11 pushes one homed at 12 to 15
        table.put(at_eleven[1].clone(), 2).unwrap();
        let offset_at = |index: usize| table.buckets.get(index).unwrap().as_ref().unwrap().offset;
        assert_eq!(offset_at(15), 3);
        assert_eq!(offset_at(12), 1);
        assert_eq!(table.size_neighborhood(), 4);
        assert_invariants(&table);
        for key in at_twelve.iter().chain(&at_ten).chain(&at_eleven) {
            assert!(table.get(key.as_str()).is_ok(), "{key} unreachable");
        }
    }

    #[test]
    fn test_search_continues_past_removed_bucket() {
        let mut table = HopscotchShadowTable::new(64, 64, 4, 4).unwrap();
        let keys = keys_homed_at(30, 64, 3);
        for key in &keys {
            table.put(key.clone(), 1).unwrap();
        }
        table.remove(keys[1].as_str()).unwrap();
        assert_eq!(table.get(keys[2].as_str()).ok(), Some(&1));
    }

    #[test]
    fn test_open_resets_neighborhood() {
        let mut table = HopscotchShadowTable::new(64, 64, 1, 8).unwrap();
        for key in keys_homed_at(3, 64, 3) {
            table.put(key, 0).unwrap();
        }
        assert!(table.size_neighborhood() > 1);
        table.open();
        assert_eq!(table.size_neighborhood(), 1);
        assert!(table.is_empty());
        assert_eq!(table.monitoring().num_occupied(), 0);
    }

    #[test]
    fn test_invalid_configuration() {
        assert!(matches!(
            HopscotchShadowTable::<String, u32>::new(100, 100, 16, 8),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(HopscotchShadowTable::<String, u32>::new(100, 100, 0, 8).is_err());
        assert!(HopscotchShadowTable::<String, u32>::new(4, 100, 2, 8).is_err());
    }

    proptest! {
        #[test]
        fn prop_matches_std_hashmap(ops in proptest::collection::vec((0_u8..3, 0_u32..200), 1..400)) {
            let mut table = HopscotchShadowTable::new(256, 256, 4, 32).unwrap();
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
                assert_invariants(&table);
            }
        }
    }
}

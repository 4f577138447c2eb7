use std::{borrow::Borrow, hash::Hash, mem};

use tracing::debug;

use crate::{
    Algorithm, HashTable, Metadata, TableConfig,
    error::{Error, Result},
    hash_table::{bucket_at, bucket_before, distance, hash_key, home_bucket},
    monitoring::{Event, Monitoring, SlotState},
};

/// An entry stored in a bucket
#[derive(Debug, Clone)]
struct Entry<K, V> {
    /// The key in the key-value pair
    key: K,
    /// The value associated with the key
    value: V,
}

/// A bucket of the bitmap hopscotch table
#[derive(Debug, Clone)]
struct Bucket<K, V> {
    /// Bit `i` is set when bucket `home + i` holds an entry whose home is this bucket
    hop_info: u64,
    /// The entry stored in this bucket, whatever its home
    entry: Option<Entry<K, V>>,
}

impl<K, V> Bucket<K, V> {
    /// Creates an empty bucket with an empty neighborhood
    fn empty() -> Self {
        Self { hop_info: 0, entry: None }
    }
}

/// A hopscotch hash table recording each neighborhood as a bitmap in its home bucket.
///
/// Every entry lives less than `size_neighborhood` buckets after its home bucket, so a
/// lookup only visits the buckets flagged in the home bitmap. Insertion looks for a free
/// bucket within `size_probing` buckets and moves it back towards the home bucket by
/// relocating entries that stay within their own neighborhoods.
#[derive(Debug, Clone)]
pub struct HopscotchBitmapTable<K, V> {
    /// The buckets, empty while the table is closed
    buckets: Vec<Bucket<K, V>>,
    /// Number of buckets allocated by `open`
    num_buckets: usize,
    /// Width of every neighborhood, at most 64
    size_neighborhood: usize,
    /// Maximum distance from the home bucket searched for a free bucket
    size_probing: usize,
    /// Number of live entries
    size: usize,
    /// Whether `open` was called since the last `close`
    is_open: bool,
    /// Density and search statistics
    monitoring: Monitoring,
}

impl<K, V> HopscotchBitmapTable<K, V>
where
    K: Hash + Eq,
{
    /// Creates an open table with 32-bucket neighborhoods
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` if a parameter is zero or the table is narrower than a
    /// neighborhood.
    pub fn new(num_buckets: usize, size_probing: usize) -> Result<Self> {
        let config = TableConfig::new(Algorithm::Bitmap)
            .with_num_buckets(num_buckets)
            .with_size_probing(size_probing);
        Self::with_config(&config)
    }

    /// Creates an open table from the bitmap hopscotch fields of `config`
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` if the fields are unusable.
    pub fn with_config(config: &TableConfig) -> Result<Self> {
        config.validate_for(Algorithm::Bitmap)?;
        let mut table = Self {
            buckets: Vec::new(),
            num_buckets: config.num_buckets,
            size_neighborhood: config.size_neighborhood,
            size_probing: config.size_probing,
            size: 0,
            is_open: false,
            monitoring: Monitoring::new(config.num_buckets, config.density_block_size),
        };
        table.open();
        Ok(table)
    }

    /// Allocates empty buckets
    pub fn open(&mut self) {
        self.buckets = (0..self.num_buckets).map(|_| Bucket::empty()).collect();
        self.size = 0;
        self.is_open = true;
        self.monitoring.reset_density();
        debug!(
            num_buckets = self.num_buckets,
            size_neighborhood = self.size_neighborhood,
            "opened bitmap hopscotch table"
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
    /// cannot be brought into the neighborhood, `NotOpen` on a closed table.
    pub fn put(&mut self, key: K, value: V) -> Result<Option<V>> {
        self.ensure_open()?;
        let home = home_bucket(hash_key(&key), self.num_buckets);
        if let Some((index, _, _)) = self.find(home, &key) {
            if let Some(Entry { value: stored, .. }) =
                self.buckets.get_mut(index).and_then(|bucket| bucket.entry.as_mut())
            {
                return Ok(Some(mem::replace(stored, value)));
            }
        }

        let limit = self.size_probing.min(self.num_buckets);
        let Some(mut offset) = (0..limit).find(|&offset| {
            let index = bucket_at(home, offset, self.num_buckets);
            self.buckets.get(index).is_some_and(|bucket| bucket.entry.is_none())
        }) else {
            debug!(home, probes = limit, "no free bucket within the probing window");
            return Err(Error::CapacityExceeded { probes: limit });
        };

        let mut free = bucket_at(home, offset, self.num_buckets);
        while offset >= self.size_neighborhood {
            let Some(vacated) = self.move_free_bucket_closer(free) else {
                debug!(home, offset, "no entry can be displaced towards the home bucket");
                return Err(Error::CapacityExceeded { probes: limit });
            };
            free = vacated;
            offset = distance(home, free, self.num_buckets);
        }

        if let Some(bucket) = self.buckets.get_mut(free) {
            bucket.entry = Some(Entry { key, value });
        }
        if let Some(bucket) = self.buckets.get_mut(home) {
            bucket.hop_info |= 1_u64 << offset;
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
        let found = self.find(home, key);
        let event = match found {
            Some((_, probes, span)) => Event::Search { home, probes, span, found: true },
            None => {
                let hop_info = self.buckets.get(home).map_or(0, |bucket| bucket.hop_info);
                Event::Search {
                    home,
                    probes: usize::try_from(hop_info.count_ones()).unwrap_or(usize::MAX),
                    span: neighborhood_span(hop_info),
                    found: false,
                }
            }
        };
        self.monitoring.record(event);

        found
            .and_then(|(index, _, _)| self.buckets.get(index))
            .and_then(|bucket| bucket.entry.as_ref())
            .map(|entry| &entry.value)
            .ok_or(Error::KeyNotFound)
    }

    /// Removes a key and returns its value, clearing its bit in the home bitmap
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
        let Some((index, _, span)) = self.find(home, key) else {
            return Err(Error::KeyNotFound);
        };
        let Some(entry) = self.buckets.get_mut(index).and_then(|bucket| bucket.entry.take()) else {
            return Err(Error::KeyNotFound);
        };
        if let Some(bucket) = self.buckets.get_mut(home) {
            bucket.hop_info &= !(1_u64 << span.saturating_sub(1));
        }
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

    /// Looks for `key` among the members of the neighborhood of `home`.
    ///
    /// Returns the bucket, the number of buckets compared and the offset of the bucket plus one.
    fn find<Q>(&self, home: usize, key: &Q) -> Option<(usize, usize, usize)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut members = self.buckets.get(home)?.hop_info;
        let mut probes: usize = 0;
        while members != 0 {
            let offset = usize::try_from(members.trailing_zeros()).ok()?;
            members &= members.wrapping_sub(1);
            probes = probes.saturating_add(1);
            let index = bucket_at(home, offset, self.num_buckets);
            let matches = self
                .buckets
                .get(index)
                .and_then(|bucket| bucket.entry.as_ref())
                .is_some_and(|entry| entry.key.borrow() == key);
            if matches {
                return Some((index, probes, offset.saturating_add(1)));
            }
        }
        None
    }

    /// Moves an entry from one of the buckets preceding `free` into it, keeping the entry
    /// inside its own neighborhood. Returns the bucket the entry was moved out of.
    fn move_free_bucket_closer(&mut self, free: usize) -> Option<usize> {
        for back in (1..self.size_neighborhood).rev() {
            let candidate = bucket_before(free, back, self.num_buckets);
            let hop_info = self.buckets.get(candidate)?.hop_info;
            // Members of the candidate neighborhood located before the free bucket
            let movable = hop_info & ((1_u64 << back) - 1);
            if movable == 0 {
                continue;
            }

            let offset = usize::try_from(movable.trailing_zeros()).ok()?;
            let from = bucket_at(candidate, offset, self.num_buckets);
            let entry = self.buckets.get_mut(from)?.entry.take();
            self.buckets.get_mut(free)?.entry = entry;
            let bucket = self.buckets.get_mut(candidate)?;
            bucket.hop_info = (bucket.hop_info & !(1_u64 << offset)) | (1_u64 << back);

            self.monitoring.record(Event::Transition {
                bucket: from,
                from: SlotState::Occupied,
                to: SlotState::Empty,
            });
            self.monitoring.record(Event::Transition {
                bucket: free,
                from: SlotState::Empty,
                to: SlotState::Occupied,
            });
            return Some(from);
        }
        None
    }

    /// Fails with `NotOpen` on a closed table
    fn ensure_open(&self) -> Result<()> {
        if self.is_open { Ok(()) } else { Err(Error::NotOpen) }
    }
}

/// Offset of the furthest member of a neighborhood plus one, or one for an empty bitmap
fn neighborhood_span(hop_info: u64) -> usize {
    let highest = u64::BITS.saturating_sub(hop_info.leading_zeros());
    usize::try_from(highest).unwrap_or(usize::MAX).max(1)
}

impl<K, V> HashTable<K, V> for HopscotchBitmapTable<K, V>
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
            ("name".to_string(), Algorithm::Bitmap.to_string()),
            ("num_buckets".to_string(), self.num_buckets.to_string()),
            ("size_neighborhood".to_string(), self.size_neighborhood.to_string()),
            ("size_probing".to_string(), self.size_probing.to_string()),
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

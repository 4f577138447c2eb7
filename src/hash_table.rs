//! The contract shared by every open addressing table and the factory that builds them

use std::{
    collections::{BTreeMap, hash_map::DefaultHasher},
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    HopscotchBitmapTable, HopscotchShadowTable, LinearProbingTable, Monitoring, RobinHoodTable,
    TableConfig, error::Result,
};

/// Ordered description of a table: its algorithm name plus capacity and tuning fields
pub type Metadata = BTreeMap<String, String>;

/// The collision resolution strategies available in the testbed
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Linear probing with tombstones
    #[default]
    Linear,
    /// Robin Hood hashing with backward shift deletion
    RobinHood,
    /// Hopscotch hashing with a membership bitmap per home bucket
    Bitmap,
    /// Hopscotch hashing with a hash "shadow" per occupant and a growing neighborhood
    Shadow,
}

/// A fixed capacity key/value store resolved by open addressing.
///
/// Every operation reports a discriminable status. Lookups take `&mut self` because each
/// search is reported to the table's [`Monitoring`] accumulator.
pub trait HashTable<K, V> {
    /// Allocates the buckets and empties the table. Opening an open table empties it again.
    fn open(&mut self);

    /// Releases the buckets. Further operations report `NotOpen` until the next `open`.
    fn close(&mut self);

    /// Inserts a key, or replaces the value in place if the key is present.
    ///
    /// Returns the previous value on update.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` if no legal bucket is reachable, `NotOpen` on a closed table.
    fn put(&mut self, key: K, value: V) -> Result<Option<V>>;

    /// Looks up the value stored for `key`.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` on a miss, `NotOpen` on a closed table.
    fn get(&mut self, key: &K) -> Result<&V>;

    /// Removes `key` and returns its value.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` on a miss, `NotOpen` on a closed table.
    fn remove(&mut self, key: &K) -> Result<V>;

    /// Describes the table; always contains `name` and `num_buckets`
    fn metadata(&self) -> Metadata;

    /// The accumulator fed by this table's operations
    fn monitoring(&self) -> &Monitoring;

    /// Mutable access to the accumulator, used for tagging and snapshots
    fn monitoring_mut(&mut self) -> &mut Monitoring;

    /// Number of stored keys
    fn len(&self) -> usize;

    /// Number of buckets, fixed for the lifetime of the table
    fn num_buckets(&self) -> usize;

    /// Returns true if no key is stored
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ratio of stored keys to buckets
    #[allow(clippy::cast_precision_loss)]
    fn load_factor(&self) -> f64 {
        if self.num_buckets() == 0 {
            return 0.0;
        }
        self.len() as f64 / self.num_buckets() as f64
    }
}

/// Builds the table selected by `config.algorithm`.
///
/// # Errors
///
/// `InvalidConfiguration` if the sizing parameters are unusable for that algorithm.
pub fn build_table<K, V>(config: &TableConfig) -> Result<Box<dyn HashTable<K, V>>>
where
    K: Hash + Eq + 'static,
    V: 'static,
{
    Ok(match config.algorithm {
        Algorithm::Linear => Box::new(LinearProbingTable::with_config(config)?),
        Algorithm::RobinHood => Box::new(RobinHoodTable::with_config(config)?),
        Algorithm::Bitmap => Box::new(HopscotchBitmapTable::with_config(config)?),
        Algorithm::Shadow => Box::new(HopscotchShadowTable::with_config(config)?),
    })
}

/// Computes the hash for a key
pub(crate) fn hash_key<Q: ?Sized + Hash>(key: &Q) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Maps a hash onto its home bucket
#[allow(clippy::cast_possible_truncation, clippy::arithmetic_side_effects)]
pub(crate) fn home_bucket(hash: u64, num_buckets: usize) -> usize {
    (hash % num_buckets as u64) as usize
}

/// The bucket `offset` steps after `index`, wrapping around the table
#[allow(clippy::arithmetic_side_effects)]
pub(crate) fn bucket_at(index: usize, offset: usize, num_buckets: usize) -> usize {
    (index + offset) % num_buckets
}

/// The bucket `offset` steps before `index`, wrapping around the table
#[allow(clippy::arithmetic_side_effects)]
pub(crate) fn bucket_before(index: usize, offset: usize, num_buckets: usize) -> usize {
    (index + num_buckets - offset % num_buckets) % num_buckets
}

/// Forward distance from `from` to `to`, wrapping around the table
#[allow(clippy::arithmetic_side_effects)]
pub(crate) fn distance(from: usize, to: usize, num_buckets: usize) -> usize {
    (to + num_buckets - from) % num_buckets
}

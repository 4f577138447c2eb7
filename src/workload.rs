//! Reproducible random key workloads
//!
//! A [`Workload`] owns its random source, so two workloads built from the same seed produce
//! the same sequence of keys and removals.

use std::collections::HashSet;

use rand::{Rng, SeedableRng, distr::Alphanumeric, rngs::StdRng};

/// Length of generated keys
pub const DEFAULT_KEY_SIZE: usize = 16;

/// Generates distinct random keys and picks random live keys for removal
#[derive(Debug, Clone)]
pub struct Workload {
    /// The seeded random source
    rng: StdRng,
    /// Number of characters per key
    key_size: usize,
    /// Keys handed out and not yet evicted, in a stable order
    live: Vec<String>,
    /// Membership index over `live`
    index: HashSet<String>,
}

impl Workload {
    /// Creates a workload generating 16-character alphanumeric keys
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_key_size(seed, DEFAULT_KEY_SIZE)
    }

    /// Creates a workload generating keys of `key_size` characters
    #[must_use]
    pub fn with_key_size(seed: u64, key_size: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            key_size: key_size.max(1),
            live: Vec::new(),
            index: HashSet::new(),
        }
    }

    /// Returns a random key that is not currently live and marks it live
    pub fn fresh_key(&mut self) -> String {
        loop {
            let key: String =
                (&mut self.rng).sample_iter(Alphanumeric).take(self.key_size).map(char::from).collect();
            if self.index.insert(key.clone()) {
                self.live.push(key.clone());
                return key;
            }
        }
    }

    /// Removes a random live key and returns it, or `None` if no key is live
    pub fn evict_random(&mut self) -> Option<String> {
        if self.live.is_empty() {
            return None;
        }
        let position = self.rng.random_range(0..self.live.len());
        let key = self.live.swap_remove(position);
        self.index.remove(&key);
        Some(key)
    }

    /// Stops tracking `key`, typically after the table refused to store it.
    ///
    /// Returns true if the key was live.
    pub fn discard(&mut self, key: &str) -> bool {
        if !self.index.remove(key) {
            return false;
        }
        if let Some(position) = self.live.iter().position(|live| live == key) {
            self.live.swap_remove(position);
        }
        true
    }

    /// The keys currently live
    #[must_use]
    pub fn live_keys(&self) -> &[String] {
        &self.live
    }

    /// Number of live keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Returns true if no key is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Forgets every live key, keeping the random source where it is
    pub fn clear(&mut self) {
        self.live.clear();
        self.index.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_keys() {
        let mut first = Workload::new(7);
        let mut second = Workload::new(7);
        for _ in 0..100 {
            assert_eq!(first.fresh_key(), second.fresh_key());
        }
        assert_eq!(first.evict_random(), second.evict_random());
    }

    #[test]
    fn test_keys_are_distinct_and_alphanumeric() {
        let mut workload = Workload::with_key_size(1, 2);
        for _ in 0..500 {
            let key = workload.fresh_key();
            assert_eq!(key.len(), 2);
            assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
        }
        let unique: HashSet<&String> = workload.live_keys().iter().collect();
        assert_eq!(unique.len(), 500);
    }

    #[test]
    fn test_evict_random() {
        let mut workload = Workload::new(3);
        assert_eq!(workload.evict_random(), None);
        let keys: HashSet<String> = (0..10).map(|_| workload.fresh_key()).collect();

        let evicted = workload.evict_random().unwrap();
        assert!(keys.contains(&evicted));
        assert!(!workload.live_keys().contains(&evicted));
        assert_eq!(workload.len(), 9);

        workload.clear();
        assert!(workload.is_empty());
    }

    #[test]
    fn test_discard() {
        let mut workload = Workload::new(5);
        let kept = workload.fresh_key();
        let refused = workload.fresh_key();

        assert!(workload.discard(&refused));
        assert!(!workload.discard(&refused));
        assert_eq!(workload.live_keys(), [kept].as_slice());
    }
}

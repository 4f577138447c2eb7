//! # Hashbench
//!
//! A testbed for benchmarking open addressing hash table algorithms.
//!
//! This crate provides four fixed-capacity tables behind one [`HashTable`] contract:
//!
//! - `LinearProbingTable`: linear probing bounded by a maximum probe length, with tombstones
//! - `RobinHoodTable`: Robin Hood hashing with backward shift deletion
//! - `HopscotchBitmapTable`: hopscotch hashing with a neighborhood bitmap per bucket
//! - `HopscotchShadowTable`: hopscotch hashing with stored home offsets and a growing neighborhood
//!
//! Tables never resize. An insertion that cannot find a legal bucket within the configured
//! bounds is reported as [`Error::CapacityExceeded`], which is what the benchmarks measure.
//! Every table reports its bucket changes and lookups to a [`Monitoring`] accumulator that
//! can write density and probing sequence length histograms as JSON snapshots.
//!
//! ## Basic Usage
//!
//! ```rust
//! use hashbench::{Algorithm, HashTable, TableConfig, build_table};
//!
//! let config = TableConfig::new(Algorithm::Bitmap).with_num_buckets(1000);
//! let mut table = build_table::<String, String>(&config).unwrap();
//!
//! table.put("apple".to_string(), "red".to_string()).unwrap();
//! assert_eq!(table.get(&"apple".to_string()).unwrap(), "red");
//!
//! table.remove(&"apple".to_string()).unwrap();
//! assert!(table.get(&"apple".to_string()).is_err());
//! assert_eq!(table.metadata()["name"], "bitmap");
//! ```
//!
//! ## Concrete tables
//!
//! ```rust
//! use hashbench::{Error, RobinHoodTable};
//!
//! let mut table = RobinHoodTable::new(4).unwrap();
//! for i in 0..4 {
//!     table.put(i, i * 10).unwrap();
//! }
//! assert!(matches!(table.put(4, 40), Err(Error::CapacityExceeded { .. })));
//! assert_eq!(table.get(&2).ok(), Some(&20));
//! ```

/// Construction parameters and their validation
mod config;
/// Error types
mod error;
/// The shared table contract and the factory
mod hash_table;
/// Hopscotch hashing with neighborhood bitmaps
mod hopscotch_bitmap;
/// Hopscotch hashing with stored home offsets and a growing neighborhood
mod hopscotch_shadow;
/// Linear probing with tombstones
mod linear_probing;
/// Density and probing sequence length instrumentation
pub mod monitoring;
/// Robin Hood hashing
mod robin_hood;
/// Seeded random key workloads
mod workload;

pub use config::{MAX_BITMAP_NEIGHBORHOOD, MAX_SHADOW_NEIGHBORHOOD, TableConfig};
pub use error::{Error, Result};
pub use hash_table::{Algorithm, HashTable, Metadata, build_table};
pub use hopscotch_bitmap::HopscotchBitmapTable;
pub use hopscotch_shadow::HopscotchShadowTable;
pub use linear_probing::LinearProbingTable;
pub use monitoring::{Monitoring, SnapshotName};
pub use robin_hood::RobinHoodTable;
pub use workload::{DEFAULT_KEY_SIZE, Workload};

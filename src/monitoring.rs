//! Instrumentation accumulator for bucket density and probing sequence lengths.
//!
//! Tables do not hand their buckets to the accumulator. They report an [`Event`] for every
//! bucket state change and every search, and [`Monitoring`] aggregates those into
//! histograms that can be written out as JSON snapshots at any time.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::Serialize;
use strum::{Display, IntoStaticStr};
use tracing::info;

use crate::error::{Error, Result};

/// What a bucket currently holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    /// Never used, or cleaned
    Empty,
    /// Holds a live entry
    Occupied,
    /// Held an entry that was removed (linear probing only)
    Tombstone,
}

/// A single observation reported by a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A bucket changed state
    Transition {
        /// Index of the bucket
        bucket: usize,
        /// State before the operation
        from: SlotState,
        /// State after the operation
        to: SlotState,
    },
    /// A lookup finished
    Search {
        /// Home bucket of the key
        home: usize,
        /// Number of buckets whose contents were compared against the key
        probes: usize,
        /// Distance from the home bucket to the furthest bucket inspected, plus one
        span: usize,
        /// Whether the key was found
        found: bool,
    },
}

/// Which histogram a snapshot file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Metric {
    /// Occupied/tombstone/empty counts per block of buckets
    Density,
    /// Probing sequence lengths of lookups
    Psl,
    /// Number of density blocks covered by lookups
    NumScannedBlocks,
}

/// Bucket counts for one block of the density histogram
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BlockDensity {
    /// Buckets holding a live entry
    pub occupied: usize,
    /// Buckets holding a tombstone
    pub tombstone: usize,
    /// Buckets holding nothing
    pub empty: usize,
}

/// Density snapshot as written to disk
#[derive(Debug, Serialize)]
struct DensitySnapshot {
    instance: u32,
    cycle: u32,
    load_factor: f64,
    num_buckets: usize,
    block_size: usize,
    occupied: usize,
    tombstones: usize,
    /// Keyed by the first bucket index of each block
    histogram: BTreeMap<usize, BlockDensity>,
}

/// Probe-count snapshot as written to disk
#[derive(Debug, Serialize)]
struct HistogramSnapshot {
    instance: u32,
    cycle: u32,
    load_factor: f64,
    num_buckets: usize,
    metric: &'static str,
    count: u64,
    mean: f64,
    /// Keyed by probe length, or by number of blocks
    histogram: BTreeMap<usize, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unsuccessful: Option<BTreeMap<usize, u64>>,
}

/// Accumulates density and probing statistics for one table.
///
/// Printing a snapshot never resets the counters; a fresh table gives a fresh accumulator.
#[derive(Debug, Clone)]
pub struct Monitoring {
    /// Tag: run instance
    instance: u32,
    /// Tag: churn cycle within the instance
    cycle: u32,
    /// Tag: target load factor of the run
    load_factor: f64,
    /// Number of buckets of the observed table
    num_buckets: usize,
    /// Buckets per density block
    block_size: usize,
    /// Occupied buckets per block
    occupied: Vec<usize>,
    /// Tombstones per block
    tombstones: Vec<usize>,
    /// Probe counts of successful lookups
    psl_found: BTreeMap<usize, u64>,
    /// Probe counts of unsuccessful lookups
    psl_missing: BTreeMap<usize, u64>,
    /// Number of density blocks covered by each lookup
    scanned_blocks: BTreeMap<usize, u64>,
}

impl Monitoring {
    /// Creates an accumulator for a table of `num_buckets` buckets, grouped by `block_size`
    #[must_use]
    pub fn new(num_buckets: usize, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        let num_blocks = num_buckets.div_ceil(block_size);
        Self {
            instance: 0,
            cycle: 0,
            load_factor: 0.0,
            num_buckets,
            block_size,
            occupied: vec![0; num_blocks],
            tombstones: vec![0; num_blocks],
            psl_found: BTreeMap::new(),
            psl_missing: BTreeMap::new(),
            scanned_blocks: BTreeMap::new(),
        }
    }

    /// Tags subsequent snapshots with a run instance
    pub fn set_instance(&mut self, instance: u32) {
        self.instance = instance;
    }

    /// Tags subsequent snapshots with a cycle number
    pub fn set_cycle(&mut self, cycle: u32) {
        self.cycle = cycle;
    }

    /// Tags subsequent snapshots with a load factor
    pub fn set_load_factor(&mut self, load_factor: f64) {
        self.load_factor = load_factor;
    }

    /// The current instance tag
    #[must_use]
    pub fn instance(&self) -> u32 {
        self.instance
    }

    /// The current cycle tag
    #[must_use]
    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    /// The current load factor tag
    #[must_use]
    pub fn load_factor(&self) -> f64 {
        self.load_factor
    }

    /// Folds one event into the histograms
    pub fn record(&mut self, event: Event) {
        match event {
            Event::Transition { bucket, from, to } => {
                let block = bucket / self.block_size;
                self.adjust(block, from, false);
                self.adjust(block, to, true);
            }
            Event::Search { home, probes, span, found } => {
                let psl = if found { &mut self.psl_found } else { &mut self.psl_missing };
                bump(psl, probes);
                let blocks = self.blocks_spanned(home, span);
                bump(&mut self.scanned_blocks, blocks);
            }
        }
    }

    /// Forgets all bucket occupancy, as when the observed table is emptied
    pub fn reset_density(&mut self) {
        self.occupied.iter_mut().for_each(|count| *count = 0);
        self.tombstones.iter_mut().for_each(|count| *count = 0);
    }

    /// Clears every histogram but keeps the tags
    pub fn reset(&mut self) {
        self.reset_density();
        self.psl_found.clear();
        self.psl_missing.clear();
        self.scanned_blocks.clear();
    }

    /// Total occupied buckets
    #[must_use]
    pub fn num_occupied(&self) -> usize {
        self.occupied.iter().sum()
    }

    /// Total tombstones
    #[must_use]
    pub fn num_tombstones(&self) -> usize {
        self.tombstones.iter().sum()
    }

    /// Buckets per density block
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The density histogram keyed by the first bucket index of each block
    #[must_use]
    pub fn density(&self) -> BTreeMap<usize, BlockDensity> {
        self.occupied
            .iter()
            .zip(&self.tombstones)
            .enumerate()
            .map(|(block, (&occupied, &tombstone))| {
                let start = block.saturating_mul(self.block_size);
                let len = self.block_size.min(self.num_buckets.saturating_sub(start));
                let empty = len.saturating_sub(occupied).saturating_sub(tombstone);
                (start, BlockDensity { occupied, tombstone, empty })
            })
            .collect()
    }

    /// Probe counts of successful lookups
    #[must_use]
    pub fn psl_histogram(&self) -> &BTreeMap<usize, u64> {
        &self.psl_found
    }

    /// Probe counts of unsuccessful lookups
    #[must_use]
    pub fn psl_missing_histogram(&self) -> &BTreeMap<usize, u64> {
        &self.psl_missing
    }

    /// Number of density blocks covered per lookup
    #[must_use]
    pub fn scanned_blocks_histogram(&self) -> &BTreeMap<usize, u64> {
        &self.scanned_blocks
    }

    /// Mean probe count of successful lookups, zero if there were none
    #[must_use]
    pub fn mean_psl(&self) -> f64 {
        mean(&self.psl_found)
    }

    /// Writes the density histogram to `path`
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be written.
    pub fn print_density(&self, path: impl AsRef<Path>) -> Result<()> {
        let snapshot = DensitySnapshot {
            instance: self.instance,
            cycle: self.cycle,
            load_factor: self.load_factor,
            num_buckets: self.num_buckets,
            block_size: self.block_size,
            occupied: self.num_occupied(),
            tombstones: self.num_tombstones(),
            histogram: self.density(),
        };
        write_json(path.as_ref(), &snapshot)
    }

    /// Writes the probing sequence lengths of lookups to `path`
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be written.
    pub fn print_probing_sequence_length_search(&self, path: impl AsRef<Path>) -> Result<()> {
        let snapshot = self.histogram_snapshot(
            Metric::Psl,
            &self.psl_found,
            Some(self.psl_missing.clone()),
        );
        write_json(path.as_ref(), &snapshot)
    }

    /// Writes the number of density blocks covered by lookups to `path`
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be written.
    pub fn print_num_scanned_blocks(&self, path: impl AsRef<Path>) -> Result<()> {
        let snapshot = self.histogram_snapshot(Metric::NumScannedBlocks, &self.scanned_blocks, None);
        write_json(path.as_ref(), &snapshot)
    }

    /// Builds the common shape of the probe-count snapshots
    fn histogram_snapshot(
        &self,
        metric: Metric,
        histogram: &BTreeMap<usize, u64>,
        unsuccessful: Option<BTreeMap<usize, u64>>,
    ) -> HistogramSnapshot {
        HistogramSnapshot {
            instance: self.instance,
            cycle: self.cycle,
            load_factor: self.load_factor,
            num_buckets: self.num_buckets,
            metric: metric.into(),
            count: histogram.values().sum(),
            mean: mean(histogram),
            histogram: histogram.clone(),
            unsuccessful,
        }
    }

    /// Moves one bucket of `block` into or out of `state`
    fn adjust(&mut self, block: usize, state: SlotState, entering: bool) {
        let counts = match state {
            SlotState::Empty => return,
            SlotState::Occupied => &mut self.occupied,
            SlotState::Tombstone => &mut self.tombstones,
        };
        if let Some(count) = counts.get_mut(block) {
            *count = if entering { count.saturating_add(1) } else { count.saturating_sub(1) };
        }
    }

    /// Number of blocks touched by the window of `span` buckets starting at `home`
    fn blocks_spanned(&self, home: usize, span: usize) -> usize {
        if span == 0 || self.num_buckets == 0 {
            return 0;
        }
        let num_blocks = self.occupied.len();
        let first = home / self.block_size;
        let last_bucket = home.saturating_add(span).saturating_sub(1) % self.num_buckets;
        let last = last_bucket / self.block_size;
        let wrapped = home.saturating_add(span) > self.num_buckets;
        let blocks = if wrapped {
            num_blocks.saturating_sub(first).saturating_add(last).saturating_add(1)
        } else {
            last.saturating_sub(first).saturating_add(1)
        };
        blocks.min(num_blocks)
    }
}

/// Formats snapshot file names understood by the downstream plotting tools:
/// `<testcase>/<testcase>-<algo>-<num_buckets>-<load_factor>-<metric>-<instance>-<cycle>.json`
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotName {
    /// Output directory and file name prefix
    pub testcase: String,
    /// Algorithm name from the table metadata
    pub algorithm: String,
    /// Number of buckets of the table
    pub num_buckets: usize,
    /// Target load factor, printed with two decimals
    pub load_factor: f64,
    /// Run instance, printed with five digits
    pub instance: u32,
    /// Cycle, printed with four digits
    pub cycle: u32,
}

impl SnapshotName {
    /// File path of the snapshot for `metric`
    #[must_use]
    pub fn path(&self, metric: Metric) -> PathBuf {
        let file = format!(
            "{testcase}-{algorithm}-{num_buckets}-{load_factor:.2}-{metric}-{instance:05}-{cycle:04}.json",
            testcase = self.testcase,
            algorithm = self.algorithm,
            num_buckets = self.num_buckets,
            load_factor = self.load_factor,
            instance = self.instance,
            cycle = self.cycle,
        );
        Path::new(&self.testcase).join(file)
    }
}

/// Increments the count for `key`
fn bump(histogram: &mut BTreeMap<usize, u64>, key: usize) {
    let count = histogram.entry(key).or_insert(0);
    *count = count.saturating_add(1);
}

/// Weighted mean of a histogram
#[allow(clippy::cast_precision_loss, clippy::arithmetic_side_effects)]
fn mean(histogram: &BTreeMap<usize, u64>) -> f64 {
    let count: u64 = histogram.values().sum();
    if count == 0 {
        return 0.0;
    }
    let total: f64 = histogram.iter().map(|(&len, &n)| len as f64 * n as f64).sum();
    total / count as f64
}

/// Serializes `value` as pretty JSON into a new file at `path`
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let io_error = |source| Error::Io { path: path.to_path_buf(), source };
    let file = File::create(path).map_err(io_error)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush().map_err(io_error)?;
    info!(path = %path.display(), "wrote snapshot");
    Ok(())
}

//! Construction parameters of the tables and their eager validation

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    Algorithm,
    error::{Error, Result},
};

/// Widest neighborhood a bitmap hopscotch bucket can encode
pub const MAX_BITMAP_NEIGHBORHOOD: usize = 64;

/// Widest neighborhood a shadow hopscotch entry can encode its offset within
pub const MAX_SHADOW_NEIGHBORHOOD: usize = 1 << u16::BITS;

/// Sizing and tuning parameters for every algorithm.
///
/// Fields that do not apply to the selected algorithm are ignored. Missing fields take
/// their defaults when the configuration is read from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Which collision resolution strategy to build
    pub algorithm: Algorithm,
    /// Number of buckets, fixed for the lifetime of the table
    pub num_buckets: usize,
    /// Maximum number of buckets scanned for a free slot (hopscotch variants)
    pub size_probing: usize,
    /// Width of the membership bitmap (bitmap hopscotch)
    pub size_neighborhood: usize,
    /// Initial neighborhood size (shadow hopscotch)
    pub size_nh_start: usize,
    /// Largest neighborhood size the table may grow to (shadow hopscotch)
    pub size_nh_end: usize,
    /// Maximum probe sequence length for an insertion (linear probing)
    pub max_probe_length: usize,
    /// Number of consecutive buckets grouped in one density histogram entry
    pub density_block_size: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            num_buckets: 10_000,
            size_probing: 4096,
            size_neighborhood: 32,
            size_nh_start: 32,
            size_nh_end: 32,
            max_probe_length: 5000,
            density_block_size: 1,
        }
    }
}

impl TableConfig {
    /// Creates the default configuration for `algorithm`
    #[must_use]
    pub fn new(algorithm: Algorithm) -> Self {
        Self { algorithm, ..Self::default() }
    }

    /// Sets the number of buckets
    #[must_use]
    pub fn with_num_buckets(mut self, num_buckets: usize) -> Self {
        self.num_buckets = num_buckets;
        self
    }

    /// Sets the hopscotch probing budget
    #[must_use]
    pub fn with_size_probing(mut self, size_probing: usize) -> Self {
        self.size_probing = size_probing;
        self
    }

    /// Sets the bitmap neighborhood width
    #[must_use]
    pub fn with_size_neighborhood(mut self, size_neighborhood: usize) -> Self {
        self.size_neighborhood = size_neighborhood;
        self
    }

    /// Sets the range the shadow neighborhood may grow through
    #[must_use]
    pub fn with_neighborhood_range(mut self, start: usize, end: usize) -> Self {
        self.size_nh_start = start;
        self.size_nh_end = end;
        self
    }

    /// Sets the linear probing insertion bound
    #[must_use]
    pub fn with_max_probe_length(mut self, max_probe_length: usize) -> Self {
        self.max_probe_length = max_probe_length;
        self
    }

    /// Sets the density histogram granularity
    #[must_use]
    pub fn with_density_block_size(mut self, density_block_size: usize) -> Self {
        self.density_block_size = density_block_size;
        self
    }

    /// Reads a configuration from a JSON file and validates it
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, `Json` if it is malformed and
    /// `InvalidConfiguration` if the values are unusable.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|source| Error::Io { path: path.to_path_buf(), source })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the fields used by `self.algorithm`
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` naming the first offending parameter.
    pub fn validate(&self) -> Result<()> {
        self.validate_for(self.algorithm)
    }

    /// Validates the fields used by `algorithm`, whatever `self.algorithm` says
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` naming the first offending parameter.
    pub fn validate_for(&self, algorithm: Algorithm) -> Result<()> {
        positive("num_buckets", self.num_buckets)?;
        positive("density_block_size", self.density_block_size)?;

        match algorithm {
            Algorithm::Linear => positive("max_probe_length", self.max_probe_length),
            Algorithm::RobinHood => Ok(()),
            Algorithm::Bitmap => {
                positive("size_probing", self.size_probing)?;
                positive("size_neighborhood", self.size_neighborhood)?;
                if self.size_neighborhood > MAX_BITMAP_NEIGHBORHOOD {
                    return Err(Error::InvalidConfiguration(format!(
                        "size_neighborhood ({}) exceeds the bitmap width ({MAX_BITMAP_NEIGHBORHOOD})",
                        self.size_neighborhood
                    )));
                }
                fits("size_neighborhood", self.size_neighborhood, self.num_buckets)
            }
            Algorithm::Shadow => {
                positive("size_probing", self.size_probing)?;
                positive("size_nh_start", self.size_nh_start)?;
                positive("size_nh_end", self.size_nh_end)?;
                if self.size_nh_start > self.size_nh_end {
                    return Err(Error::InvalidConfiguration(format!(
                        "size_nh_start ({}) is larger than size_nh_end ({})",
                        self.size_nh_start, self.size_nh_end
                    )));
                }
                if self.size_nh_end > MAX_SHADOW_NEIGHBORHOOD {
                    return Err(Error::InvalidConfiguration(format!(
                        "size_nh_end ({}) exceeds the offset width ({MAX_SHADOW_NEIGHBORHOOD})",
                        self.size_nh_end
                    )));
                }
                fits("size_nh_end", self.size_nh_end, self.num_buckets)
            }
        }
    }
}

/// Rejects zero sizes
fn positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(Error::InvalidConfiguration(format!("{name} must be positive")));
    }
    Ok(())
}

/// Rejects neighborhoods wider than the table
fn fits(name: &str, value: usize, num_buckets: usize) -> Result<()> {
    if value > num_buckets {
        return Err(Error::InvalidConfiguration(format!(
            "{name} ({value}) is larger than num_buckets ({num_buckets})"
        )));
    }
    Ok(())
}

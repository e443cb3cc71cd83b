use crate::error::{IndexError, Result};
use std::path::PathBuf;

/// Postings buffered in memory before a spill.
pub const DEFAULT_SPILL_THRESHOLD: usize = 50_000;

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub index_dir: PathBuf,
    /// Smaller values bound peak memory at the cost of more segments to merge.
    pub spill_threshold: usize,
    /// Delete the id log, buckets, segments and metadata before starting.
    pub reset: bool,
    /// Merge each segment into the buckets as soon as it is spilled.
    pub merge_on_spill: bool,
    /// Bucket merge threads; 0 means one per CPU.
    pub merge_threads: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("./index"),
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            reset: false,
            merge_on_spill: false,
            merge_threads: 0,
        }
    }
}

impl IndexerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.spill_threshold == 0 {
            return Err(IndexError::InvalidConfig("spill threshold must be at least 1".into()));
        }
        Ok(())
    }
}

//! Store counters

use serde::{Deserialize, Serialize};
use std::fmt;

/// Counters kept by a persistence backend
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found an entry
    pub hits: u64,

    /// Lookups that found nothing
    pub misses: u64,

    /// Number of entries currently stored
    pub entries: usize,

    /// Total size of stored entries in bytes
    pub size_bytes: usize,

    /// Entries dropped to respect the capacity bound
    pub evictions: u64,

    /// Entries marked invalidated
    pub invalidations: u64,

    /// Entries removed by clear operations
    pub cleared: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, entries: {}, size: {} bytes, evictions: {}, invalidations: {}, cleared: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.entries,
            self.size_bytes,
            self.evictions,
            self.invalidations,
            self.cleared
        )
    }
}

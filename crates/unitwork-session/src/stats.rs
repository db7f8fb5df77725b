//! Unit-of-work counters.

use crate::queue::FlushOutcome;
use serde::Serialize;

/// Cumulative counters for one unit of work.
///
/// Plain data, cheap to copy, reset together with [`clear`].
///
/// [`clear`]: crate::UnitOfWork::clear
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnitOfWorkStats {
    /// Completed flushes, counting empty ones.
    pub flushes: u64,
    /// Rows inserted across all flushes.
    pub inserted: u64,
    /// Rows updated across all flushes.
    pub updated: u64,
    /// Rows deleted across all flushes.
    pub deleted: u64,
    /// Entities hydrated from rows or cache entries.
    pub loads: u64,
    /// Reads answered from the second-level cache.
    pub cache_hits: u64,
    /// Reads that fell through to the executor.
    pub cache_misses: u64,
    /// Entries pushed to the second-level cache.
    pub cache_puts: u64,
    /// Entities visited by cascade traversals.
    pub cascade_visits: u64,
}

impl UnitOfWorkStats {
    /// Fold one flush outcome into the counters.
    pub fn record_flush(&mut self, outcome: &FlushOutcome) {
        self.flushes += 1;
        self.inserted += outcome.inserted as u64;
        self.updated += outcome.updated as u64;
        self.deleted += outcome.deleted as u64;
    }

    /// Total rows written across all flushes.
    #[must_use]
    pub const fn rows_written(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }
}

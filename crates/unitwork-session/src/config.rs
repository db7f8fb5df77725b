//! Unit-of-work tuning options.

use serde::{Deserialize, Serialize};

/// Configuration for one unit of work.
///
/// Every field has a working default; construct with [`UnitOfWorkConfig::new`]
/// and override selectively:
///
/// ```ignore
/// let config = UnitOfWorkConfig::new()
///     .flush_before_commit(false)
///     .batch_size(500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOfWorkConfig {
    /// Open a transaction on the first statement-producing operation.
    #[serde(default = "default_true")]
    pub auto_begin: bool,
    /// Flush pending changes as part of `commit`.
    #[serde(default = "default_true")]
    pub flush_before_commit: bool,
    /// Upper bound on cascade traversal depth. The visited set terminates
    /// cycles; this guards against runaway graphs.
    #[serde(default = "default_max_cascade_depth")]
    pub max_cascade_depth: usize,
    /// Maximum rows merged into one multi-row statement.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

const fn default_true() -> bool {
    true
}

const fn default_max_cascade_depth() -> usize {
    128
}

const fn default_batch_size() -> usize {
    100
}

impl Default for UnitOfWorkConfig {
    fn default() -> Self {
        Self {
            auto_begin: true,
            flush_before_commit: true,
            max_cascade_depth: default_max_cascade_depth(),
            batch_size: default_batch_size(),
        }
    }
}

impl UnitOfWorkConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether a transaction opens on first use.
    #[must_use]
    pub fn auto_begin(mut self, enabled: bool) -> Self {
        self.auto_begin = enabled;
        self
    }

    /// Set whether `commit` flushes pending changes first.
    #[must_use]
    pub fn flush_before_commit(mut self, enabled: bool) -> Self {
        self.flush_before_commit = enabled;
        self
    }

    /// Set the cascade depth guard.
    #[must_use]
    pub fn max_cascade_depth(mut self, depth: usize) -> Self {
        self.max_cascade_depth = depth;
        self
    }

    /// Set the statement batch size. Zero is treated as one.
    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }
}

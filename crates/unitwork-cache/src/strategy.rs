//! Cache concurrency strategies.

/// How a region handle mediates between writers and concurrent readers.
///
/// Strategies differ in whether writes take strict soft locks (readers miss
/// until the writing transaction resolves) or evict only (readers may
/// briefly observe stale state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessStrategy {
    /// For data that is never updated. Loads and inserts populate the
    /// region; updates are a usage error (logged, entry evicted).
    ReadOnly,

    /// Evict-only writes, no soft locks. A reader between statement
    /// execution and commit may see the old state; it never sees
    /// uncommitted state.
    NonstrictReadWrite,

    /// Soft lock before statement execution; readers miss while locked;
    /// commit promotes the lock to the committed state in a separate
    /// post-commit step.
    #[default]
    ReadWrite,

    /// As read-write, but the committed state is installed in the same
    /// region critical section that releases the lock during commit.
    Transactional,
}

impl AccessStrategy {
    /// Name as used in configuration and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AccessStrategy::ReadOnly => "read-only",
            AccessStrategy::NonstrictReadWrite => "nonstrict-read-write",
            AccessStrategy::ReadWrite => "read-write",
            AccessStrategy::Transactional => "transactional",
        }
    }

    /// Whether writes soft-lock entries (strict) instead of evicting them.
    #[must_use]
    pub const fn uses_soft_locks(&self) -> bool {
        matches!(
            self,
            AccessStrategy::ReadWrite | AccessStrategy::Transactional
        )
    }

    /// Whether the strategy permits updates at all.
    #[must_use]
    pub const fn allows_update(&self) -> bool {
        !matches!(self, AccessStrategy::ReadOnly)
    }

    /// Whether committed state is installed inside the commit step rather
    /// than after it.
    #[must_use]
    pub const fn installs_during_commit(&self) -> bool {
        matches!(self, AccessStrategy::Transactional)
    }
}

impl std::fmt::Display for AccessStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

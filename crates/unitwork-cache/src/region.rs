//! Cache regions and the per-entry state machine.
//!
//! Each entry in a region is in one of three states:
//!
//! - **absent** - not in the map; reads miss
//! - **soft-locked** - a write is in flight; reads miss until resolution
//! - **cached** - committed state available to readers
//!
//! Transitions: a write soft-locks the entry until its transaction resolves;
//! commit success promotes the lock to cached state, commit failure (or
//! rollback) evicts. Concurrent writers stack lock tokens on one entry; when
//! writers contend, the entry is conservatively evicted on final release
//! because commit order between them is unknown here.

use crate::stats::{RegionStats, RegionStatsSnapshot};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use unitwork_core::{EntityKey, EntityState, Result, Row, Value};

/// Disassembled entity state as stored in cache regions.
///
/// Regions never hold live instances; they hold column values plus the
/// version the values were committed at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedState {
    /// (field name, value) pairs in column order.
    pub values: Vec<(String, Value)>,
    /// Version the state was committed at, if the entity is versioned.
    pub version: Option<i64>,
}

impl CachedState {
    /// Disassemble captured entity state.
    #[must_use]
    pub fn from_state(state: &EntityState) -> Self {
        Self {
            values: state
                .values
                .iter()
                .map(|(n, v)| ((*n).to_string(), v.clone()))
                .collect(),
            version: state.version,
        }
    }

    /// Reassemble a result row for hydration.
    #[must_use]
    pub fn to_row(&self) -> Row {
        let names = self.values.iter().map(|(n, _)| n.clone()).collect();
        let values = self.values.iter().map(|(_, v)| v.clone()).collect();
        Row::new(names, values)
    }
}

/// Token held by a writer while its entry is soft-locked.
///
/// Redeemed exactly once, by promotion (commit success) or release
/// (failure/rollback).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftLock {
    /// The locked entry.
    pub key: EntityKey,
    token: u64,
}

impl SoftLock {
    /// The token value, for diagnostics.
    #[must_use]
    pub const fn token(&self) -> u64 {
        self.token
    }
}

/// One entry's state.
#[derive(Debug)]
enum RegionEntry {
    Cached(CachedState),
    SoftLocked {
        tokens: Vec<u64>,
        evict_on_release: bool,
    },
}

/// The region contract implemented by cache providers.
///
/// All methods take `&self`; implementations synchronize internally since
/// regions are shared across units of work. Methods return `Result` so
/// external providers can report failures; callers route them through the
/// bridge, which logs and degrades to a miss.
pub trait CacheRegion: Send + Sync {
    /// Region name, for diagnostics and statistics.
    fn name(&self) -> &str;

    /// Read an entry. Soft-locked and absent entries read as `None`.
    fn get(&self, key: &EntityKey) -> Result<Option<CachedState>>;

    /// Install state observed by a storage read.
    ///
    /// Only installs into absent entries: cached state is never overwritten
    /// (it may be newer) and soft-locked entries deny the put. Returns
    /// whether the state was installed.
    fn put_from_load(&self, key: EntityKey, state: CachedState) -> Result<bool>;

    /// Soft-lock an entry ahead of a write.
    fn lock(&self, key: EntityKey) -> Result<SoftLock>;

    /// Redeem a lock after commit success, installing the committed state.
    ///
    /// Returns whether the state became readable. With concurrent writers
    /// outstanding the entry stays locked and is evicted on final release.
    fn promote(&self, lock: &SoftLock, state: CachedState) -> Result<bool>;

    /// Redeem a lock after commit failure or rollback, evicting the entry.
    fn release(&self, lock: &SoftLock) -> Result<()>;

    /// Remove an entry unconditionally.
    fn evict(&self, key: &EntityKey) -> Result<()>;

    /// Remove every entry.
    fn evict_all(&self) -> Result<()>;

    /// Point-in-time statistics.
    fn stats(&self) -> RegionStatsSnapshot;

    /// Number of entries currently present (cached or locked).
    fn len(&self) -> usize;

    /// Whether the region holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process region over a reader-writer locked map.
#[derive(Debug)]
pub struct MemoryRegion {
    name: String,
    entries: RwLock<HashMap<EntityKey, RegionEntry>>,
    next_token: AtomicU64,
    stats: RegionStats,
}

impl MemoryRegion {
    /// Create an empty region.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            stats: RegionStats::new(),
        }
    }

    fn fresh_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }
}

impl CacheRegion for MemoryRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &EntityKey) -> Result<Option<CachedState>> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(RegionEntry::Cached(state)) => {
                self.stats.record_hit();
                Ok(Some(state.clone()))
            }
            Some(RegionEntry::SoftLocked { .. }) => {
                self.stats.record_lock_denial();
                self.stats.record_miss();
                Ok(None)
            }
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    fn put_from_load(&self, key: EntityKey, state: CachedState) -> Result<bool> {
        let mut entries = self.entries.write();
        match entries.get(&key) {
            Some(_) => Ok(false),
            None => {
                entries.insert(key, RegionEntry::Cached(state));
                self.stats.record_put();
                Ok(true)
            }
        }
    }

    fn lock(&self, key: EntityKey) -> Result<SoftLock> {
        let token = self.fresh_token();
        let mut entries = self.entries.write();
        match entries.get_mut(&key) {
            Some(RegionEntry::SoftLocked { tokens, .. }) => {
                tokens.push(token);
            }
            _ => {
                entries.insert(
                    key,
                    RegionEntry::SoftLocked {
                        tokens: vec![token],
                        evict_on_release: false,
                    },
                );
            }
        }
        Ok(SoftLock { key, token })
    }

    fn promote(&self, lock: &SoftLock, state: CachedState) -> Result<bool> {
        let mut entries = self.entries.write();
        let Some(RegionEntry::SoftLocked {
            tokens,
            evict_on_release,
        }) = entries.get_mut(&lock.key)
        else {
            return Ok(false);
        };
        let Some(pos) = tokens.iter().position(|t| *t == lock.token) else {
            return Ok(false);
        };
        tokens.remove(pos);

        if tokens.is_empty() {
            if *evict_on_release {
                entries.remove(&lock.key);
                self.stats.record_eviction();
                Ok(false)
            } else {
                entries.insert(lock.key, RegionEntry::Cached(state));
                self.stats.record_put();
                Ok(true)
            }
        } else {
            // Another writer is still in flight; neither state can be
            // trusted as latest, so the entry dies on final release.
            *evict_on_release = true;
            Ok(false)
        }
    }

    fn release(&self, lock: &SoftLock) -> Result<()> {
        let mut entries = self.entries.write();
        let Some(RegionEntry::SoftLocked {
            tokens,
            evict_on_release,
        }) = entries.get_mut(&lock.key)
        else {
            return Ok(());
        };
        if let Some(pos) = tokens.iter().position(|t| *t == lock.token) {
            tokens.remove(pos);
        }
        if tokens.is_empty() {
            entries.remove(&lock.key);
            self.stats.record_eviction();
        } else {
            *evict_on_release = true;
        }
        Ok(())
    }

    fn evict(&self, key: &EntityKey) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.remove(key).is_some() {
            self.stats.record_eviction();
        }
        Ok(())
    }

    fn evict_all(&self) -> Result<()> {
        let mut entries = self.entries.write();
        let removed = entries.len();
        entries.clear();
        for _ in 0..removed {
            self.stats.record_eviction();
        }
        Ok(())
    }

    fn stats(&self) -> RegionStatsSnapshot {
        self.stats.snapshot()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unitwork_core::{ColumnInfo, Entity, Row as CoreRow};

    struct Widget {
        id: i64,
    }

    impl Entity for Widget {
        const TABLE: &'static str = "widgets";
        const KEY: &'static [&'static str] = &["id"];

        fn columns() -> &'static [ColumnInfo] {
            static COLUMNS: [ColumnInfo; 1] = [ColumnInfo::new("id").primary_key()];
            &COLUMNS
        }

        fn state(&self) -> Vec<(&'static str, Value)> {
            vec![("id", Value::BigInt(self.id))]
        }

        fn key_values(&self) -> Vec<Value> {
            vec![Value::BigInt(self.id)]
        }

        fn is_transient(&self) -> bool {
            false
        }

        fn from_row(row: &CoreRow) -> Result<Self> {
            Ok(Self {
                id: row.get_named("id")?,
            })
        }
    }

    fn key(id: i64) -> EntityKey {
        EntityKey::of::<Widget>(&[Value::BigInt(id)])
    }

    fn state(id: i64, version: i64) -> CachedState {
        CachedState {
            values: vec![("id".to_string(), Value::BigInt(id))],
            version: Some(version),
        }
    }

    #[test]
    fn test_read_miss_is_absent() {
        let region = MemoryRegion::new("widgets");
        assert_eq!(region.get(&key(1)).unwrap(), None);
        assert_eq!(region.stats().misses, 1);
    }

    #[test]
    fn test_put_from_load_then_hit() {
        let region = MemoryRegion::new("widgets");
        assert!(region.put_from_load(key(1), state(1, 1)).unwrap());
        assert_eq!(region.get(&key(1)).unwrap(), Some(state(1, 1)));
        assert_eq!(region.stats().hits, 1);
    }

    #[test]
    fn test_put_from_load_never_overwrites() {
        let region = MemoryRegion::new("widgets");
        region.put_from_load(key(1), state(1, 2)).unwrap();
        assert!(!region.put_from_load(key(1), state(1, 1)).unwrap());
        assert_eq!(region.get(&key(1)).unwrap(), Some(state(1, 2)));
    }

    #[test]
    fn test_soft_lock_denies_readers_until_promoted() {
        let region = MemoryRegion::new("widgets");
        region.put_from_load(key(1), state(1, 1)).unwrap();

        let lock = region.lock(key(1)).unwrap();
        assert_eq!(region.get(&key(1)).unwrap(), None);
        assert_eq!(region.stats().lock_denials, 1);

        assert!(region.promote(&lock, state(1, 2)).unwrap());
        assert_eq!(region.get(&key(1)).unwrap(), Some(state(1, 2)));
    }

    #[test]
    fn test_release_evicts() {
        let region = MemoryRegion::new("widgets");
        region.put_from_load(key(1), state(1, 1)).unwrap();
        let lock = region.lock(key(1)).unwrap();
        region.release(&lock).unwrap();
        assert_eq!(region.get(&key(1)).unwrap(), None);
        assert_eq!(region.len(), 0);
    }

    #[test]
    fn test_contending_writers_evict_on_final_release() {
        let region = MemoryRegion::new("widgets");
        let first = region.lock(key(1)).unwrap();
        let second = region.lock(key(1)).unwrap();

        // First committer promotes while the second is still in flight.
        assert!(!region.promote(&first, state(1, 2)).unwrap());
        assert_eq!(region.get(&key(1)).unwrap(), None);

        // Second committer promotes last; contention already poisoned the
        // entry, so it evicts instead of installing.
        assert!(!region.promote(&second, state(1, 3)).unwrap());
        assert_eq!(region.get(&key(1)).unwrap(), None);
        assert_eq!(region.len(), 0);
    }

    #[test]
    fn test_promote_with_foreign_token_is_noop() {
        let region = MemoryRegion::new("widgets");
        let lock = region.lock(key(1)).unwrap();
        region.release(&lock).unwrap();

        // Entry is gone; redeeming the stale lock does nothing.
        assert!(!region.promote(&lock, state(1, 9)).unwrap());
        assert_eq!(region.len(), 0);
    }

    #[test]
    fn test_put_from_load_denied_while_locked() {
        let region = MemoryRegion::new("widgets");
        let _lock = region.lock(key(1)).unwrap();
        assert!(!region.put_from_load(key(1), state(1, 1)).unwrap());
    }

    #[test]
    fn test_evict_all() {
        let region = MemoryRegion::new("widgets");
        region.put_from_load(key(1), state(1, 1)).unwrap();
        region.put_from_load(key(2), state(2, 1)).unwrap();
        region.evict_all().unwrap();
        assert!(region.is_empty());
        assert_eq!(region.stats().evictions, 2);
    }

    #[test]
    fn test_cached_state_row_round_trip() {
        let widget = Widget { id: 4 };
        let cached = CachedState::from_state(&EntityState::capture(&widget));
        let row = cached.to_row();
        let back = Widget::from_row(&row).unwrap();
        assert_eq!(back.id, 4);
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        use std::sync::Arc;

        let region = Arc::new(MemoryRegion::new("widgets"));
        region.put_from_load(key(1), state(1, 1)).unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let r = Arc::clone(&region);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    // Readers observe either the old state, the new state,
                    // or a miss; never a torn entry.
                    if let Some(s) = r.get(&key(1)).unwrap() {
                        assert!(matches!(s.version, Some(1 | 2)));
                    }
                }
            }));
        }

        let writer = {
            let r = Arc::clone(&region);
            std::thread::spawn(move || {
                let lock = r.lock(key(1)).unwrap();
                assert!(r.promote(&lock, state(1, 2)).unwrap());
            })
        };

        writer.join().unwrap();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(region.get(&key(1)).unwrap(), Some(state(1, 2)));
    }
}

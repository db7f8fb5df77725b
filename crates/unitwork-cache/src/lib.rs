//! Second-level cache for the unitwork persistence engine.
//!
//! The second-level cache is shared process-wide across units of work, in
//! contrast to the per-unit-of-work identity map. It is organized into
//! named regions (conventionally one per entity table), each holding
//! disassembled entity state keyed by identity:
//!
//! - [`SecondLevelCache`] - owns regions, hands out [`RegionHandle`]s
//! - [`RegionHandle`] - strategy-aware bridge the unit of work talks to;
//!   swallows region failures, logging them and degrading to a miss
//! - [`CacheRegion`] / [`MemoryRegion`] - the provider contract and the
//!   in-process default implementation
//! - [`AccessStrategy`] - read-only, nonstrict-read-write, read-write,
//!   transactional
//!
//! There is no ambient cache: a unit of work only sees the regions whose
//! handles were explicitly registered with it.
//!
//! # Example
//!
//! ```ignore
//! let cache = SecondLevelCache::new();
//! let authors = cache.region("authors", AccessStrategy::ReadWrite);
//!
//! let mut uow = UnitOfWork::new(executor);
//! uow.cache_region::<Author>(authors);
//! ```

pub mod region;
pub mod stats;
pub mod strategy;

pub use region::{CacheRegion, CachedState, MemoryRegion, SoftLock};
pub use stats::{RegionStats, RegionStatsSnapshot};
pub use strategy::AccessStrategy;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use unitwork_core::EntityKey;

/// Configuration for a [`SecondLevelCache`].
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Master switch; a disabled cache hands out inert handles.
    pub enabled: bool,
    /// Strategy used by [`SecondLevelCache::region_with_default`].
    pub default_strategy: AccessStrategy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_strategy: AccessStrategy::ReadWrite,
        }
    }
}

impl CacheConfig {
    /// Default configuration (enabled, read-write default strategy).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable the cache; handles become inert.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Set the default strategy.
    #[must_use]
    pub fn default_strategy(mut self, strategy: AccessStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }
}

/// Process-wide cache provider owning named regions.
///
/// Share a `SecondLevelCache` by wrapping it in `Arc` at the application
/// level; the handles it produces are independently cloneable and
/// thread-safe.
#[derive(Default)]
pub struct SecondLevelCache {
    regions: RwLock<HashMap<String, Arc<dyn CacheRegion>>>,
    config: CacheConfig,
}

impl SecondLevelCache {
    /// Create a cache with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache with the given configuration.
    #[must_use]
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            regions: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get or create the named region and return a handle with the given
    /// strategy.
    ///
    /// The region is storage; the strategy belongs to the handle, so two
    /// handles over one region may use different strategies (though one
    /// strategy per region is the sane configuration).
    pub fn region(&self, name: &str, strategy: AccessStrategy) -> RegionHandle {
        if !self.config.enabled {
            return RegionHandle::inert();
        }
        let region = {
            let regions = self.regions.read();
            regions.get(name).map(Arc::clone)
        };
        let region = match region {
            Some(r) => r,
            None => {
                let mut regions = self.regions.write();
                Arc::clone(
                    regions
                        .entry(name.to_string())
                        .or_insert_with(|| Arc::new(MemoryRegion::new(name.to_string()))),
                )
            }
        };
        RegionHandle::new(region, strategy)
    }

    /// Get or create the named region with the configured default strategy.
    pub fn region_with_default(&self, name: &str) -> RegionHandle {
        self.region(name, self.config.default_strategy)
    }

    /// Register an externally provided region implementation.
    pub fn register_region(
        &self,
        region: Arc<dyn CacheRegion>,
        strategy: AccessStrategy,
    ) -> RegionHandle {
        if !self.config.enabled {
            return RegionHandle::inert();
        }
        let mut regions = self.regions.write();
        regions.insert(region.name().to_string(), Arc::clone(&region));
        RegionHandle::new(region, strategy)
    }

    /// Names of all live regions.
    #[must_use]
    pub fn region_names(&self) -> Vec<String> {
        self.regions.read().keys().cloned().collect()
    }

    /// Evict every entry in every region.
    pub fn evict_all(&self) {
        let regions = self.regions.read();
        for region in regions.values() {
            if let Err(e) = region.evict_all() {
                tracing::warn!(region = region.name(), error = %e, "evict_all failed");
            }
        }
    }
}

impl std::fmt::Debug for SecondLevelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondLevelCache")
            .field("regions", &self.region_names())
            .field("config", &self.config)
            .finish()
    }
}

/// Strategy-aware handle to one region, as seen by a unit of work.
///
/// Every method swallows region failures: a failing get reads as a miss, a
/// failing put/lock/evict is logged at `warn` and the unit of work proceeds
/// uncached. Cache trouble must never fail a flush.
#[derive(Clone)]
pub struct RegionHandle {
    region: Option<Arc<dyn CacheRegion>>,
    strategy: AccessStrategy,
}

impl RegionHandle {
    /// Wrap a region with a strategy.
    #[must_use]
    pub fn new(region: Arc<dyn CacheRegion>, strategy: AccessStrategy) -> Self {
        Self {
            region: Some(region),
            strategy,
        }
    }

    /// A handle that caches nothing (disabled cache).
    #[must_use]
    pub fn inert() -> Self {
        Self {
            region: None,
            strategy: AccessStrategy::default(),
        }
    }

    /// The handle's strategy.
    #[must_use]
    pub const fn strategy(&self) -> AccessStrategy {
        self.strategy
    }

    /// Whether this handle reaches a live region.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.region.is_some()
    }

    /// Region name, for diagnostics.
    #[must_use]
    pub fn region_name(&self) -> &str {
        self.region.as_deref().map_or("<inert>", CacheRegion::name)
    }

    /// Read an entry; failures read as a miss.
    pub fn get(&self, key: &EntityKey) -> Option<CachedState> {
        let region = self.region.as_deref()?;
        match region.get(key) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(region = region.name(), error = %e, "cache get failed; treating as miss");
                None
            }
        }
    }

    /// Install state observed by a storage read.
    pub fn put_from_load(&self, key: EntityKey, state: CachedState) -> bool {
        let Some(region) = self.region.as_deref() else {
            return false;
        };
        match region.put_from_load(key, state) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(region = region.name(), error = %e, "cache put failed; treating as miss");
                false
            }
        }
    }

    /// Prepare an update: soft-lock (strict strategies) or evict
    /// (nonstrict). Read-only regions log a usage error and evict.
    pub fn before_update(&self, key: EntityKey) -> Option<SoftLock> {
        let region = self.region.as_deref()?;
        match self.strategy {
            AccessStrategy::ReadOnly => {
                tracing::warn!(
                    region = region.name(),
                    "update against read-only cache region; evicting entry"
                );
                self.evict(&key);
                None
            }
            AccessStrategy::NonstrictReadWrite => {
                self.evict(&key);
                None
            }
            AccessStrategy::ReadWrite | AccessStrategy::Transactional => {
                match region.lock(key) {
                    Ok(lock) => Some(lock),
                    Err(e) => {
                        tracing::warn!(region = region.name(), error = %e, "cache lock failed; proceeding uncached");
                        self.evict(&key);
                        None
                    }
                }
            }
        }
    }

    /// Prepare a delete. Same locking rules as updates, except read-only
    /// regions evict without the usage warning (removal is legal).
    pub fn before_remove(&self, key: EntityKey) -> Option<SoftLock> {
        let region = self.region.as_deref()?;
        match self.strategy {
            AccessStrategy::ReadOnly | AccessStrategy::NonstrictReadWrite => {
                self.evict(&key);
                None
            }
            AccessStrategy::ReadWrite | AccessStrategy::Transactional => {
                match region.lock(key) {
                    Ok(lock) => Some(lock),
                    Err(e) => {
                        tracing::warn!(region = region.name(), error = %e, "cache lock failed; proceeding uncached");
                        self.evict(&key);
                        None
                    }
                }
            }
        }
    }

    /// Record a committed insert.
    pub fn after_insert(&self, key: EntityKey, state: CachedState) {
        match self.strategy {
            // Nonstrict regions fill lazily from loads.
            AccessStrategy::NonstrictReadWrite => {}
            AccessStrategy::ReadOnly
            | AccessStrategy::ReadWrite
            | AccessStrategy::Transactional => {
                let _ = self.put_from_load(key, state);
            }
        }
    }

    /// Record a committed update, redeeming the pre-statement lock.
    pub fn after_update(&self, key: EntityKey, state: CachedState, lock: Option<SoftLock>) {
        let Some(region) = self.region.as_deref() else {
            return;
        };
        match (self.strategy, lock) {
            (AccessStrategy::ReadWrite | AccessStrategy::Transactional, Some(lock)) => {
                if let Err(e) = region.promote(&lock, state) {
                    tracing::warn!(region = region.name(), error = %e, "cache promote failed; evicting");
                    self.evict(&key);
                }
            }
            (AccessStrategy::NonstrictReadWrite, _) => self.evict(&key),
            // Read-only already evicted and warned in before_update; a
            // strict strategy without a lock means the lock attempt failed.
            _ => self.evict(&key),
        }
    }

    /// Record a committed delete, redeeming the pre-statement lock.
    pub fn after_remove(&self, key: EntityKey, lock: Option<SoftLock>) {
        let Some(region) = self.region.as_deref() else {
            return;
        };
        if let Some(lock) = lock {
            if let Err(e) = region.release(&lock) {
                tracing::warn!(region = region.name(), error = %e, "cache release failed; evicting");
            }
        }
        self.evict(&key);
    }

    /// Undo cache effects after a failed flush/commit or a rollback.
    pub fn on_failure(&self, key: EntityKey, lock: Option<SoftLock>) {
        let Some(region) = self.region.as_deref() else {
            return;
        };
        if let Some(lock) = lock {
            if let Err(e) = region.release(&lock) {
                tracing::warn!(region = region.name(), error = %e, "cache release failed; evicting");
                self.evict(&key);
            }
        } else {
            self.evict(&key);
        }
    }

    /// Remove an entry unconditionally; failures are logged.
    pub fn evict(&self, key: &EntityKey) {
        let Some(region) = self.region.as_deref() else {
            return;
        };
        if let Err(e) = region.evict(key) {
            tracing::warn!(region = region.name(), error = %e, "cache evict failed");
        }
    }

    /// Point-in-time statistics, if the handle is active.
    #[must_use]
    pub fn stats(&self) -> Option<RegionStatsSnapshot> {
        self.region.as_deref().map(CacheRegion::stats)
    }
}

impl std::fmt::Debug for RegionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionHandle")
            .field("region", &self.region_name())
            .field("strategy", &self.strategy)
            .finish()
    }
}

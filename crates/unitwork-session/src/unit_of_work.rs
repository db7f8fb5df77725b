//! The unit of work itself.
//!
//! [`UnitOfWork`] owns a statement executor and coordinates everything the
//! session layer provides:
//!
//! - an [`IdentityMap`] guaranteeing one live instance per row,
//! - a [`ChangeTracker`] diffing instances against their load-time state,
//! - a [`CascadeResolver`] walking association edges per operation,
//! - an [`ActionQueue`] ordering and batching the SQL a flush emits,
//! - optional second-level cache regions consulted on load and kept
//!   consistent across flush, commit, and rollback.
//!
//! Writes are invisible until [`flush`](UnitOfWork::flush) runs; `flush`
//! computes the difference between every managed instance and its snapshot
//! and executes the result in dependency order. [`commit`](UnitOfWork::commit)
//! flushes, commits the transaction, and only then publishes cache entries,
//! so other sessions never observe uncommitted state.
//!
//! ```ignore
//! let mut uow = UnitOfWork::new(executor);
//! let author = new_entity_ref(Author::new(1, "Ada"));
//! uow.persist(&author)?;
//! uow.commit()?;
//! ```
//!
//! A failed flush poisons the unit of work: every operation except
//! [`rollback`](UnitOfWork::rollback) and [`clear`](UnitOfWork::clear)
//! reports [`SessionErrorKind::Failed`] until one of those runs.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};

use unitwork_cache::{CachedState, RegionHandle, SoftLock};
use unitwork_core::{
    CascadeOp, ColumnInfo, Entity, EntityHandle, EntityKey, EntityRef, EntityState, Error,
    FlushError, FlushErrorKind, IdentityError, IdentityErrorKind, Result, SessionErrorKind,
    StaleError, StatementExecutor, Value, display_key, find_column, version_column,
};

use crate::action::{
    Action, VersionPredicate, render_lock_row, render_select_by_key,
};
use crate::cascade::CascadeResolver;
use crate::change_tracker::ChangeTracker;
use crate::config::UnitOfWorkConfig;
use crate::events::EventRegistry;
use crate::identity_map::{EntityEntry, EntityStatus, IdentityMap, LockMode};
use crate::queue::{ActionQueue, FlushOutcome, PendingCounts};
use crate::stats::UnitOfWorkStats;

// ==== lifecycle state ====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UowState {
    Active,
    Failed,
}

/// What a flush did to one row, remembered until the transaction ends so
/// the cache can be told after commit (or released after failure).
enum TouchedKind {
    Inserted(EntityState),
    Updated(EntityState),
    Removed,
}

struct TouchedEntry {
    key: EntityKey,
    type_id: TypeId,
    kind: TouchedKind,
    lock: Option<SoftLock>,
}

// ==== flush planning ====

struct PlannedWrite {
    key: EntityKey,
    type_id: TypeId,
    /// State as it will exist in storage after the flush succeeds.
    state: EntityState,
    /// Version to write back onto the instance on success.
    version_write: Option<i64>,
}

struct VersionCheck {
    handle: EntityHandle,
    key_values: Vec<Value>,
    expected: i64,
}

#[derive(Default)]
struct FlushPlan {
    inserts: Vec<PlannedWrite>,
    updates: Vec<PlannedWrite>,
    removes: Vec<(EntityKey, TypeId)>,
    orphans: Vec<(EntityKey, TypeId)>,
    /// Persist-then-remove before any flush: the row never existed, so the
    /// insert and delete cancel and only the bookkeeping remains.
    cancelled: Vec<(EntityKey, TypeId)>,
    verifies: Vec<VersionCheck>,
    /// Collection baselines to refresh after a successful flush.
    rescans: Vec<(EntityKey, EntityHandle)>,
    /// Keys already scheduled for deletion, so overlapping paths (explicit
    /// removal plus orphan removal) emit one DELETE.
    deleted_keys: HashSet<EntityKey>,
    /// Orphaned keys must not also receive scalar updates.
    orphan_keys: HashSet<EntityKey>,
}

// ==== the unit of work ====

/// A unit of work over a statement executor.
///
/// See the [module docs](self) for the lifecycle. All operations require
/// `&mut self`; wrap the unit of work in your own synchronization if it
/// must be shared.
pub struct UnitOfWork<X: StatementExecutor> {
    executor: X,
    identity_map: IdentityMap,
    tracker: ChangeTracker,
    queue: ActionQueue,
    regions: HashMap<TypeId, RegionHandle>,
    events: EventRegistry,
    config: UnitOfWorkConfig,
    stats: UnitOfWorkStats,
    state: UowState,
    tx_active: bool,
    touched: Vec<TouchedEntry>,
}

impl<X: StatementExecutor> UnitOfWork<X> {
    /// Create a unit of work with default configuration.
    pub fn new(executor: X) -> Self {
        Self::with_config(executor, UnitOfWorkConfig::default())
    }

    /// Create a unit of work with an explicit configuration.
    pub fn with_config(executor: X, config: UnitOfWorkConfig) -> Self {
        Self {
            executor,
            identity_map: IdentityMap::new(),
            tracker: ChangeTracker::new(),
            queue: ActionQueue::new(),
            regions: HashMap::new(),
            events: EventRegistry::new(),
            config,
            stats: UnitOfWorkStats::default(),
            state: UowState::Active,
            tx_active: false,
            touched: Vec::new(),
        }
    }

    // ==== accessors ====

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &UnitOfWorkConfig {
        &self.config
    }

    /// Counters accumulated since construction.
    #[must_use]
    pub const fn stats(&self) -> UnitOfWorkStats {
        self.stats
    }

    /// The underlying executor.
    #[must_use]
    pub const fn executor(&self) -> &X {
        &self.executor
    }

    /// Mutable access to the underlying executor.
    pub const fn executor_mut(&mut self) -> &mut X {
        &mut self.executor
    }

    /// Number of managed instances, including those scheduled for removal.
    #[must_use]
    pub fn managed_count(&self) -> usize {
        self.identity_map.len()
    }

    /// Whether nothing is managed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identity_map.is_empty()
    }

    /// Whether a failed flush or commit has poisoned this unit of work.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self.state, UowState::Failed)
    }

    /// Whether a transaction is currently open on the executor.
    #[must_use]
    pub const fn in_transaction(&self) -> bool {
        self.tx_active
    }

    /// Actions the next flush would have to order, by kind.
    ///
    /// The queue is only populated during a flush, so this reports leftovers
    /// after a failure, not a preview.
    #[must_use]
    pub fn pending(&self) -> PendingCounts {
        self.queue.pending()
    }

    /// Register lifecycle callbacks.
    pub fn events_mut(&mut self) -> &mut EventRegistry {
        &mut self.events
    }

    /// Route `T` through a second-level cache region.
    ///
    /// Loads consult the region before the database and successful commits
    /// publish into it. Replaces any previous region for `T`.
    pub fn cache_region<T: Entity>(&mut self, region: RegionHandle) {
        self.regions.insert(TypeId::of::<T>(), region);
    }

    /// The cache region registered for `T`, if any.
    #[must_use]
    pub fn region_for<T: Entity>(&self) -> Option<&RegionHandle> {
        self.regions.get(&TypeId::of::<T>())
    }

    // ==== transaction control ====

    /// Open a transaction now. Idempotent; with `auto_begin` enabled the
    /// first statement of a flush or load does this implicitly.
    pub fn begin(&mut self) -> Result<()> {
        self.guard_usable()?;
        if !self.tx_active {
            self.executor.begin()?;
            self.tx_active = true;
        }
        Ok(())
    }

    /// Flush pending changes, commit the transaction, and publish cache
    /// entries for every row this transaction wrote.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit(&mut self) -> Result<()> {
        self.guard_usable()?;
        self.events.emit_before_commit()?;
        if self.config.flush_before_commit {
            self.flush()?;
        }
        if self.tx_active {
            if let Err(e) = self.executor.commit() {
                self.state = UowState::Failed;
                self.release_touched(0);
                tracing::warn!(error = %e, "commit failed; unit of work poisoned");
                return Err(e);
            }
            self.tx_active = false;
        }
        // The database write is durable; now it is safe to publish.
        for touched in self.touched.drain(..) {
            if let Some(region) = self.regions.get(&touched.type_id) {
                match touched.kind {
                    TouchedKind::Inserted(state) => {
                        region.after_insert(touched.key, CachedState::from_state(&state));
                    }
                    TouchedKind::Updated(state) => {
                        region.after_update(
                            touched.key,
                            CachedState::from_state(&state),
                            touched.lock,
                        );
                    }
                    TouchedKind::Removed => region.after_remove(touched.key, touched.lock),
                }
            }
        }
        self.events.emit_after_commit();
        tracing::debug!("transaction committed");
        Ok(())
    }

    /// Roll back the transaction and discard all managed state.
    ///
    /// Always usable, including on a poisoned unit of work; afterwards the
    /// unit of work is active and empty again.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rollback(&mut self) -> Result<()> {
        let result = if self.tx_active {
            self.executor.rollback()
        } else {
            Ok(())
        };
        self.tx_active = false;
        self.release_touched(0);
        self.identity_map.clear();
        self.tracker.clear();
        self.queue.clear();
        self.state = UowState::Active;
        self.events.emit_after_rollback();
        tracing::debug!("transaction rolled back");
        result
    }

    /// Detach every managed instance and reset a poisoned unit of work.
    ///
    /// The transaction, if open, is left untouched.
    pub fn clear(&mut self) {
        self.release_touched(0);
        self.identity_map.clear();
        self.tracker.clear();
        self.queue.clear();
        self.state = UowState::Active;
        tracing::debug!("unit of work cleared");
    }

    // ==== entity operations ====

    /// Manage a transient instance so the next flush inserts it.
    ///
    /// Cascades over `Persist` edges, adopting transient children. Persisting
    /// an instance that is already managed is a no-op; persisting one marked
    /// for removal cancels the removal. A detached instance (one that already
    /// exists in storage but is not managed here) is rejected; use
    /// [`merge`](Self::merge) for those.
    #[tracing::instrument(level = "debug", skip(self, instance), fields(table = T::TABLE))]
    pub fn persist<T: Entity>(&mut self, instance: &EntityRef<T>) -> Result<()> {
        self.guard_usable()?;
        let handle = EntityHandle::of(instance);
        let state = handle.state()?;
        let key = handle.key_for(&state)?;

        if let Some(entry) = self.identity_map.get_mut(&key) {
            if entry.handle().same_instance(&handle) {
                if entry.is_removed() {
                    entry.resurrect();
                }
                return Ok(());
            }
            return Err(IdentityError::new(
                IdentityErrorKind::DuplicateKey,
                handle.type_name(),
                format!(
                    "another instance is already managed for key {}",
                    display_key(&state.key_values)
                ),
            )
            .into());
        }

        if !state.transient {
            return Err(IdentityError::new(
                IdentityErrorKind::Detached,
                handle.type_name(),
                "instance already exists in storage; merge() re-attaches detached state",
            )
            .into());
        }

        self.adopt_transient(key, &handle)?;

        let resolver = CascadeResolver::new(self.config.max_cascade_depth);
        let visits = resolver.resolve(CascadeOp::Persist, &handle)?;
        self.stats.cascade_visits += visits.len() as u64;
        for visit in visits {
            if self.identity_map.contains(&visit.key) {
                continue;
            }
            if !visit.state.transient {
                return Err(detached_in_graph(&visit.handle));
            }
            self.adopt_transient(visit.key, &visit.handle)?;
        }
        Ok(())
    }

    /// Load by primary key: identity map first, then the second-level
    /// cache, then a `SELECT`.
    ///
    /// Returns the already-managed instance when one exists, so repeated
    /// loads are referentially equal. An instance scheduled for removal
    /// reads as absent.
    #[tracing::instrument(level = "debug", skip(self, key_values), fields(table = T::TABLE))]
    pub fn get<T: Entity>(&mut self, key_values: &[Value]) -> Result<Option<EntityRef<T>>> {
        self.guard_usable()?;
        let key = EntityKey::of::<T>(key_values);
        if let Some(entry) = self.identity_map.get(&key) {
            if entry.is_removed() {
                return Ok(None);
            }
            return Ok(entry.handle().resolve::<T>());
        }

        let region = self.regions.get(&TypeId::of::<T>()).cloned();
        if let Some(region) = &region {
            if let Some(cached) = region.get(&key) {
                self.stats.cache_hits += 1;
                let instance = unitwork_core::new_entity_ref(T::from_row(&cached.to_row())?);
                return self.adopt_loaded(key, instance).map(Some);
            }
            self.stats.cache_misses += 1;
        }

        let sql = select_sql::<T>();
        self.ensure_transaction()?;
        let rows = self.executor.query(&sql, key_values)?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let instance = unitwork_core::new_entity_ref(T::from_row(row)?);
        let adopted = self.adopt_loaded(key, instance)?;

        if let Some(region) = &region {
            let state = EntityHandle::of(&adopted).state()?;
            if region.put_from_load(key, CachedState::from_state(&state)) {
                self.stats.cache_puts += 1;
            }
        }
        Ok(Some(adopted))
    }

    /// Re-attach a detached instance, reconciling it against storage.
    ///
    /// When another instance is already managed for the same key, the
    /// detached values are copied onto it and the managed instance is
    /// returned. Otherwise the detached instance is adopted: its baseline is
    /// read from storage so the next flush writes exactly the offline
    /// changes, or, if the row is gone, the instance becomes a pending
    /// insert. Cascades over `Merge` edges.
    #[tracing::instrument(level = "debug", skip(self, instance), fields(table = T::TABLE))]
    pub fn merge<T: Entity>(&mut self, instance: &EntityRef<T>) -> Result<EntityRef<T>> {
        self.guard_usable()?;
        let handle = EntityHandle::of(instance);
        let key = handle.key()?;

        let resolver = CascadeResolver::new(self.config.max_cascade_depth);
        let visits = resolver.resolve(CascadeOp::Merge, &handle)?;
        self.stats.cascade_visits += visits.len() as u64;
        for visit in visits {
            self.merge_one(visit.key, &visit.handle, &visit.state)?;
        }

        self.identity_map
            .resolve::<T>(&key)
            .ok_or_else(|| Error::custom("merge left no managed instance for the key"))
    }

    /// Schedule a managed instance for deletion at the next flush.
    ///
    /// Cascades over `Remove` edges, scheduling managed children too.
    #[tracing::instrument(level = "debug", skip(self, instance), fields(table = T::TABLE))]
    pub fn remove<T: Entity>(&mut self, instance: &EntityRef<T>) -> Result<()> {
        self.guard_usable()?;
        let handle = EntityHandle::of(instance);
        let key = handle.key()?;
        let Some(entry) = self.identity_map.get(&key) else {
            return Err(Error::session(
                SessionErrorKind::NotManaged,
                format!("cannot remove unmanaged {} instance", handle.type_name()),
            ));
        };
        if !entry.handle().same_instance(&handle) {
            return Err(IdentityError::new(
                IdentityErrorKind::DuplicateKey,
                handle.type_name(),
                "a different instance is managed for this key",
            )
            .into());
        }
        if entry.is_removed() {
            return Ok(());
        }

        let resolver = CascadeResolver::new(self.config.max_cascade_depth);
        let visits = resolver.resolve(CascadeOp::Remove, &handle)?;
        self.stats.cascade_visits += visits.len() as u64;
        for visit in visits {
            if let Some(entry) = self.identity_map.get_mut(&visit.key) {
                entry.mark_removed();
            } else {
                tracing::trace!(
                    table = visit.handle.table(),
                    "remove cascade reached an unmanaged instance; skipping"
                );
            }
        }
        Ok(())
    }

    /// Overwrite a managed instance with its current row, discarding any
    /// unflushed in-memory changes. Cascades over `Refresh` edges.
    ///
    /// If the row no longer exists the instance is detached and the call
    /// reports it stale.
    #[tracing::instrument(level = "debug", skip(self, instance), fields(table = T::TABLE))]
    pub fn refresh<T: Entity>(&mut self, instance: &EntityRef<T>) -> Result<()> {
        self.guard_usable()?;
        let handle = EntityHandle::of(instance);
        let key = handle.key()?;
        if !self.identity_map.contains(&key) {
            return Err(Error::session(
                SessionErrorKind::NotManaged,
                format!("cannot refresh unmanaged {} instance", handle.type_name()),
            ));
        }

        let resolver = CascadeResolver::new(self.config.max_cascade_depth);
        let visits = resolver.resolve(CascadeOp::Refresh, &handle)?;
        self.stats.cascade_visits += visits.len() as u64;
        for visit in visits {
            if self.identity_map.contains(&visit.key) {
                self.refresh_one(visit.key, &visit.handle)?;
            }
        }
        Ok(())
    }

    /// Stop managing an instance without touching storage.
    ///
    /// Pending changes to it are lost. Does not cascade.
    pub fn detach<T: Entity>(&mut self, instance: &EntityRef<T>) -> Result<()> {
        let handle = EntityHandle::of(instance);
        let key = handle.key()?;
        if self.identity_map.remove(&key).is_none() {
            return Err(Error::session(
                SessionErrorKind::NotManaged,
                format!("cannot detach unmanaged {} instance", handle.type_name()),
            ));
        }
        self.tracker.forget(&key);
        Ok(())
    }

    /// Record a lock level on a managed instance.
    ///
    /// `OptimisticVersion` forces a version check at the next flush even if
    /// the instance is clean. `PessimisticWrite` takes a row lock now via
    /// `SELECT ... FOR UPDATE`; a missing row reports stale. Lock requests
    /// only ever upgrade.
    pub fn lock<T: Entity>(&mut self, instance: &EntityRef<T>, mode: LockMode) -> Result<()> {
        self.guard_usable()?;
        let handle = EntityHandle::of(instance);
        let key = handle.key()?;
        let previous = {
            let Some(entry) = self.identity_map.get_mut(&key) else {
                return Err(Error::session(
                    SessionErrorKind::NotManaged,
                    format!("cannot lock unmanaged {} instance", handle.type_name()),
                ));
            };
            let previous = entry.lock();
            entry.upgrade_lock(mode);
            previous
        };

        if mode == LockMode::PessimisticWrite && previous != LockMode::PessimisticWrite {
            let key_columns = key_column_names(&handle);
            let sql = render_lock_row(handle.table(), &key_columns);
            let state = handle.state()?;
            self.ensure_transaction()?;
            let rows = self.executor.execute(&sql, &state.key_values)?;
            if rows == 0 {
                return Err(Error::Stale(StaleError {
                    table: handle.table(),
                    key: display_key(&state.key_values),
                    expected_version: None,
                }));
            }
        }
        Ok(())
    }

    /// Exclude or re-include a managed instance from dirty checking.
    ///
    /// Read-only instances never produce UPDATE statements or collection
    /// writes; explicit removal still works.
    pub fn set_read_only<T: Entity>(
        &mut self,
        instance: &EntityRef<T>,
        read_only: bool,
    ) -> Result<()> {
        let handle = EntityHandle::of(instance);
        let key = handle.key()?;
        match self.identity_map.get_mut(&key) {
            Some(entry) if entry.handle().same_instance(&handle) => {
                entry.set_read_only(read_only);
                Ok(())
            }
            _ => Err(Error::session(
                SessionErrorKind::NotManaged,
                format!("cannot mark unmanaged {} instance", handle.type_name()),
            )),
        }
    }

    /// Whether exactly this instance is managed and not scheduled for
    /// removal.
    #[must_use]
    pub fn contains<T: Entity>(&self, instance: &EntityRef<T>) -> bool {
        let handle = EntityHandle::of(instance);
        handle
            .key()
            .ok()
            .and_then(|key| self.identity_map.get(&key))
            .is_some_and(|entry| entry.handle().same_instance(&handle) && !entry.is_removed())
    }

    /// Whether an instance of `T` is managed under the given key values.
    #[must_use]
    pub fn contains_key<T: Entity>(&self, key_values: &[Value]) -> bool {
        let key = EntityKey::of::<T>(key_values);
        self.identity_map
            .get(&key)
            .is_some_and(|entry| !entry.is_removed())
    }

    // ==== flush ====

    /// Synchronize managed state with storage.
    ///
    /// Computes inserts, updates, collection changes, and deletes for every
    /// managed instance, orders them by dependency, and executes them in
    /// batches. On failure the unit of work is poisoned and nothing further
    /// executes; roll back or clear to continue.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn flush(&mut self) -> Result<FlushOutcome> {
        self.guard_usable()?;
        self.events.emit_before_flush()?;

        if self.identity_map.is_empty() {
            let outcome = FlushOutcome::default();
            self.stats.record_flush(&outcome);
            self.events.emit_after_flush(&outcome);
            return Ok(outcome);
        }

        let touched_start = self.touched.len();
        match self.flush_inner() {
            Ok(outcome) => {
                self.stats.record_flush(&outcome);
                self.events.emit_after_flush(&outcome);
                Ok(outcome)
            }
            Err(e) => {
                self.state = UowState::Failed;
                self.queue.clear();
                self.release_touched(touched_start);
                tracing::warn!(error = %e, "flush failed; unit of work poisoned");
                Err(e)
            }
        }
    }

    fn flush_inner(&mut self) -> Result<FlushOutcome> {
        // Adopt transient instances reachable over Persist edges from any
        // managed root, so children attached since registration insert too.
        let resolver = CascadeResolver::new(self.config.max_cascade_depth);
        let roots: Vec<EntityHandle> = self
            .identity_map
            .entries()
            .filter(|entry| !entry.is_removed())
            .map(|entry| entry.handle().clone())
            .collect();
        let mut visited: HashSet<EntityKey> = HashSet::new();
        let mut visits = Vec::new();
        for root in &roots {
            resolver.resolve_into(CascadeOp::Persist, root, &mut visited, &mut visits)?;
        }
        self.stats.cascade_visits += visits.len() as u64;
        for visit in visits {
            if self.identity_map.contains(&visit.key) {
                continue;
            }
            if !visit.state.transient {
                return Err(detached_in_graph(&visit.handle));
            }
            self.adopt_transient(visit.key, &visit.handle)?;
        }

        let entries: Vec<(EntityKey, EntityHandle, EntityStatus, bool, LockMode)> = self
            .identity_map
            .entries()
            .map(|entry| {
                (
                    entry.key(),
                    entry.handle().clone(),
                    entry.status(),
                    entry.is_read_only(),
                    entry.lock(),
                )
            })
            .collect();

        let mut plan = FlushPlan::default();

        // Collections first: orphaned rows must be known before the scalar
        // pass so they do not also receive updates.
        for (key, handle, status, read_only, _) in &entries {
            if matches!(status, EntityStatus::Managed) {
                let state = handle.state()?;
                self.plan_collections(&mut plan, *key, handle, &state, *read_only)?;
            }
        }

        for (key, handle, status, read_only, lock_mode) in &entries {
            match status {
                EntityStatus::Removed => self.plan_delete(&mut plan, *key, handle, false)?,
                EntityStatus::Managed => {
                    if plan.orphan_keys.contains(key) {
                        continue;
                    }
                    self.plan_scalar(&mut plan, *key, handle, *read_only, *lock_mode)?;
                }
            }
        }

        // Version checks for clean instances under an optimistic lock run
        // before any write goes out.
        for check in &plan.verifies {
            let Some(vcol) = version_column(check.handle.columns()) else {
                continue;
            };
            let key_columns = key_column_names(&check.handle);
            let sql =
                render_select_by_key(check.handle.table(), &[vcol.column_name()], &key_columns);
            self.ensure_transaction()?;
            let rows = self.executor.query(&sql, &check.key_values)?;
            let current = rows
                .first()
                .and_then(|row| row.get_by_name(vcol.column_name()))
                .and_then(Value::as_i64);
            if current != Some(check.expected) {
                return Err(Error::Stale(StaleError {
                    table: check.handle.table(),
                    key: display_key(&check.key_values),
                    expected_version: Some(check.expected),
                }));
            }
        }

        // Soft-lock cache entries ahead of the writes they cover.
        for write in &plan.updates {
            let lock = self
                .regions
                .get(&write.type_id)
                .and_then(|region| region.before_update(write.key));
            self.touched.push(TouchedEntry {
                key: write.key,
                type_id: write.type_id,
                kind: TouchedKind::Updated(write.state.clone()),
                lock,
            });
        }
        for (key, type_id) in plan.removes.iter().chain(&plan.orphans) {
            let lock = self
                .regions
                .get(type_id)
                .and_then(|region| region.before_remove(*key));
            self.touched.push(TouchedEntry {
                key: *key,
                type_id: *type_id,
                kind: TouchedKind::Removed,
                lock,
            });
        }
        for write in &plan.inserts {
            self.touched.push(TouchedEntry {
                key: write.key,
                type_id: write.type_id,
                kind: TouchedKind::Inserted(write.state.clone()),
                lock: None,
            });
        }

        if !self.queue.is_empty() {
            self.ensure_transaction()?;
        }
        let outcome = self.queue.execute_all(&mut self.executor, self.config.batch_size)?;

        // Success: write versions back, refresh baselines, drop deleted
        // instances.
        for write in plan.inserts.iter().chain(&plan.updates) {
            if let Some(version) = write.version_write {
                if let Some(entry) = self.identity_map.get(&write.key) {
                    entry.handle().set_version(version)?;
                }
            }
            self.tracker.snapshot(write.key, write.state.clone());
        }
        for (key, _) in plan
            .removes
            .iter()
            .chain(&plan.orphans)
            .chain(&plan.cancelled)
        {
            self.identity_map.remove(key);
            self.tracker.forget(key);
        }
        for (key, handle) in &plan.rescans {
            if self.identity_map.contains(key) {
                self.snapshot_current_collections(*key, handle)?;
            }
        }
        Ok(outcome)
    }

    // ==== flush planning helpers ====

    /// Link-table deltas, orphan detection, and transient-reference checks
    /// for one managed instance.
    fn plan_collections(
        &mut self,
        plan: &mut FlushPlan,
        key: EntityKey,
        handle: &EntityHandle,
        state: &EntityState,
        read_only: bool,
    ) -> Result<()> {
        let edges = handle.edges()?;
        if edges.is_empty() {
            return Ok(());
        }
        for edge in &edges {
            if !edge.info.cascades(CascadeOp::Persist) {
                // Nothing will persist these children; a transient one would
                // leave dangling references in storage.
                for child in edge.handles() {
                    let child_state = child.state()?;
                    if !child_state.transient {
                        continue;
                    }
                    let managed = child
                        .key_for(&child_state)
                        .is_ok_and(|child_key| self.identity_map.contains(&child_key));
                    if !managed {
                        return Err(FlushError::new(
                            FlushErrorKind::TransientReference,
                            format!(
                                "{} edge '{}' references a transient {} that nothing persists",
                                handle.type_name(),
                                edge.info.name,
                                child.type_name()
                            ),
                        )
                        .with_tables(vec![handle.table(), child.table()])
                        .into());
                    }
                }
            }

            if read_only || !edge.info.kind.is_to_many() {
                continue;
            }

            let mut member_keys: Vec<EntityKey> = Vec::new();
            let mut member_values: HashMap<EntityKey, Value> = HashMap::new();
            for child in edge.handles() {
                let child_state = child.state()?;
                let Ok(child_key) = child.key_for(&child_state) else {
                    continue;
                };
                member_keys.push(child_key);
                if let Some(value) = child_state.key_values.first() {
                    member_values.insert(child_key, value.clone());
                }
            }
            let delta = self.tracker.collection_delta(&key, edge.info.name, &member_keys);
            if delta.is_empty() {
                continue;
            }

            if let Some(link) = &edge.info.link_table {
                let owner_value = state.key_values.first().cloned().unwrap_or(Value::Null);
                for added in &delta.added {
                    let Some(child_value) = member_values.get(added) else {
                        continue;
                    };
                    self.queue.enqueue(Action::LinkAdd {
                        table: link.table,
                        columns: [link.local_column, link.remote_column],
                        values: [owner_value.clone(), child_value.clone()],
                    });
                }
                for removed in &delta.removed {
                    let child_value = self
                        .identity_map
                        .get(removed)
                        .and_then(|entry| entry.handle().state().ok())
                        .and_then(|child_state| child_state.key_values.first().cloned());
                    match child_value {
                        Some(value) => self.queue.enqueue(Action::LinkRemove {
                            table: link.table,
                            columns: [link.local_column, link.remote_column],
                            values: [owner_value.clone(), value],
                        }),
                        None => tracing::warn!(
                            link_table = link.table,
                            "removed member is no longer tracked; skipping link delete"
                        ),
                    }
                }
            }

            if edge.info.removes_orphans() {
                for removed in &delta.removed {
                    let Some(entry) = self.identity_map.get(removed) else {
                        tracing::warn!(
                            association = edge.info.name,
                            "orphaned instance is no longer tracked; skipping delete"
                        );
                        continue;
                    };
                    let child = entry.handle().clone();
                    plan.orphan_keys.insert(*removed);
                    self.plan_delete(plan, *removed, &child, true)?;
                }
            }
        }
        plan.rescans.push((key, handle.clone()));
        Ok(())
    }

    /// Insert or update for one managed instance.
    fn plan_scalar(
        &mut self,
        plan: &mut FlushPlan,
        key: EntityKey,
        handle: &EntityHandle,
        read_only: bool,
        lock_mode: LockMode,
    ) -> Result<()> {
        let state = handle.state()?;
        let columns = handle.columns();

        if !self.tracker.has_snapshot(&key) {
            // No storage baseline: the instance inserts in full.
            let mut insert_columns: Vec<&'static str> = Vec::new();
            let mut values: Vec<Value> = Vec::new();
            let mut seeded = None;
            for col in columns {
                if !col.insertable {
                    continue;
                }
                let mut value = state.value_of(col.name).cloned().unwrap_or(Value::Null);
                if col.version && value.is_null() {
                    value = Value::BigInt(0);
                    seeded = Some(0);
                }
                insert_columns.push(col.column_name());
                values.push(value);
            }
            self.queue.enqueue(Action::Insert {
                key,
                table: handle.table(),
                columns: insert_columns,
                values,
            });
            let mut post = state.clone();
            if let Some(version) = seeded {
                set_state_version(&mut post, columns, version);
            }
            plan.inserts.push(PlannedWrite {
                key,
                type_id: handle.type_id(),
                state: post,
                version_write: seeded,
            });
            return Ok(());
        }

        if read_only {
            return Ok(());
        }

        let dirty = self.tracker.dirty_columns(&key, &state);
        let mut set_columns: Vec<&'static str> = Vec::new();
        let mut set_values: Vec<Value> = Vec::new();
        for field in &dirty {
            let Some(col) = find_column(columns, field) else {
                continue;
            };
            if !col.updatable || col.primary_key || col.version {
                continue;
            }
            set_columns.push(col.column_name());
            set_values.push(state.value_of(field).cloned().unwrap_or(Value::Null));
        }

        let baseline_key_values = self
            .tracker
            .snapshot_of(&key)
            .map_or_else(|| state.key_values.clone(), |s| s.key_values.clone());
        let expected_version = self
            .tracker
            .snapshot_of(&key)
            .and_then(|s| s.version)
            .or(state.version);

        if set_columns.is_empty() {
            if lock_mode == LockMode::OptimisticVersion && version_column(columns).is_some() {
                if let Some(expected) = expected_version {
                    plan.verifies.push(VersionCheck {
                        handle: handle.clone(),
                        key_values: baseline_key_values,
                        expected,
                    });
                }
            }
            return Ok(());
        }

        let mut post = state.clone();
        let mut predicate = None;
        let mut version_write = None;
        if let Some(vcol) = version_column(columns) {
            let expected = expected_version.unwrap_or(0);
            set_columns.push(vcol.column_name());
            set_values.push(Value::BigInt(expected + 1));
            predicate = Some(VersionPredicate {
                column: vcol.column_name(),
                expected,
            });
            version_write = Some(expected + 1);
            set_state_version(&mut post, columns, expected + 1);
        }
        self.queue.enqueue(Action::Update {
            key,
            table: handle.table(),
            set_columns,
            set_values,
            key_columns: key_column_names(handle),
            key_values: baseline_key_values,
            version: predicate,
        });
        plan.updates.push(PlannedWrite {
            key,
            type_id: handle.type_id(),
            state: post,
            version_write,
        });
        Ok(())
    }

    /// Delete for one instance, deduplicated across removal paths.
    fn plan_delete(
        &mut self,
        plan: &mut FlushPlan,
        key: EntityKey,
        handle: &EntityHandle,
        orphan: bool,
    ) -> Result<()> {
        if !plan.deleted_keys.insert(key) {
            return Ok(());
        }
        let state = handle.state()?;
        let snapshot = self.tracker.snapshot_of(&key);
        if snapshot.is_none() && state.transient {
            // The row was never inserted; drop the instance silently.
            plan.cancelled.push((key, handle.type_id()));
            return Ok(());
        }
        let key_values =
            snapshot.map_or_else(|| state.key_values.clone(), |s| s.key_values.clone());
        let version = version_column(handle.columns()).and_then(|vcol| {
            snapshot
                .and_then(|s| s.version)
                .or(state.version)
                .map(|expected| VersionPredicate {
                    column: vcol.column_name(),
                    expected,
                })
        });
        self.queue.enqueue(Action::Delete {
            key,
            table: handle.table(),
            key_columns: key_column_names(handle),
            key_values,
            version,
            orphan,
        });
        if orphan {
            plan.orphans.push((key, handle.type_id()));
        } else {
            plan.removes.push((key, handle.type_id()));
        }
        Ok(())
    }

    // ==== internals ====

    fn guard_usable(&self) -> Result<()> {
        match self.state {
            UowState::Active => Ok(()),
            UowState::Failed => Err(Error::session(
                SessionErrorKind::Failed,
                "a previous flush failed; rollback() or clear() before continuing",
            )),
        }
    }

    fn ensure_transaction(&mut self) -> Result<()> {
        if !self.tx_active && self.config.auto_begin {
            self.executor.begin()?;
            self.tx_active = true;
        }
        Ok(())
    }

    /// Release cache locks taken since `from` and forget those entries.
    fn release_touched(&mut self, from: usize) {
        for touched in self.touched.drain(from..) {
            if let Some(region) = self.regions.get(&touched.type_id) {
                region.on_failure(touched.key, touched.lock);
            }
        }
    }

    /// Begin managing a transient instance: empty collection baselines so
    /// the first flush emits every current membership.
    fn adopt_transient(&mut self, key: EntityKey, handle: &EntityHandle) -> Result<()> {
        register_tables(&mut self.queue, handle);
        self.identity_map.put(EntityEntry::new(key, handle.clone()))?;
        for assoc in handle.associations() {
            if assoc.kind.is_to_many() {
                self.tracker.snapshot_collection(key, assoc.name, Vec::new());
            }
        }
        Ok(())
    }

    /// Begin managing a loaded instance with its current state as baseline.
    fn adopt_loaded<T: Entity>(
        &mut self,
        key: EntityKey,
        instance: EntityRef<T>,
    ) -> Result<EntityRef<T>> {
        let handle = EntityHandle::of(&instance);
        register_tables(&mut self.queue, &handle);
        let state = handle.state()?;
        self.identity_map.put(EntityEntry::new(key, handle.clone()))?;
        self.tracker.snapshot(key, state);
        self.snapshot_current_collections(key, &handle)?;
        self.stats.loads += 1;
        Ok(instance)
    }

    fn merge_one(
        &mut self,
        key: EntityKey,
        handle: &EntityHandle,
        state: &EntityState,
    ) -> Result<()> {
        if let Some(entry) = self.identity_map.get(&key) {
            if entry.handle().same_instance(handle) {
                return Ok(());
            }
            // Copy the detached values onto the managed instance; dirty
            // checking against its baseline picks up the differences.
            entry.handle().apply_row(&state.to_row())?;
            return Ok(());
        }

        register_tables(&mut self.queue, handle);
        let sql = select_sql_for(handle);
        self.ensure_transaction()?;
        let rows = self.executor.query(&sql, &state.key_values)?;
        match rows.first() {
            Some(row) => {
                // Baseline from storage, values from the detached instance:
                // the diff is exactly what changed while detached.
                let baseline = EntityState::from_row(handle.columns(), handle.key_columns(), row);
                self.identity_map.put(EntityEntry::new(key, handle.clone()))?;
                self.tracker.snapshot(key, baseline);
                self.stats.loads += 1;
                self.snapshot_current_collections(key, handle)?;
            }
            None => {
                // The row is gone; the merged instance becomes an insert.
                self.identity_map.put(EntityEntry::new(key, handle.clone()))?;
                self.snapshot_current_collections(key, handle)?;
            }
        }
        Ok(())
    }

    fn refresh_one(&mut self, key: EntityKey, handle: &EntityHandle) -> Result<()> {
        let state = handle.state()?;
        let key_values = self
            .tracker
            .snapshot_of(&key)
            .map_or_else(|| state.key_values.clone(), |s| s.key_values.clone());
        let sql = select_sql_for(handle);
        self.ensure_transaction()?;
        let rows = self.executor.query(&sql, &key_values)?;
        let Some(row) = rows.first() else {
            self.identity_map.remove(&key);
            self.tracker.forget(&key);
            return Err(Error::Stale(StaleError {
                table: handle.table(),
                key: display_key(&key_values),
                expected_version: None,
            }));
        };
        handle.apply_row(row)?;
        let fresh = handle.state()?;
        if let Some(region) = self.regions.get(&handle.type_id()) {
            if region.put_from_load(key, CachedState::from_state(&fresh)) {
                self.stats.cache_puts += 1;
            }
        }
        self.tracker.snapshot(key, fresh);
        self.snapshot_current_collections(key, handle)?;
        self.stats.loads += 1;
        Ok(())
    }

    /// Record current to-many memberships as the collection baseline.
    fn snapshot_current_collections(
        &mut self,
        key: EntityKey,
        handle: &EntityHandle,
    ) -> Result<()> {
        for edge in handle.edges()? {
            if !edge.info.kind.is_to_many() {
                continue;
            }
            let mut members = Vec::new();
            for child in edge.handles() {
                let child_state = child.state()?;
                if let Ok(child_key) = child.key_for(&child_state) {
                    members.push(child_key);
                }
            }
            self.tracker.snapshot_collection(key, edge.info.name, members);
        }
        Ok(())
    }
}

impl<X: StatementExecutor> std::fmt::Debug for UnitOfWork<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("managed", &self.identity_map.len())
            .field("state", &self.state)
            .field("tx_active", &self.tx_active)
            .field("regions", &self.regions.len())
            .finish_non_exhaustive()
    }
}

// ==== free helpers ====

/// Register an entity's table, its foreign-key dependencies, and any link
/// tables with the queue's dependency graph.
fn register_tables(queue: &mut ActionQueue, handle: &EntityHandle) {
    let deps: Vec<&'static str> = handle
        .columns()
        .iter()
        .filter_map(|col| col.referenced_table())
        .collect();
    queue.register_table(handle.table(), &deps);
    for assoc in handle.associations() {
        if let Some(link) = &assoc.link_table {
            queue.register_table(link.table, &[handle.table(), assoc.target_table]);
        }
    }
}

fn detached_in_graph(handle: &EntityHandle) -> Error {
    IdentityError::new(
        IdentityErrorKind::Detached,
        handle.type_name(),
        "persist cascade reached a detached instance; merge() the graph instead",
    )
    .into()
}

fn key_column_names(handle: &EntityHandle) -> Vec<&'static str> {
    handle
        .key_columns()
        .iter()
        .map(|key| find_column(handle.columns(), key).map_or(*key, ColumnInfo::column_name))
        .collect()
}

fn select_sql<T: Entity>() -> String {
    let columns: Vec<&'static str> = T::columns().iter().map(ColumnInfo::column_name).collect();
    let keys: Vec<&'static str> = T::KEY
        .iter()
        .map(|key| find_column(T::columns(), key).map_or(*key, ColumnInfo::column_name))
        .collect();
    render_select_by_key(T::TABLE, &columns, &keys)
}

fn select_sql_for(handle: &EntityHandle) -> String {
    let columns: Vec<&'static str> =
        handle.columns().iter().map(ColumnInfo::column_name).collect();
    let keys = key_column_names(handle);
    render_select_by_key(handle.table(), &columns, &keys)
}

/// Update the version slot inside a captured state.
fn set_state_version(state: &mut EntityState, columns: &'static [ColumnInfo], version: i64) {
    state.version = Some(version);
    if let Some(vcol) = version_column(columns) {
        if let Some(slot) = state.values.iter_mut().find(|(name, _)| *name == vcol.name) {
            slot.1 = Value::BigInt(version);
        }
    }
}

// ==== tests ====

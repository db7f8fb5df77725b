//! Identity map: at most one live instance per entity identity.
//!
//! The identity map is the first tier of the unit of work. It guarantees
//! that repeated loads of the same row hand out the same `EntityRef<T>`
//! (pointer-equal `Arc`), so a mutation made through one reference is
//! visible through every other:
//!
//! - **Uniqueness**: one key, one instance; a second instance under the
//!   same key is rejected with a duplicate-identity error
//! - **Referential identity**: `resolve` returns clones of the stored `Arc`
//! - **Entry metadata**: status, lock mode, and the read-only marker ride
//!   along with each instance in an [`EntityEntry`]
//!
//! Iteration follows insertion order, which downstream action building
//! relies on for stable statement ordering.

use std::collections::HashMap;
use unitwork_core::error::{IdentityError, IdentityErrorKind};
use unitwork_core::{EntityHandle, EntityKey, EntityRef, Result, entity::Entity};

/// Lifecycle status of a tracked instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatus {
    /// Tracked and subject to dirty checking.
    Managed,
    /// Scheduled for deletion at the next flush.
    Removed,
}

/// Lock level recorded on an entry.
///
/// Ordered: a lock request only ever upgrades the recorded mode, never
/// silently downgrades it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LockMode {
    /// No lock.
    #[default]
    None,
    /// Shared intent; recorded only.
    Read,
    /// Force a version-predicate update at the next flush, even when clean.
    OptimisticVersion,
    /// Row lock taken immediately via `SELECT ... FOR UPDATE`.
    PessimisticWrite,
}

impl LockMode {
    /// Short name for diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            LockMode::None => "none",
            LockMode::Read => "read",
            LockMode::OptimisticVersion => "optimistic-version",
            LockMode::PessimisticWrite => "pessimistic-write",
        }
    }
}

/// Bookkeeping attached to one tracked instance.
#[derive(Debug, Clone)]
pub struct EntityEntry {
    key: EntityKey,
    handle: EntityHandle,
    status: EntityStatus,
    lock: LockMode,
    read_only: bool,
}

impl EntityEntry {
    /// Create a managed entry for an instance.
    #[must_use]
    pub fn new(key: EntityKey, handle: EntityHandle) -> Self {
        Self {
            key,
            handle,
            status: EntityStatus::Managed,
            lock: LockMode::None,
            read_only: false,
        }
    }

    /// The identity key.
    #[must_use]
    pub const fn key(&self) -> EntityKey {
        self.key
    }

    /// The type-erased instance handle.
    #[must_use]
    pub fn handle(&self) -> &EntityHandle {
        &self.handle
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> EntityStatus {
        self.status
    }

    /// Whether this entry is scheduled for deletion.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.status == EntityStatus::Removed
    }

    /// Schedule this entry for deletion.
    pub fn mark_removed(&mut self) {
        self.status = EntityStatus::Removed;
    }

    /// Bring a removed entry back to managed (persist of a removed
    /// instance before the delete ran).
    pub fn resurrect(&mut self) {
        self.status = EntityStatus::Managed;
    }

    /// Recorded lock mode.
    #[must_use]
    pub const fn lock(&self) -> LockMode {
        self.lock
    }

    /// Record a lock mode; keeps the stronger of old and new.
    pub fn upgrade_lock(&mut self, mode: LockMode) {
        if mode > self.lock {
            self.lock = mode;
        }
    }

    /// Whether dirty checking skips this entry.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Set or clear the read-only marker.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }
}

/// Per-unit-of-work registry of tracked instances.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<EntityKey, EntityEntry>,
    /// Keys in first-put order; drives deterministic flush iteration.
    order: Vec<EntityKey>,
}

impl IdentityMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an entry under its key.
    ///
    /// Re-putting the same live instance is a no-op returning the existing
    /// entry's status quo. A different instance under an occupied key is a
    /// duplicate-identity error.
    pub fn put(&mut self, entry: EntityEntry) -> Result<()> {
        let key = entry.key();
        if let Some(existing) = self.entries.get(&key) {
            if existing.handle().same_instance(entry.handle()) {
                return Ok(());
            }
            return Err(IdentityError::new(
                IdentityErrorKind::DuplicateKey,
                entry.handle().type_name(),
                "a different instance with this identity is already tracked",
            )
            .into());
        }
        self.order.push(key);
        self.entries.insert(key, entry);
        Ok(())
    }

    /// Look up an entry.
    #[must_use]
    pub fn get(&self, key: &EntityKey) -> Option<&EntityEntry> {
        self.entries.get(key)
    }

    /// Look up an entry mutably.
    pub fn get_mut(&mut self, key: &EntityKey) -> Option<&mut EntityEntry> {
        self.entries.get_mut(key)
    }

    /// Whether a key is tracked.
    #[must_use]
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Untrack and return an entry.
    pub fn remove(&mut self, key: &EntityKey) -> Option<EntityEntry> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.order.retain(|k| k != key);
        }
        removed
    }

    /// Recover the typed shared instance for a key, if the type matches.
    #[must_use]
    pub fn resolve<T: Entity>(&self, key: &EntityKey) -> Option<EntityRef<T>> {
        self.entries.get(key).and_then(|e| e.handle().resolve::<T>())
    }

    /// Tracked keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.order.iter()
    }

    /// Tracked entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &EntityEntry> {
        self.order.iter().filter_map(|k| self.entries.get(k))
    }

    /// Number of tracked entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Untrack everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use unitwork_core::{ColumnInfo, Row, Value, new_entity_ref};

    #[derive(Debug)]
    struct Tag {
        id: i64,
        label: String,
    }

    impl Entity for Tag {
        const TABLE: &'static str = "tags";
        const KEY: &'static [&'static str] = &["id"];

        fn columns() -> &'static [ColumnInfo] {
            static COLUMNS: [ColumnInfo; 2] = [
                ColumnInfo::new("id").primary_key(),
                ColumnInfo::new("label"),
            ];
            &COLUMNS
        }

        fn state(&self) -> Vec<(&'static str, Value)> {
            vec![
                ("id", Value::BigInt(self.id)),
                ("label", Value::Text(self.label.clone())),
            ]
        }

        fn key_values(&self) -> Vec<Value> {
            vec![Value::BigInt(self.id)]
        }

        fn is_transient(&self) -> bool {
            false
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_named("id")?,
                label: row.get_named("label")?,
            })
        }
    }

    fn tag(id: i64, label: &str) -> EntityRef<Tag> {
        new_entity_ref(Tag {
            id,
            label: label.to_string(),
        })
    }

    fn entry_for(r: &EntityRef<Tag>) -> EntityEntry {
        let handle = EntityHandle::of(r);
        let key = handle.key().unwrap();
        EntityEntry::new(key, handle)
    }

    #[test]
    fn test_put_and_resolve_share_instance() {
        let mut map = IdentityMap::new();
        let a = tag(1, "rust");
        map.put(entry_for(&a)).unwrap();

        let key = EntityKey::of::<Tag>(&[Value::BigInt(1)]);
        let resolved = map.resolve::<Tag>(&key).unwrap();
        assert!(Arc::ptr_eq(&a, &resolved));

        a.write().unwrap().label = "changed".to_string();
        assert_eq!(resolved.read().unwrap().label, "changed");
    }

    #[test]
    fn test_same_instance_reput_is_noop() {
        let mut map = IdentityMap::new();
        let a = tag(1, "rust");
        map.put(entry_for(&a)).unwrap();
        map.put(entry_for(&a)).unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let mut map = IdentityMap::new();
        map.put(entry_for(&tag(1, "first"))).unwrap();

        let err = map.put(entry_for(&tag(1, "second"))).unwrap_err();
        match err {
            unitwork_core::Error::Identity(e) => {
                assert_eq!(e.kind, IdentityErrorKind::DuplicateKey);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_insertion_order_survives_removal() {
        let mut map = IdentityMap::new();
        let refs: Vec<_> = (1..=4).map(|i| tag(i, "t")).collect();
        for r in &refs {
            map.put(entry_for(r)).unwrap();
        }

        let second = EntityKey::of::<Tag>(&[Value::BigInt(2)]);
        map.remove(&second);

        let order: Vec<i64> = map
            .entries()
            .map(|e| e.handle().resolve::<Tag>().unwrap().read().unwrap().id)
            .collect();
        assert_eq!(order, vec![1, 3, 4]);
        assert_eq!(map.keys().count(), 3);
    }

    #[test]
    fn test_status_transitions() {
        let a = tag(5, "x");
        let mut entry = entry_for(&a);
        assert_eq!(entry.status(), EntityStatus::Managed);

        entry.mark_removed();
        assert!(entry.is_removed());

        entry.resurrect();
        assert_eq!(entry.status(), EntityStatus::Managed);
    }

    #[test]
    fn test_lock_upgrades_only() {
        let a = tag(6, "x");
        let mut entry = entry_for(&a);
        assert_eq!(entry.lock(), LockMode::None);

        entry.upgrade_lock(LockMode::OptimisticVersion);
        assert_eq!(entry.lock(), LockMode::OptimisticVersion);

        // A weaker request never downgrades.
        entry.upgrade_lock(LockMode::Read);
        assert_eq!(entry.lock(), LockMode::OptimisticVersion);

        entry.upgrade_lock(LockMode::PessimisticWrite);
        assert_eq!(entry.lock(), LockMode::PessimisticWrite);
    }

    #[test]
    fn test_clear_empties_map() {
        let mut map = IdentityMap::new();
        map.put(entry_for(&tag(1, "a"))).unwrap();
        map.put(entry_for(&tag(2, "b"))).unwrap();
        assert_eq!(map.len(), 2);

        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.keys().count(), 0);
    }
}

//! Snapshot-based change tracking and dirty detection.
//!
//! At load and persist time the unit of work captures an [`EntityState`]
//! snapshot of each managed instance. At flush time the current state is
//! diffed against the snapshot by value comparison to compute the dirty
//! column set; an instance without a snapshot counts as fully dirty (it is
//! new). To-many collection membership is snapshotted separately, as child
//! key lists, so flush can compute membership deltas and orphans.
//!
//! Snapshots are refreshed after each successful flush: a second flush with
//! no further mutation produces no actions.

use std::collections::HashMap;
use unitwork_core::{EntityKey, EntityState};

/// Membership change of one to-many collection since its snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionDelta {
    /// Children present now but not in the snapshot, in collection order.
    pub added: Vec<EntityKey>,
    /// Children present in the snapshot but gone now, in snapshot order.
    pub removed: Vec<EntityKey>,
}

impl CollectionDelta {
    /// Whether the membership is unchanged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Tracks load-time state for dirty detection.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    snapshots: HashMap<EntityKey, EntityState>,
    collections: HashMap<(EntityKey, &'static str), Vec<EntityKey>>,
}

impl ChangeTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the baseline state for an instance.
    #[tracing::instrument(level = "trace", skip(self, state))]
    pub fn snapshot(&mut self, key: EntityKey, state: EntityState) {
        self.snapshots.insert(key, state);
    }

    /// Whether a baseline exists for this key.
    ///
    /// Managed instances without a baseline are new: they insert at flush.
    #[must_use]
    pub fn has_snapshot(&self, key: &EntityKey) -> bool {
        self.snapshots.contains_key(key)
    }

    /// The baseline state, if one was recorded.
    #[must_use]
    pub fn snapshot_of(&self, key: &EntityKey) -> Option<&EntityState> {
        self.snapshots.get(key)
    }

    /// Column names whose current value differs from the baseline.
    ///
    /// Without a baseline every column is reported. Comparison is by value,
    /// never by reference.
    #[tracing::instrument(level = "debug", skip(self, current))]
    pub fn dirty_columns(&self, key: &EntityKey, current: &EntityState) -> Vec<&'static str> {
        let Some(snapshot) = self.snapshots.get(key) else {
            let all: Vec<&'static str> = current.values.iter().map(|(n, _)| *n).collect();
            tracing::debug!(columns = all.len(), "no baseline; all columns dirty");
            return all;
        };

        let mut dirty = Vec::new();
        for (name, value) in &current.values {
            if snapshot.value_of(name) != Some(value) {
                dirty.push(*name);
            }
        }
        if !dirty.is_empty() {
            tracing::debug!(columns = ?dirty, "dirty columns detected");
        }
        dirty
    }

    /// Whether any column differs from the baseline.
    #[must_use]
    pub fn is_dirty(&self, key: &EntityKey, current: &EntityState) -> bool {
        !self.dirty_columns(key, current).is_empty()
    }

    /// Record the membership baseline of a to-many collection.
    pub fn snapshot_collection(
        &mut self,
        owner: EntityKey,
        association: &'static str,
        children: Vec<EntityKey>,
    ) {
        self.collections.insert((owner, association), children);
    }

    /// The membership baseline of a collection, if one was recorded.
    #[must_use]
    pub fn collection_snapshot(
        &self,
        owner: &EntityKey,
        association: &'static str,
    ) -> Option<&[EntityKey]> {
        self.collections
            .get(&(*owner, association))
            .map(Vec::as_slice)
    }

    /// Membership delta of a collection against its baseline.
    ///
    /// Without a baseline every current child counts as added and nothing
    /// as removed.
    #[must_use]
    pub fn collection_delta(
        &self,
        owner: &EntityKey,
        association: &'static str,
        current: &[EntityKey],
    ) -> CollectionDelta {
        let Some(snapshot) = self.collections.get(&(*owner, association)) else {
            return CollectionDelta {
                added: current.to_vec(),
                removed: Vec::new(),
            };
        };

        let added = current
            .iter()
            .filter(|k| !snapshot.contains(k))
            .copied()
            .collect();
        let removed = snapshot
            .iter()
            .filter(|k| !current.contains(k))
            .copied()
            .collect();
        CollectionDelta { added, removed }
    }

    /// Drop the baselines for one instance (entity and collections).
    pub fn forget(&mut self, key: &EntityKey) {
        self.snapshots.remove(key);
        self.collections.retain(|(owner, _), _| owner != key);
    }

    /// Drop every baseline.
    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.collections.clear();
    }

    /// Number of entity baselines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether no baselines exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use unitwork_core::{ColumnInfo, Entity, Result, Row, Value};

    #[derive(Debug, Clone)]
    struct Post {
        id: i64,
        title: String,
        score: i32,
    }

    impl Entity for Post {
        const TABLE: &'static str = "posts";
        const KEY: &'static [&'static str] = &["id"];

        fn columns() -> &'static [ColumnInfo] {
            static COLUMNS: [ColumnInfo; 3] = [
                ColumnInfo::new("id").primary_key(),
                ColumnInfo::new("title"),
                ColumnInfo::new("score"),
            ];
            &COLUMNS
        }

        fn state(&self) -> Vec<(&'static str, Value)> {
            vec![
                ("id", Value::BigInt(self.id)),
                ("title", Value::Text(self.title.clone())),
                ("score", Value::Int(self.score)),
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
                title: row.get_named("title")?,
                score: row.get_named("score")?,
            })
        }
    }

    fn key(id: i64) -> EntityKey {
        EntityKey::of::<Post>(&[Value::BigInt(id)])
    }

    fn post(id: i64, title: &str, score: i32) -> Post {
        Post {
            id,
            title: title.to_string(),
            score,
        }
    }

    #[test]
    fn test_no_snapshot_is_fully_dirty() {
        let tracker = ChangeTracker::new();
        let current = EntityState::capture(&post(1, "a", 0));
        let dirty = tracker.dirty_columns(&key(1), &current);
        assert_eq!(dirty, vec!["id", "title", "score"]);
        assert!(tracker.is_dirty(&key(1), &current));
    }

    #[test]
    fn test_unchanged_state_is_clean() {
        let mut tracker = ChangeTracker::new();
        let p = post(1, "a", 0);
        tracker.snapshot(key(1), EntityState::capture(&p));
        assert!(!tracker.is_dirty(&key(1), &EntityState::capture(&p)));
    }

    #[test]
    fn test_dirty_columns_name_changed_fields() {
        let mut tracker = ChangeTracker::new();
        tracker.snapshot(key(1), EntityState::capture(&post(1, "a", 0)));

        let current = EntityState::capture(&post(1, "b", 0));
        assert_eq!(tracker.dirty_columns(&key(1), &current), vec!["title"]);

        let current = EntityState::capture(&post(1, "b", 9));
        let dirty = tracker.dirty_columns(&key(1), &current);
        assert!(dirty.contains(&"title"));
        assert!(dirty.contains(&"score"));
        assert!(!dirty.contains(&"id"));
    }

    #[test]
    fn test_revert_produces_clean_state() {
        let mut tracker = ChangeTracker::new();
        let original = post(1, "a", 0);
        tracker.snapshot(key(1), EntityState::capture(&original));

        // Mutate, then put the original value back.
        let mut p = original.clone();
        p.title = "changed".to_string();
        p.title = "a".to_string();
        assert!(!tracker.is_dirty(&key(1), &EntityState::capture(&p)));
    }

    #[test]
    fn test_refresh_resets_baseline() {
        let mut tracker = ChangeTracker::new();
        tracker.snapshot(key(1), EntityState::capture(&post(1, "a", 0)));

        let updated = post(1, "b", 1);
        assert!(tracker.is_dirty(&key(1), &EntityState::capture(&updated)));

        tracker.snapshot(key(1), EntityState::capture(&updated));
        assert!(!tracker.is_dirty(&key(1), &EntityState::capture(&updated)));
    }

    #[test]
    fn test_collection_delta() {
        let mut tracker = ChangeTracker::new();
        let owner = key(1);
        tracker.snapshot_collection(owner, "comments", vec![key(10), key(11), key(12)]);

        let delta = tracker.collection_delta(&owner, "comments", &[key(11), key(12), key(13)]);
        assert_eq!(delta.added, vec![key(13)]);
        assert_eq!(delta.removed, vec![key(10)]);

        let unchanged = tracker.collection_delta(&owner, "comments", &[key(10), key(11), key(12)]);
        assert!(unchanged.is_empty());
    }

    #[test]
    fn test_collection_delta_without_snapshot_adds_all() {
        let tracker = ChangeTracker::new();
        let delta = tracker.collection_delta(&key(1), "comments", &[key(10)]);
        assert_eq!(delta.added, vec![key(10)]);
        assert!(delta.removed.is_empty());
    }

    #[test]
    fn test_forget_drops_entity_and_collections() {
        let mut tracker = ChangeTracker::new();
        let owner = key(1);
        tracker.snapshot(owner, EntityState::capture(&post(1, "a", 0)));
        tracker.snapshot_collection(owner, "comments", vec![key(10)]);

        tracker.forget(&owner);
        assert!(!tracker.has_snapshot(&owner));
        assert!(tracker.collection_snapshot(&owner, "comments").is_none());
    }
}

//! Ordered execution of pending actions.
//!
//! Actions execute in five tiers: orphan removals, inserts, updates,
//! collection removals, deletes. Within the insert tier, rows go
//! parent-before-child by a topological pass over the registered
//! foreign-key table graph; the delete tiers run the same order reversed.
//! Tables with no constraint between them keep enqueue order, and adjacent
//! same-table actions merge into multi-row statements up to the batch size.
//!
//! Draining is destructive: once [`ActionQueue::execute_all`] starts, a
//! failed statement aborts the rest of the queue and nothing is re-queued.

use crate::action::{
    Action, ActionKind, render_delete, render_delete_in, render_link_add, render_link_remove,
    render_multi_insert, render_update,
};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};
use unitwork_core::{
    Error, FlushError, FlushErrorKind, Result, StaleError, StatementExecutor, Value, display_key,
};

/// Pending action counts per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    /// Orphan-removal deletes.
    pub orphan_deletes: usize,
    /// Entity and link-table inserts.
    pub inserts: usize,
    /// Entity updates.
    pub updates: usize,
    /// Link-table removals.
    pub collection_removes: usize,
    /// Entity deletes.
    pub deletes: usize,
}

impl PendingCounts {
    /// Total pending actions across all tiers.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.orphan_deletes
            + self.inserts
            + self.updates
            + self.collection_removes
            + self.deletes
    }
}

/// Row counts from one drained queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Rows inserted (entity and link-table rows).
    pub inserted: usize,
    /// Rows updated.
    pub updated: usize,
    /// Rows deleted (entity, orphan and link-table rows).
    pub deleted: usize,
}

impl FlushOutcome {
    /// Total rows written.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }

    /// Whether the flush wrote nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// The five-tier action queue.
///
/// Holds actions between dirty-check and execution, plus the table
/// dependency graph used to order inserts and deletes. Table registration
/// survives [`ActionQueue::clear`]; only pending actions are dropped.
#[derive(Debug, Default)]
pub struct ActionQueue {
    orphan_deletes: Vec<Action>,
    inserts: Vec<Action>,
    updates: Vec<Action>,
    collection_removes: Vec<Action>,
    deletes: Vec<Action>,
    /// table -> tables it carries a foreign key to.
    dependencies: HashMap<&'static str, Vec<&'static str>>,
    /// Registration order, for deterministic graph walks.
    tables: Vec<&'static str>,
}

impl ActionQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table and the tables its foreign keys point at.
    ///
    /// Self-references are ignored; rows of a self-referential table order
    /// among themselves by enqueue order. Registering the same table again
    /// merges the dependency lists.
    pub fn register_table(&mut self, table: &'static str, depends_on: &[&'static str]) {
        if !self.dependencies.contains_key(table) {
            self.tables.push(table);
            self.dependencies.insert(table, Vec::new());
        }
        if let Some(deps) = self.dependencies.get_mut(table) {
            for &dep in depends_on {
                if dep != table && !deps.contains(&dep) {
                    deps.push(dep);
                }
            }
        }
    }

    /// Add an action to its tier.
    pub fn enqueue(&mut self, action: Action) {
        tracing::trace!(kind = ?action.kind(), table = action.table(), "queue action");
        match action.kind() {
            ActionKind::OrphanDelete => self.orphan_deletes.push(action),
            ActionKind::Insert => self.inserts.push(action),
            ActionKind::Update => self.updates.push(action),
            ActionKind::CollectionRemove => self.collection_removes.push(action),
            ActionKind::Delete => self.deletes.push(action),
        }
    }

    /// Pending action counts per tier.
    #[must_use]
    pub fn pending(&self) -> PendingCounts {
        PendingCounts {
            orphan_deletes: self.orphan_deletes.len(),
            inserts: self.inserts.len(),
            updates: self.updates.len(),
            collection_removes: self.collection_removes.len(),
            deletes: self.deletes.len(),
        }
    }

    /// Total pending actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending().total()
    }

    /// Whether no actions are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all pending actions, keeping table registrations.
    pub fn clear(&mut self) {
        self.orphan_deletes.clear();
        self.inserts.clear();
        self.updates.clear();
        self.collection_removes.clear();
        self.deletes.clear();
    }

    /// Execute every pending action through `executor`, tier by tier.
    ///
    /// Returns row counts, or the first statement error. A versioned update
    /// or delete that affects zero rows returns [`Error::Stale`].
    #[tracing::instrument(level = "debug", skip(self, executor))]
    pub fn execute_all<X: StatementExecutor>(
        &mut self,
        executor: &mut X,
        batch_size: usize,
    ) -> Result<FlushOutcome> {
        let depths = self.table_depths()?;
        let depth_of = |table: &'static str| depths.get(table).copied().unwrap_or(0);
        let batch_size = batch_size.max(1);

        let mut orphan_deletes = std::mem::take(&mut self.orphan_deletes);
        let mut inserts = std::mem::take(&mut self.inserts);
        let updates = std::mem::take(&mut self.updates);
        let collection_removes = std::mem::take(&mut self.collection_removes);
        let mut deletes = std::mem::take(&mut self.deletes);

        // Stable sorts: equal depths keep enqueue order.
        orphan_deletes.sort_by_key(|a| Reverse(depth_of(a.table())));
        inserts.sort_by_key(|a| depth_of(a.table()));
        deletes.sort_by_key(|a| Reverse(depth_of(a.table())));

        let mut outcome = FlushOutcome::default();
        for tier in [orphan_deletes, inserts, updates, collection_removes, deletes] {
            run_tier(executor, tier, batch_size, &mut outcome)?;
        }
        tracing::debug!(
            inserted = outcome.inserted,
            updated = outcome.updated,
            deleted = outcome.deleted,
            "queue drained"
        );
        Ok(outcome)
    }

    /// Longest-path depth of every table in the dependency graph.
    ///
    /// Depth 0 means no foreign keys to other known tables; a child sits one
    /// past its deepest parent. Unordered tables share a depth, so the later
    /// stable sort leaves them in enqueue order.
    fn table_depths(&self) -> Result<HashMap<&'static str, usize>> {
        let mut nodes: Vec<&'static str> = Vec::new();
        let mut seen: HashSet<&'static str> = HashSet::new();
        for &table in &self.tables {
            if seen.insert(table) {
                nodes.push(table);
            }
        }
        for &dep in self.dependencies.values().flatten() {
            if seen.insert(dep) {
                nodes.push(dep);
            }
        }
        for action in self
            .orphan_deletes
            .iter()
            .chain(&self.inserts)
            .chain(&self.updates)
            .chain(&self.collection_removes)
            .chain(&self.deletes)
        {
            let table = action.table();
            if seen.insert(table) {
                nodes.push(table);
            }
        }

        let mut indegree: HashMap<&'static str, usize> = HashMap::new();
        let mut dependents: HashMap<&'static str, Vec<&'static str>> = HashMap::new();
        for &node in &nodes {
            let mut count = 0;
            if let Some(deps) = self.dependencies.get(node) {
                for &dep in deps {
                    if dep == node {
                        continue;
                    }
                    count += 1;
                    dependents.entry(dep).or_default().push(node);
                }
            }
            indegree.insert(node, count);
        }

        let mut depth: HashMap<&'static str, usize> = HashMap::new();
        let mut ready: VecDeque<&'static str> = VecDeque::new();
        for &node in &nodes {
            if indegree.get(node).copied().unwrap_or(0) == 0 {
                depth.insert(node, 0);
                ready.push_back(node);
            }
        }

        let mut resolved = 0usize;
        while let Some(node) = ready.pop_front() {
            resolved += 1;
            let node_depth = depth.get(node).copied().unwrap_or(0);
            if let Some(children) = dependents.get(node) {
                for &child in children {
                    let slot = depth.entry(child).or_insert(0);
                    *slot = (*slot).max(node_depth + 1);
                    if let Some(count) = indegree.get_mut(child) {
                        *count -= 1;
                        if *count == 0 {
                            ready.push_back(child);
                        }
                    }
                }
            }
        }

        if resolved < nodes.len() {
            let remaining: Vec<&'static str> = nodes
                .iter()
                .copied()
                .filter(|n| indegree.get(n).copied().unwrap_or(0) > 0)
                .collect();
            let path = self.cycle_path(&remaining);
            let message = format!(
                "circular foreign-key dependency between tables: {}",
                path.join(" -> ")
            );
            return Err(FlushError::new(FlushErrorKind::DependencyCycle, message)
                .with_tables(path)
                .into());
        }
        Ok(depth)
    }

    /// Walk dependency edges among unresolvable tables until one repeats.
    fn cycle_path(&self, remaining: &[&'static str]) -> Vec<&'static str> {
        let in_cycle: HashSet<&'static str> = remaining.iter().copied().collect();
        let Some(&start) = remaining.first() else {
            return Vec::new();
        };
        let mut path = vec![start];
        let mut visited: HashSet<&'static str> = HashSet::new();
        visited.insert(start);
        let mut current = start;
        loop {
            let next = self
                .dependencies
                .get(current)
                .and_then(|deps| deps.iter().copied().find(|d| in_cycle.contains(d)));
            match next {
                Some(dep) if visited.contains(dep) => {
                    path.push(dep);
                    break;
                }
                Some(dep) => {
                    visited.insert(dep);
                    path.push(dep);
                    current = dep;
                }
                None => break,
            }
        }
        path
    }
}

// ============================================================================
// Tier execution
// ============================================================================

/// Split a tier into runs of adjacent actions sharing a batch key.
fn group_adjacent(actions: Vec<Action>) -> Vec<Vec<Action>> {
    let mut groups: Vec<Vec<Action>> = Vec::new();
    for action in actions {
        match groups.last_mut() {
            Some(group)
                if group
                    .last()
                    .is_some_and(|last| last.batch_key() == action.batch_key()) =>
            {
                group.push(action);
            }
            _ => groups.push(vec![action]),
        }
    }
    groups
}

fn run_tier<X: StatementExecutor>(
    executor: &mut X,
    actions: Vec<Action>,
    batch_size: usize,
    outcome: &mut FlushOutcome,
) -> Result<()> {
    for group in group_adjacent(actions) {
        match group.first().map(Action::kind) {
            Some(ActionKind::Insert) => run_insert_group(executor, group, batch_size, outcome)?,
            Some(ActionKind::Update) => run_update_group(executor, group, outcome)?,
            Some(ActionKind::OrphanDelete | ActionKind::Delete) => {
                run_delete_group(executor, group, batch_size, outcome)?;
            }
            Some(ActionKind::CollectionRemove) => {
                run_link_remove_group(executor, group, outcome)?;
            }
            None => {}
        }
    }
    Ok(())
}

fn flush_insert_rows<X: StatementExecutor>(
    executor: &mut X,
    table: &'static str,
    columns: &[&'static str],
    rows: &mut Vec<Vec<Value>>,
    outcome: &mut FlushOutcome,
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let batch = std::mem::take(rows);
    let (sql, params) = render_multi_insert(table, columns, &batch);
    tracing::debug!(table, rows = batch.len(), "insert");
    executor.execute(&sql, &params)?;
    outcome.inserted += batch.len();
    Ok(())
}

fn run_insert_group<X: StatementExecutor>(
    executor: &mut X,
    group: Vec<Action>,
    batch_size: usize,
    outcome: &mut FlushOutcome,
) -> Result<()> {
    let mut pending_table: &'static str = "";
    let mut pending_columns: Vec<&'static str> = Vec::new();
    let mut pending_rows: Vec<Vec<Value>> = Vec::new();
    for action in group {
        match action {
            Action::Insert {
                table,
                columns,
                values,
                ..
            } => {
                if !pending_rows.is_empty()
                    && (pending_columns != columns || pending_rows.len() >= batch_size)
                {
                    flush_insert_rows(
                        executor,
                        pending_table,
                        &pending_columns,
                        &mut pending_rows,
                        outcome,
                    )?;
                }
                pending_table = table;
                pending_columns = columns;
                pending_rows.push(values);
            }
            Action::LinkAdd {
                table,
                columns,
                values,
            } => {
                flush_insert_rows(
                    executor,
                    pending_table,
                    &pending_columns,
                    &mut pending_rows,
                    outcome,
                )?;
                let sql = render_link_add(table, &columns);
                executor.execute(&sql, &values)?;
                outcome.inserted += 1;
            }
            _ => {}
        }
    }
    flush_insert_rows(
        executor,
        pending_table,
        &pending_columns,
        &mut pending_rows,
        outcome,
    )
}

fn run_update_group<X: StatementExecutor>(
    executor: &mut X,
    group: Vec<Action>,
    outcome: &mut FlushOutcome,
) -> Result<()> {
    for action in group {
        if let Action::Update {
            table,
            set_columns,
            set_values,
            key_columns,
            key_values,
            version,
            ..
        } = action
        {
            let shown = display_key(&key_values);
            let sql = render_update(table, &set_columns, &key_columns, version.as_ref());
            let mut params = set_values;
            params.extend(key_values);
            if let Some(v) = &version {
                params.push(Value::BigInt(v.expected));
            }
            let rows = executor.execute(&sql, &params)?;
            if rows == 0 {
                if let Some(v) = version {
                    return Err(Error::Stale(StaleError {
                        table,
                        key: shown,
                        expected_version: Some(v.expected),
                    }));
                }
                tracing::warn!(table, key = %shown, "update matched no rows");
            }
            outcome.updated += 1;
        }
    }
    Ok(())
}

fn flush_delete_keys<X: StatementExecutor>(
    executor: &mut X,
    table: &'static str,
    column: &'static str,
    keys: &mut Vec<Value>,
    outcome: &mut FlushOutcome,
) -> Result<()> {
    if keys.is_empty() {
        return Ok(());
    }
    let batch = std::mem::take(keys);
    let sql = if batch.len() == 1 {
        render_delete(table, &[column], None)
    } else {
        render_delete_in(table, column, batch.len())
    };
    tracing::debug!(table, rows = batch.len(), "delete");
    executor.execute(&sql, &batch)?;
    outcome.deleted += batch.len();
    Ok(())
}

fn run_delete_group<X: StatementExecutor>(
    executor: &mut X,
    group: Vec<Action>,
    batch_size: usize,
    outcome: &mut FlushOutcome,
) -> Result<()> {
    let mut pending_table: &'static str = "";
    let mut pending_column: &'static str = "";
    let mut pending_keys: Vec<Value> = Vec::new();
    for action in group {
        if let Action::Delete {
            table,
            key_columns,
            key_values,
            version,
            ..
        } = action
        {
            // Single-column unversioned deletes merge into one IN statement.
            if key_columns.len() == 1 && version.is_none() {
                if pending_keys.len() >= batch_size {
                    flush_delete_keys(
                        executor,
                        pending_table,
                        pending_column,
                        &mut pending_keys,
                        outcome,
                    )?;
                }
                pending_table = table;
                pending_column = key_columns[0];
                if let Some(value) = key_values.into_iter().next() {
                    pending_keys.push(value);
                }
            } else {
                flush_delete_keys(
                    executor,
                    pending_table,
                    pending_column,
                    &mut pending_keys,
                    outcome,
                )?;
                let shown = display_key(&key_values);
                let sql = render_delete(table, &key_columns, version.as_ref());
                let mut params = key_values;
                if let Some(v) = &version {
                    params.push(Value::BigInt(v.expected));
                }
                let rows = executor.execute(&sql, &params)?;
                if rows == 0 {
                    if let Some(v) = version {
                        return Err(Error::Stale(StaleError {
                            table,
                            key: shown,
                            expected_version: Some(v.expected),
                        }));
                    }
                    tracing::warn!(table, key = %shown, "delete matched no rows");
                }
                outcome.deleted += 1;
            }
        }
    }
    flush_delete_keys(
        executor,
        pending_table,
        pending_column,
        &mut pending_keys,
        outcome,
    )
}

fn run_link_remove_group<X: StatementExecutor>(
    executor: &mut X,
    group: Vec<Action>,
    outcome: &mut FlushOutcome,
) -> Result<()> {
    for action in group {
        if let Action::LinkRemove {
            table,
            columns,
            values,
        } = action
        {
            let sql = render_link_remove(table, &columns);
            let rows = executor.execute(&sql, &values)?;
            if rows == 0 {
                tracing::warn!(table, "link row already absent");
            }
            outcome.deleted += 1;
        }
    }
    Ok(())
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::VersionPredicate;
    use std::any::TypeId;
    use unitwork_core::{EntityKey, RecordingExecutor};

    fn key(n: i64) -> EntityKey {
        EntityKey::from_parts(TypeId::of::<()>(), &[Value::BigInt(n)])
    }

    fn insert(table: &'static str, id: i64) -> Action {
        Action::Insert {
            key: key(id),
            table,
            columns: vec!["id"],
            values: vec![Value::BigInt(id)],
        }
    }

    fn delete(table: &'static str, id: i64, orphan: bool) -> Action {
        Action::Delete {
            key: key(id),
            table,
            key_columns: vec!["id"],
            key_values: vec![Value::BigInt(id)],
            version: None,
            orphan,
        }
    }

    #[test]
    fn test_fk_order_inserts_parent_first() {
        let mut queue = ActionQueue::new();
        queue.register_table("authors", &[]);
        queue.register_table("books", &["authors"]);
        queue.enqueue(insert("books", 10));
        queue.enqueue(insert("authors", 1));

        let mut exec = RecordingExecutor::new();
        let outcome = queue.execute_all(&mut exec, 100).unwrap();
        assert_eq!(outcome.inserted, 2);

        let log = exec.sql_log();
        assert!(log[0].starts_with("INSERT INTO \"authors\""));
        assert!(log[1].starts_with("INSERT INTO \"books\""));
    }

    #[test]
    fn test_unconstrained_tables_keep_enqueue_order() {
        let mut queue = ActionQueue::new();
        queue.register_table("alpha", &[]);
        queue.register_table("beta", &[]);
        queue.enqueue(insert("beta", 1));
        queue.enqueue(insert("alpha", 2));

        let mut exec = RecordingExecutor::new();
        queue.execute_all(&mut exec, 100).unwrap();

        let log = exec.sql_log();
        assert!(log[0].starts_with("INSERT INTO \"beta\""));
        assert!(log[1].starts_with("INSERT INTO \"alpha\""));
    }

    #[test]
    fn test_insert_batching_chunks_by_batch_size() {
        let mut queue = ActionQueue::new();
        queue.register_table("posts", &[]);
        for id in 1..=3 {
            queue.enqueue(insert("posts", id));
        }

        let mut exec = RecordingExecutor::new();
        let outcome = queue.execute_all(&mut exec, 2).unwrap();
        assert_eq!(outcome.inserted, 3);

        let log = exec.sql_log();
        assert_eq!(log.len(), 2);
        assert_eq!(
            log[0],
            "INSERT INTO \"posts\" (\"id\") VALUES ($1), ($2)"
        );
        assert_eq!(log[1], "INSERT INTO \"posts\" (\"id\") VALUES ($1)");
        assert_eq!(exec.statements()[1].params, vec![Value::BigInt(3)]);
    }

    #[test]
    fn test_delete_reverse_order_and_in_batching() {
        let mut queue = ActionQueue::new();
        queue.register_table("authors", &[]);
        queue.register_table("books", &["authors"]);
        queue.enqueue(delete("authors", 1, false));
        queue.enqueue(delete("books", 10, false));
        queue.enqueue(delete("books", 11, false));

        let mut exec = RecordingExecutor::new();
        let outcome = queue.execute_all(&mut exec, 100).unwrap();
        assert_eq!(outcome.deleted, 3);

        let log = exec.sql_log();
        assert_eq!(log[0], "DELETE FROM \"books\" WHERE \"id\" IN ($1, $2)");
        assert_eq!(log[1], "DELETE FROM \"authors\" WHERE \"id\" = $1");
    }

    #[test]
    fn test_cycle_reported_with_participants() {
        let mut queue = ActionQueue::new();
        queue.register_table("chickens", &["eggs"]);
        queue.register_table("eggs", &["chickens"]);
        queue.enqueue(insert("chickens", 1));

        let mut exec = RecordingExecutor::new();
        let err = queue.execute_all(&mut exec, 100).unwrap_err();
        match err {
            Error::Flush(e) => {
                assert_eq!(e.kind, FlushErrorKind::DependencyCycle);
                assert!(e.tables.contains(&"chickens"));
                assert!(e.tables.contains(&"eggs"));
            }
            other => panic!("expected flush error, got {other:?}"),
        }
        assert!(exec.sql_log().is_empty());
    }

    #[test]
    fn test_versioned_update_zero_rows_is_stale() {
        let mut queue = ActionQueue::new();
        queue.register_table("posts", &[]);
        queue.enqueue(Action::Update {
            key: key(9),
            table: "posts",
            set_columns: vec!["title", "revision"],
            set_values: vec![Value::Text("new".to_string()), Value::BigInt(4)],
            key_columns: vec!["id"],
            key_values: vec![Value::BigInt(9)],
            version: Some(VersionPredicate {
                column: "revision",
                expected: 3,
            }),
        });

        let mut exec = RecordingExecutor::new();
        exec.affected_when_contains("UPDATE \"posts\"", 0);
        let err = queue.execute_all(&mut exec, 100).unwrap_err();
        match err {
            Error::Stale(e) => {
                assert_eq!(e.table, "posts");
                assert_eq!(e.key, "9");
                assert_eq!(e.expected_version, Some(3));
            }
            other => panic!("expected stale error, got {other:?}"),
        }
    }

    #[test]
    fn test_versioned_delete_zero_rows_is_stale() {
        let mut queue = ActionQueue::new();
        queue.register_table("posts", &[]);
        queue.enqueue(Action::Delete {
            key: key(5),
            table: "posts",
            key_columns: vec!["id"],
            key_values: vec![Value::BigInt(5)],
            version: Some(VersionPredicate {
                column: "revision",
                expected: 7,
            }),
            orphan: false,
        });

        let mut exec = RecordingExecutor::new();
        exec.affected_when_contains("DELETE FROM \"posts\"", 0);
        let err = queue.execute_all(&mut exec, 100).unwrap_err();
        match err {
            Error::Stale(e) => {
                assert_eq!(e.expected_version, Some(7));
            }
            other => panic!("expected stale error, got {other:?}"),
        }
    }

    #[test]
    fn test_tier_sequence() {
        let mut queue = ActionQueue::new();
        queue.register_table("authors", &[]);
        queue.register_table("tags", &[]);
        queue.register_table("books", &["authors"]);
        queue.register_table("book_tags", &["books", "tags"]);

        queue.enqueue(Action::Update {
            key: key(1),
            table: "authors",
            set_columns: vec!["name"],
            set_values: vec![Value::Text("x".to_string())],
            key_columns: vec!["id"],
            key_values: vec![Value::BigInt(1)],
            version: None,
        });
        queue.enqueue(Action::LinkRemove {
            table: "book_tags",
            columns: ["book_id", "tag_id"],
            values: [Value::BigInt(10), Value::BigInt(3)],
        });
        queue.enqueue(Action::LinkAdd {
            table: "book_tags",
            columns: ["book_id", "tag_id"],
            values: [Value::BigInt(11), Value::BigInt(3)],
        });
        queue.enqueue(insert("books", 11));
        queue.enqueue(insert("authors", 2));
        queue.enqueue(delete("books", 12, false));
        queue.enqueue(delete("books", 13, true));

        let mut exec = RecordingExecutor::new();
        let outcome = queue.execute_all(&mut exec, 100).unwrap();
        assert_eq!(outcome.inserted, 3);
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.deleted, 3);

        let log = exec.sql_log();
        assert!(log[0].starts_with("DELETE FROM \"books\""), "orphan first");
        assert!(log[1].starts_with("INSERT INTO \"authors\""));
        assert!(log[2].starts_with("INSERT INTO \"books\""));
        assert!(log[3].starts_with("INSERT INTO \"book_tags\""));
        assert!(log[4].starts_with("UPDATE \"authors\""));
        assert!(log[5].starts_with("DELETE FROM \"book_tags\""));
        assert!(log[6].starts_with("DELETE FROM \"books\""));
    }

    #[test]
    fn test_clear_drops_pending_actions() {
        let mut queue = ActionQueue::new();
        queue.register_table("posts", &[]);
        queue.enqueue(insert("posts", 1));
        assert_eq!(queue.pending().inserts, 1);
        assert!(!queue.is_empty());

        queue.clear();
        assert!(queue.is_empty());

        let mut exec = RecordingExecutor::new();
        let outcome = queue.execute_all(&mut exec, 100).unwrap();
        assert!(outcome.is_empty());
        assert!(exec.sql_log().is_empty());
    }
}

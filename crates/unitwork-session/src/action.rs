//! Pending statement actions.
//!
//! Flush turns dirty-check and cascade results into [`Action`] values, the
//! queue orders them, and each action renders to one parameterized SQL
//! statement (or merges with its batch into one). Statements use `$n`
//! placeholders and double-quoted identifiers; identifier names come from
//! static column metadata, never from user input.

use unitwork_core::{EntityKey, Value};

/// Operation kind, in execution-tier order.
///
/// The derived ordering is the tier ordering the queue executes in:
/// orphan removals, inserts, updates, collection removals, deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionKind {
    /// Delete of a child disassociated from an orphan-removal collection.
    OrphanDelete,
    /// Entity row insert, or link-table row insert.
    Insert,
    /// Entity row update of dirty columns.
    Update,
    /// Link-table row delete.
    CollectionRemove,
    /// Entity row delete.
    Delete,
}

/// Grouping key: same-tier actions sharing one may merge into a single
/// statement, preserving insertion order within the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchKey {
    /// Operation kind.
    pub kind: ActionKind,
    /// Target table.
    pub table: &'static str,
}

/// Optimistic-lock predicate carried by versioned updates and deletes.
///
/// Rendered as `AND "<column>" = $n` in the WHERE clause; zero affected
/// rows then reads as a stale-state conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionPredicate {
    /// Version column (database name).
    pub column: &'static str,
    /// Version this unit of work loaded.
    pub expected: i64,
}

/// One queued SQL-producing operation.
///
/// Column name vectors hold database column names in statement order.
#[derive(Debug, Clone)]
pub enum Action {
    /// Insert one entity row.
    Insert {
        /// Identity of the inserted entity.
        key: EntityKey,
        /// Target table.
        table: &'static str,
        /// Insertable columns.
        columns: Vec<&'static str>,
        /// Values, aligned with `columns`.
        values: Vec<Value>,
    },
    /// Update the dirty columns of one entity row.
    Update {
        /// Identity of the updated entity.
        key: EntityKey,
        /// Target table.
        table: &'static str,
        /// Columns in the SET clause.
        set_columns: Vec<&'static str>,
        /// Values, aligned with `set_columns`.
        set_values: Vec<Value>,
        /// Primary key columns.
        key_columns: Vec<&'static str>,
        /// Primary key values.
        key_values: Vec<Value>,
        /// Version predicate, when the entity is versioned or version-locked.
        version: Option<VersionPredicate>,
    },
    /// Delete one entity row.
    Delete {
        /// Identity of the deleted entity.
        key: EntityKey,
        /// Target table.
        table: &'static str,
        /// Primary key columns.
        key_columns: Vec<&'static str>,
        /// Primary key values.
        key_values: Vec<Value>,
        /// Version predicate, when the entity is versioned.
        version: Option<VersionPredicate>,
        /// Whether this delete came from orphan removal.
        orphan: bool,
    },
    /// Insert one link-table row (many-to-many membership added).
    LinkAdd {
        /// Link table.
        table: &'static str,
        /// Local and remote key columns.
        columns: [&'static str; 2],
        /// Local and remote key values.
        values: [Value; 2],
    },
    /// Delete one link-table row (many-to-many membership removed).
    LinkRemove {
        /// Link table.
        table: &'static str,
        /// Local and remote key columns.
        columns: [&'static str; 2],
        /// Local and remote key values.
        values: [Value; 2],
    },
}

impl Action {
    /// The tier this action executes in.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Insert { .. } | Action::LinkAdd { .. } => ActionKind::Insert,
            Action::Update { .. } => ActionKind::Update,
            Action::Delete { orphan: true, .. } => ActionKind::OrphanDelete,
            Action::Delete { orphan: false, .. } => ActionKind::Delete,
            Action::LinkRemove { .. } => ActionKind::CollectionRemove,
        }
    }

    /// Target table.
    #[must_use]
    pub fn table(&self) -> &'static str {
        match self {
            Action::Insert { table, .. }
            | Action::Update { table, .. }
            | Action::Delete { table, .. }
            | Action::LinkAdd { table, .. }
            | Action::LinkRemove { table, .. } => table,
        }
    }

    /// Grouping key for batched execution.
    #[must_use]
    pub fn batch_key(&self) -> BatchKey {
        BatchKey {
            kind: self.kind(),
            table: self.table(),
        }
    }

    /// Identity of the affected entity; link-table rows have none.
    #[must_use]
    pub fn entity_key(&self) -> Option<EntityKey> {
        match self {
            Action::Insert { key, .. }
            | Action::Update { key, .. }
            | Action::Delete { key, .. } => Some(*key),
            Action::LinkAdd { .. } | Action::LinkRemove { .. } => None,
        }
    }
}

// ============================================================================
// SQL rendering
// ============================================================================

fn quoted(names: &[&str]) -> String {
    names
        .iter()
        .map(|n| format!("\"{n}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a multi-row INSERT for one table; parameters span rows.
pub(crate) fn render_multi_insert(
    table: &str,
    columns: &[&'static str],
    rows: &[Vec<Value>],
) -> (String, Vec<Value>) {
    let mut sql = format!("INSERT INTO \"{}\" ({}) VALUES ", table, quoted(columns));
    let mut params = Vec::with_capacity(rows.len() * columns.len());
    let mut idx = 1;
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        let placeholders: Vec<String> = (0..row.len())
            .map(|_| {
                let p = format!("${idx}");
                idx += 1;
                p
            })
            .collect();
        sql.push('(');
        sql.push_str(&placeholders.join(", "));
        sql.push(')');
        params.extend(row.iter().cloned());
    }
    (sql, params)
}

/// Render an UPDATE of the given SET columns keyed by primary key, with an
/// optional version predicate. Parameter order: set values, key values,
/// expected version.
pub(crate) fn render_update(
    table: &str,
    set_columns: &[&'static str],
    key_columns: &[&'static str],
    version: Option<&VersionPredicate>,
) -> String {
    let mut idx = 1;
    let set_clause: String = set_columns
        .iter()
        .map(|col| {
            let clause = format!("\"{col}\" = ${idx}");
            idx += 1;
            clause
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut where_clause: String = key_columns
        .iter()
        .map(|col| {
            let clause = format!("\"{col}\" = ${idx}");
            idx += 1;
            clause
        })
        .collect::<Vec<_>>()
        .join(" AND ");

    if let Some(v) = version {
        where_clause.push_str(&format!(" AND \"{}\" = ${idx}", v.column));
    }

    format!("UPDATE \"{table}\" SET {set_clause} WHERE {where_clause}")
}

/// Render a single-row DELETE keyed by primary key, with an optional
/// version predicate. Parameter order: key values, expected version.
pub(crate) fn render_delete(
    table: &str,
    key_columns: &[&'static str],
    version: Option<&VersionPredicate>,
) -> String {
    let mut idx = 1;
    let mut where_clause: String = key_columns
        .iter()
        .map(|col| {
            let clause = format!("\"{col}\" = ${idx}");
            idx += 1;
            clause
        })
        .collect::<Vec<_>>()
        .join(" AND ");

    if let Some(v) = version {
        where_clause.push_str(&format!(" AND \"{}\" = ${idx}", v.column));
    }

    format!("DELETE FROM \"{table}\" WHERE {where_clause}")
}

/// Render a keyed multi-row DELETE over a single-column key.
pub(crate) fn render_delete_in(table: &str, key_column: &str, count: usize) -> String {
    let placeholders: Vec<String> = (1..=count).map(|i| format!("${i}")).collect();
    format!(
        "DELETE FROM \"{}\" WHERE \"{}\" IN ({})",
        table,
        key_column,
        placeholders.join(", ")
    )
}

/// Render a link-table row insert.
pub(crate) fn render_link_add(table: &str, columns: &[&'static str; 2]) -> String {
    format!(
        "INSERT INTO \"{}\" (\"{}\", \"{}\") VALUES ($1, $2)",
        table, columns[0], columns[1]
    )
}

/// Render a link-table row delete.
pub(crate) fn render_link_remove(table: &str, columns: &[&'static str; 2]) -> String {
    format!(
        "DELETE FROM \"{}\" WHERE \"{}\" = $1 AND \"{}\" = $2",
        table, columns[0], columns[1]
    )
}

/// Render a keyed SELECT of the given columns.
pub(crate) fn render_select_by_key(
    table: &str,
    columns: &[&'static str],
    key_columns: &[&'static str],
) -> String {
    let where_clause: String = key_columns
        .iter()
        .enumerate()
        .map(|(i, col)| format!("\"{}\" = ${}", col, i + 1))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(
        "SELECT {} FROM \"{}\" WHERE {}",
        quoted(columns),
        table,
        where_clause
    )
}

/// Render a keyed row lock.
pub(crate) fn render_lock_row(table: &str, key_columns: &[&'static str]) -> String {
    let where_clause: String = key_columns
        .iter()
        .enumerate()
        .map(|(i, col)| format!("\"{}\" = ${}", col, i + 1))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!("SELECT 1 FROM \"{table}\" WHERE {where_clause} FOR UPDATE")
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::TypeId;

    fn key(n: i64) -> EntityKey {
        EntityKey::from_parts(TypeId::of::<()>(), &[Value::BigInt(n)])
    }

    #[test]
    fn test_kind_and_tier_order() {
        let orphan = Action::Delete {
            key: key(1),
            table: "kids",
            key_columns: vec!["id"],
            key_values: vec![Value::BigInt(1)],
            version: None,
            orphan: true,
        };
        assert_eq!(orphan.kind(), ActionKind::OrphanDelete);

        let link = Action::LinkAdd {
            table: "book_tags",
            columns: ["book_id", "tag_id"],
            values: [Value::BigInt(1), Value::BigInt(2)],
        };
        assert_eq!(link.kind(), ActionKind::Insert);
        assert!(link.entity_key().is_none());

        assert!(ActionKind::OrphanDelete < ActionKind::Insert);
        assert!(ActionKind::Insert < ActionKind::Update);
        assert!(ActionKind::Update < ActionKind::CollectionRemove);
        assert!(ActionKind::CollectionRemove < ActionKind::Delete);
    }

    #[test]
    fn test_multi_insert_rendering() {
        let (sql, params) = render_multi_insert(
            "posts",
            &["id", "title"],
            &[
                vec![Value::BigInt(1), Value::Text("a".to_string())],
                vec![Value::BigInt(2), Value::Text("b".to_string())],
            ],
        );
        assert_eq!(
            sql,
            "INSERT INTO \"posts\" (\"id\", \"title\") VALUES ($1, $2), ($3, $4)"
        );
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_update_rendering_with_version() {
        let sql = render_update(
            "posts",
            &["title", "revision"],
            &["id"],
            Some(&VersionPredicate {
                column: "revision",
                expected: 3,
            }),
        );
        assert_eq!(
            sql,
            "UPDATE \"posts\" SET \"title\" = $1, \"revision\" = $2 \
             WHERE \"id\" = $3 AND \"revision\" = $4"
        );
    }

    #[test]
    fn test_update_rendering_composite_key() {
        let sql = render_update("grades", &["score"], &["student_id", "course_id"], None);
        assert_eq!(
            sql,
            "UPDATE \"grades\" SET \"score\" = $1 \
             WHERE \"student_id\" = $2 AND \"course_id\" = $3"
        );
    }

    #[test]
    fn test_delete_rendering() {
        let sql = render_delete(
            "posts",
            &["id"],
            Some(&VersionPredicate {
                column: "revision",
                expected: 1,
            }),
        );
        assert_eq!(
            sql,
            "DELETE FROM \"posts\" WHERE \"id\" = $1 AND \"revision\" = $2"
        );

        assert_eq!(
            render_delete_in("posts", "id", 3),
            "DELETE FROM \"posts\" WHERE \"id\" IN ($1, $2, $3)"
        );
    }

    #[test]
    fn test_link_rendering() {
        assert_eq!(
            render_link_add("book_tags", &["book_id", "tag_id"]),
            "INSERT INTO \"book_tags\" (\"book_id\", \"tag_id\") VALUES ($1, $2)"
        );
        assert_eq!(
            render_link_remove("book_tags", &["book_id", "tag_id"]),
            "DELETE FROM \"book_tags\" WHERE \"book_id\" = $1 AND \"tag_id\" = $2"
        );
    }

    #[test]
    fn test_select_and_lock_rendering() {
        assert_eq!(
            render_select_by_key("posts", &["id", "title"], &["id"]),
            "SELECT \"id\", \"title\" FROM \"posts\" WHERE \"id\" = $1"
        );
        assert_eq!(
            render_lock_row("posts", &["id"]),
            "SELECT 1 FROM \"posts\" WHERE \"id\" = $1 FOR UPDATE"
        );
    }
}

//! Static column metadata.
//!
//! Each entity type declares its persistent columns as a `&'static
//! [ColumnInfo]` table built with const methods:
//!
//! ```ignore
//! static COLUMNS: [ColumnInfo; 3] = [
//!     ColumnInfo::new("id").primary_key(),
//!     ColumnInfo::new("title"),
//!     ColumnInfo::new("author_id").foreign_key("authors.id").nullable(),
//! ];
//! ```

/// Metadata for one persistent column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Field name on the entity struct.
    pub name: &'static str,
    /// Database column name, if different from the field name.
    pub column: Option<&'static str>,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Whether this column is part of the primary key.
    pub primary_key: bool,
    /// Whether this column carries the optimistic-lock version.
    pub version: bool,
    /// Whether this column has a unique constraint.
    pub unique: bool,
    /// Foreign key reference as `"table.column"`, if any.
    pub foreign_key: Option<&'static str>,
    /// Whether the column participates in INSERT statements.
    pub insertable: bool,
    /// Whether the column participates in UPDATE statements.
    pub updatable: bool,
}

impl ColumnInfo {
    /// Create column metadata with defaults (not null, not key, writable).
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            column: None,
            nullable: false,
            primary_key: false,
            version: false,
            unique: false,
            foreign_key: None,
            insertable: true,
            updatable: true,
        }
    }

    /// Override the database column name.
    #[must_use]
    pub const fn column(mut self, column: &'static str) -> Self {
        self.column = Some(column);
        self
    }

    /// Allow NULL.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Mark as (part of) the primary key.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark as the optimistic-lock version column.
    ///
    /// Updates and deletes of entities with a version column carry a
    /// `WHERE <version> = ?` predicate, and updates increment it.
    #[must_use]
    pub const fn version(mut self) -> Self {
        self.version = true;
        self
    }

    /// Mark as unique.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Declare a foreign key reference as `"table.column"`.
    #[must_use]
    pub const fn foreign_key(mut self, reference: &'static str) -> Self {
        self.foreign_key = Some(reference);
        self
    }

    /// Exclude from INSERT statements (database-generated columns).
    #[must_use]
    pub const fn not_insertable(mut self) -> Self {
        self.insertable = false;
        self
    }

    /// Exclude from UPDATE statements (immutable columns).
    #[must_use]
    pub const fn not_updatable(mut self) -> Self {
        self.updatable = false;
        self
    }

    /// The effective database column name.
    #[must_use]
    pub const fn column_name(&self) -> &'static str {
        match self.column {
            Some(c) => c,
            None => self.name,
        }
    }

    /// The table referenced by this column's foreign key, if any.
    #[must_use]
    pub fn referenced_table(&self) -> Option<&'static str> {
        self.foreign_key.and_then(|fk| fk.split('.').next())
    }

    /// The column referenced by this column's foreign key, if any.
    #[must_use]
    pub fn referenced_column(&self) -> Option<&'static str> {
        self.foreign_key.and_then(|fk| fk.split('.').nth(1))
    }
}

/// Find a column by field name in a metadata table.
#[must_use]
pub fn find_column(
    columns: &'static [ColumnInfo],
    name: &str,
) -> Option<&'static ColumnInfo> {
    columns.iter().find(|c| c.name == name)
}

/// The version column of a metadata table, if one is declared.
#[must_use]
pub fn version_column(columns: &'static [ColumnInfo]) -> Option<&'static ColumnInfo> {
    columns.iter().find(|c| c.version)
}

//! The `Entity` trait: metadata and state access for persistent types.
//!
//! An entity maps one struct to one table. Implementations supply static
//! metadata (table, key columns, column and association tables) and state
//! access (column values, key values, transience, version). The unit of work
//! never inspects entity structs directly; everything goes through this
//! trait and the type-erased handles built from it.
//!
//! Identifier values are application-assigned: an instance must carry a
//! usable primary key by the time it is persisted. Transience is reported by
//! the implementation (commonly `version.is_none()` or an
//! unset-surrogate-key convention).
//!
//! # Example
//!
//! ```ignore
//! #[derive(Debug)]
//! struct Author {
//!     id: i64,
//!     name: String,
//!     saved: bool,
//! }
//!
//! impl Entity for Author {
//!     const TABLE: &'static str = "authors";
//!     const KEY: &'static [&'static str] = &["id"];
//!
//!     fn columns() -> &'static [ColumnInfo] {
//!         static COLUMNS: [ColumnInfo; 2] = [
//!             ColumnInfo::new("id").primary_key(),
//!             ColumnInfo::new("name"),
//!         ];
//!         &COLUMNS
//!     }
//!
//!     fn state(&self) -> Vec<(&'static str, Value)> {
//!         vec![
//!             ("id", Value::BigInt(self.id)),
//!             ("name", Value::Text(self.name.clone())),
//!         ]
//!     }
//!
//!     fn key_values(&self) -> Vec<Value> {
//!         vec![Value::BigInt(self.id)]
//!     }
//!
//!     fn is_transient(&self) -> bool {
//!         !self.saved
//!     }
//!
//!     fn from_row(row: &Row) -> Result<Self> {
//!         Ok(Self {
//!             id: row.get_named("id")?,
//!             name: row.get_named("name")?,
//!             saved: true,
//!         })
//!     }
//! }
//! ```

use crate::association::AssociationInfo;
use crate::column::ColumnInfo;
use crate::error::Result;
use crate::handle::AssociationEdge;
use crate::row::Row;
use crate::value::Value;
use std::sync::{Arc, RwLock};

/// Shared handle to a managed instance.
///
/// The unit of work hands out clones of one `Arc` per identity, so
/// referential equality (`Arc::ptr_eq`) holds for repeated loads of the
/// same row.
pub type EntityRef<T> = Arc<RwLock<T>>;

/// Read guard over a managed instance.
pub type EntityReadGuard<'a, T> = std::sync::RwLockReadGuard<'a, T>;

/// Write guard over a managed instance.
pub type EntityWriteGuard<'a, T> = std::sync::RwLockWriteGuard<'a, T>;

/// Wrap a value in a shareable entity handle.
pub fn new_entity_ref<T>(value: T) -> EntityRef<T> {
    Arc::new(RwLock::new(value))
}

/// A persistent entity type.
pub trait Entity: Sized + Send + Sync + 'static {
    /// Table this entity maps to.
    const TABLE: &'static str;

    /// Primary key column names, in declaration order.
    const KEY: &'static [&'static str];

    /// Association edges leaving this entity.
    const ASSOCIATIONS: &'static [AssociationInfo] = &[];

    /// Static column metadata, in statement order.
    fn columns() -> &'static [ColumnInfo];

    /// Current persistent state as (field name, value) pairs, in
    /// `columns()` order.
    fn state(&self) -> Vec<(&'static str, Value)>;

    /// Current primary key values, in `KEY` order.
    fn key_values(&self) -> Vec<Value>;

    /// Whether this instance has never been written to storage.
    fn is_transient(&self) -> bool;

    /// Hydrate a fresh instance from a result row.
    fn from_row(row: &Row) -> Result<Self>;

    /// Current optimistic-lock version, if this entity is versioned.
    fn version(&self) -> Option<i64> {
        None
    }

    /// Store the version written by a flush (seed on insert, increment on
    /// versioned update). The default is a no-op for unversioned entities.
    fn set_version(&mut self, _version: i64) {}

    /// Live association edges for cascade traversal.
    ///
    /// The default reports no edges; entities holding `EntityRef` fields
    /// override this to expose them. Order should follow `ASSOCIATIONS`.
    fn edges(&self) -> Vec<AssociationEdge> {
        Vec::new()
    }

    /// Overwrite this instance's persistent state from a result row.
    ///
    /// The default replaces the whole struct via `from_row`, which resets
    /// association holder fields to their hydrated defaults. Override to
    /// apply scalar columns only.
    fn apply_row(&mut self, row: &Row) -> Result<()> {
        *self = Self::from_row(row)?;
        Ok(())
    }
}

/// A snapshot of one instance's persistent state, captured under its lock.
#[derive(Debug, Clone)]
pub struct EntityState {
    /// (field name, value) pairs in `columns()` order.
    pub values: Vec<(&'static str, Value)>,
    /// Primary key values in `KEY` order.
    pub key_values: Vec<Value>,
    /// Optimistic-lock version, if versioned.
    pub version: Option<i64>,
    /// Whether the instance reported itself transient.
    pub transient: bool,
}

impl EntityState {
    /// Capture the state of a live instance.
    pub fn capture<T: Entity>(entity: &T) -> Self {
        Self {
            values: entity.state(),
            key_values: entity.key_values(),
            version: entity.version(),
            transient: entity.is_transient(),
        }
    }

    /// Rebuild a state from a result row using static column metadata.
    ///
    /// Missing columns read as NULL. Used where the baseline must reflect
    /// storage rather than a live instance, such as merging detached state
    /// over a freshly read row.
    #[must_use]
    pub fn from_row(
        columns: &'static [ColumnInfo],
        key_columns: &'static [&'static str],
        row: &Row,
    ) -> Self {
        let mut values = Vec::with_capacity(columns.len());
        let mut version = None;
        for col in columns {
            let value = row
                .get_by_name(col.column_name())
                .cloned()
                .unwrap_or(Value::Null);
            if col.version {
                version = value.as_i64();
            }
            values.push((col.name, value));
        }
        let key_values = key_columns
            .iter()
            .map(|k| {
                let db_name =
                    crate::column::find_column(columns, k).map_or(*k, ColumnInfo::column_name);
                row.get_by_name(db_name).cloned().unwrap_or(Value::Null)
            })
            .collect();
        Self {
            values,
            key_values,
            version,
            transient: false,
        }
    }

    /// Look up a value by field name.
    #[must_use]
    pub fn value_of(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    /// The values alone, in column order.
    #[must_use]
    pub fn column_values(&self) -> Vec<Value> {
        self.values.iter().map(|(_, v)| v.clone()).collect()
    }

    /// Build a result row from this state, for re-hydration.
    #[must_use]
    pub fn to_row(&self) -> Row {
        let names = self.values.iter().map(|(n, _)| (*n).to_string()).collect();
        let values = self.values.iter().map(|(_, v)| v.clone()).collect();
        Row::new(names, values)
    }
}

//! Core types and traits for the unitwork persistence engine.
//!
//! This crate provides the foundational abstractions the unit of work is
//! built on:
//!
//! - `Entity` trait for struct/table mapping and state access
//! - `ColumnInfo` / `AssociationInfo` static metadata tables
//! - `EntityKey` identity keys and `EntityHandle` type-erased instances
//! - `StatementExecutor` trait for synchronous statement execution
//! - `Value` / `Row` dynamic values and result rows
//! - `Error` with distinguished constraint-violation and stale-state kinds

pub mod association;
pub mod column;
pub mod entity;
pub mod error;
pub mod executor;
pub mod handle;
pub mod key;
pub mod row;
pub mod value;

pub use association::{
    AssociationInfo, AssociationKind, CascadeOp, CascadeStyle, LinkTableInfo, find_association,
};
pub use column::{ColumnInfo, find_column, version_column};
pub use entity::{
    Entity, EntityReadGuard, EntityRef, EntityState, EntityWriteGuard, new_entity_ref,
};
pub use error::{
    CacheError, CacheErrorKind, Error, FlushError, FlushErrorKind, IdentityError,
    IdentityErrorKind, Result, SessionError, SessionErrorKind, StaleError, StatementError,
    StatementErrorKind, TypeError,
};
pub use executor::{RecordedStatement, RecordingExecutor, StatementExecutor};
pub use handle::{AssociationEdge, EdgeTarget, EntityHandle};
pub use key::{EntityKey, display_key, hash_values};
pub use row::{FromValue, Row, RowShape};
pub use value::Value;

//! unitwork - a unit-of-work persistence engine for Rust.
//!
//! unitwork keeps an object graph and a SQL database in sync without
//! writing on every mutation. Entities are plain structs with static
//! metadata; a [`UnitOfWork`] tracks the instances you load and persist,
//! computes the minimal set of statements at flush time, and executes them
//! in foreign-key order inside a transaction.
//!
//! # Quick Start
//!
//! ```ignore
//! use unitwork::prelude::*;
//!
//! let mut uow = UnitOfWork::new(executor);
//!
//! // Transient instances insert at the next flush; cascades pull in
//! // reachable children.
//! let author = new_entity_ref(Author::new(1, "Ada"));
//! uow.persist(&author)?;
//!
//! // Loads are identity-mapped: the same row is the same instance.
//! let loaded = uow.get::<Author>(&[Value::BigInt(1)])?;
//!
//! // Mutate freely; flush writes only the dirty columns.
//! author.write().unwrap().name = "Ada L.".into();
//! uow.commit()?;
//! ```
//!
//! # Features
//!
//! - **Identity map**: one live instance per row, by type and primary key
//! - **Dirty checking**: snapshot diffs, column-level UPDATE statements
//! - **Cascades**: persist/merge/remove/refresh propagation with
//!   orphan removal on to-many edges
//! - **Ordered flush**: topological statement ordering and multi-row
//!   batching over a pluggable [`StatementExecutor`]
//! - **Optimistic locking**: version columns with stale-write detection
//! - **Second-level cache**: shared per-type regions with read-only,
//!   non-strict, read-write, and transactional strategies

// Core: entity metadata, values, executors, errors.
pub use unitwork_core::{
    AssociationEdge, AssociationInfo, AssociationKind, CacheError, CacheErrorKind, CascadeOp,
    CascadeStyle, ColumnInfo, EdgeTarget, Entity, EntityHandle, EntityKey, EntityReadGuard,
    EntityRef, EntityState, EntityWriteGuard, Error, FlushError, FlushErrorKind, FromValue,
    IdentityError, IdentityErrorKind, LinkTableInfo, RecordedStatement, RecordingExecutor, Result,
    Row, RowShape, SessionError, SessionErrorKind, StaleError, StatementError, StatementErrorKind,
    StatementExecutor, TypeError, Value, display_key, find_association, find_column,
    new_entity_ref, version_column,
};

// Session: the unit of work and its observable surface.
pub use unitwork_session::{
    EntityStatus, EventRegistry, FlushOutcome, LockMode, PendingCounts, UnitOfWork,
    UnitOfWorkConfig, UnitOfWorkStats,
};

// Cache: second-level regions and strategies.
pub use unitwork_cache::{
    AccessStrategy, CacheConfig, CacheRegion, CachedState, MemoryRegion, RegionHandle,
    RegionStats, RegionStatsSnapshot, SecondLevelCache, SoftLock,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use unitwork::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        AccessStrategy,
        AssociationEdge,
        AssociationInfo,
        AssociationKind,
        CascadeStyle,
        ColumnInfo,
        // Entity model
        Entity,
        EntityKey,
        EntityRef,
        Error,
        FlushOutcome,
        LinkTableInfo,
        LockMode,
        Result,
        Row,
        // Cache
        SecondLevelCache,
        // Execution
        StatementExecutor,
        // Session
        UnitOfWork,
        UnitOfWorkConfig,
        Value,
        new_entity_ref,
    };
}

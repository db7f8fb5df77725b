//! Type-erased entity handles.
//!
//! The unit of work tracks instances of many entity types in one identity
//! map and walks association edges whose targets it cannot name statically.
//! [`EntityHandle`] erases the concrete type behind `Box<dyn Any>` holding
//! the shared `EntityRef<T>`, paired with a small table of fn pointers
//! captured at construction (where `T` is still known) for state capture,
//! edge enumeration, and row application.
//!
//! Handles are cheap to clone: cloning copies the fn-pointer table and
//! clones the inner `Arc`, never the instance.

use crate::association::AssociationInfo;
use crate::column::ColumnInfo;
use crate::entity::{Entity, EntityRef, EntityState};
use crate::error::{Error, IdentityError, IdentityErrorKind, Result};
use crate::key::EntityKey;
use crate::row::Row;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

type ErasedInstance = Box<dyn Any + Send + Sync>;
type ErasedRef<'a> = &'a (dyn Any + Send + Sync);

/// Per-type operations captured while the type was still known.
#[derive(Clone, Copy)]
struct HandleVtable {
    table: &'static str,
    type_name: &'static str,
    key_columns: &'static [&'static str],
    columns: fn() -> &'static [ColumnInfo],
    associations: fn() -> &'static [AssociationInfo],
    capture: fn(ErasedRef<'_>) -> Result<EntityState>,
    edges: fn(ErasedRef<'_>) -> Result<Vec<AssociationEdge>>,
    apply_row: fn(ErasedRef<'_>, &Row) -> Result<()>,
    set_version: fn(ErasedRef<'_>, i64) -> Result<()>,
    clone_instance: fn(ErasedRef<'_>) -> ErasedInstance,
    instance_ptr: fn(ErasedRef<'_>) -> usize,
}

fn downcast<T: Entity>(any: ErasedRef<'_>) -> Result<&EntityRef<T>> {
    any.downcast_ref::<EntityRef<T>>().ok_or_else(|| {
        Error::custom(format!(
            "handle does not hold {}",
            std::any::type_name::<T>()
        ))
    })
}

fn poisoned<T: Entity>() -> Error {
    Error::custom(format!(
        "lock poisoned for {} instance",
        std::any::type_name::<T>()
    ))
}

impl HandleVtable {
    fn of<T: Entity>() -> Self {
        Self {
            table: T::TABLE,
            type_name: std::any::type_name::<T>(),
            key_columns: T::KEY,
            columns: T::columns,
            associations: || T::ASSOCIATIONS,
            capture: |any| {
                let instance = downcast::<T>(any)?;
                let guard = instance.read().map_err(|_| poisoned::<T>())?;
                Ok(EntityState::capture(&*guard))
            },
            edges: |any| {
                let instance = downcast::<T>(any)?;
                let guard = instance.read().map_err(|_| poisoned::<T>())?;
                Ok(guard.edges())
            },
            apply_row: |any, row| {
                let instance = downcast::<T>(any)?;
                let mut guard = instance.write().map_err(|_| poisoned::<T>())?;
                guard.apply_row(row)
            },
            set_version: |any, version| {
                let instance = downcast::<T>(any)?;
                let mut guard = instance.write().map_err(|_| poisoned::<T>())?;
                guard.set_version(version);
                Ok(())
            },
            clone_instance: |any| match any.downcast_ref::<EntityRef<T>>() {
                Some(r) => Box::new(Arc::clone(r)),
                // Unreachable for handles built through `of`, but keep the
                // erased shape total.
                None => Box::new(()),
            },
            instance_ptr: |any| match any.downcast_ref::<EntityRef<T>>() {
                Some(r) => Arc::as_ptr(r) as usize,
                None => 0,
            },
        }
    }
}

/// A type-erased reference to one managed (or to-be-managed) instance.
pub struct EntityHandle {
    type_id: TypeId,
    instance: ErasedInstance,
    vtable: HandleVtable,
}

impl EntityHandle {
    /// Erase a shared instance handle.
    #[must_use]
    pub fn of<T: Entity>(instance: &EntityRef<T>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            instance: Box::new(Arc::clone(instance)),
            vtable: HandleVtable::of::<T>(),
        }
    }

    /// The erased entity type.
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Table of the erased entity type.
    #[must_use]
    pub const fn table(&self) -> &'static str {
        self.vtable.table
    }

    /// Rust type name, for diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.vtable.type_name
    }

    /// Primary key column names of the erased type.
    #[must_use]
    pub const fn key_columns(&self) -> &'static [&'static str] {
        self.vtable.key_columns
    }

    /// Static column metadata of the erased type.
    #[must_use]
    pub fn columns(&self) -> &'static [ColumnInfo] {
        (self.vtable.columns)()
    }

    /// Static association metadata of the erased type.
    #[must_use]
    pub fn associations(&self) -> &'static [AssociationInfo] {
        (self.vtable.associations)()
    }

    /// Capture the instance's current state under its read lock.
    pub fn state(&self) -> Result<EntityState> {
        (self.vtable.capture)(self.instance.as_ref())
    }

    /// Compute the identity key from the instance's current key values.
    ///
    /// Fails with a missing-key identity error if the key is empty or all
    /// NULL.
    pub fn key(&self) -> Result<EntityKey> {
        let state = self.state()?;
        self.key_for(&state)
    }

    /// Compute the identity key from already-captured state.
    pub fn key_for(&self, state: &EntityState) -> Result<EntityKey> {
        if state.key_values.is_empty() || state.key_values.iter().all(crate::Value::is_null) {
            return Err(IdentityError::new(
                IdentityErrorKind::MissingKey,
                self.vtable.type_name,
                "primary key is empty or all NULL",
            )
            .into());
        }
        Ok(EntityKey::from_parts(self.type_id, &state.key_values))
    }

    /// Enumerate the instance's live association edges.
    pub fn edges(&self) -> Result<Vec<AssociationEdge>> {
        (self.vtable.edges)(self.instance.as_ref())
    }

    /// Overwrite the instance's persistent state from a result row.
    pub fn apply_row(&self, row: &Row) -> Result<()> {
        (self.vtable.apply_row)(self.instance.as_ref(), row)
    }

    /// Store a flush-assigned version on the instance.
    pub fn set_version(&self, version: i64) -> Result<()> {
        (self.vtable.set_version)(self.instance.as_ref(), version)
    }

    /// Recover the typed shared handle, if `T` matches.
    #[must_use]
    pub fn resolve<T: Entity>(&self) -> Option<EntityRef<T>> {
        self.instance
            .downcast_ref::<EntityRef<T>>()
            .map(Arc::clone)
    }

    /// Whether two handles refer to the same live instance.
    #[must_use]
    pub fn same_instance(&self, other: &EntityHandle) -> bool {
        self.type_id == other.type_id && self.instance_ptr() == other.instance_ptr()
    }

    /// Address of the shared instance, for identity comparisons.
    #[must_use]
    pub fn instance_ptr(&self) -> usize {
        (self.vtable.instance_ptr)(self.instance.as_ref())
    }
}

impl Clone for EntityHandle {
    fn clone(&self) -> Self {
        Self {
            type_id: self.type_id,
            instance: (self.vtable.clone_instance)(self.instance.as_ref()),
            vtable: self.vtable,
        }
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityHandle")
            .field("type", &self.vtable.type_name)
            .field("table", &self.vtable.table)
            .field("ptr", &format_args!("{:#x}", self.instance_ptr()))
            .finish()
    }
}

/// One live association edge: metadata plus current targets.
#[derive(Debug, Clone)]
pub struct AssociationEdge {
    /// Static metadata for this edge.
    pub info: &'static AssociationInfo,
    /// Current targets.
    pub target: EdgeTarget,
}

/// The targets of a live association edge.
#[derive(Debug, Clone)]
pub enum EdgeTarget {
    /// To-one edge: absent or one target.
    One(Option<EntityHandle>),
    /// To-many edge: the current collection, in collection order.
    Many(Vec<EntityHandle>),
}

impl AssociationEdge {
    /// Build a to-one edge from an optional shared handle.
    #[must_use]
    pub fn to_one<T: Entity>(
        info: &'static AssociationInfo,
        target: Option<&EntityRef<T>>,
    ) -> Self {
        Self {
            info,
            target: EdgeTarget::One(target.map(EntityHandle::of)),
        }
    }

    /// Build a to-many edge from a collection of shared handles.
    #[must_use]
    pub fn to_many<'a, T: Entity>(
        info: &'static AssociationInfo,
        targets: impl IntoIterator<Item = &'a EntityRef<T>>,
    ) -> Self {
        Self {
            info,
            target: EdgeTarget::Many(targets.into_iter().map(EntityHandle::of).collect()),
        }
    }

    /// Iterate the edge's current target handles.
    pub fn handles(&self) -> impl Iterator<Item = &EntityHandle> {
        match &self.target {
            EdgeTarget::One(t) => EdgeHandles::One(t.iter()),
            EdgeTarget::Many(ts) => EdgeHandles::Many(ts.iter()),
        }
    }

    /// Consume the edge, returning its target handles.
    #[must_use]
    pub fn into_handles(self) -> Vec<EntityHandle> {
        match self.target {
            EdgeTarget::One(Some(t)) => vec![t],
            EdgeTarget::One(None) => Vec::new(),
            EdgeTarget::Many(ts) => ts,
        }
    }
}

enum EdgeHandles<'a> {
    One(std::option::Iter<'a, EntityHandle>),
    Many(std::slice::Iter<'a, EntityHandle>),
}

impl<'a> Iterator for EdgeHandles<'a> {
    type Item = &'a EntityHandle;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            EdgeHandles::One(it) => it.next(),
            EdgeHandles::Many(it) => it.next(),
        }
    }
}

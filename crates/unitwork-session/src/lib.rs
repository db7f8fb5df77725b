//! Unit of work for the unitwork persistence engine.
//!
//! `unitwork-session` is the coordination layer. It decides *what* to write
//! and *when*, while `unitwork-core` supplies the entity metadata and the
//! executor that does the writing.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: one live instance per row within a unit of work.
//! - **Change tracking**: load-time snapshots diffed at flush; only the
//!   columns that actually changed are written.
//! - **Cascades**: persist, merge, remove, and refresh propagate over
//!   association edges according to per-edge cascade styles.
//! - **Ordered flush**: an action queue topologically sorts writes by
//!   foreign-key dependency and batches compatible statements.
//! - **Second-level cache**: optional per-type regions from
//!   `unitwork-cache`, consulted on load and published after commit.
//!
//! # Design Philosophy
//!
//! - **Explicit over implicit**: nothing reaches the database until
//!   [`flush`](UnitOfWork::flush) or [`commit`](UnitOfWork::commit).
//! - **Failures poison**: a failed flush leaves the unit of work unusable
//!   until rolled back or cleared, never half-synchronized.
//! - **Type erasure at the edges**: the identity map and queue work on
//!   [`EntityHandle`](unitwork_core::EntityHandle)s so heterogeneous entity
//!   types share one flush pipeline.
//!
//! # Example
//!
//! ```ignore
//! let mut uow = UnitOfWork::new(executor);
//!
//! // Transient instances insert at the next flush.
//! uow.persist(&author)?;
//!
//! // Loads go through the identity map (and cache, if configured).
//! let same = uow.get::<Author>(&[Value::BigInt(1)])?;
//!
//! // Mutations are picked up by dirty checking; flush writes the diff.
//! author.write().unwrap().name = "renamed".into();
//! let outcome = uow.flush()?;
//!
//! uow.commit()?;
//! ```

pub mod action;
pub mod cascade;
pub mod change_tracker;
pub mod config;
pub mod events;
pub mod identity_map;
pub mod queue;
pub mod stats;
pub mod unit_of_work;

pub use action::{Action, ActionKind, BatchKey, VersionPredicate};
pub use cascade::{CascadeResolver, CascadeVisit};
pub use change_tracker::{ChangeTracker, CollectionDelta};
pub use config::UnitOfWorkConfig;
pub use events::EventRegistry;
pub use identity_map::{EntityEntry, EntityStatus, IdentityMap, LockMode};
pub use queue::{ActionQueue, FlushOutcome, PendingCounts};
pub use stats::UnitOfWorkStats;
pub use unit_of_work::UnitOfWork;

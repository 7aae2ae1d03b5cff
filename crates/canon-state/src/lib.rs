//! Canon State - Replicated entities and the container that converges them
//!
//! This crate implements the replication engine on top of the ordered log:
//! - Entities with tracked key, plain and held fields
//! - The primary-key index and pattern queries
//! - Impulses and their argument proxying
//! - In-flight undo records and their exact inverse
//! - Containers: receive, dispatch, clock, periodics and the horizon

pub mod action;
pub mod args;
pub mod container;
pub mod context;
pub mod entity;
pub mod field;
pub mod impulse;
pub mod periodic;
pub mod world;

#[cfg(test)]
mod testkit;

pub use action::{LogEntry, SystemBlock};
pub use args::{Arg, ArgList, Scalar};
pub use container::{Container, ContainerConfig, Dispatcher, Outbox, SharedContainer};
pub use context::{ActionContext, UndoRecord};
pub use entity::{Entity, EntityBuilder, EntityRef};
pub use field::{FieldId, FieldValue, TrackedField};
pub use impulse::{Block, Impulse, ImpulseTable};
pub use periodic::{Periodic, PeriodicId, Scheduler};
pub use world::{Snapshot, World, DEFAULT_MAX_KEY_DEPTH};

pub(crate) use field::{Property, Reaction, Role, Slot};
pub(crate) use impulse::{Applied, Dispatch};
pub(crate) use world::EntityRecord;

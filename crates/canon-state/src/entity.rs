//! Entities - replicated, keyed objects
//!
//! An entity type is a cheap, cloneable bundle of `TrackedField` handles plus
//! its own `EntityRef`. The field values live in the container's world; the
//! struct itself never changes after construction, so views can be cloned
//! out of the world and handed to impulse blocks.

use std::fmt;
use std::sync::Arc;

use canon_core::{ReplicaError, ReplicaResult};

use crate::{ActionContext, FieldValue, ImpulseTable, Property, Reaction, Role, Slot, TrackedField};

/// Local handle of an entity inside one container
///
/// Handles are never reused and never leave the process; the wire form of an
/// entity reference is its primary key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntityRef(pub(crate) u64);

impl EntityRef {
    #[inline]
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity(#{})", self.0)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A replicated entity type
///
/// `KIND` becomes the first component of every primary key of this type, so
/// two entities of one kind without key fields collide.
pub trait Entity: Clone + Send + Sync + 'static {
    const KIND: &'static str;

    /// Handle this view was built for
    fn this(&self) -> EntityRef;

    /// Declare the remotely invocable impulses, in method order
    fn impulses(_table: &mut ImpulseTable<Self>) -> ReplicaResult<()> {
        Ok(())
    }
}

/// Collects the tracked fields of an entity under construction
pub struct EntityBuilder {
    this: EntityRef,
    slots: Vec<Slot>,
}

impl EntityBuilder {
    pub(crate) fn new(this: EntityRef) -> Self {
        EntityBuilder {
            this,
            slots: Vec::new(),
        }
    }

    /// Handle of the entity being built
    pub fn this(&self) -> EntityRef {
        self.this
    }

    /// Identity field: part of the primary key
    pub fn key<T: FieldValue>(&mut self, name: &'static str, initial: T) -> TrackedField<T> {
        self.declare(name, Role::Key, initial, None)
    }

    /// Identity field with a reaction invoked after re-registration
    pub fn key_with<T, F>(&mut self, name: &'static str, initial: T, on_change: F) -> TrackedField<T>
    where
        T: FieldValue,
        F: Fn(&mut ActionContext<'_>, &T, &T) -> ReplicaResult<()> + Send + Sync + 'static,
    {
        self.declare(name, Role::Key, initial, Some(reaction(on_change)))
    }

    /// Plain tracked field
    pub fn prop<T: FieldValue>(&mut self, name: &'static str, initial: T) -> TrackedField<T> {
        self.declare(name, Role::Plain, initial, None)
    }

    /// Plain tracked field with a reaction invoked synchronously on change
    pub fn prop_with<T, F>(&mut self, name: &'static str, initial: T, on_change: F) -> TrackedField<T>
    where
        T: FieldValue,
        F: Fn(&mut ActionContext<'_>, &T, &T) -> ReplicaResult<()> + Send + Sync + 'static,
    {
        self.declare(name, Role::Plain, initial, Some(reaction(on_change)))
    }

    /// Owns at most one child; a dropped child is deleted
    pub fn hold_optional(
        &mut self,
        name: &'static str,
        initial: Option<EntityRef>,
    ) -> TrackedField<Option<EntityRef>> {
        self.declare(name, Role::Held, initial, None)
    }

    /// Owns exactly one child; a replaced child is deleted
    pub fn hold_one(&mut self, name: &'static str, initial: EntityRef) -> TrackedField<EntityRef> {
        self.declare(name, Role::Held, initial, None)
    }

    /// Owns a list of children; children missing from a new list are deleted
    pub fn hold_many(
        &mut self,
        name: &'static str,
        initial: Vec<EntityRef>,
    ) -> TrackedField<Vec<EntityRef>> {
        self.declare(name, Role::Held, initial, None)
    }

    fn declare<T: FieldValue>(
        &mut self,
        name: &'static str,
        role: Role,
        initial: T,
        reaction: Option<Reaction>,
    ) -> TrackedField<T> {
        let slot = self.slots.len() as u16;
        self.slots.push(Slot {
            name,
            role,
            value: Box::new(initial),
            reaction,
        });
        TrackedField::new(self.this, slot)
    }

    pub(crate) fn into_slots(self) -> Vec<Slot> {
        self.slots
    }
}

fn reaction<T, F>(on_change: F) -> Reaction
where
    T: FieldValue,
    F: Fn(&mut ActionContext<'_>, &T, &T) -> ReplicaResult<()> + Send + Sync + 'static,
{
    Arc::new(
        move |ctx: &mut ActionContext<'_>, old: &dyn Property, new: &dyn Property| {
            match (
                old.as_any().downcast_ref::<T>(),
                new.as_any().downcast_ref::<T>(),
            ) {
                (Some(old), Some(new)) => on_change(ctx, old, new),
                _ => Err(ReplicaError::TypeMismatch {
                    expected: std::any::type_name::<T>(),
                }),
            }
        },
    )
}

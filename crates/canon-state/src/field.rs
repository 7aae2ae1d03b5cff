//! Tracked fields
//!
//! A `TrackedField<T>` is a copyable handle naming one slot of one entity.
//! The value itself lives in the world, so reads take a `&World` and writes
//! take the `ActionContext` of the running call. That context records the
//! pre-call value the first time a slot changes.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use canon_core::{Key, ReplicaError, ReplicaResult, Value};

use crate::{ActionContext, EntityRef, World};

/// A value a tracked field can hold
pub trait FieldValue: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Plain rendering, used for primary keys and snapshots
    fn to_value(&self, world: &World) -> ReplicaResult<Value>;

    /// Entities referenced by this value, for owned-child fields
    fn children(&self) -> Vec<EntityRef> {
        Vec::new()
    }
}

macro_rules! int_field {
    ($($ty:ty),*) => {
        $(
            impl FieldValue for $ty {
                fn to_value(&self, _world: &World) -> ReplicaResult<Value> {
                    Ok(Value::Int(i64::from(*self)))
                }
            }
        )*
    };
}

int_field!(i8, i16, i32, i64, u8, u16, u32);

impl FieldValue for bool {
    fn to_value(&self, _world: &World) -> ReplicaResult<Value> {
        Ok(Value::Bool(*self))
    }
}

impl FieldValue for f32 {
    fn to_value(&self, _world: &World) -> ReplicaResult<Value> {
        Ok(Value::Float(f64::from(*self)))
    }
}

impl FieldValue for f64 {
    fn to_value(&self, _world: &World) -> ReplicaResult<Value> {
        Ok(Value::Float(*self))
    }
}

impl FieldValue for String {
    fn to_value(&self, _world: &World) -> ReplicaResult<Value> {
        Ok(Value::Text(self.clone()))
    }
}

impl FieldValue for Value {
    fn to_value(&self, _world: &World) -> ReplicaResult<Value> {
        Ok(self.clone())
    }
}

impl FieldValue for Key {
    fn to_value(&self, _world: &World) -> ReplicaResult<Value> {
        Ok(Value::Key(self.clone()))
    }
}

impl FieldValue for EntityRef {
    /// The referenced entity's primary key; a reference to an entity that no
    /// longer exists renders as `Unit`
    fn to_value(&self, world: &World) -> ReplicaResult<Value> {
        if !world.is_live(*self) {
            return Ok(Value::Unit);
        }
        world.primary_key(*self).map(Value::Key)
    }

    fn children(&self) -> Vec<EntityRef> {
        vec![*self]
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    fn to_value(&self, world: &World) -> ReplicaResult<Value> {
        match self {
            Some(v) => v.to_value(world),
            None => Ok(Value::Unit),
        }
    }

    fn children(&self) -> Vec<EntityRef> {
        self.as_ref().map(FieldValue::children).unwrap_or_default()
    }
}

impl<T: FieldValue> FieldValue for Vec<T> {
    fn to_value(&self, world: &World) -> ReplicaResult<Value> {
        self.iter()
            .map(|v| v.to_value(world))
            .collect::<ReplicaResult<Vec<_>>>()
            .map(Value::List)
    }

    fn children(&self) -> Vec<EntityRef> {
        self.iter().flat_map(FieldValue::children).collect()
    }
}

impl<A: FieldValue, B: FieldValue> FieldValue for (A, B) {
    fn to_value(&self, world: &World) -> ReplicaResult<Value> {
        Ok(Value::List(vec![self.0.to_value(world)?, self.1.to_value(world)?]))
    }

    fn children(&self) -> Vec<EntityRef> {
        let mut out = self.0.children();
        out.extend(self.1.children());
        out
    }
}

/// Type-erased slot value
pub(crate) trait Property: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn clone_boxed(&self) -> Box<dyn Property>;
    fn eq_boxed(&self, other: &dyn Property) -> bool;
    fn same_type(&self, other: &dyn Property) -> bool;
    fn value_of(&self, world: &World) -> ReplicaResult<Value>;
    fn held(&self) -> Vec<EntityRef>;
}

impl<T: FieldValue> Property for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_boxed(&self) -> Box<dyn Property> {
        Box::new(self.clone())
    }

    fn eq_boxed(&self, other: &dyn Property) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }

    fn same_type(&self, other: &dyn Property) -> bool {
        other.as_any().is::<T>()
    }

    fn value_of(&self, world: &World) -> ReplicaResult<Value> {
        self.to_value(world)
    }

    fn held(&self) -> Vec<EntityRef> {
        self.children()
    }
}

/// Change callback, run after the new value is in place
pub(crate) type Reaction = Arc<
    dyn Fn(&mut ActionContext<'_>, &dyn Property, &dyn Property) -> ReplicaResult<()>
        + Send
        + Sync,
>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Role {
    /// Part of the primary key
    Key,
    Plain,
    /// Owns the entities it references
    Held,
}

pub(crate) struct Slot {
    pub(crate) name: &'static str,
    pub(crate) role: Role,
    pub(crate) value: Box<dyn Property>,
    pub(crate) reaction: Option<Reaction>,
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("value", &self.value)
            .field("reaction", &self.reaction.is_some())
            .finish()
    }
}

/// Address of one slot in the world
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldId {
    pub entity: EntityRef,
    pub slot: u16,
}

/// Handle to one tracked field of one entity
pub struct TrackedField<T> {
    owner: EntityRef,
    slot: u16,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TrackedField<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TrackedField<T> {}

impl<T> fmt::Debug for TrackedField<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrackedField({:?}.{})", self.owner, self.slot)
    }
}

impl<T: FieldValue> TrackedField<T> {
    pub(crate) fn new(owner: EntityRef, slot: u16) -> Self {
        TrackedField {
            owner,
            slot,
            _marker: PhantomData,
        }
    }

    pub fn owner(&self) -> EntityRef {
        self.owner
    }

    pub fn id(&self) -> FieldId {
        FieldId {
            entity: self.owner,
            slot: self.slot,
        }
    }

    /// Borrow the current value
    pub fn get<'w>(&self, world: &'w World) -> ReplicaResult<&'w T> {
        world
            .slot(self.id())?
            .value
            .as_any()
            .downcast_ref::<T>()
            .ok_or(ReplicaError::TypeMismatch {
                expected: std::any::type_name::<T>(),
            })
    }

    /// Clone out the current value
    pub fn value(&self, world: &World) -> ReplicaResult<T> {
        self.get(world).cloned()
    }

    /// Assign inside the running call
    ///
    /// An equal value is a no-op: nothing is captured and no reaction runs.
    pub fn set(&self, ctx: &mut ActionContext<'_>, value: T) -> ReplicaResult<()> {
        ctx.assign(self.id(), Box::new(value))
    }

    pub fn update<F>(&self, ctx: &mut ActionContext<'_>, f: F) -> ReplicaResult<()>
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(self.get(ctx.world())?);
        self.set(ctx, next)
    }
}

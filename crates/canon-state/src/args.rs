//! Argument proxying
//!
//! Impulse arguments cross the call boundary as plain `Value`s. An entity
//! reference is replaced by its primary key on the way out and looked up
//! again on the way in. Substitution is one level deep: a list argument may
//! only hold scalars, which the type system enforces through `Scalar`.

use canon_core::{ReplicaError, ReplicaResult, Value};

use crate::{EntityRef, World};

/// A single impulse argument
pub trait Arg: Sized + 'static {
    fn proxy(&self, world: &World) -> ReplicaResult<Value>;

    /// `None` when the value has the wrong shape or names a missing entity
    fn resolve(value: &Value, world: &World) -> Option<Self>;
}

/// Arguments that carry no entity references
pub trait Scalar: Arg {}

macro_rules! scalar_arg {
    ($ty:ty, $variant:ident, $into:expr, $from:expr) => {
        impl Arg for $ty {
            fn proxy(&self, _world: &World) -> ReplicaResult<Value> {
                Ok(Value::$variant($into(self.clone())))
            }

            fn resolve(value: &Value, _world: &World) -> Option<Self> {
                match value {
                    Value::$variant(v) => $from(v.clone()),
                    _ => None,
                }
            }
        }

        impl Scalar for $ty {}
    };
}

scalar_arg!(bool, Bool, |v| v, Some);
scalar_arg!(i64, Int, |v| v, Some);
scalar_arg!(i32, Int, i64::from, |v| i32::try_from(v).ok());
scalar_arg!(i16, Int, i64::from, |v| i16::try_from(v).ok());
scalar_arg!(u8, Int, i64::from, |v| u8::try_from(v).ok());
scalar_arg!(u16, Int, i64::from, |v| u16::try_from(v).ok());
scalar_arg!(u32, Int, i64::from, |v| u32::try_from(v).ok());
scalar_arg!(f64, Float, |v| v, Some);
scalar_arg!(f32, Float, f64::from, |v: f64| Some(v as f32));
scalar_arg!(String, Text, |v| v, Some);

/// Passed through untouched; keys inside are not resolved
impl Arg for Value {
    fn proxy(&self, _world: &World) -> ReplicaResult<Value> {
        Ok(self.clone())
    }

    fn resolve(value: &Value, _world: &World) -> Option<Self> {
        Some(value.clone())
    }
}

impl Scalar for Value {}

/// Sent as the key the entity is registered under; an entity without one
/// cannot be named on the wire
impl Arg for EntityRef {
    fn proxy(&self, world: &World) -> ReplicaResult<Value> {
        world
            .registered_key(*self)
            .cloned()
            .map(Value::Key)
            .ok_or(ReplicaError::KeylessEntity(self.id()))
    }

    fn resolve(value: &Value, world: &World) -> Option<Self> {
        value.as_key().and_then(|key| world.find(key))
    }
}

/// Like `EntityRef`, but a missing entity arrives as `None` instead of
/// turning the call into a no-op
impl Arg for Option<EntityRef> {
    fn proxy(&self, world: &World) -> ReplicaResult<Value> {
        match self {
            Some(entity) => entity.proxy(world),
            None => Ok(Value::Unit),
        }
    }

    fn resolve(value: &Value, world: &World) -> Option<Self> {
        match value {
            Value::Unit => Some(None),
            Value::Key(key) => Some(world.find(key)),
            _ => None,
        }
    }
}

impl<T: Scalar> Arg for Vec<T> {
    fn proxy(&self, world: &World) -> ReplicaResult<Value> {
        self.iter()
            .map(|item| item.proxy(world))
            .collect::<ReplicaResult<Vec<_>>>()
            .map(Value::List)
    }

    fn resolve(value: &Value, world: &World) -> Option<Self> {
        value
            .as_list()?
            .iter()
            .map(|item| T::resolve(item, world))
            .collect()
    }
}

/// The full argument tuple of an impulse
///
/// No arguments travel as `Unit`, one as its own value, more as a list.
pub trait ArgList: Sized + 'static {
    fn proxy(&self, world: &World) -> ReplicaResult<Value>;
    fn resolve(value: &Value, world: &World) -> Option<Self>;
}

impl ArgList for () {
    fn proxy(&self, _world: &World) -> ReplicaResult<Value> {
        Ok(Value::Unit)
    }

    fn resolve(value: &Value, _world: &World) -> Option<Self> {
        matches!(value, Value::Unit).then_some(())
    }
}

impl<A: Arg> ArgList for (A,) {
    fn proxy(&self, world: &World) -> ReplicaResult<Value> {
        self.0.proxy(world)
    }

    fn resolve(value: &Value, world: &World) -> Option<Self> {
        A::resolve(value, world).map(|a| (a,))
    }
}

macro_rules! arg_list {
    ($len:expr; $($name:ident : $idx:tt),+) => {
        impl<$($name: Arg),+> ArgList for ($($name,)+) {
            fn proxy(&self, world: &World) -> ReplicaResult<Value> {
                Ok(Value::List(vec![$(self.$idx.proxy(world)?),+]))
            }

            fn resolve(value: &Value, world: &World) -> Option<Self> {
                let items = value.as_list()?;
                if items.len() != $len {
                    return None;
                }
                Some(($($name::resolve(&items[$idx], world)?,)+))
            }
        }
    };
}

arg_list!(2; A: 0, B: 1);
arg_list!(3; A: 0, B: 1, C: 2);
arg_list!(4; A: 0, B: 1, C: 2, D: 3);

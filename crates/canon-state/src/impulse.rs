//! Impulses - remotely invocable entry points
//!
//! An impulse is declared once per entity type as a constant:
//!
//! ```ignore
//! impl Body {
//!     pub const PUSH: Impulse<Body, (f64, f64)> = Impulse {
//!         method: 0,
//!         name: "push",
//!         block: Body::push,
//!     };
//! }
//! ```
//!
//! The method id travels on the wire. Ids are written out explicitly and the
//! table refuses any id that is not the next declaration index, so peers
//! built from different revisions of an entity type fail loudly instead of
//! calling the wrong block.

use std::any::Any;
use std::fmt;

use canon_core::{Method, ReplicaError, ReplicaResult, Value};

use crate::{ActionContext, Arg, ArgList, Entity};

/// Signature of an impulse body
pub type Block<E, A> = fn(&E, &mut ActionContext<'_>, A) -> ReplicaResult<()>;

/// A declared impulse of entity type `E` taking arguments `A`
pub struct Impulse<E, A> {
    pub method: Method,
    pub name: &'static str,
    pub block: Block<E, A>,
}

impl<E, A> Clone for Impulse<E, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E, A> Copy for Impulse<E, A> {}

impl<E, A> fmt::Debug for Impulse<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Impulse({}#{})", self.name, self.method)
    }
}

/// What happened when a received call reached its block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Applied {
    Ran,
    /// An argument did not resolve; the call is a no-op
    Unresolved,
}

type Handler<E> =
    Box<dyn Fn(&E, &mut ActionContext<'_>, &Value) -> ReplicaResult<Applied> + Send + Sync>;

/// Dispatch table of one entity type, indexed by method
pub struct ImpulseTable<E> {
    entries: Vec<(&'static str, Handler<E>)>,
}

impl<E: Entity> ImpulseTable<E> {
    pub(crate) fn build() -> ReplicaResult<Self> {
        let mut table = ImpulseTable {
            entries: Vec::new(),
        };
        E::impulses(&mut table)?;
        Ok(table)
    }

    pub fn register<A: ArgList>(&mut self, impulse: Impulse<E, A>) -> ReplicaResult<()> {
        if self.entries.len() > Method::MAX as usize {
            return Err(ReplicaError::TooManyImpulses(E::KIND));
        }
        if impulse.method as usize != self.entries.len() {
            return Err(ReplicaError::ImpulseOrder {
                kind: E::KIND,
                name: impulse.name,
                method: impulse.method,
                expected: self.entries.len(),
            });
        }
        if self.entries.iter().any(|(name, _)| *name == impulse.name) {
            return Err(ReplicaError::DuplicateImpulse {
                kind: E::KIND,
                name: impulse.name,
            });
        }

        let block = impulse.block;
        let handler: Handler<E> = Box::new(
            move |entity: &E, ctx: &mut ActionContext<'_>, arg: &Value| -> ReplicaResult<Applied> {
                match A::resolve(arg, ctx.world()) {
                    Some(args) => {
                        block(entity, ctx, args)?;
                        Ok(Applied::Ran)
                    }
                    None => Ok(Applied::Unresolved),
                }
            },
        );
        self.entries.push((impulse.name, handler));
        Ok(())
    }

    pub fn impulse0(&mut self, impulse: Impulse<E, ()>) -> ReplicaResult<()> {
        self.register(impulse)
    }

    pub fn impulse1<A: Arg>(&mut self, impulse: Impulse<E, (A,)>) -> ReplicaResult<()> {
        self.register(impulse)
    }

    pub fn impulse2<A: Arg, B: Arg>(&mut self, impulse: Impulse<E, (A, B)>) -> ReplicaResult<()> {
        self.register(impulse)
    }

    pub fn impulse3<A: Arg, B: Arg, C: Arg>(
        &mut self,
        impulse: Impulse<E, (A, B, C)>,
    ) -> ReplicaResult<()> {
        self.register(impulse)
    }

    pub fn impulse4<A: Arg, B: Arg, C: Arg, D: Arg>(
        &mut self,
        impulse: Impulse<E, (A, B, C, D)>,
    ) -> ReplicaResult<()> {
        self.register(impulse)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Impulse names in method order
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(name, _)| *name).collect()
    }
}

/// Type-erased dispatch over one entity type's table
pub(crate) trait Dispatch: Send + Sync {
    fn kind(&self) -> &'static str;

    fn call(
        &self,
        ctx: &mut ActionContext<'_>,
        view: &(dyn Any + Send + Sync),
        method: Method,
        arg: &Value,
    ) -> ReplicaResult<Applied>;
}

impl<E: Entity> Dispatch for ImpulseTable<E> {
    fn kind(&self) -> &'static str {
        E::KIND
    }

    fn call(
        &self,
        ctx: &mut ActionContext<'_>,
        view: &(dyn Any + Send + Sync),
        method: Method,
        arg: &Value,
    ) -> ReplicaResult<Applied> {
        let entity = view
            .downcast_ref::<E>()
            .ok_or(ReplicaError::TypeMismatch {
                expected: std::any::type_name::<E>(),
            })?;
        let (_, handler) =
            self.entries
                .get(method as usize)
                .ok_or_else(|| ReplicaError::UnknownImpulse {
                    kind: E::KIND.to_string(),
                    method,
                })?;
        handler(entity, ctx, arg)
    }
}

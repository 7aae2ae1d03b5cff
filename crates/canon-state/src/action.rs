//! Log entries of a container
//!
//! A call entry resolves its key when it executes, not when it is received.
//! The same entry can therefore hit different entities across replays, which
//! is exactly what keeps peers with different delivery orders in step.

use std::fmt;
use std::sync::Arc;

use canon_core::{Key, Method, ReplicaResult, Revision, Value};
use canon_log::Action;
use tracing::{trace, warn};

use crate::{ActionContext, Applied, UndoRecord, World};

/// Body of a system action (periodic firing or bootstrap)
pub type SystemBlock = Arc<dyn Fn(&mut ActionContext<'_>) -> ReplicaResult<()> + Send + Sync>;

/// One entry in a container's log
#[derive(Clone)]
pub enum LogEntry {
    /// A replicated impulse call
    Call { key: Key, method: Method, arg: Value },
    /// A local, never dispatched action
    System {
        label: &'static str,
        block: SystemBlock,
    },
}

impl fmt::Debug for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogEntry::Call { key, method, arg } => f
                .debug_struct("Call")
                .field("key", key)
                .field("method", method)
                .field("arg", arg)
                .finish(),
            LogEntry::System { label, .. } => f.debug_struct("System").field("label", label).finish(),
        }
    }
}

impl Action for LogEntry {
    type Key = Revision;
    type State = World;
    /// `None` when the call resolved to nothing
    type Carry = Option<UndoRecord>;

    fn exec(&self, revision: &Revision, world: &mut World) -> ReplicaResult<Option<UndoRecord>> {
        match self {
            LogEntry::Call { key, method, arg } => {
                let Some(entity) = world.find(key) else {
                    trace!(?revision, %key, "no entity under key, call is a no-op");
                    return Ok(None);
                };
                let (view, table) = world.dispatch_parts(entity)?;

                let mut ctx = ActionContext::new(world, *revision);
                match table.call(&mut ctx, &*view, *method, arg) {
                    Ok(Applied::Ran) => Ok(Some(ctx.finish())),
                    Ok(Applied::Unresolved) => {
                        trace!(?revision, kind = table.kind(), method, "argument did not resolve, call is a no-op");
                        ctx.rollback();
                        Ok(None)
                    }
                    Err(error) => {
                        warn!(?revision, kind = table.kind(), method, %error, "call failed, rolled back");
                        ctx.rollback();
                        Err(error)
                    }
                }
            }
            LogEntry::System { label, block } => {
                let mut ctx = ActionContext::new(world, *revision);
                match block(&mut ctx) {
                    Ok(()) => Ok(Some(ctx.finish())),
                    Err(error) => {
                        warn!(?revision, label, %error, "system action failed, rolled back");
                        ctx.rollback();
                        Err(error)
                    }
                }
            }
        }
    }

    fn undo(&self, _revision: &Revision, world: &mut World, carry: &Option<UndoRecord>) -> ReplicaResult<()> {
        match carry {
            Some(record) => world.revert(record),
            None => Ok(()),
        }
    }

    fn settle(&self, _revision: &Revision, world: &mut World, carry: Option<UndoRecord>) {
        if let Some(record) = carry {
            world.release(record);
        }
    }
}

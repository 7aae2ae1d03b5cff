//! Container - one peer's replica
//!
//! The container owns the world, the ordered log, the local clock with its
//! inner counter, and the periodic scheduler. Local calls and remote
//! deliveries enter the log through the same `receive`; only local calls
//! are handed to the dispatcher afterwards.

use std::sync::Arc;

use canon_core::{Author, Call, Key, Method, ReplicaError, ReplicaResult, Revision, Value};
use canon_log::Repo;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::{
    ActionContext, ArgList, Entity, Impulse, LogEntry, Periodic, PeriodicId, Scheduler, Snapshot,
    World, DEFAULT_MAX_KEY_DEPTH,
};

/// Container configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Author of locally originated calls
    pub author: Author,
    /// Initial clock
    pub start_time: i64,
    /// Timesteps kept behind the target of `revise` before pruning
    pub horizon_lag: i64,
    /// Nesting limit for entity-valued key fields
    pub max_key_depth: usize,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        ContainerConfig {
            author: Author::new(0, 1),
            start_time: 0,
            horizon_lag: 0,
            max_key_depth: DEFAULT_MAX_KEY_DEPTH,
        }
    }
}

impl ContainerConfig {
    pub fn for_author(author: Author) -> Self {
        ContainerConfig {
            author,
            ..Default::default()
        }
    }

    pub fn with_start_time(mut self, start_time: i64) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn with_horizon_lag(mut self, horizon_lag: i64) -> Self {
        self.horizon_lag = horizon_lag;
        self
    }

    pub fn with_max_key_depth(mut self, max_key_depth: usize) -> Self {
        self.max_key_depth = max_key_depth;
        self
    }

    pub fn validate(&self) -> ReplicaResult<()> {
        if self.author.is_reserved() {
            return Err(ReplicaError::ReservedAuthor(self.author));
        }
        if self.horizon_lag < 0 {
            return Err(ReplicaError::InvalidConfig(format!(
                "horizon_lag must not be negative, got {}",
                self.horizon_lag
            )));
        }
        if self.max_key_depth == 0 {
            return Err(ReplicaError::InvalidConfig(
                "max_key_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Places locally originated calls on the wire
///
/// Called exactly once per top-level impulse call, after the local
/// `receive` succeeded, with the same arguments.
pub trait Dispatcher {
    fn dispatch(&mut self, revision: Revision, key: &Key, method: Method, arg: &Value);
}

impl<F> Dispatcher for F
where
    F: FnMut(Revision, &Key, Method, &Value),
{
    fn dispatch(&mut self, revision: Revision, key: &Key, method: Method, arg: &Value) {
        self(revision, key, method, arg)
    }
}

/// Buffers dispatched calls until a transport drains them
#[derive(Clone, Debug, Default)]
pub struct Outbox {
    calls: Vec<Call>,
}

impl Outbox {
    pub fn new() -> Self {
        Outbox::default()
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn drain(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

impl Dispatcher for Outbox {
    fn dispatch(&mut self, revision: Revision, key: &Key, method: Method, arg: &Value) {
        self.calls
            .push(Call::new(revision, key.clone(), method, arg.clone()));
    }
}

/// One peer's replica of the shared entities
pub struct Container<D: Dispatcher = Outbox> {
    config: ContainerConfig,
    world: World,
    log: Repo<LogEntry>,
    time: i64,
    /// Inner value of the next local call at `time`; `None` once exhausted
    next_inner: Option<i16>,
    scheduler: Scheduler,
    dispatcher: D,
}

impl<D: Dispatcher> Container<D> {
    pub fn new(config: ContainerConfig, dispatcher: D) -> ReplicaResult<Self> {
        config.validate()?;
        Ok(Container {
            world: World::with_max_key_depth(config.max_key_depth),
            log: Repo::new(),
            time: config.start_time,
            next_inner: Some(0),
            scheduler: Scheduler::new(),
            dispatcher,
            config,
        })
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn author(&self) -> Author {
        self.config.author
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn log(&self) -> &Repo<LogEntry> {
        &self.log
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut D {
        &mut self.dispatcher
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    /// Inner value the next local call will use
    pub fn open_inner(&self) -> Option<i16> {
        self.next_inner
    }

    /// Revision the next local call will be logged at
    pub fn revision(&self) -> ReplicaResult<Revision> {
        let inner = self.next_inner.ok_or(ReplicaError::InnerOverflow {
            timestep: self.time,
            author: self.config.author,
        })?;
        Ok(Revision::new(self.time, inner, self.config.author))
    }

    /// Move the clock
    ///
    /// The inner counter continues after the highest inner this author has
    /// in the log at `time`, so revisions stay unique per author and
    /// timestep even when the clock goes back.
    pub fn set_time(&mut self, time: i64) {
        let scanned = self.inner_after_log(time, self.config.author);
        self.next_inner = if time == self.time {
            match (scanned, self.next_inner) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            }
        } else {
            scanned
        };
        self.time = time;
    }

    /// Next free non-negative inner for `author` at `timestep` according to
    /// the log
    fn inner_after_log(&self, timestep: i64, author: Author) -> Option<i16> {
        self.next_inner_in(timestep, author, 0..=i16::MAX)
    }

    fn next_inner_in(
        &self,
        timestep: i64,
        author: Author,
        range: std::ops::RangeInclusive<i16>,
    ) -> Option<i16> {
        let highest = self
            .log
            .keys_in(Revision::floor(timestep)..=Revision::ceiling(timestep))
            .filter(|revision| revision.author == author && range.contains(&revision.inner))
            .map(|revision| revision.inner)
            .max();
        match highest {
            Some(inner) => inner.checked_add(1).filter(|next| range.contains(next)),
            None => Some(*range.start()),
        }
    }

    /// Revision of the next periodic firing at `timestep`
    fn system_revision(&self, timestep: i64) -> ReplicaResult<Revision> {
        let inner = self
            .inner_after_log(timestep, Author::SYSTEM)
            .ok_or(ReplicaError::InnerOverflow {
                timestep,
                author: Author::SYSTEM,
            })?;
        Ok(Revision::new(timestep, inner, Author::SYSTEM))
    }

    /// Revision of the next bootstrap at `timestep`
    ///
    /// Bootstraps take the negative system inners, so at their timestep they
    /// sort before every call and every periodic firing.
    fn bootstrap_revision(&self, timestep: i64) -> ReplicaResult<Revision> {
        let inner = self
            .next_inner_in(timestep, Author::SYSTEM, i16::MIN..=-1)
            .ok_or(ReplicaError::InnerOverflow {
                timestep,
                author: Author::SYSTEM,
            })?;
        Ok(Revision::new(timestep, inner, Author::SYSTEM))
    }

    /// Call an impulse from outside any running call
    ///
    /// The call is logged locally first. A call that fails at its revision
    /// is not stored and never dispatched, and the inner counter stays where
    /// it was; otherwise the call is dispatched and the counter advanced.
    pub fn invoke<E, A>(&mut self, entity: &E, impulse: Impulse<E, A>, args: A) -> ReplicaResult<Revision>
    where
        E: Entity,
        A: ArgList,
    {
        let this = entity.this();
        let key = self
            .world
            .registered_key(this)
            .cloned()
            .ok_or(ReplicaError::KeylessEntity(this.id()))?;
        let arg = args.proxy(&self.world)?;
        let revision = self.revision()?;

        trace!(?revision, %key, impulse = impulse.name, "invoke");
        let entry = LogEntry::Call {
            key: key.clone(),
            method: impulse.method,
            arg: arg.clone(),
        };
        self.log.try_insert(revision, entry, &mut self.world)?;
        self.dispatcher.dispatch(revision, &key, impulse.method, &arg);
        self.next_inner = revision.next_inner().ok().map(|next| next.inner);
        Ok(revision)
    }

    /// Place a call in the log at `revision`
    ///
    /// The key is resolved when the call executes; a key nothing is
    /// registered under makes the call a no-op. A call whose block fails at
    /// its revision is still stored, unmaterialized, and runs again on every
    /// replay. A revision already in the log is a duplicate delivery and is
    /// ignored.
    pub fn receive(&mut self, revision: Revision, key: Key, method: Method, arg: Value) -> ReplicaResult<()> {
        if revision.author.is_reserved() {
            return Err(ReplicaError::ReservedAuthor(revision.author));
        }
        if self.log.contains(&revision) {
            debug!(?revision, "duplicate delivery ignored");
            return Ok(());
        }

        let insertion = self
            .log
            .insert(revision, LogEntry::Call { key, method, arg }, &mut self.world)?;
        if !insertion.materialized {
            debug!(?revision, "received call failed at its revision, kept for replay");
        }

        // Our own calls can come back from a peer, e.g. after a restart
        if revision.author == self.config.author && revision.timestep == self.time {
            let after = revision.next_inner().ok().map(|next| next.inner);
            self.next_inner = match (self.next_inner, after) {
                (Some(current), Some(after)) => Some(current.max(after)),
                _ => None,
            };
        }
        Ok(())
    }

    pub fn receive_call(&mut self, call: Call) -> ReplicaResult<()> {
        self.receive(call.revision, call.key, call.method, call.arg)
    }

    /// Run a deterministic system action at the current time
    ///
    /// Every peer bootstraps the same way, which is how root entities come
    /// to exist everywhere without being dispatched. Bootstraps at one
    /// timestep run in the order they were made, ahead of every call and
    /// periodic firing at that timestep. A failing bootstrap is not stored
    /// and its error is returned.
    pub fn bootstrap<F>(&mut self, label: &'static str, block: F) -> ReplicaResult<Revision>
    where
        F: Fn(&mut ActionContext<'_>) -> ReplicaResult<()> + Send + Sync + 'static,
    {
        let revision = self.bootstrap_revision(self.time)?;
        self.log.try_insert(
            revision,
            LogEntry::System {
                label,
                block: Arc::new(block),
            },
            &mut self.world,
        )?;
        Ok(revision)
    }

    /// Fire `block` at `at + delay` and every `interval` after that
    pub fn register_periodic<F>(
        &mut self,
        at: i64,
        delay: i64,
        interval: i64,
        block: F,
    ) -> ReplicaResult<PeriodicId>
    where
        F: Fn(&mut ActionContext<'_>) -> ReplicaResult<()> + Send + Sync + 'static,
    {
        let origin = at.checked_add(delay).ok_or_else(|| {
            ReplicaError::InvalidConfig(format!("periodic origin {} + {} overflows", at, delay))
        })?;
        self.scheduler.register(origin, interval, Arc::new(block))
    }

    pub fn unregister_periodic(&mut self, id: PeriodicId) -> ReplicaResult<Periodic> {
        self.scheduler.unregister(id)
    }

    pub fn restore_periodic(&mut self, periodic: Periodic) {
        self.scheduler.restore(periodic);
    }

    /// Advance to `target`
    ///
    /// Each periodic fires once for every tick before `target` it has not
    /// fired yet, as a system action at that tick. Then the clock moves to
    /// `target` and the log prunes everything up to the horizon. Returns the
    /// number of firings.
    pub fn revise(&mut self, target: i64) -> ReplicaResult<usize> {
        let mut fired = 0;
        for id in self.scheduler.ids() {
            let Some(periodic) = self.scheduler.get(id) else {
                continue;
            };
            let ticks = periodic.due(target);
            let block = periodic.block().clone();

            for tick in ticks {
                let revision = self.system_revision(tick)?;
                self.log.insert(
                    revision,
                    LogEntry::System {
                        label: "periodic",
                        block: block.clone(),
                    },
                    &mut self.world,
                )?;
                self.scheduler.mark_fired(id, tick);
                fired += 1;
            }
        }

        self.set_time(target);
        let horizon = Revision::ceiling(target.saturating_sub(self.config.horizon_lag));
        let pruned = self.log.set_upper_bound(horizon, &mut self.world);
        debug!(target, fired, pruned, "revised");
        Ok(fired)
    }

    pub fn snapshot(&self) -> ReplicaResult<Snapshot> {
        self.world.snapshot()
    }
}

/// A container behind a mutex, for callers on several threads
///
/// Every operation on a container must be serialized; this wrapper does it
/// with one lock held for the whole call.
pub struct SharedContainer<D: Dispatcher = Outbox> {
    inner: Arc<Mutex<Container<D>>>,
}

impl<D: Dispatcher> Clone for SharedContainer<D> {
    fn clone(&self) -> Self {
        SharedContainer {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Dispatcher> SharedContainer<D> {
    pub fn new(container: Container<D>) -> Self {
        SharedContainer {
            inner: Arc::new(Mutex::new(container)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Container<D>> {
        self.inner.lock()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Container<D>) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

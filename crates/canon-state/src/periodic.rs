//! Periodic scheduler
//!
//! Periodics are local to a container and never replicated. Each peer
//! registers the same periodics and fires them itself as its clock advances;
//! a firing is logged as a system action at the tick it belongs to, so it
//! takes part in undo/redo like any call.

use std::collections::BTreeMap;
use std::fmt;

use canon_core::{ReplicaError, ReplicaResult};

use crate::SystemBlock;

/// Handle of a registered periodic
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeriodicId(pub(crate) u64);

impl PeriodicId {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// A tick-triggered callback
#[derive(Clone)]
pub struct Periodic {
    id: PeriodicId,
    origin: i64,
    interval: i64,
    last_fired: Option<i64>,
    block: SystemBlock,
}

impl Periodic {
    pub fn id(&self) -> PeriodicId {
        self.id
    }

    /// First tick
    pub fn origin(&self) -> i64 {
        self.origin
    }

    pub fn interval(&self) -> i64 {
        self.interval
    }

    pub fn last_fired(&self) -> Option<i64> {
        self.last_fired
    }

    pub(crate) fn block(&self) -> &SystemBlock {
        &self.block
    }

    /// Ticks `origin + n * interval` not yet fired and before `target`
    pub fn due(&self, target: i64) -> Vec<i64> {
        let from = match self.last_fired {
            Some(last) => last.saturating_add(1),
            None => self.origin,
        };
        // First tick at or after `from` on the origin's grid
        let offset = (i128::from(self.origin) - i128::from(from))
            .rem_euclid(i128::from(self.interval));
        let Ok(mut tick) = i64::try_from(i128::from(from) + offset) else {
            return Vec::new();
        };
        let mut ticks = Vec::new();
        while tick < target {
            ticks.push(tick);
            match tick.checked_add(self.interval) {
                Some(next) => tick = next,
                None => break,
            }
        }
        ticks
    }
}

impl fmt::Debug for Periodic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Periodic")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("interval", &self.interval)
            .field("last_fired", &self.last_fired)
            .finish()
    }
}

/// Registered periodics in registration order
#[derive(Debug, Default)]
pub struct Scheduler {
    periodics: BTreeMap<PeriodicId, Periodic>,
    next_id: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler::default()
    }

    pub fn register(&mut self, origin: i64, interval: i64, block: SystemBlock) -> ReplicaResult<PeriodicId> {
        if interval <= 0 {
            return Err(ReplicaError::InvalidInterval(interval));
        }
        let id = PeriodicId(self.next_id);
        self.next_id += 1;
        self.periodics.insert(
            id,
            Periodic {
                id,
                origin,
                interval,
                last_fired: None,
                block,
            },
        );
        Ok(id)
    }

    /// Remove a periodic, handing it back for `restore`
    pub fn unregister(&mut self, id: PeriodicId) -> ReplicaResult<Periodic> {
        self.periodics
            .remove(&id)
            .ok_or(ReplicaError::PeriodicNotFound(id.0))
    }

    /// Put back a periodic taken out by `unregister`, keeping its place
    pub fn restore(&mut self, periodic: Periodic) {
        self.next_id = self.next_id.max(periodic.id.0 + 1);
        self.periodics.insert(periodic.id, periodic);
    }

    pub fn ids(&self) -> Vec<PeriodicId> {
        self.periodics.keys().copied().collect()
    }

    pub fn get(&self, id: PeriodicId) -> Option<&Periodic> {
        self.periodics.get(&id)
    }

    pub(crate) fn mark_fired(&mut self, id: PeriodicId, tick: i64) {
        if let Some(periodic) = self.periodics.get_mut(&id) {
            periodic.last_fired = Some(tick);
        }
    }

    pub fn len(&self) -> usize {
        self.periodics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periodics.is_empty()
    }
}

//! Ordered log with automatic undo/redo
//!
//! INVARIANT: the materialized state always equals the result of executing
//! every stored action in ascending key order, whatever order they were
//! inserted in. An insertion before the materialized frontier rewinds the
//! later entries (descending), executes the new action, then replays the
//! rewound entries (ascending). Appends rewind nothing, so the replay cost
//! is bounded by the number of retained entries after the insertion point.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::ops::Bound::{Excluded, Unbounded};
use std::ops::RangeBounds;

use canon_core::{ReplicaError, ReplicaResult};
use tracing::{debug, trace, warn};

/// An entry the log can execute and undo
pub trait Action {
    /// Ordering key
    type Key: Ord + Clone + Debug;
    /// State the action mutates
    type State;
    /// Whatever exec hands back for the matching undo
    type Carry;

    fn exec(&self, key: &Self::Key, state: &mut Self::State) -> ReplicaResult<Self::Carry>;

    /// Reverse a successful exec
    ///
    /// An undo that fails must leave the state as it found it: the entry
    /// keeps its carry and counts as still applied.
    fn undo(&self, key: &Self::Key, state: &mut Self::State, carry: &Self::Carry)
        -> ReplicaResult<()>;

    /// Called when the entry is pruned below the horizon and can never be
    /// undone again
    fn settle(&self, _key: &Self::Key, _state: &mut Self::State, _carry: Self::Carry) {}
}

struct Entry<A: Action> {
    action: A,
    /// `None` while the entry is stored but its last exec failed
    carry: Option<A::Carry>,
}

/// Counters over the lifetime of a log
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Actions accepted by `insert`
    pub inserted: u64,
    /// Undo calls made while rewinding
    pub rewound: u64,
    /// Successful re-executions while replaying
    pub replayed: u64,
    /// Execs, first or replayed, that failed and left their entry
    /// unmaterialized
    pub failed: u64,
    /// Entries dropped below the horizon
    pub pruned: u64,
}

/// Outcome of a single insertion
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Insertion {
    /// Number of later entries that were rewound and replayed
    pub rewound: usize,
    /// Whether the action's own exec succeeded
    pub materialized: bool,
}

/// Ordered undo/redo log
pub struct Repo<A: Action> {
    entries: BTreeMap<A::Key, Entry<A>>,
    /// Soft horizon: entries at or below it have been pruned
    upper: Option<A::Key>,
    stats: ReplayStats,
}

impl<A: Action> Repo<A> {
    pub fn new() -> Self {
        Repo {
            entries: BTreeMap::new(),
            upper: None,
            stats: ReplayStats::default(),
        }
    }

    /// Insert an action and materialize it at its position
    ///
    /// The action is stored whatever its exec does. If the exec fails at
    /// this position the entry stays unmaterialized and is retried on every
    /// later replay, exactly as if it had failed during one; the state then
    /// depends only on the set of stored actions, never on arrival order.
    pub fn insert(
        &mut self,
        key: A::Key,
        action: A,
        state: &mut A::State,
    ) -> ReplicaResult<Insertion> {
        self.insert_at(key, action, state, true)
    }

    /// Insert an action only if it executes at its position
    ///
    /// On failure the rewound entries are replayed, nothing is stored and
    /// the action's error is returned.
    pub fn try_insert(
        &mut self,
        key: A::Key,
        action: A,
        state: &mut A::State,
    ) -> ReplicaResult<Insertion> {
        self.insert_at(key, action, state, false)
    }

    fn insert_at(
        &mut self,
        key: A::Key,
        action: A,
        state: &mut A::State,
        keep_failed: bool,
    ) -> ReplicaResult<Insertion> {
        if self.entries.contains_key(&key) {
            return Err(ReplicaError::DuplicateKey(format!("{:?}", key)));
        }

        if let Some(upper) = &self.upper {
            if key <= *upper {
                debug!(?key, ?upper, "insert at or below horizon");
            }
        }

        let suffix: Vec<A::Key> = self
            .entries
            .range((Excluded(&key), Unbounded))
            .map(|(k, _)| k.clone())
            .collect();

        if !suffix.is_empty() {
            debug!(?key, depth = suffix.len(), "rewinding log for late insert");
        }

        self.rewind(&suffix, state)?;

        trace!(?key, "exec");
        let rewound = suffix.len();
        let outcome = match action.exec(&key, state) {
            Ok(carry) => {
                self.entries.insert(
                    key,
                    Entry {
                        action,
                        carry: Some(carry),
                    },
                );
                self.stats.inserted += 1;
                Ok(Insertion {
                    rewound,
                    materialized: true,
                })
            }
            Err(error) if keep_failed => {
                warn!(?key, %error, "exec failed, entry stored unmaterialized");
                self.entries.insert(key, Entry { action, carry: None });
                self.stats.inserted += 1;
                self.stats.failed += 1;
                Ok(Insertion {
                    rewound,
                    materialized: false,
                })
            }
            Err(error) => Err(error),
        };

        self.replay(&suffix, state);
        outcome
    }

    /// Undo `suffix` from the back
    ///
    /// If an undo fails, the entries already rewound are executed again so
    /// the state still matches the log, and the error is returned.
    fn rewind(&mut self, suffix: &[A::Key], state: &mut A::State) -> ReplicaResult<()> {
        for (done, key) in suffix.iter().rev().enumerate() {
            let Some(entry) = self.entries.get_mut(key) else {
                continue;
            };
            let Some(carry) = entry.carry.as_ref() else {
                continue;
            };
            trace!(?key, "undo");
            if let Err(error) = entry.action.undo(key, state, carry) {
                warn!(?key, %error, "undo failed, restoring rewound entries");
                let rewound = &suffix[suffix.len() - done..];
                self.replay(rewound, state);
                return Err(error);
            }
            entry.carry = None;
            self.stats.rewound += 1;
        }
        Ok(())
    }

    fn replay(&mut self, suffix: &[A::Key], state: &mut A::State) {
        for key in suffix {
            if let Some(entry) = self.entries.get_mut(key) {
                trace!(?key, "redo");
                match entry.action.exec(key, state) {
                    Ok(carry) => {
                        entry.carry = Some(carry);
                        self.stats.replayed += 1;
                    }
                    Err(error) => {
                        warn!(?key, %error, "replay failed, entry left unmaterialized");
                        self.stats.failed += 1;
                    }
                }
            }
        }
    }

    /// Advance the soft horizon and prune everything at or below it
    ///
    /// The horizon only moves forward; a lower bound is ignored. Returns the
    /// number of pruned entries.
    pub fn set_upper_bound(&mut self, bound: A::Key, state: &mut A::State) -> usize {
        if let Some(current) = &self.upper {
            if bound < *current {
                warn!(?bound, ?current, "horizon cannot move backwards");
                return 0;
            }
        }

        let retained = self.entries.split_off(&bound);
        let mut pruned: Vec<(A::Key, Entry<A>)> =
            std::mem::replace(&mut self.entries, retained).into_iter().collect();
        if let Some(entry) = self.entries.remove(&bound) {
            pruned.push((bound.clone(), entry));
        }

        let count = pruned.len();
        for (key, entry) in pruned {
            if let Some(carry) = entry.carry {
                entry.action.settle(&key, state, carry);
            }
        }

        if count > 0 {
            debug!(?bound, count, "pruned log below horizon");
        }
        self.stats.pruned += count as u64;
        self.upper = Some(bound);
        count
    }

    pub fn upper_bound(&self) -> Option<&A::Key> {
        self.upper.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &A::Key) -> bool {
        self.entries.contains_key(key)
    }

    /// Whether the entry at `key` is currently applied to the state
    pub fn is_materialized(&self, key: &A::Key) -> Option<bool> {
        self.entries.get(key).map(|e| e.carry.is_some())
    }

    pub fn first_key(&self) -> Option<&A::Key> {
        self.entries.keys().next()
    }

    pub fn last_key(&self) -> Option<&A::Key> {
        self.entries.keys().next_back()
    }

    /// Keys of retained entries within `range`, ascending
    pub fn keys_in<R>(&self, range: R) -> impl DoubleEndedIterator<Item = &A::Key>
    where
        R: RangeBounds<A::Key>,
    {
        self.entries.range(range).map(|(k, _)| k)
    }

    pub fn get(&self, key: &A::Key) -> Option<&A> {
        self.entries.get(key).map(|e| &e.action)
    }

    pub fn stats(&self) -> ReplayStats {
        self.stats
    }
}

impl<A: Action> Default for Repo<A> {
    fn default() -> Self {
        Self::new()
    }
}

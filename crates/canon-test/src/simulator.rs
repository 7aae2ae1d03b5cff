//! Simulated peer network
//!
//! Every peer is a full container. Calls a peer dispatches are copied to all
//! other peers with a random delay measured in timesteps, possibly more than
//! once, and delivered in shuffled order. Loss is not simulated: the log
//! needs every call eventually, and retransmission belongs to the transport.

use canon_core::{Author, Call, ReplicaError, ReplicaResult};
use canon_state::{Container, ContainerConfig, Outbox, Snapshot};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Delivery conditions
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkConfig {
    /// Probability that a copy is held back for a later timestep
    pub reorder_prob: f64,
    /// Maximum hold-back in timesteps
    pub max_delay: u64,
    /// Probability that a call is sent twice to the same peer
    pub duplicate_prob: f64,
    /// Random seed
    pub seed: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            reorder_prob: 0.2,
            max_delay: 3,
            duplicate_prob: 0.05,
            seed: 42,
        }
    }
}

impl NetworkConfig {
    /// In-order, exactly-once delivery
    pub fn perfect() -> Self {
        NetworkConfig {
            reorder_prob: 0.0,
            max_delay: 0,
            duplicate_prob: 0.0,
            seed: 42,
        }
    }

    /// Heavy reordering and duplication
    pub fn hostile() -> Self {
        NetworkConfig {
            reorder_prob: 0.6,
            max_delay: 5,
            duplicate_prob: 0.2,
            seed: 42,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Horizon lag that keeps every late delivery above the horizon
    pub fn safe_horizon_lag(&self) -> i64 {
        self.max_delay as i64 + 1
    }
}

/// A call on its way to one peer
#[derive(Clone, Debug)]
struct Envelope {
    to: usize,
    due: i64,
    call: Call,
}

/// Delivery counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetworkStats {
    /// Calls taken from outboxes
    pub dispatched: u64,
    /// Copies handed to `receive`
    pub delivered: u64,
    /// Copies held back at least one timestep
    pub delayed: u64,
    /// Extra copies
    pub duplicated: u64,
}

/// A set of peers and the calls in flight between them
pub struct PeerNetwork {
    peers: Vec<Container<Outbox>>,
    in_flight: Vec<Envelope>,
    config: NetworkConfig,
    rng: StdRng,
    time: i64,
    stats: NetworkStats,
}

impl PeerNetwork {
    /// Create `count` peers with authors `1..=count`, each prepared by `setup`
    ///
    /// `setup` must do the same thing on every peer (bootstrap the same
    /// roots, register the same periodics).
    pub fn new<F>(count: usize, config: NetworkConfig, setup: F) -> ReplicaResult<Self>
    where
        F: Fn(&mut Container<Outbox>) -> ReplicaResult<()>,
    {
        let mut peers = Vec::with_capacity(count);
        for i in 0..count {
            let author = Author::new(0, i as i64 + 1);
            let container_config =
                ContainerConfig::for_author(author).with_horizon_lag(config.safe_horizon_lag());
            let mut container = Container::new(container_config, Outbox::new())?;
            setup(&mut container)?;
            peers.push(container);
        }

        Ok(PeerNetwork {
            peers,
            in_flight: Vec::new(),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            time: 0,
            stats: NetworkStats::default(),
        })
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn peer(&self, index: usize) -> &Container<Outbox> {
        &self.peers[index]
    }

    pub fn peer_mut(&mut self, index: usize) -> &mut Container<Outbox> {
        &mut self.peers[index]
    }

    pub fn peers(&self) -> &[Container<Outbox>] {
        &self.peers
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats
    }

    /// Move every peer to `time`, firing their periodics
    pub fn advance(&mut self, time: i64) -> ReplicaResult<()> {
        for peer in &mut self.peers {
            peer.revise(time)?;
        }
        self.time = time;
        Ok(())
    }

    /// Take dispatched calls from every outbox and put copies in flight
    pub fn collect(&mut self) {
        for from in 0..self.peers.len() {
            let calls = self.peers[from].dispatcher_mut().drain();
            self.stats.dispatched += calls.len() as u64;

            for call in calls {
                for to in (0..self.peers.len()).filter(|to| *to != from) {
                    let copies = if self.rng.gen::<f64>() < self.config.duplicate_prob {
                        self.stats.duplicated += 1;
                        2
                    } else {
                        1
                    };
                    for _ in 0..copies {
                        let delay = self.sample_delay();
                        self.in_flight.push(Envelope {
                            to,
                            due: self.time + delay,
                            call: call.clone(),
                        });
                    }
                }
            }
        }
    }

    fn sample_delay(&mut self) -> i64 {
        if self.config.max_delay > 0 && self.rng.gen::<f64>() < self.config.reorder_prob {
            self.stats.delayed += 1;
            self.rng.gen_range(1..=self.config.max_delay) as i64
        } else {
            0
        }
    }

    /// Deliver every copy due by now, in random order
    pub fn deliver_due(&mut self) -> ReplicaResult<usize> {
        let time = self.time;
        let (due, held): (Vec<Envelope>, Vec<Envelope>) =
            self.in_flight.drain(..).partition(|envelope| envelope.due <= time);
        self.in_flight = held;
        self.deliver(due)
    }

    /// Deliver everything still in flight, in random order
    pub fn flush(&mut self) -> ReplicaResult<usize> {
        self.collect();
        let all = std::mem::take(&mut self.in_flight);
        self.deliver(all)
    }

    fn deliver(&mut self, mut envelopes: Vec<Envelope>) -> ReplicaResult<usize> {
        envelopes.shuffle(&mut self.rng);
        let count = envelopes.len();
        for envelope in envelopes {
            let peer = self
                .peers
                .get_mut(envelope.to)
                .ok_or_else(|| ReplicaError::InvalidConfig(format!("no peer {}", envelope.to)))?;
            peer.receive_call(envelope.call)?;
            self.stats.delivered += 1;
        }
        if count > 0 {
            debug!(time = self.time, count, "delivered");
        }
        Ok(count)
    }

    /// Snapshots of all peers
    pub fn snapshots(&self) -> ReplicaResult<Vec<Snapshot>> {
        self.peers.iter().map(|peer| peer.snapshot()).collect()
    }

    /// Indices of peers whose state differs from peer 0
    pub fn divergent(&self) -> ReplicaResult<Vec<usize>> {
        let snapshots = self.snapshots()?;
        let Some(reference) = snapshots.first() else {
            return Ok(Vec::new());
        };
        Ok(snapshots
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, snapshot)| *snapshot != reference)
            .map(|(i, _)| i)
            .collect())
    }
}

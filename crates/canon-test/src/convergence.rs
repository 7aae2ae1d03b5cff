//! Convergence fuzzer
//!
//! Peers issue random orbital calls against their own view of the world
//! while the network reorders and duplicates deliveries. After the last
//! round everything in flight is delivered and all peers must hold the same
//! snapshot.

use canon_core::{Pattern, ReplicaResult};
use canon_state::{Container, Entity, Outbox};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::fixtures::{install_integrator, seed_universe, universe_key, Body, Universe};
use crate::simulator::{NetworkConfig, NetworkStats, PeerNetwork};

const UNIVERSE: &str = "sol";
const NAMES: [&str; 8] = ["ceres", "eris", "io", "luna", "mars", "pallas", "titan", "vesta"];

/// Fuzzer configuration
#[derive(Clone, Debug)]
pub struct FuzzerConfig {
    /// Number of peers
    pub peers: usize,
    /// Timesteps to run
    pub rounds: i64,
    /// Calls each peer attempts per timestep
    pub calls_per_round: usize,
    /// Integrator interval, `0` for none
    pub integrate_every: i64,
    /// Probability of out-of-order delivery
    pub reorder_prob: f64,
    /// Maximum delivery delay in timesteps
    pub max_delay: u64,
    /// Probability of duplicate delivery
    pub duplicate_prob: f64,
    /// Random seed
    pub seed: u64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        FuzzerConfig {
            peers: 3,
            rounds: 20,
            calls_per_round: 2,
            integrate_every: 3,
            reorder_prob: 0.3,
            max_delay: 3,
            duplicate_prob: 0.05,
            seed: 42,
        }
    }
}

impl FuzzerConfig {
    /// Light fuzzing for quick tests
    pub fn light() -> Self {
        FuzzerConfig {
            peers: 2,
            rounds: 8,
            calls_per_round: 2,
            integrate_every: 2,
            reorder_prob: 0.3,
            max_delay: 2,
            duplicate_prob: 0.1,
            seed: 42,
        }
    }

    /// Heavy fuzzing for thorough testing
    pub fn heavy() -> Self {
        FuzzerConfig {
            peers: 5,
            rounds: 60,
            calls_per_round: 4,
            integrate_every: 1,
            reorder_prob: 0.6,
            max_delay: 6,
            duplicate_prob: 0.2,
            seed: 42,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn network(&self) -> NetworkConfig {
        NetworkConfig {
            reorder_prob: self.reorder_prob,
            max_delay: self.max_delay,
            duplicate_prob: self.duplicate_prob,
            seed: self.seed,
        }
    }
}

/// Outcome of one fuzzing run
#[derive(Debug)]
pub struct FuzzResult {
    /// Peers whose final snapshot differs from peer 0
    pub divergent: Vec<usize>,
    /// Calls that succeeded locally and were dispatched
    pub issued: u64,
    /// Local calls that returned an error and were never dispatched
    pub rejected: u64,
    /// Live entities on peer 0 at the end
    pub entities: usize,
    pub network: NetworkStats,
}

impl FuzzResult {
    pub fn is_converged(&self) -> bool {
        self.divergent.is_empty()
    }
}

/// Drives a `PeerNetwork` with random calls
pub struct ConvergenceFuzzer {
    config: FuzzerConfig,
    network: PeerNetwork,
    rng: StdRng,
    issued: u64,
    rejected: u64,
}

impl ConvergenceFuzzer {
    pub fn new(config: FuzzerConfig) -> ReplicaResult<Self> {
        let integrate_every = config.integrate_every;
        let network = PeerNetwork::new(config.peers, config.network(), |container| {
            seed_universe(container, UNIVERSE)?;
            if integrate_every > 0 {
                install_integrator(container, UNIVERSE, 1, integrate_every)?;
            }
            Ok(())
        })?;

        Ok(ConvergenceFuzzer {
            // Calls use their own stream so delivery randomness stays independent
            rng: StdRng::seed_from_u64(config.seed.wrapping_add(1)),
            config,
            network,
            issued: 0,
            rejected: 0,
        })
    }

    pub fn network(&self) -> &PeerNetwork {
        &self.network
    }

    /// Run every round, then drain the network and compare peers
    pub fn run(&mut self) -> ReplicaResult<FuzzResult> {
        for round in 1..=self.config.rounds {
            self.network.advance(round)?;
            for peer in 0..self.network.len() {
                for _ in 0..self.config.calls_per_round {
                    self.random_call(peer);
                }
            }
            self.network.collect();
            self.network.deliver_due()?;
        }
        self.network.flush()?;

        let result = FuzzResult {
            divergent: self.network.divergent()?,
            issued: self.issued,
            rejected: self.rejected,
            entities: self.network.peer(0).world().len(),
            network: self.network.stats(),
        };
        info!(
            seed = self.config.seed,
            issued = result.issued,
            entities = result.entities,
            converged = result.is_converged(),
            "fuzz run finished"
        );
        Ok(result)
    }

    /// Issue one random call from `peer` against its current view
    fn random_call(&mut self, peer: usize) {
        let rng = &mut self.rng;
        let container = self.network.peer_mut(peer);
        let Some(universe) = container.world().find_entity::<Universe>(&universe_key(UNIVERSE)) else {
            return;
        };
        let bodies = container
            .world()
            .match_kind::<Body>(&Pattern::default().any().any());

        let outcome = match (rng.gen_range(0..100), bodies.choose(rng)) {
            (0..=29, _) | (_, None) => {
                let name = NAMES.choose(rng).copied().unwrap_or("anon").to_string();
                let (x, y) = (rng.gen_range(-100.0..100.0), rng.gen_range(-100.0..100.0));
                let mass = rng.gen_range(1.0..10.0);
                container.invoke(&universe, Universe::SPAWN, (name, x, y, mass))
            }
            (30..=64, Some(body)) => {
                let (dx, dy) = (rng.gen_range(-5.0..5.0), rng.gen_range(-5.0..5.0));
                container.invoke(body, Body::PUSH, (dx, dy))
            }
            (65..=79, Some(body)) => {
                let name = NAMES.choose(rng).copied().unwrap_or("anon").to_string();
                container.invoke(body, Body::RENAME, (name,))
            }
            (80..=91, Some(body)) => match bodies.choose(rng) {
                Some(other) => container.invoke(body, Body::MERGE, (other.this(),)),
                None => return,
            },
            (92..=97, Some(body)) => container.invoke(&universe, Universe::REMOVE, (body.this(),)),
            (_, Some(_)) => container.invoke(&universe, Universe::CLEAR, ()),
        };

        match outcome {
            Ok(revision) => {
                self.issued += 1;
                debug!(peer, ?revision, "issued");
            }
            Err(error) => {
                self.rejected += 1;
                debug!(peer, %error, "local call rejected");
            }
        }
    }
}

/// Run one fuzzing pass with `config`
pub fn fuzz(config: FuzzerConfig) -> ReplicaResult<FuzzResult> {
    ConvergenceFuzzer::new(config)?.run()
}

/// Peer 0 of a finished run, for inspection
pub fn reference_peer(fuzzer: &ConvergenceFuzzer) -> &Container<Outbox> {
    fuzzer.network().peer(0)
}

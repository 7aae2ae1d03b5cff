//! Canon Test Harness - Convergence testing for replicated containers
//!
//! This crate provides:
//! - Orbital demo entities
//! - A simulated peer network with reordering and duplication
//! - A seeded convergence fuzzer

pub mod convergence;
pub mod fixtures;
pub mod simulator;

pub use convergence::*;
pub use fixtures::*;
pub use simulator::*;

use tracing_subscriber::EnvFilter;

/// Install a test subscriber filtered by `RUST_LOG`
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

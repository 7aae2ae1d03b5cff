//! Peers converge whatever order calls arrive in
//!
//! A scripted two-peer session produces a journal of calls. Replaying that
//! journal into a fresh peer in any order, with duplicates, must reproduce
//! the session's final state.

use canon_core::{Author, Call, Pattern};
use canon_state::{Container, ContainerConfig, Entity, Outbox};
use canon_test::{
    fuzz, init_tracing, install_integrator, seed_universe, universe_key, Body, FuzzerConfig,
    Universe,
};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

const END: i64 = 6;

fn peer(id: i64) -> Container {
    let config = ContainerConfig::for_author(Author::new(0, id)).with_horizon_lag(16);
    let mut container = Container::new(config, Outbox::new()).unwrap();
    seed_universe(&mut container, "sol").unwrap();
    install_integrator(&mut container, "sol", 1, 2).unwrap();
    container
}

fn universe(container: &Container) -> Universe {
    container.world().find_entity(&universe_key("sol")).unwrap()
}

fn body(container: &Container, name: &str) -> Body {
    container
        .world()
        .match_kind::<Body>(&Pattern::default().any().is(name))
        .into_iter()
        .next()
        .unwrap()
}

fn exchange(a: &mut Container, b: &mut Container, journal: &mut Vec<Call>) {
    for call in a.dispatcher_mut().drain() {
        b.receive_call(call.clone()).unwrap();
        journal.push(call);
    }
    for call in b.dispatcher_mut().drain() {
        a.receive_call(call.clone()).unwrap();
        journal.push(call);
    }
}

fn revise(a: &mut Container, b: &mut Container, time: i64) {
    a.revise(time).unwrap();
    b.revise(time).unwrap();
}

/// Two peers editing one universe, synchronizing after every timestep
fn session() -> (Container, Container, Vec<Call>) {
    let (mut a, mut b) = (peer(1), peer(2));
    let mut journal = Vec::new();

    revise(&mut a, &mut b, 1);
    let sol = universe(&a);
    a.invoke(&sol, Universe::SPAWN, ("io".into(), 0.0, 0.0, 2.0)).unwrap();
    let sol = universe(&b);
    b.invoke(&sol, Universe::SPAWN, ("luna".into(), 10.0, 0.0, 1.0)).unwrap();
    exchange(&mut a, &mut b, &mut journal);

    revise(&mut a, &mut b, 2);
    b.invoke(&body(&b, "io"), Body::PUSH, (2.0, 0.0)).unwrap();
    a.invoke(&body(&a, "luna"), Body::PUSH, (0.0, 3.0)).unwrap();
    exchange(&mut a, &mut b, &mut journal);

    // Concurrent rename and push: the push sorts after the rename and finds
    // nothing under the old name
    revise(&mut a, &mut b, 3);
    a.invoke(&body(&a, "luna"), Body::RENAME, ("titan".into(),)).unwrap();
    b.invoke(&body(&b, "luna"), Body::PUSH, (5.0, 5.0)).unwrap();
    exchange(&mut a, &mut b, &mut journal);

    revise(&mut a, &mut b, 4);
    let io = body(&b, "io");
    b.invoke(&body(&b, "titan"), Body::MERGE, (io.this(),)).unwrap();
    let sol = universe(&a);
    a.invoke(&sol, Universe::SPAWN, ("eris".into(), -4.0, 4.0, 1.0)).unwrap();
    exchange(&mut a, &mut b, &mut journal);

    revise(&mut a, &mut b, 5);
    let sol = universe(&a);
    let eris = body(&a, "eris");
    a.invoke(&sol, Universe::REMOVE, (eris.this(),)).unwrap();
    b.invoke(&body(&b, "eris"), Body::PUSH, (1.0, 1.0)).unwrap();
    exchange(&mut a, &mut b, &mut journal);

    revise(&mut a, &mut b, END);
    (a, b, journal)
}

fn replay(journal: &[Call], seed: u64, duplicates: usize) -> Container {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut deliveries = journal.to_vec();
    for _ in 0..duplicates {
        if let Some(call) = journal.choose(&mut rng) {
            deliveries.push(call.clone());
        }
    }
    deliveries.shuffle(&mut rng);

    let mut fresh = peer(3);
    for call in deliveries {
        fresh.receive_call(call).unwrap();
    }
    fresh.revise(END).unwrap();
    fresh
}

#[test]
fn test_session_peers_agree() {
    init_tracing();
    let (a, b, journal) = session();

    assert_eq!(journal.len(), 10);
    assert_eq!(a.snapshot().unwrap(), b.snapshot().unwrap());

    let world = a.world();
    let sol = universe(&a);
    let titan = body(&a, "titan");
    assert_eq!(sol.bodies.value(world).unwrap(), vec![titan.this()]);
    assert_eq!(titan.mass.value(world).unwrap(), 3.0);
    // Ticks 1, 3 and 5
    assert_eq!(sol.steps.value(world).unwrap(), 3);
}

#[test]
fn test_sorted_replay_matches_session() {
    let (a, _, mut journal) = session();
    journal.sort_by_key(|call| call.revision);

    let mut fresh = peer(3);
    for call in journal {
        fresh.receive_call(call).unwrap();
    }
    fresh.revise(END).unwrap();
    assert_eq!(fresh.snapshot().unwrap(), a.snapshot().unwrap());
    assert_eq!(fresh.log().stats().failed, 0);
}

#[test]
#[ignore]
fn test_heavy_fuzz_converges() {
    init_tracing();
    let result = fuzz(FuzzerConfig::heavy()).unwrap();
    assert!(result.is_converged(), "divergent peers: {:?}", result.divergent);
}

proptest! {
    /// Any delivery order, with duplicates, reaches the session's state
    #[test]
    fn prop_any_delivery_order_converges(seed in any::<u64>(), duplicates in 0usize..4) {
        let (a, _, journal) = session();
        let fresh = replay(&journal, seed, duplicates);
        prop_assert_eq!(fresh.snapshot().unwrap(), a.snapshot().unwrap());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn prop_fuzzed_peers_converge(seed in any::<u64>()) {
        let result = fuzz(FuzzerConfig::light().with_seed(seed)).unwrap();
        prop_assert!(result.is_converged(), "seed {}: {:?}", seed, result.divergent);
    }
}

//! tests/integration/adversarial.rs
//!
//! Runtime edge cases rather than happy-path convergence: peers that
//! flood each other with connection requests, gossip that arrives at a
//! peer more than once, and a TTL budget too small to cross a sparse
//! network.

use crate::common::harness::{build_and_run, network_config};
use test_log::test;

#[test]
fn max_peers_bound_holds_under_churn() {
    let config = network_config(
        61,
        2,
        12,
        "connection_manager: {min_peers: 4, max_peers: 5, ping_interval_ms: 100, peer_list_number: 8, peer_batch_request_number: 6}\n",
    );
    let sim = build_and_run(config, 40.0);

    for id in sim.peer_ids() {
        let peer = sim.peer(id).unwrap();
        assert!(peer.connections.len() <= 5, "peer {id} exceeded max_peers with {} connections", peer.connections.len());
    }
}

#[test]
fn duplicate_gossip_delivery_does_not_duplicate_storage() {
    let config = network_config(
        62,
        1,
        6,
        "connection_manager: {min_peers: 5, max_peers: 6, ping_interval_ms: 100}\n\
         gossip: {fanout: 6}\n\
         message_producer: {interval: 5.0, ttl: 5, fanout: 6, payload_size: 8}\n",
    );
    let sim = build_and_run(config, 20.0);

    // A dense, high-fanout topology all but guarantees some peer sees the
    // same message relayed by more than one neighbor; `known_ids` must
    // still only list it once even though `times_seen` can exceed one.
    for id in sim.peer_ids() {
        let Some(store) = sim.peer(id).and_then(|p| p.get_storage("msg_data")) else { continue };
        let known = store.known_ids();
        let unique: std::collections::HashSet<_> = known.iter().collect();
        assert_eq!(known.len(), unique.len(), "peer {id}'s known id list should contain no duplicates");
    }
}

#[test]
fn short_ttl_does_not_cross_a_sparse_chain() {
    // A chain-like topology (everyone bootstraps through one hub, but a
    // low max_peers keeps the graph sparse) with ttl:1 should leave most
    // peers never hearing a given message: it can be relayed at most once
    // past its origin.
    let config = network_config(
        63,
        1,
        8,
        "connection_manager: {min_peers: 1, max_peers: 2, ping_interval_ms: 200}\n\
         gossip: {fanout: 1}\n\
         message_producer: {interval: 50.0, ttl: 1, fanout: 1, payload_size: 8, limit: 1}\n",
    );
    let sim = build_and_run(config, 15.0);

    let total_known: usize = sim
        .peer_ids()
        .filter_map(|id| sim.peer(id).and_then(|p| p.get_storage("msg_data")))
        .map(|store| store.known_ids().len())
        .sum();
    let peer_count = sim.peer_ids().count();
    assert!(total_known < peer_count, "a ttl:1 message shouldn't have reached the whole {peer_count}-peer network, saw {total_known} copies");
}

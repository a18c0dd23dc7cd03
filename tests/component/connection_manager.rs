//! tests/component/connection_manager.rs
//!
//! Exercises the connection manager's active peer discovery: a node
//! below `min_peers` should ask around for more connections instead of
//! sitting on just its bootstrap link.

use crate::common::harness::{build_and_run, network_config};

#[test]
fn expands_beyond_the_bootstrap_star() {
    let config = network_config(
        11,
        1,
        6,
        "connection_manager: {min_peers: 3, max_peers: 8, ping_interval_ms: 200, peer_list_number: 5, peer_batch_request_number: 4}\n",
    );
    let sim = build_and_run(config, 60.0);

    let bootstrap = sim.bootstrap_peers()[0];
    let extra_links = sim
        .peer_ids()
        .filter(|&id| id != bootstrap)
        .filter(|&id| sim.peer(id).map(|p| p.connections.len() > 1).unwrap_or(false))
        .count();

    assert!(extra_links > 0, "at least one peer should have grown past its single bootstrap connection");
}

#[test]
fn every_peer_stays_reachable() {
    let config = network_config(12, 1, 4, "connection_manager: {min_peers: 1, max_peers: 4}\n");
    let sim = build_and_run(config, 20.0);

    for id in sim.peer_ids() {
        let peer = sim.peer(id).unwrap();
        assert!(peer.connections.len() >= 1, "peer {id} should keep at least one live connection");
    }
}

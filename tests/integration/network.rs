//! tests/integration/network.rs
//!
//! End-to-end check that a modestly-sized network assembles a connected
//! topology and fully disseminates gossiped content, exercising the same
//! `Config`/`App` path a real run takes.

use crate::common::harness::{build_and_run, common_known_ids, network_config};
use test_log::test;

#[test]
fn ten_node_network_converges_on_shared_content() {
    let config = network_config(
        41,
        2,
        8,
        "connection_manager: {min_peers: 4, max_peers: 8, ping_interval_ms: 200}\n\
         gossip: {fanout: 5}\n\
         message_producer: {interval: 3.0, ttl: 6, fanout: 5, payload_size: 16}\n",
    );
    let sim = build_and_run(config, 45.0);

    let graph = sim.get_graph(true);
    assert!(graph.edge_count() > 0, "the network should have formed at least one connection");

    let shared = common_known_ids(&sim);
    assert!(!shared.is_empty(), "gossip should have converged on at least one shared message across the whole network");
}

//! tests/component/ranged_pull_gossip.rs
//!
//! Ranged pull anti-entropy with push relay disabled (`fanout: 0` on
//! the producer): content can only spread through periodic
//! `SyncPing`/`SyncPong` hole-filling, not the push path.

use crate::common::harness::{build_and_run, common_known_ids, network_config};

#[test]
fn hole_filling_alone_propagates_content() {
    let config = network_config(
        31,
        1,
        3,
        "connection_manager: {min_peers: 3, max_peers: 4, ping_interval_ms: 200}\n\
         ranged_pull_gossip: {fanout: 4, round_time_ms: 500}\n\
         message_producer: {interval: 2.0, ttl: 0, fanout: 0, payload_size: 8}\n",
    );
    let sim = build_and_run(config, 30.0);

    let shared = common_known_ids(&sim);
    assert!(!shared.is_empty(), "ranged pull-gossip should have synced at least one message to every peer");
}

//! tests/integration/topology.rs
//!
//! Resilience under churn: taking a peer offline with a `downtime`
//! disruption should not permanently wreck the topology. Connections
//! aren't torn down by `Downtime` itself (only the `online` flag flips;
//! entries in `connections` are left alone and the peer reconnects to
//! its old neighbors on recovery), so these tests check the flag and
//! overall network health rather than the connection table shrinking.

use crate::common::harness::{build_and_run, network_config};
use p2p_sim::time::SimTime;
use test_log::test;

#[test]
fn network_forms_connections_before_any_disruption() {
    let config = network_config(
        51,
        1,
        5,
        "connection_manager: {min_peers: 3, max_peers: 6, ping_interval_ms: 200}\n",
    );
    let sim = build_and_run(config, 15.0);

    let connected = sim.peer_ids().filter(|&id| sim.peer(id).map(|p| !p.connections.is_empty()).unwrap_or(false)).count();
    assert_eq!(connected, sim.peer_ids().count(), "every peer should have at least one connection once the topology settles");
}

#[test]
fn most_peers_stay_online_under_high_availability_churn() {
    let config = network_config(
        52,
        1,
        10,
        "connection_manager: {min_peers: 3, max_peers: 6, ping_interval_ms: 200}\n\
         downtime: {interval_ms: 200, mtbf_ms: 3000, availability: 0.9}\n",
    );
    let mut sim = build_and_run(config, 60.0);

    // availability is the long-run fraction of time a peer spends online;
    // across 10 independent peers the odds of more than a third being
    // down simultaneously are negligible.
    sim.run(Some(SimTime(90.0))).unwrap();
    let online = sim.peer_ids().filter(|&id| sim.peer(id).map(|p| p.online).unwrap_or(false)).count();
    assert!(online * 3 >= sim.peer_ids().count() * 2, "expected most peers online with availability 0.9, got {online}");
}

#[test]
fn scheduled_downtime_takes_a_peer_offline_for_exactly_its_window() {
    // A fixed schedule, not a probe: peer goes offline at t=1000ms, back
    // online at t=1500ms, and the schedule is exhausted after that.
    let config = network_config(
        54,
        1,
        2,
        "connection_manager: {min_peers: 1, max_peers: 2, ping_interval_ms: 200}\n\
         downtime: {schedule_ms: [1000.0, 500.0]}\n",
    );
    let mut sim = build_and_run(config, 0.0);
    let target = sim.peer_ids().nth(1).expect("at least two peers");

    sim.run(Some(SimTime(1.2))).unwrap();
    assert!(!sim.peer(target).unwrap().online, "peer should be offline inside its downtime window");

    sim.run(Some(SimTime(1.6))).unwrap();
    assert!(sim.peer(target).unwrap().online, "peer should have recovered once its window ended");
}

#[test]
fn reconnect_targets_survive_a_downtime_cycle() {
    let config = network_config(
        53,
        1,
        4,
        "connection_manager: {min_peers: 2, max_peers: 4, ping_interval_ms: 200}\n\
         downtime: {interval_ms: 100, mtbf_ms: 2000, availability: 0.5}\n",
    );
    let sim = build_and_run(config, 40.0);

    // Whatever each peer's online state ended up as, the simulation
    // should still be in a consistent state: no connection entry points
    // at a peer id that doesn't exist.
    for id in sim.peer_ids() {
        let peer = sim.peer(id).unwrap();
        for &other in peer.connections.keys() {
            assert!(sim.peer(other).is_some(), "connection to peer {other} should resolve to a live peer");
        }
    }
}

//! tests/common/harness.rs
//!
//! Shared building blocks for integration and component tests. Tests
//! build a `Config` directly (the same shape `config.rs` loads from
//! YAML) and hand it to `App::build_simulation`, the same path
//! `main.rs` takes, so these tests exercise real wiring rather than
//! hand-rolled peers reaching into crate internals.

use indexmap::IndexMap;

use p2p_sim::config::{Config, FieldSpec, LocationSpec, PeerTypeSpec, TopologySpec};
use p2p_sim::simulation::Simulation;
use p2p_sim::time::SimTime;
use p2p_sim::App;

/// A two-location (`eu`/`us`) network with one peer type named `node`
/// carrying `services_yaml`'s subrecords. `services_yaml` is parsed the
/// same way a peer type's `services:` block is in a real config file.
pub fn network_config(seed: u64, bootstrap: usize, peers: usize, services_yaml: &str) -> Config {
    let services: IndexMap<String, serde_yaml::Value> =
        serde_yaml::from_str(services_yaml).expect("valid service subrecord yaml");

    let mut eu_row = IndexMap::new();
    eu_row.insert("eu".to_string(), FieldSpec::Scalar(5.0));
    eu_row.insert("us".to_string(), FieldSpec::Scalar(40.0));
    let mut us_row = IndexMap::new();
    us_row.insert("eu".to_string(), FieldSpec::Scalar(40.0));
    us_row.insert("us".to_string(), FieldSpec::Scalar(5.0));
    let mut latencies = IndexMap::new();
    latencies.insert("eu".to_string(), eu_row);
    latencies.insert("us".to_string(), us_row);

    let mut peer_types = IndexMap::new();
    peer_types.insert(
        "node".to_string(),
        PeerTypeSpec {
            location: LocationSpec::Sample { values: vec!["eu".into(), "us".into()], weights: None },
            bandwidth_ul: FieldSpec::Scalar(1_000_000.0),
            bandwidth_dl: FieldSpec::Scalar(1_000_000.0),
            services,
        },
    );

    let mut bootstrap_per_type = IndexMap::new();
    bootstrap_per_type.insert("node".to_string(), bootstrap);
    let mut peers_per_type = IndexMap::new();
    peers_per_type.insert("node".to_string(), peers);

    Config {
        locations: vec!["eu".to_string(), "us".to_string()],
        latencies,
        peer_types,
        seed,
        latency_cache_n: 16,
        bootstrap: TopologySpec { bootstrap_per_type, peers_per_type },
        visualizer: None,
        serve_tick_ms: None,
    }
}

/// Builds the simulation from `config` and runs it to `until_secs`.
pub fn build_and_run(config: Config, until_secs: f64) -> Simulation {
    let app = App::new(config).expect("app config is valid");
    let mut sim = app.build_simulation().expect("simulation builds from config");
    sim.run(Some(SimTime(until_secs))).expect("simulation runs to completion");
    sim
}

/// How many of `sim`'s peers have `id` in their `msg_data` bucket.
pub fn peers_knowing(sim: &Simulation, id: &str) -> usize {
    sim.peer_ids()
        .filter(|&p| {
            sim.peer(p)
                .and_then(|peer| peer.get_storage("msg_data"))
                .map(|store| store.get(id).is_some())
                .unwrap_or(false)
        })
        .count()
}

/// Message ids present in every peer's `msg_data` bucket: evidence that
/// at least one gossiped item fully propagated across the network.
pub fn common_known_ids(sim: &Simulation) -> indexmap::IndexSet<String> {
    let mut common: Option<indexmap::IndexSet<String>> = None;
    for id in sim.peer_ids() {
        let known: indexmap::IndexSet<String> = sim
            .peer(id)
            .and_then(|peer| peer.get_storage("msg_data"))
            .map(|store| store.known_ids().into_iter().collect())
            .unwrap_or_default();
        common = Some(match common {
            Some(acc) => acc.intersection(&known).cloned().collect(),
            None => known,
        });
    }
    common.unwrap_or_default()
}

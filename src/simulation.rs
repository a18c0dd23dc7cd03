//! src/simulation.rs
//!
//! The simulation harness: owns every peer, the event
//! scheduler, and the latency oracle, and offers the handful of
//! topology/bookkeeping operations a caller needs on top of that (peer
//! creation, running, graph snapshots, bandwidth stats, save/load).
//! Grounded in `p2psimpy/simulation.py`'s `BaseSimulation`.

use std::io::Write as _;
use std::path::Path;

use indexmap::IndexMap;
use petgraph::graph::UnGraph;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::distribution::Distribution;
use crate::error::{Error, Result};
use crate::factory::{PeerFactory, PeerType, PeerTypeMap};
use crate::latency::LatencyOracle;
use crate::peer::{Peer, PeerId};
use crate::scheduler::{self, Scheduler};
use crate::time::SimTime;

pub struct Simulation {
    pub(crate) peers: IndexMap<PeerId, Peer>,
    pub(crate) scheduler: Scheduler,
    pub(crate) latency: LatencyOracle,
    pub(crate) rng: StdRng,

    factory: PeerFactory,
    peer_types: PeerTypeMap,
    bootstrap_peers: Vec<PeerId>,
    seed: u64,
}

impl Simulation {
    pub fn new(locations: IndexMap<(String, String), Distribution>, cache_n: usize, seed: u64) -> Self {
        Simulation {
            peers: IndexMap::new(),
            scheduler: Scheduler::new(),
            latency: LatencyOracle::new(locations, cache_n),
            rng: StdRng::seed_from_u64(seed),
            factory: PeerFactory::new(seed),
            peer_types: IndexMap::new(),
            bootstrap_peers: Vec::new(),
            seed,
        }
    }

    pub fn register_peer_type(&mut self, name: impl Into<String>, peer_type: PeerType) {
        self.peer_types.insert(name.into(), peer_type);
    }

    /// Creates `num` bootstrap peers of `peer_type_name` and starts their
    /// runners immediately, without a bootstrap connection of their own.
    pub fn init_bootstrap_servers(&mut self, peer_type_name: &str, num: usize) -> Result<Vec<PeerId>> {
        let mut created = Vec::with_capacity(num);
        for _ in 0..num {
            let id = self.create_peer(peer_type_name)?;
            self.bootstrap_peers.push(id);
            crate::peer::service::start_all_runners(self, id);
            created.push(id);
        }
        Ok(created)
    }

    /// Creates `num` peers of `peer_type_name`, each bootstrapping through
    /// a randomly-chosen existing bootstrap server.
    pub fn add_peers(&mut self, peer_type_name: &str, num: usize) -> Result<Vec<PeerId>> {
        let mut created = Vec::with_capacity(num);
        for _ in 0..num {
            let id = self.create_peer(peer_type_name)?;
            if !self.bootstrap_peers.is_empty() {
                use rand::Rng;
                let idx = self.rng.gen_range(0..self.bootstrap_peers.len());
                let bootstrap = self.bootstrap_peers[idx];
                self.bootstrap_connect_to(id, bootstrap)?;
            }
            crate::peer::service::start_all_runners(self, id);
            created.push(id);
        }
        Ok(created)
    }

    /// Looks up `peer_type_name`'s template, samples physical properties,
    /// and runs its builder. An unrecognized name is a configuration
    /// mistake (a YAML `bootstrap:`/`peers_per_type:` key with no matching
    /// `peer_types:` entry), not an unrecoverable condition: it surfaces as
    /// `Error::UnknownPeerType` rather than a panic.
    fn create_peer(&mut self, peer_type_name: &str) -> Result<PeerId> {
        let peer_type = self
            .peer_types
            .get(peer_type_name)
            .ok_or_else(|| Error::UnknownPeerType(peer_type_name.to_string()))?;
        let builder = peer_type.builder.clone();
        let peer = self.factory.create(peer_type_name, peer_type);
        let id = peer.peer_id;
        self.peers.insert(id, peer);

        builder(self, id);

        Ok(id)
    }

    pub fn run(&mut self, until: Option<SimTime>) -> Result<()> {
        scheduler::run(self, until)
    }

    pub fn stop(&mut self) {
        self.scheduler.stop();
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn get_latency_delay(&mut self, origin: &str, destination: &str) -> Result<SimTime> {
        let rng = &mut self.rng;
        self.latency.get_delay(rng, origin, destination)
    }

    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn peer_ids(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.keys().copied()
    }

    pub fn bootstrap_peers(&self) -> &[PeerId] {
        &self.bootstrap_peers
    }

    /// Topology snapshot as an undirected graph, edge weights the link
    /// bandwidth.
    pub fn get_graph(&self, include_bootstrap: bool) -> UnGraph<PeerId, f64> {
        let mut graph = UnGraph::new_undirected();
        let mut nodes = IndexMap::new();

        for (&id, peer) in &self.peers {
            if !include_bootstrap && peer.peer_type == "bootstrap" {
                continue;
            }
            nodes.insert(id, graph.add_node(id));
        }
        for (&id, peer) in &self.peers {
            let Some(&a) = nodes.get(&id) else { continue };
            for &other in peer.connections.keys() {
                let Some(&b) = nodes.get(&other) else { continue };
                if !graph.contains_edge(a, b) {
                    let bw = self.link_bandwidth(id, other).unwrap_or(0.0);
                    graph.add_edge(a, b, bw);
                }
            }
        }
        graph
    }

    pub fn avg_bandwidth(&self) -> f64 {
        let bws = self.all_connection_bandwidths();
        if bws.is_empty() {
            return 0.0;
        }
        bws.iter().sum::<f64>() / bws.len() as f64
    }

    pub fn median_bandwidth(&self) -> f64 {
        let mut bws = self.all_connection_bandwidths();
        if bws.is_empty() {
            return 0.0;
        }
        bws.sort_by(|a, b| a.total_cmp(b));
        bws[bws.len() / 2]
    }

    fn all_connection_bandwidths(&self) -> Vec<f64> {
        let mut bws = Vec::new();
        for (&id, peer) in &self.peers {
            for &other in peer.connections.keys() {
                bws.push(self.link_bandwidth(id, other).unwrap_or(0.0));
            }
        }
        bws
    }

    /// Serializes the experiment into a directory of three files:
    /// `locations.yaml` (the latency matrix), `topology.yaml` (seed plus
    /// every peer's physical properties and connection table), and
    /// `services.yaml` (each peer type's attached-service configuration).
    /// Grounded in `p2psimpy/config.py`'s `Config.repr`/`from_repr` round
    /// trip, split across three files because the source's single `Config`
    /// blob conflates three concerns `load_experiment` needs to resolve
    /// independently: the latency oracle, the live topology, and the peer
    /// factory's service wiring.
    pub fn save_experiment(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        write_yaml(&dir.join("locations.yaml"), &self.locations_snapshot())?;
        write_yaml(&dir.join("topology.yaml"), &TopologySnapshot::from(self))?;
        write_yaml(&dir.join("services.yaml"), &self.services_snapshot())?;
        Ok(())
    }

    /// Reads back a directory written by `save_experiment`. The result
    /// carries equivalent inputs, not a resumable simulation: a caller
    /// that wants a live `Simulation` back still has to register peer
    /// types and replay the topology itself (distributions re-sample
    /// rather than replaying one fixed draw).
    pub fn load_experiment(dir: &Path) -> Result<ExperimentSnapshot> {
        Ok(ExperimentSnapshot {
            locations: read_yaml(&dir.join("locations.yaml"))?,
            topology: read_yaml(&dir.join("topology.yaml"))?,
            services: read_yaml(&dir.join("services.yaml"))?,
        })
    }

    fn locations_snapshot(&self) -> LocationsSnapshot {
        LocationsSnapshot {
            latencies: self
                .latency
                .pairs()
                .map(|(origin, destination, distribution)| LatencyEntry {
                    origin: origin.to_string(),
                    destination: destination.to_string(),
                    distribution: distribution.clone(),
                })
                .collect(),
            latency_cache_n: self.latency.cache_n(),
        }
    }

    fn services_snapshot(&self) -> ServicesSnapshot {
        ServicesSnapshot {
            peer_types: self
                .peer_types
                .iter()
                .map(|(name, peer_type)| PeerTypeSnapshot { name: name.clone(), services: peer_type.services.clone() })
                .collect(),
        }
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        let mut locations = IndexMap::new();
        locations.insert(("eu".to_string(), "us".to_string()), Distribution::Scalar(7.0));
        let mut sim = Simulation::new(locations, 8, 42);
        sim.register_peer_type(
            "basic",
            PeerType {
                locations: vec!["eu".to_string()],
                location_weights: None,
                bandwidth_ul: Distribution::Scalar(1_000_000.0),
                bandwidth_dl: Distribution::Scalar(1_000_000.0),
                builder: std::sync::Arc::new(|_, _| {}),
                services: IndexMap::new(),
            },
        );
        sim
    }

    #[cfg(test)]
    pub fn spawn_test_peer(&mut self, location: &str) -> PeerId {
        let id = self.create_peer("basic").expect("'basic' peer type is always registered by for_test");
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.location = location.to_string();
        }
        id
    }
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let yaml = serde_yaml::to_string(value)?;
    let mut file = std::fs::File::create(path)?;
    file.write_all(yaml.as_bytes())?;
    Ok(())
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let yaml = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&yaml)?)
}

/// One origin/destination pair's latency distribution, the `locations.yaml`
/// record.
#[derive(Serialize, Deserialize)]
pub struct LatencyEntry {
    pub origin: String,
    pub destination: String,
    pub distribution: Distribution,
}

#[derive(Serialize, Deserialize)]
pub struct LocationsSnapshot {
    pub latencies: Vec<LatencyEntry>,
    pub latency_cache_n: usize,
}

/// A single peer's recorded state for `save_experiment`/`load_experiment`.
#[derive(Serialize, Deserialize)]
pub struct PeerSnapshot {
    pub peer_id: PeerId,
    pub peer_type: String,
    pub location: String,
    pub bandwidth_ul: f64,
    pub bandwidth_dl: f64,
    pub connections: Vec<PeerId>,
}

/// Seed plus every peer's physical properties and connection table, the
/// `topology.yaml` record.
#[derive(Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub seed: u64,
    pub peers: Vec<PeerSnapshot>,
}

impl From<&Simulation> for TopologySnapshot {
    fn from(sim: &Simulation) -> Self {
        TopologySnapshot {
            seed: sim.seed,
            peers: sim
                .peers
                .values()
                .map(|p| PeerSnapshot {
                    peer_id: p.peer_id,
                    peer_type: p.peer_type.clone(),
                    location: p.location.clone(),
                    bandwidth_ul: p.bandwidth_ul,
                    bandwidth_dl: p.bandwidth_dl,
                    connections: p.connections.keys().copied().collect(),
                })
                .collect(),
        }
    }
}

/// One peer type's attached-service configuration, the `services.yaml`
/// record. `services` is the same raw YAML bag `PeerTypeSpec` carries, so
/// it round-trips regardless of which services a peer type names.
#[derive(Serialize, Deserialize)]
pub struct PeerTypeSnapshot {
    pub name: String,
    pub services: IndexMap<String, serde_yaml::Value>,
}

#[derive(Serialize, Deserialize)]
pub struct ServicesSnapshot {
    pub peer_types: Vec<PeerTypeSnapshot>,
}

/// The combined result of `load_experiment`: equivalent inputs to what
/// `save_experiment` captured, not a resumable `Simulation`.
#[derive(Serialize, Deserialize)]
pub struct ExperimentSnapshot {
    pub locations: LocationsSnapshot,
    pub topology: TopologySnapshot,
    pub services: ServicesSnapshot,
}

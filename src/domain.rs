//! src/domain.rs
//!
//! Shared "lingua franca" view types for the optional visualizer: a
//! JSON-friendly snapshot of the simulated network's current topology,
//! built from a `Simulation` without the API layer reaching into
//! `peer::Peer` directly. No cryptographic identity survives here (no
//! goal: no cryptographic security) — see DESIGN.md for the dropped
//! `ed25519-dalek`/`hex`/`bincode` dependencies.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use crate::peer::PeerId;
use crate::simulation::Simulation;

/// Per-peer metadata the visualizer renders: physical properties plus
/// reachability, widened from `Simulation::get_graph`'s node set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeInfo {
    pub peer_type: String,
    pub location: String,
    pub bandwidth_ul: f64,
    pub bandwidth_dl: f64,
    pub online: bool,
}

/// A full snapshot of the network's topology at one simulated instant.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NetworkState {
    pub sim_time: f64,
    pub nodes: IndexMap<PeerId, NodeInfo>,
    pub edges: Vec<(PeerId, PeerId)>,
}

impl NetworkState {
    /// Builds a snapshot from the simulation's current state. Bootstrap
    /// peers are included: unlike `get_graph`'s default, the visualizer
    /// wants to show the whole network, not just the organically-grown
    /// part of it.
    pub fn from_simulation(sim: &Simulation) -> Self {
        let mut nodes = IndexMap::new();
        let mut edges = Vec::new();
        let mut seen_edges = HashSet::new();

        for id in sim.peer_ids() {
            let Some(peer) = sim.peer(id) else { continue };
            nodes.insert(
                id,
                NodeInfo {
                    peer_type: peer.peer_type.clone(),
                    location: peer.location.clone(),
                    bandwidth_ul: peer.bandwidth_ul,
                    bandwidth_dl: peer.bandwidth_dl,
                    online: peer.online,
                },
            );
            for other in peer.connected_peers() {
                let key = if id.0 <= other.0 { (id, other) } else { (other, id) };
                if seen_edges.insert(key) {
                    edges.push(key);
                }
            }
        }

        NetworkState { sim_time: sim.now().as_secs(), nodes, edges }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_deduplicates_bilateral_edges() {
        let mut sim = Simulation::for_test();
        let a = sim.spawn_test_peer("eu");
        let b = sim.spawn_test_peer("eu");
        sim.connect(a, b);

        let state = NetworkState::from_simulation(&sim);
        assert_eq!(state.nodes.len(), 2);
        assert_eq!(state.edges.len(), 1);
    }
}

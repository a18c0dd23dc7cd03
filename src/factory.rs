//! src/factory.rs
//!
//! The peer factory: given a peer type's configuration
//! (physical properties plus a list of services to attach), stamps out
//! `Peer`s with fresh ids and wires up their handlers/runners/storage.
//! Grounded in `p2psimpy/peer_factory.py`'s `PeerFactory`, simplified
//! since Rust's config loading (`config.rs`) already resolves which
//! service constructors to call instead of deferring to a name->class map
//! read at construction time.

use std::sync::Arc;

use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::distribution::Distribution;
use crate::peer::{Peer, PeerId};

/// Per-peer-type template: how to sample physical properties for a new
/// instance, and a builder that attaches this type's services once the
/// peer exists in the simulation (so services can reach other peers).
pub struct PeerType {
    /// Candidate location names this peer type may be assigned, with
    /// optional weights. A single-element list with no weights pins
    /// every instance to one location.
    pub locations: Vec<String>,
    pub location_weights: Option<Vec<f64>>,
    pub bandwidth_ul: Distribution,
    pub bandwidth_dl: Distribution,
    pub builder: ServiceBuilder,
    /// Raw service configuration this type was built from, kept around
    /// only so `Simulation::save_experiment` can re-emit a `services.yaml`
    /// that `load_experiment` hands back verbatim; the builder itself is
    /// already resolved and does not read this field.
    pub services: IndexMap<String, serde_yaml::Value>,
}

/// Attaches a peer type's services to a freshly-created peer. `Arc`,
/// not `Box`: `Simulation::create_peer` needs to call it with `&mut
/// Simulation` while the builder itself is borrowed out of
/// `Simulation.peer_types`, and an owned clone of the `Arc` sidesteps
/// that overlap without `unsafe`.
pub type ServiceBuilder = Arc<dyn Fn(&mut crate::simulation::Simulation, PeerId) + Send + Sync>;

#[derive(Default)]
pub struct PeerFactory {
    next_id: u64,
    rng: Option<StdRng>,
}

impl PeerFactory {
    pub fn new(seed: u64) -> Self {
        PeerFactory { next_id: 0, rng: Some(StdRng::seed_from_u64(seed)) }
    }

    fn rng(&mut self) -> &mut StdRng {
        self.rng.get_or_insert_with(|| StdRng::seed_from_u64(0))
    }

    /// Allocates the next `PeerId` and samples physical properties from
    /// `peer_type`, but does not attach services: the caller inserts the
    /// resulting `Peer` into `Simulation.peers` first, then invokes
    /// `peer_type.builder` with a `&mut Simulation` so services can see
    /// their own peer in the registry.
    pub fn create(&mut self, peer_type_name: &str, peer_type: &PeerType) -> Peer {
        let id = PeerId(self.next_id);
        self.next_id += 1;

        let rng = self.rng();
        let location = sample_location(peer_type, rng);
        let bandwidth_ul = peer_type.bandwidth_ul.sample(rng).max(0.0);
        let bandwidth_dl = peer_type.bandwidth_dl.sample(rng).max(0.0);

        Peer::new(id, peer_type_name.to_string(), location, bandwidth_ul, bandwidth_dl)
    }
}

fn sample_location(peer_type: &PeerType, rng: &mut StdRng) -> String {
    use rand::distributions::WeightedIndex;
    use rand::prelude::*;

    if peer_type.locations.is_empty() {
        return String::new();
    }
    let idx = match &peer_type.location_weights {
        Some(w) if w.len() == peer_type.locations.len() => {
            WeightedIndex::new(w).map(|wi| wi.sample(rng)).unwrap_or(0)
        }
        _ => rng.gen_range(0..peer_type.locations.len()),
    };
    peer_type.locations[idx].clone()
}

pub type PeerTypeMap = IndexMap<String, PeerType>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_assigns_sequential_ids() {
        let mut factory = PeerFactory::new(1);
        let pt = PeerType {
            locations: vec!["eu".to_string()],
            location_weights: None,
            bandwidth_ul: Distribution::Scalar(1000.0),
            bandwidth_dl: Distribution::Scalar(1000.0),
            builder: Arc::new(|_, _| {}),
            services: IndexMap::new(),
        };
        let a = factory.create("basic", &pt);
        let b = factory.create("basic", &pt);
        assert_eq!(a.peer_id, PeerId(0));
        assert_eq!(b.peer_id, PeerId(1));
    }
}

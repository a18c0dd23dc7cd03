//! src/services/connection_manager.rs
//!
//! The connection manager: pings connected peers,
//! evicts unresponsive or slow ones, and keeps the peer within its
//! configured degree band by requesting more peers or disconnecting the
//! slowest. Grounded in `p2psimpy/services/connection_manager.py`'s
//! `ConnectionManager`.

use indexmap::IndexSet;
use rand::seq::SliceRandom;

use crate::error::Result;
use crate::message::{Envelope, Message};
use crate::peer::service::{Handler, Runner};
use crate::peer::PeerId;
use crate::simulation::Simulation;
use crate::time::SimTime;

#[derive(Clone, Debug)]
pub struct ConnectionManagerConfig {
    pub ping_interval: SimTime,
    pub max_silence: SimTime,
    pub min_peers: usize,
    pub max_peers: usize,
    pub peer_list_number: usize,
    pub peer_batch_request_number: usize,
    /// A connection younger than this is never evicted as "too slow",
    /// even if it's the worst one.
    pub min_keep_time: SimTime,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        ConnectionManagerConfig {
            ping_interval: SimTime(1.0),
            max_silence: SimTime(2.0),
            min_peers: 5,
            max_peers: 10,
            peer_list_number: 5,
            peer_batch_request_number: 3,
            min_keep_time: SimTime(5.0),
        }
    }
}

/// Full connection manager: pings, evicts, and actively fetches more
/// peers when below `min_peers`. Grounded in the original's
/// `P2PConnectionManager`. A peer type that only wants to answer
/// `Ping`/`RequestPeers` without
/// actively pursuing new connections can swap in a narrower handler; the
/// core only ships this one.
#[derive(Debug)]
pub struct ConnectionManager {
    config: ConnectionManagerConfig,
    known_peers: IndexSet<PeerId>,
    disconnected_peers: IndexSet<PeerId>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionManagerConfig) -> Self {
        ConnectionManager { config, known_peers: IndexSet::new(), disconnected_peers: IndexSet::new() }
    }

    fn ping_peers(&self, sim: &mut Simulation, peer_id: PeerId) -> Result<()> {
        let Some(peer) = sim.peers.get(&peer_id) else { return Ok(()) };
        let now = sim.scheduler.now();
        let due: Vec<PeerId> = peer
            .connections
            .keys()
            .copied()
            .filter(|other| {
                let last = peer.last_seen.get(other).copied().unwrap_or(SimTime::ZERO);
                (now - last).as_secs() > self.config.ping_interval.as_secs()
            })
            .collect();
        for other in due {
            sim.send(peer_id, other, Message::Ping(Envelope::new(peer_id)))?;
        }
        Ok(())
    }

    fn disconnect_unresponsive(&mut self, sim: &mut Simulation, peer_id: PeerId) {
        let Some(peer) = sim.peers.get(&peer_id) else { return };
        let now = sim.scheduler.now();
        let stale: Vec<PeerId> = peer
            .connections
            .keys()
            .copied()
            .filter(|other| {
                let last = peer.last_seen.get(other).copied().unwrap_or(now);
                (now - last).as_secs() > self.config.max_silence.as_secs()
            })
            .collect();
        for other in stale {
            tracing::debug!(peer = %peer_id, other = %other, "disconnecting unresponsive peer");
            sim.disconnect(peer_id, other);
        }
    }

    fn peer_candidates(&self, connected: &IndexSet<PeerId>) -> Vec<PeerId> {
        self.known_peers
            .iter()
            .copied()
            .filter(|p| !connected.contains(p) && !self.disconnected_peers.contains(p))
            .collect()
    }

    /// Disconnects the slowest connection older than `min_keep_time`,
    /// skipping any peer already marked disconnected. Iterates in
    /// deterministic `(bandwidth, peer_id)` order to make eviction ties
    /// reproducible.
    fn disconnect_slowest_peer(&mut self, sim: &mut Simulation, peer_id: PeerId) {
        let now = sim.scheduler.now();
        let mut ranked: Vec<(f64, PeerId, SimTime)> = {
            let Some(peer) = sim.peers.get(&peer_id) else { return };
            peer.connections
                .keys()
                .copied()
                .filter(|p| !self.disconnected_peers.contains(p))
                .map(|other| {
                    let bw = sim.link_bandwidth(peer_id, other).unwrap_or(0.0);
                    let since = peer.connections.get(&other).map(|c| c.since).unwrap_or(now);
                    (bw, other, since)
                })
                .collect()
        };
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        for (_, other, since) in ranked {
            if (now - since).as_secs() > self.config.min_keep_time.as_secs() {
                tracing::info!(peer = %peer_id, evicted = %other, "evicting slowest connection");
                sim.disconnect(peer_id, other);
                self.disconnected_peers.insert(other);
                break;
            }
        }
    }

    fn monitor_connections(&mut self, sim: &mut Simulation, peer_id: PeerId) -> Result<()> {
        let connected: IndexSet<PeerId> =
            sim.peers.get(&peer_id).map(|p| p.connections.keys().copied().collect()).unwrap_or_default();

        if connected.len() < self.config.min_peers {
            let needed = self.config.min_peers - connected.len();
            let candidates = self.peer_candidates(&connected);
            if candidates.len() < needed {
                let except_types = IndexSet::new();
                sim.gossip(
                    peer_id,
                    Message::RequestPeers(Envelope::new(peer_id)),
                    self.config.peer_batch_request_number,
                    true,
                    &IndexSet::new(),
                    &except_types,
                )?;
            }
            for other in candidates.into_iter().take(needed) {
                sim.bootstrap_connect_to(peer_id, other)?;
            }
        }

        if connected.len() > self.config.max_peers {
            let excess = connected.len() - self.config.max_peers;
            for _ in 0..excess {
                self.disconnect_slowest_peer(sim, peer_id);
            }
        }
        Ok(())
    }
}

impl Handler for ConnectionManager {
    fn message_kinds(&self) -> &'static [&'static str] {
        &["Hello", "PeerList", "Ping", "Pong", "RequestPeers"]
    }

    fn handle_message(&mut self, sim: &mut Simulation, peer_id: PeerId, msg: Message) -> Result<()> {
        match msg {
            Message::Hello(env) => {
                let other = env.sender;
                if !sim.peers.get(&peer_id).map(|p| p.is_connected(other)).unwrap_or(false) {
                    sim.connect(peer_id, other);
                    sim.send(peer_id, other, Message::Hello(Envelope::new(peer_id)))?;
                    sim.send(peer_id, other, Message::RequestPeers(Envelope::new(peer_id)))?;
                }
            }
            Message::PeerList { peers, .. } => {
                for p in peers {
                    if p != peer_id {
                        self.known_peers.insert(p);
                    }
                }
            }
            Message::Ping(env) => {
                sim.send(peer_id, env.sender, Message::Pong(Envelope::new(peer_id)))?;
            }
            Message::Pong(_) => {}
            Message::RequestPeers(env) => {
                let connections: Vec<PeerId> =
                    sim.peers.get(&peer_id).map(|p| p.connections.keys().copied().collect()).unwrap_or_default();
                let k = self.config.peer_list_number.min(connections.len());
                let sample: Vec<PeerId> = connections.choose_multiple(&mut sim.rng, k).copied().collect();
                sim.send(
                    peer_id,
                    env.sender,
                    Message::PeerList { envelope: Envelope::new(peer_id), peers: sample },
                )?;
            }
            _ => {}
        }
        Ok(())
    }

    fn on_disconnect(&mut self, _sim: &mut Simulation, _self_peer: PeerId, other: PeerId) {
        self.disconnected_peers.insert(other);
    }
}

impl Runner for ConnectionManager {
    fn tick(&mut self, sim: &mut Simulation, peer_id: PeerId) -> Result<Option<SimTime>> {
        let peer_type = sim.peers.get(&peer_id).map(|p| p.peer_type.clone()).unwrap_or_default();
        let _span = tracing::info_span!("connection_manager_tick", peer_id = %peer_id, peer_type = %peer_type).entered();
        self.ping_peers(sim, peer_id)?;
        self.disconnect_unresponsive(sim, peer_id);
        self.monitor_connections(sim, peer_id)?;
        Ok(Some(self.config.ping_interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::Simulation;

    #[test]
    fn ping_sends_to_stale_connections() {
        let mut sim = Simulation::for_test();
        let a = sim.spawn_test_peer("eu");
        let b = sim.spawn_test_peer("eu");
        sim.connect(a, b);

        let mgr = ConnectionManager::new(ConnectionManagerConfig::default());
        if let Some(peer) = sim.peers.get_mut(&a) {
            peer.add_handler("connection_manager", Box::new(mgr));
        }

        let err = sim.send(b, a, Message::RequestPeers(Envelope::new(b)));
        assert!(err.is_ok());
    }
}

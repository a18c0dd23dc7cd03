//! src/services/gossip.rs
//!
//! Dissemination services: push gossip with a
//! decrementing TTL, pull-based anti-entropy (plain and ranged), and the
//! message-producer runners that originate new gossip content. Grounded
//! in `p2psimpy/services/gossip.py` and, for the producer,
//! `p2psimpy/services/message_producer.py`.

use indexmap::{IndexMap, IndexSet};

use crate::distribution::Distribution;
use crate::error::Result;
use crate::message::{Envelope, Message, SyncIndex};
use crate::peer::service::{Handler, Runner};
use crate::peer::PeerId;
use crate::simulation::Simulation;
use crate::storage::{RangedStore, SimpleStore, Store};
use crate::time::SimTime;

fn exclude_bootstrap_default() -> bool {
    true
}

/// Push gossip: on receiving a `GossipMessage`, store it once and, while
/// its `ttl` is still positive, relay a decremented copy to `fanout`
/// random neighbors.
#[derive(Debug)]
pub struct GossipService {
    fanout: usize,
    exclude_peers: IndexSet<PeerId>,
    exclude_types: IndexSet<String>,
}

impl GossipService {
    pub fn new(fanout: usize) -> Self {
        GossipService { fanout, exclude_peers: IndexSet::new(), exclude_types: IndexSet::new() }
    }

    /// Registers this peer's `msg_data` storage bucket. Called once when
    /// the service is attached, mirroring the Python constructor's
    /// `add_storage` calls.
    pub fn install(peer: &mut crate::peer::Peer) {
        if peer.get_storage("msg_data").is_none() {
            peer.add_storage("msg_data", Box::new(SimpleStore::new()));
        }
    }
}

impl Handler for GossipService {
    fn message_kinds(&self) -> &'static [&'static str] {
        &["GossipMessage"]
    }

    fn handle_message(&mut self, sim: &mut Simulation, peer_id: PeerId, msg: Message) -> Result<()> {
        let Message::Gossip { id, data, ttl, .. } = msg.clone() else { return Ok(()) };

        if let Some(peer) = sim.peers.get_mut(&peer_id) {
            peer.store("msg_data", &id, data.clone())?;
        }

        if ttl > 0 {
            let mut except = self.exclude_peers.clone();
            except.insert(msg.sender());
            sim.gossip(
                peer_id,
                Message::Gossip { envelope: Envelope::new(peer_id), id, data, ttl: ttl - 1 },
                self.fanout,
                exclude_bootstrap_default(),
                &except,
                &self.exclude_types,
            )?;
        }
        Ok(())
    }
}

/// Pull-based anti-entropy over a flat set of known ids. Periodically
/// advertises everything it knows;
/// peers that hear the advertisement request what they're missing and
/// report back what the sender is missing.
#[derive(Debug)]
pub struct PullGossipService {
    fanout: usize,
    round_time: SimTime,
    /// First-round delay, sampled once at service attachment, distinct
    /// from `round_time` so a peer's initial sync doesn't fire in
    /// lockstep with every later round.
    init_timeout: SimTime,
    exclude_peers: IndexSet<PeerId>,
    exclude_types: IndexSet<String>,
}

impl PullGossipService {
    pub fn new(fanout: usize, round_time: SimTime, init_timeout: SimTime) -> Self {
        PullGossipService {
            fanout,
            round_time,
            init_timeout,
            exclude_peers: IndexSet::new(),
            exclude_types: IndexSet::new(),
        }
    }

    pub fn install(peer: &mut crate::peer::Peer) {
        if peer.get_storage("msg_data").is_none() {
            peer.add_storage("msg_data", Box::new(SimpleStore::new()));
        }
    }

    fn known_ids(sim: &Simulation, peer_id: PeerId) -> Vec<String> {
        sim.peer(peer_id).and_then(|p| p.get_storage("msg_data")).map(|s| s.known_ids()).unwrap_or_default()
    }
}

impl Handler for PullGossipService {
    fn message_kinds(&self) -> &'static [&'static str] {
        &["GossipMessage", "SyncPing", "SyncPong", "MsgRequest", "MsgResponse"]
    }

    fn handle_message(&mut self, sim: &mut Simulation, peer_id: PeerId, msg: Message) -> Result<()> {
        match msg {
            Message::Gossip { id, data, .. } => {
                if let Some(peer) = sim.peers.get_mut(&peer_id) {
                    peer.store("msg_data", &id, data)?;
                }
            }
            Message::SyncPing { envelope, known: SyncIndex::Known(known) } => {
                self.reply_peer_missing(sim, peer_id, envelope.sender, &known)?;
                self.request_self_missing(sim, peer_id, envelope.sender, &known)?;
            }
            Message::SyncPong { envelope, missing: SyncIndex::Known(missing) } => {
                self.request_self_missing(sim, peer_id, envelope.sender, &missing)?;
            }
            Message::MsgRequest { envelope, ids } => {
                respond_with_messages(sim, peer_id, envelope.sender, ids)?;
            }
            Message::MsgResponse { messages, .. } => {
                for (id, inner) in messages {
                    if let Some(peer) = sim.peers.get_mut(&peer_id) {
                        peer.store("msg_data", &id, render_payload(&inner))?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl PullGossipService {
    /// Peer is missing what `known` doesn't name: request it.
    fn request_self_missing(&self, sim: &mut Simulation, peer_id: PeerId, other: PeerId, their_known: &[String]) -> Result<()> {
        let mine: IndexSet<String> = Self::known_ids(sim, peer_id).into_iter().collect();
        let theirs: IndexSet<String> = their_known.iter().cloned().collect();
        let missing: Vec<String> = theirs.difference(&mine).cloned().collect();
        if !missing.is_empty() {
            sim.send(peer_id, other, Message::MsgRequest { envelope: Envelope::new(peer_id), ids: missing })?;
        }
        Ok(())
    }

    /// `other` is missing what I know that it didn't advertise: tell it.
    fn reply_peer_missing(&self, sim: &mut Simulation, peer_id: PeerId, other: PeerId, their_known: &[String]) -> Result<()> {
        let mine: IndexSet<String> = Self::known_ids(sim, peer_id).into_iter().collect();
        let theirs: IndexSet<String> = their_known.iter().cloned().collect();
        let missing: Vec<String> = mine.difference(&theirs).cloned().collect();
        if !missing.is_empty() {
            sim.send(
                peer_id,
                other,
                Message::SyncPong { envelope: Envelope::new(peer_id), missing: SyncIndex::Known(missing) },
            )?;
        }
        Ok(())
    }
}

impl Runner for PullGossipService {
    fn initial_delay(&self) -> SimTime {
        self.init_timeout
    }

    fn tick(&mut self, sim: &mut Simulation, peer_id: PeerId) -> Result<Option<SimTime>> {
        let known = Self::known_ids(sim, peer_id);
        sim.gossip(
            peer_id,
            Message::SyncPing { envelope: Envelope::new(peer_id), known: SyncIndex::Known(known) },
            self.fanout,
            exclude_bootstrap_default(),
            &self.exclude_peers,
            &self.exclude_types,
        )?;
        Ok(Some(self.round_time))
    }
}

/// Pull-based anti-entropy over ranged indices: advertises only each
/// origin's high-water mark and fills holes below it, instead of the
/// full id set.
#[derive(Debug)]
pub struct RangedPullGossipService {
    fanout: usize,
    round_time: SimTime,
    init_timeout: SimTime,
    exclude_peers: IndexSet<PeerId>,
    exclude_types: IndexSet<String>,
}

impl RangedPullGossipService {
    pub fn new(fanout: usize, round_time: SimTime, init_timeout: SimTime) -> Self {
        RangedPullGossipService {
            fanout,
            round_time,
            init_timeout,
            exclude_peers: IndexSet::new(),
            exclude_types: IndexSet::new(),
        }
    }

    pub fn install(peer: &mut crate::peer::Peer) {
        if peer.get_storage("msg_data").is_none() {
            peer.add_storage("msg_data", Box::new(RangedStore::new()));
        }
    }

    fn ranged(sim: &Simulation, peer_id: PeerId) -> Option<&RangedStore> {
        sim.peer(peer_id)?.get_storage("msg_data")?.as_any().downcast_ref::<RangedStore>()
    }
}

impl Handler for RangedPullGossipService {
    fn message_kinds(&self) -> &'static [&'static str] {
        &["GossipMessage", "SyncPing", "SyncPong", "MsgRequest", "MsgResponse"]
    }

    fn handle_message(&mut self, sim: &mut Simulation, peer_id: PeerId, msg: Message) -> Result<()> {
        match msg {
            Message::Gossip { id, data, .. } => {
                if let Some(peer) = sim.peers.get_mut(&peer_id) {
                    peer.store("msg_data", &id, data)?;
                }
            }
            Message::SyncPing { envelope, known: SyncIndex::Ranged(last) } => {
                self.reply_peer_missing(sim, peer_id, envelope.sender, &last)?;
                self.request_self_missing(sim, peer_id, envelope.sender, &last)?;
            }
            Message::SyncPong { envelope, missing: SyncIndex::Ranged(last) } => {
                self.request_self_missing(sim, peer_id, envelope.sender, &last)?;
            }
            Message::MsgRequest { envelope, ids } => {
                respond_with_messages(sim, peer_id, envelope.sender, ids)?;
            }
            Message::MsgResponse { messages, .. } => {
                for (id, inner) in messages {
                    if let Some(peer) = sim.peers.get_mut(&peer_id) {
                        peer.store("msg_data", &id, render_payload(&inner))?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl RangedPullGossipService {
    fn request_self_missing(&self, sim: &mut Simulation, peer_id: PeerId, other: PeerId, their_last: &IndexMap<PeerId, u64>) -> Result<()> {
        let mut missing = Vec::new();
        if let Some(peer) = sim.peers.get_mut(&peer_id) {
            if let Some(store) = peer.get_storage_mut("msg_data") {
                if let Some(ranged) = store.as_any_mut().downcast_mut::<RangedStore>() {
                    for (&origin, &last) in their_last {
                        ranged.pre_add(origin, last);
                        for hole in ranged.holes(origin) {
                            missing.push(format!("{origin}_{hole}"));
                        }
                    }
                }
            }
        }
        if !missing.is_empty() {
            sim.send(peer_id, other, Message::MsgRequest { envelope: Envelope::new(peer_id), ids: missing })?;
        }
        Ok(())
    }

    fn reply_peer_missing(&self, sim: &mut Simulation, peer_id: PeerId, other: PeerId, their_last: &IndexMap<PeerId, u64>) -> Result<()> {
        let Some(ranged) = Self::ranged(sim, peer_id) else { return Ok(()) };
        let my_last = ranged.get_all_last();
        let mut peer_missing = IndexMap::new();
        for (&origin, &last) in &my_last {
            if their_last.get(&origin).copied().unwrap_or(0) < last {
                peer_missing.insert(origin, last);
            }
        }
        if !peer_missing.is_empty() {
            sim.send(
                peer_id,
                other,
                Message::SyncPong { envelope: Envelope::new(peer_id), missing: SyncIndex::Ranged(peer_missing) },
            )?;
        }
        Ok(())
    }
}

impl Runner for RangedPullGossipService {
    fn initial_delay(&self) -> SimTime {
        self.init_timeout
    }

    fn tick(&mut self, sim: &mut Simulation, peer_id: PeerId) -> Result<Option<SimTime>> {
        let last = Self::ranged(sim, peer_id).map(|r| r.get_all_last()).unwrap_or_default();
        sim.gossip(
            peer_id,
            Message::SyncPing { envelope: Envelope::new(peer_id), known: SyncIndex::Ranged(last) },
            self.fanout,
            exclude_bootstrap_default(),
            &self.exclude_peers,
            &self.exclude_types,
        )?;
        Ok(Some(self.round_time))
    }
}

fn respond_with_messages(sim: &mut Simulation, peer_id: PeerId, requester: PeerId, ids: Vec<String>) -> Result<()> {
    let Some(peer) = sim.peers.get(&peer_id) else { return Ok(()) };
    let Some(store) = peer.get_storage("msg_data") else { return Ok(()) };
    let mut messages = IndexMap::new();
    for id in ids {
        if let Some(data) = store.get(&id) {
            messages.insert(
                id.clone(),
                Box::new(Message::Gossip { envelope: Envelope::new(peer_id), id, data: data.to_string(), ttl: 0 }),
            );
        }
    }
    sim.send(peer_id, requester, Message::MsgResponse { envelope: Envelope::new(peer_id), messages })
}

fn render_payload(msg: &Message) -> String {
    match msg {
        Message::Gossip { data, .. } => data.clone(),
        other => format!("{other:?}"),
    }
}

/// Runner that periodically originates new gossip content, as a stand-in
/// for an application workload. Grounded in
/// `p2psimpy/services/message_producer.py`'s
/// `MessageProducer`/`LimitedMessageProducer`.
#[derive(Debug)]
pub struct MessageProducer {
    interval: Distribution,
    ttl: u32,
    fanout: usize,
    payload_size: usize,
    next_seq: u64,
    /// `None` for an unlimited producer; `Some(remaining)` counts down for
    /// `LimitedMessageProducer`.
    remaining: Option<u64>,
}

impl MessageProducer {
    pub fn new(interval: Distribution, ttl: u32, fanout: usize, payload_size: usize) -> Self {
        MessageProducer { interval, ttl, fanout, payload_size, next_seq: 0, remaining: None }
    }

    pub fn limited(interval: Distribution, ttl: u32, fanout: usize, payload_size: usize, limit: u64) -> Self {
        MessageProducer { interval, ttl, fanout, payload_size, next_seq: 0, remaining: Some(limit) }
    }
}

impl Runner for MessageProducer {
    fn initial_delay(&self) -> SimTime {
        SimTime::ZERO
    }

    fn tick(&mut self, sim: &mut Simulation, peer_id: PeerId) -> Result<Option<SimTime>> {
        if let Some(remaining) = self.remaining {
            if remaining == 0 {
                return Ok(None);
            }
            self.remaining = Some(remaining - 1);
        }

        let id = format!("{}_{}", peer_id, self.next_seq);
        self.next_seq += 1;
        let data = "x".repeat(self.payload_size);

        if let Some(peer) = sim.peers.get_mut(&peer_id) {
            peer.store("msg_data", &id, data.clone())?;
        }
        sim.gossip(
            peer_id,
            Message::Gossip { envelope: Envelope::new(peer_id), id, data, ttl: self.ttl },
            self.fanout,
            true,
            &IndexSet::new(),
            &IndexSet::new(),
        )?;

        let delay = self.interval.sample(&mut sim.rng).max(0.0);
        Ok(Some(SimTime(delay)))
    }
}

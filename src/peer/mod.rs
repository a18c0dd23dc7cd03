//! src/peer/mod.rs
//!
//! The peer runtime: per-peer physical properties,
//! connection table, storage buckets, and the service registries that
//! `dispatch_message`/`start_all_runners` (in [`service`]) drive. Grounded
//! in `p2psimpy/peer.py`'s `Peer` class; split here into data (this
//! module) and behavior that needs multi-peer access (`crate::link`).

pub mod service;

use std::collections::VecDeque;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::message::Message;
use crate::peer::service::{Handler, Runner};
use crate::storage::Store;
use crate::time::SimTime;

/// A peer's unique integer id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live bilateral link to another peer, recorded on both sides.
/// Bandwidth and latency are not cached here: they are derived
/// on demand from the two peers' current (possibly disruption-mutated)
/// bandwidth and the latency oracle, so a `Slowdown` taking effect after
/// `connect` is reflected immediately.
#[derive(Clone, Copy, Debug)]
pub struct Connection {
    pub since: SimTime,
}

pub struct Peer {
    pub peer_id: PeerId,
    pub peer_type: String,
    pub location: String,
    pub bandwidth_ul: f64,
    pub bandwidth_dl: f64,

    /// Whether the peer is currently reachable. Flipped by `Downtime`
    /// disruptions and by `App`-level shutdown; messages to/from an
    /// offline peer are dropped rather than erroring.
    pub online: bool,

    pub connections: IndexMap<PeerId, Connection>,
    pub last_seen: IndexMap<PeerId, SimTime>,

    /// Message kind name -> names of handler services subscribed to it.
    pub(crate) message_dispatch: IndexMap<&'static str, Vec<String>>,
    pub(crate) handlers: IndexMap<String, Box<dyn Handler>>,
    pub(crate) runners: IndexMap<String, Box<dyn Runner>>,

    pub storage: IndexMap<String, Box<dyn Store>>,

    /// Per-simulated-second overhead counters: bytes received and
    /// message count, bucketed by
    /// `SimTime::floor_secs`.
    pub bytes_load: IndexMap<i64, u64>,
    pub msg_count_load: IndexMap<i64, u64>,

    /// Messages queued for this peer's inbox, drained one at a time with
    /// a downlink-bandwidth delay charged per message: downlink cost is
    /// charged at receive time, on the receiver's inbox draw, not at
    /// send time.
    pub(crate) inbox: VecDeque<Message>,
    pub(crate) draining: bool,
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("peer_id", &self.peer_id)
            .field("peer_type", &self.peer_type)
            .field("online", &self.online)
            .field("connections", &self.connections.len())
            .finish()
    }
}

impl Peer {
    pub fn new(peer_id: PeerId, peer_type: String, location: String, bandwidth_ul: f64, bandwidth_dl: f64) -> Self {
        Peer {
            peer_id,
            peer_type,
            location,
            bandwidth_ul,
            bandwidth_dl,
            online: true,
            connections: IndexMap::new(),
            last_seen: IndexMap::new(),
            message_dispatch: IndexMap::new(),
            handlers: IndexMap::new(),
            runners: IndexMap::new(),
            storage: IndexMap::new(),
            bytes_load: IndexMap::new(),
            msg_count_load: IndexMap::new(),
            inbox: VecDeque::new(),
            draining: false,
        }
    }

    pub fn is_connected(&self, other: PeerId) -> bool {
        self.connections.contains_key(&other)
    }

    pub fn connected_peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.connections.keys().copied()
    }

    /// Registers a handler under `name`, subscribing it to every message
    /// kind it names.
    pub fn add_handler(&mut self, name: impl Into<String>, handler: Box<dyn Handler>) {
        let name = name.into();
        for kind in handler.message_kinds() {
            self.message_dispatch.entry(kind).or_default().push(name.clone());
        }
        self.handlers.insert(name, handler);
    }

    pub fn add_runner(&mut self, name: impl Into<String>, runner: Box<dyn Runner>) {
        self.runners.insert(name.into(), runner);
    }

    pub fn add_storage(&mut self, name: impl Into<String>, store: Box<dyn Store>) {
        self.storage.insert(name.into(), store);
    }

    pub fn get_storage(&self, name: &str) -> Option<&dyn Store> {
        self.storage.get(name).map(|b| b.as_ref())
    }

    pub fn get_storage_mut(&mut self, name: &str) -> Option<&mut (dyn Store + 'static)> {
        self.storage.get_mut(name).map(|b| b.as_mut())
    }

    pub fn store(&mut self, name: &str, id: &str, data: String) -> Result<()> {
        self.storage
            .get_mut(name)
            .ok_or_else(|| Error::UnknownStorage { peer: self.peer_id, bucket: name.to_string() })?
            .add(id, data);
        Ok(())
    }

    /// Records the accounting side effects of accepting a message: load
    /// counters and `last_seen`, mirroring `Peer.receive`'s bookkeeping
    /// before handlers run.
    pub(crate) fn record_receipt(&mut self, now: SimTime, sender: PeerId, size: u64) {
        let bucket = now.floor_secs();
        *self.bytes_load.entry(bucket).or_insert(0) += size;
        *self.msg_count_load.entry(bucket).or_insert(0) += 1;
        self.last_seen.insert(sender, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SimpleStore;

    fn peer() -> Peer {
        Peer::new(PeerId(1), "basic".into(), "eu".into(), 1000.0, 1000.0)
    }

    #[test]
    fn new_peer_has_no_connections() {
        let p = peer();
        assert!(!p.is_connected(PeerId(2)));
        assert_eq!(p.connected_peers().count(), 0);
    }

    #[test]
    fn store_requires_known_bucket() {
        let mut p = peer();
        let err = p.store("msg_data", "a", "x".into()).unwrap_err();
        assert!(matches!(err, Error::UnknownStorage { .. }));

        p.add_storage("msg_data", Box::new(SimpleStore::new()));
        p.store("msg_data", "a", "x".into()).unwrap();
        assert_eq!(p.get_storage("msg_data").unwrap().get("a"), Some("x"));
    }
}

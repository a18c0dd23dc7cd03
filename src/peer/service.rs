//! src/peer/service.rs
//!
//! `Handler`/`Runner` are the Rust counterparts of
//! `p2psimpy.services.base.BaseHandler`/`BaseRunner`: a handler reacts to
//! arriving messages, a runner does periodic work. Because a peer's
//! services live inside `Simulation.peers`, dispatching to one needs a
//! `&mut Simulation` that still includes the peer it belongs to — so each
//! call temporarily removes the service `Box` from the peer, invokes it,
//! and puts it back. This is the standard shape for a mutable service
//! registry owned by the same struct its services need to reach back
//! into.

use std::fmt;

use crate::message::Message;
use crate::peer::PeerId;
use crate::simulation::Simulation;
use crate::time::SimTime;

pub trait Handler: fmt::Debug + Send {
    /// Message kinds (`Message::kind_name`) this handler subscribes to.
    fn message_kinds(&self) -> &'static [&'static str];

    /// Handles one arriving message. An `Err` (a send to a now-disconnected
    /// peer, an unknown storage bucket) is fatal: it propagates out through
    /// `dispatch_message` to the scheduler step that delivered the message.
    fn handle_message(&mut self, sim: &mut Simulation, peer: PeerId, msg: Message) -> crate::error::Result<()>;

    /// Called on every handler registered on either side of a connection
    /// that just went down (the Rust counterpart of
    /// `Peer.disconnect_callbacks`). Most handlers ignore this; the
    /// connection manager uses it to track `disconnected_peers`.
    fn on_disconnect(&mut self, _sim: &mut Simulation, _self_peer: PeerId, _other: PeerId) {}
}

pub trait Runner: fmt::Debug + Send {
    /// Delay before the runner's first tick after `start_all_runners`.
    fn initial_delay(&self) -> SimTime {
        SimTime::ZERO
    }

    /// Runs one round of work, returning the delay until the next round,
    /// or `None` to stop rescheduling (a `ScheduledRunner` that has
    /// exhausted its schedule). An `Err` is fatal, propagating out to the
    /// scheduler step that fired this tick.
    fn tick(&mut self, sim: &mut Simulation, peer: PeerId) -> crate::error::Result<Option<SimTime>>;
}

/// Looks up which registered handlers should see `msg`, removes each in
/// turn, calls it, then puts it back. Returns `Err` if nothing on the peer
/// handles this message kind.
pub fn dispatch_message(sim: &mut Simulation, peer_id: PeerId, msg: Message) -> crate::error::Result<()> {
    let kind = msg.kind_name();
    let names = {
        let peer = sim
            .peers
            .get(&peer_id)
            .ok_or_else(|| crate::error::Error::NotConnected { sender: msg.sender(), receiver: peer_id })?;
        peer.message_dispatch.get(kind).cloned().unwrap_or_default()
    };

    if names.is_empty() {
        return Err(crate::error::Error::UnhandledMessage { peer: peer_id, kind });
    }

    for name in names {
        let handler = {
            let peer = sim.peers.get_mut(&peer_id);
            peer.and_then(|p| p.handlers.remove(&name))
        };
        let Some(mut handler) = handler else { continue };
        let result = handler.handle_message(sim, peer_id, msg.clone());
        if let Some(peer) = sim.peers.get_mut(&peer_id) {
            peer.handlers.insert(name, handler);
        }
        result?;
    }
    Ok(())
}

/// Starts every runner registered on `peer_id`, each scheduling its own
/// first tick after `Runner::initial_delay`.
pub fn start_all_runners(sim: &mut Simulation, peer_id: PeerId) {
    let names: Vec<String> = sim
        .peers
        .get(&peer_id)
        .map(|p| p.runners.keys().cloned().collect())
        .unwrap_or_default();

    for name in names {
        let delay = sim
            .peers
            .get(&peer_id)
            .and_then(|p| p.runners.get(&name))
            .map(|r| r.initial_delay())
            .unwrap_or(SimTime::ZERO);
        sim.scheduler.schedule(delay, Box::new(move |sim| run_tick(sim, peer_id, name)));
    }
}

/// Notifies every handler registered on `peer_id` that its connection to
/// `other` just went down, via the same remove/call/reinsert pattern used
/// by message dispatch.
pub fn notify_disconnect(sim: &mut Simulation, peer_id: PeerId, other: PeerId) {
    let names: Vec<String> = sim.peers.get(&peer_id).map(|p| p.handlers.keys().cloned().collect()).unwrap_or_default();
    for name in names {
        let handler = sim.peers.get_mut(&peer_id).and_then(|p| p.handlers.remove(&name));
        let Some(mut handler) = handler else { continue };
        handler.on_disconnect(sim, peer_id, other);
        if let Some(peer) = sim.peers.get_mut(&peer_id) {
            peer.handlers.insert(name, handler);
        }
    }
}

fn run_tick(sim: &mut Simulation, peer_id: PeerId, name: String) -> crate::error::Result<()> {
    let runner = sim.peers.get_mut(&peer_id).and_then(|p| p.runners.remove(&name));
    let Some(mut runner) = runner else { return Ok(()) };

    let next = runner.tick(sim, peer_id);

    if let Some(peer) = sim.peers.get_mut(&peer_id) {
        peer.runners.insert(name.clone(), runner);
    }
    if let Some(delay) = next? {
        sim.scheduler.schedule(delay, Box::new(move |sim| run_tick(sim, peer_id, name)));
    }
    Ok(())
}

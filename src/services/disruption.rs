//! src/services/disruption.rs
//!
//! Disruption runners: scheduled or randomized toggles that take a peer
//! offline (`Downtime`) or shrink its bandwidth (`Slowdown`) for a while,
//! then restore it. Grounded in `p2psimpy/services/disruption.py`'s
//! `ScheduledDisruption`/`ScheduledDowntime` for the fixed-schedule
//! variant, and `p2psim/disruptions.py`'s mtbf/availability probe for the
//! randomized variant. Every random decision here draws from `sim.rng`,
//! never an independent source, so a disruption schedule replays
//! identically for a given seed.

use std::fmt;

use indexmap::IndexSet;

use rand::Rng;

use crate::error::Result;
use crate::peer::service::Runner;
use crate::peer::PeerId;
use crate::simulation::Simulation;
use crate::time::SimTime;

/// How a disruption decides when to flip state.
pub enum Schedule {
    /// Fixed list of timeout deltas between toggles, alternating
    /// start/end. The runner stops rescheduling once the list is
    /// exhausted.
    Fixed(Vec<SimTime>),
    /// Polls every `interval`, flipping into disruption with probability
    /// `interval / mtbf` and recovering with probability
    /// `interval / (mtbf * (1 - availability))` (`p2psim`'s
    /// `probe_status_change`).
    Probe { interval: SimTime, mtbf: SimTime, availability: f64 },
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Fixed(events) => f.debug_tuple("Fixed").field(&events.len()).finish(),
            Schedule::Probe { interval, mtbf, availability } => {
                f.debug_struct("Probe").field("interval", interval).field("mtbf", mtbf).field("availability", availability).finish()
            }
        }
    }
}

struct DisruptionClock {
    schedule: Schedule,
    cursor: usize,
    is_disrupted: bool,
}

impl DisruptionClock {
    fn new(schedule: Schedule) -> Self {
        DisruptionClock { schedule, cursor: 0, is_disrupted: false }
    }

    fn initial_delay(&self) -> SimTime {
        match &self.schedule {
            Schedule::Fixed(events) => events.first().copied().unwrap_or(SimTime::ZERO),
            Schedule::Probe { interval, .. } => *interval,
        }
    }

    /// Decides (for `Probe`) or reads (for `Fixed`) whether a transition
    /// fires this tick, and if so flips `is_disrupted`. Returns
    /// `(transitioned, next_delay)`; `next_delay` is `None` once a fixed
    /// schedule runs out.
    fn step(&mut self, sim: &mut Simulation) -> (bool, Option<SimTime>) {
        match &self.schedule {
            Schedule::Fixed(events) => {
                self.is_disrupted = !self.is_disrupted;
                self.cursor += 1;
                (true, events.get(self.cursor).copied())
            }
            Schedule::Probe { interval, mtbf, availability } => {
                let roll: f64 = sim.rng.gen_range(0.0..1.0);
                let transitioned = if !self.is_disrupted {
                    roll <= interval.as_secs() / mtbf.as_secs()
                } else {
                    let avg_duration = mtbf.as_secs() * (1.0 - availability);
                    roll > interval.as_secs() / avg_duration
                };
                if transitioned {
                    self.is_disrupted = !self.is_disrupted;
                }
                (transitioned, Some(*interval))
            }
        }
    }
}

/// Takes the peer offline while disrupted, reconnecting to everyone it was
/// talking to beforehand once it comes back.
pub struct Downtime {
    clock: DisruptionClock,
    last_peers: IndexSet<PeerId>,
}

impl fmt::Debug for Downtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Downtime").field("clock", &self.clock.schedule).finish()
    }
}

impl Downtime {
    pub fn scheduled(schedule: Vec<SimTime>) -> Self {
        Downtime { clock: DisruptionClock::new(Schedule::Fixed(schedule)), last_peers: IndexSet::new() }
    }

    pub fn probed(interval: SimTime, mtbf: SimTime, availability: f64) -> Self {
        Downtime { clock: DisruptionClock::new(Schedule::Probe { interval, mtbf, availability }), last_peers: IndexSet::new() }
    }

    fn disruption_start(&mut self, sim: &mut Simulation, peer_id: PeerId) {
        self.last_peers = sim.peer(peer_id).map(|p| p.connected_peers().collect()).unwrap_or_default();
        if let Some(peer) = sim.peers.get_mut(&peer_id) {
            peer.online = false;
        }
        tracing::info!(peer = %peer_id, "peer went offline");
    }

    fn disruption_end(&mut self, sim: &mut Simulation, peer_id: PeerId) -> Result<()> {
        if let Some(peer) = sim.peers.get_mut(&peer_id) {
            peer.online = true;
        }
        for &other in &self.last_peers {
            sim.bootstrap_connect_to(peer_id, other)?;
        }
        tracing::info!(peer = %peer_id, "peer came back online");
        Ok(())
    }
}

impl Runner for Downtime {
    fn initial_delay(&self) -> SimTime {
        self.clock.initial_delay()
    }

    fn tick(&mut self, sim: &mut Simulation, peer_id: PeerId) -> Result<Option<SimTime>> {
        let (transitioned, next) = self.clock.step(sim);
        if transitioned {
            if self.clock.is_disrupted {
                self.disruption_start(sim, peer_id);
            } else {
                self.disruption_end(sim, peer_id)?;
            }
        }
        Ok(next)
    }
}

/// Temporarily scales a peer's up/down bandwidth by `reduction`. Grounded
/// in `p2psim/disruptions.py`. Restores the exact pre-disruption values
/// on recovery: `Slowdown` is the sole
/// owner of these two fields for the duration of its own on/off cycle,
/// resolving the Open Question of what "restore bandwidth" means when a
/// peer could in principle carry more than one bandwidth-mutating
/// disruption.
pub struct Slowdown {
    clock: DisruptionClock,
    reduction: f64,
    original_ul: Option<f64>,
    original_dl: Option<f64>,
}

impl fmt::Debug for Slowdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slowdown").field("reduction", &self.reduction).finish()
    }
}

impl Slowdown {
    pub fn scheduled(schedule: Vec<SimTime>, reduction: f64) -> Self {
        Slowdown { clock: DisruptionClock::new(Schedule::Fixed(schedule)), reduction, original_ul: None, original_dl: None }
    }

    pub fn probed(interval: SimTime, mtbf: SimTime, availability: f64, reduction: f64) -> Self {
        Slowdown {
            clock: DisruptionClock::new(Schedule::Probe { interval, mtbf, availability }),
            reduction,
            original_ul: None,
            original_dl: None,
        }
    }

    fn disruption_start(&mut self, sim: &mut Simulation, peer_id: PeerId) {
        let Some(peer) = sim.peers.get_mut(&peer_id) else { return };
        self.original_ul = Some(peer.bandwidth_ul);
        self.original_dl = Some(peer.bandwidth_dl);
        peer.bandwidth_ul *= self.reduction;
        peer.bandwidth_dl *= self.reduction;
        tracing::info!(peer = %peer_id, reduction = self.reduction, "bandwidth slowdown started");
    }

    fn disruption_end(&mut self, sim: &mut Simulation, peer_id: PeerId) {
        let Some(peer) = sim.peers.get_mut(&peer_id) else { return };
        if let Some(ul) = self.original_ul.take() {
            peer.bandwidth_ul = ul;
        }
        if let Some(dl) = self.original_dl.take() {
            peer.bandwidth_dl = dl;
        }
        tracing::info!(peer = %peer_id, "bandwidth slowdown ended");
    }
}

impl Runner for Slowdown {
    fn initial_delay(&self) -> SimTime {
        self.clock.initial_delay()
    }

    fn tick(&mut self, sim: &mut Simulation, peer_id: PeerId) -> Result<Option<SimTime>> {
        let (transitioned, next) = self.clock.step(sim);
        if transitioned {
            if self.clock.is_disrupted {
                self.disruption_start(sim, peer_id);
            } else {
                self.disruption_end(sim, peer_id);
            }
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downtime_flips_offline_then_back() {
        let mut sim = Simulation::for_test();
        let a = sim.spawn_test_peer("eu");
        let b = sim.spawn_test_peer("eu");
        sim.connect(a, b);

        let mut downtime = Downtime::scheduled(vec![SimTime(1.0), SimTime(2.0)]);
        let next = downtime.tick(&mut sim, a).unwrap();
        assert!(!sim.peer(a).unwrap().online);
        assert_eq!(next, Some(SimTime(2.0)));

        downtime.tick(&mut sim, a).unwrap();
        assert!(sim.peer(a).unwrap().online);
    }

    #[test]
    fn slowdown_restores_original_bandwidth() {
        let mut sim = Simulation::for_test();
        let a = sim.spawn_test_peer("eu");
        let original = sim.peer(a).unwrap().bandwidth_ul;

        let mut slowdown = Slowdown::scheduled(vec![SimTime(1.0), SimTime(2.0)], 0.1);
        slowdown.tick(&mut sim, a).unwrap();
        assert!(sim.peer(a).unwrap().bandwidth_ul < original);

        slowdown.tick(&mut sim, a).unwrap();
        assert_eq!(sim.peer(a).unwrap().bandwidth_ul, original);
    }
}

//! src/scheduler.rs
//!
//! The discrete-event core. Pending work is kept in a `BTreeMap` keyed by
//! simulated delivery time, each bucket holding the actions due at that
//! instant in the order they were scheduled (FIFO tie-break). `SimTime`'s
//! `Ord` makes this possible without a wrapper type for the heap key.
//!
//! Actions are boxed closures over `&mut Simulation` rather than true
//! coroutines: each "runner" is an object that, on firing, does one unit
//! of work and re-schedules its own next firing, in place of green
//! threads.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::simulation::Simulation;
use crate::time::SimTime;

pub type Action = Box<dyn FnOnce(&mut Simulation) -> Result<()> + Send>;

#[derive(Default)]
pub struct Scheduler {
    queue: BTreeMap<SimTime, Vec<Action>>,
    now: SimTime,
    stopped: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler { queue: BTreeMap::new(), now: SimTime::ZERO, stopped: false }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Queues `action` to fire `delay` seconds from now. A negative delay
    /// is clamped to zero rather than treated as an error: upstream
    /// computations (bandwidth + latency sums) never produce one, but
    /// disruption services that shrink bandwidth mid-transfer could in
    /// principle round to a hair below zero.
    pub fn schedule(&mut self, delay: SimTime, action: Action) {
        let delay = if delay.as_secs() < 0.0 { SimTime::ZERO } else { delay };
        let at = self.now + delay;
        self.queue.entry(at).or_default().push(action);
    }

    pub fn schedule_at(&mut self, at: SimTime, action: Action) {
        let at = if at < self.now { self.now } else { at };
        self.queue.entry(at).or_default().push(action);
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pops the earliest-due bucket's actions out of the queue so `run`
    /// can run them against `&mut Simulation` without holding a borrow of
    /// `self.queue` across the callback.
    fn pop_next(&mut self) -> Option<(SimTime, Vec<Action>)> {
        let key = *self.queue.keys().next()?;
        let actions = self.queue.remove(&key)?;
        Some((key, actions))
    }
}

/// Drives `sim`'s scheduler until `until` (inclusive) or the queue drains,
/// whichever comes first. Lives outside `Scheduler` because each action
/// needs `&mut Simulation`, and `Simulation` owns the `Scheduler` it's
/// draining.
///
/// Stops at the first action that returns `Err` and propagates it: an
/// error raised mid-step is fatal for the whole run, not just the action
/// that raised it, so any actions still due at the same instant are left
/// unscheduled rather than fired.
pub fn run(sim: &mut Simulation, until: Option<SimTime>) -> Result<()> {
    loop {
        if sim.scheduler.stopped {
            break;
        }
        let Some((at, actions)) = sim.scheduler.pop_next() else { break };
        if let Some(until) = until {
            if at > until {
                // Not due yet; put it back and stop.
                sim.scheduler.queue.insert(at, actions);
                break;
            }
        }
        sim.scheduler.now = at;
        for action in actions {
            if sim.scheduler.stopped {
                break;
            }
            action(sim)?;
        }
    }
    if let Some(until) = until {
        if sim.scheduler.now < until {
            sim.scheduler.now = until;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_fire_in_time_order() {
        let mut sched = Scheduler::new();
        let order = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));

        // Scheduler alone (no Simulation) is enough to test ordering via
        // direct manipulation of `now`/`pop_next`.
        sched.schedule_at(SimTime(2.0), Box::new(|_| Ok(())));
        sched.schedule_at(SimTime(1.0), Box::new(|_| Ok(())));
        sched.schedule_at(SimTime(1.0), Box::new(|_| Ok(())));

        let (t1, batch1) = sched.pop_next().unwrap();
        assert_eq!(t1, SimTime(1.0));
        assert_eq!(batch1.len(), 2);
        let (t2, batch2) = sched.pop_next().unwrap();
        assert_eq!(t2, SimTime(2.0));
        assert_eq!(batch2.len(), 1);
        assert!(sched.pop_next().is_none());
        drop(order);
    }

    #[test]
    fn schedule_relative_to_now() {
        let mut sched = Scheduler::new();
        sched.now = SimTime(10.0);
        sched.schedule(SimTime(5.0), Box::new(|_| Ok(())));
        let (at, _) = sched.pop_next().unwrap();
        assert_eq!(at, SimTime(15.0));
    }
}

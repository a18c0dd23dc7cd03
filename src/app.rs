//! src/app.rs
//!
//! Defines the main `App` struct, which builds a `Simulation` from
//! configuration, drives it to completion (or paces it against wall-clock
//! time for `--serve`), and optionally spawns the visualizer's API server
//! alongside it. Configuration and lifecycle live in one place, long-running
//! services are spawned onto their own Tokio tasks, and a `CancellationToken`
//! coordinates graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, PeerTypeSpec};
use crate::distribution::Distribution;
use crate::domain::NetworkState;
use crate::error::{Error, Result};
use crate::factory::PeerType;
use crate::peer::Peer;
use crate::services::connection_manager::{ConnectionManager, ConnectionManagerConfig};
use crate::services::disruption::{Downtime, Slowdown};
use crate::services::gossip::{GossipService, MessageProducer, PullGossipService, RangedPullGossipService};
use crate::simulation::Simulation;
use crate::time::SimTime;

pub struct App {
    config: Config,
    shutdown_token: CancellationToken,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self { config, shutdown_token: CancellationToken::new() })
    }

    /// Constructs a `Simulation` from `self.config`: registers every peer
    /// type with its sampled physical properties and the services its
    /// `services` subrecords name.
    pub fn build_simulation(&self) -> Result<Simulation> {
        let latencies = self.config.latency_matrix()?;
        let mut sim = Simulation::new(latencies, self.config.latency_cache_n, self.config.seed);

        for (name, spec) in &self.config.peer_types {
            let peer_type = build_peer_type(name, spec)?;
            sim.register_peer_type(name.clone(), peer_type);
        }

        for (name, &count) in &self.config.bootstrap.bootstrap_per_type {
            sim.init_bootstrap_servers(name, count)?;
        }
        for (name, &count) in &self.config.bootstrap.peers_per_type {
            sim.add_peers(name, count)?;
        }

        Ok(sim)
    }

    /// Runs the simulation and, if configured, the visualizer alongside
    /// it. `--serve` (via `serve_tick_ms`) paces ticks against wall-clock
    /// time so a live WebSocket client sees a real-time-feeling replay;
    /// otherwise the scheduler runs straight through synchronously.
    pub async fn run(self) -> Result<()> {
        tracing::info!(seed = self.config.seed, "building simulation");
        let mut sim = self.build_simulation()?;

        let (state_tx, state_rx) = watch::channel(NetworkState::from_simulation(&sim));

        let api_task = if let Some(viz_config) = self.config.visualizer.clone() {
            tracing::info!(bind_addr = %viz_config.bind_addr, "visualizer enabled, starting API server");
            let api_server = crate::api::ApiServer::new(viz_config.bind_addr, state_rx);
            Some(tokio::spawn(api_server.run(self.shutdown_token.clone())))
        } else {
            None
        };

        let shutdown = self.shutdown_token.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("ctrl-c received, stopping simulation");
            shutdown.cancel();
        });

        let run_result = match self.config.serve_tick_ms {
            Some(tick_ms) => self.run_paced(&mut sim, tick_ms, &state_tx).await,
            None => {
                let result = sim.run(None);
                let _ = state_tx.send(NetworkState::from_simulation(&sim));
                result
            }
        };

        if let Some(task) = api_task {
            self.shutdown_token.cancel();
            if let Err(e) = task.await {
                tracing::error!(error = ?e, "API server task failed");
            }
        }

        tracing::info!(sim_time = sim.now().as_secs(), "simulation finished");
        run_result
    }

    /// Advances the scheduler one second of simulated time per
    /// `tick_ms` of wall-clock time, publishing a fresh snapshot after
    /// every tick, until the shutdown token fires or a scheduler step
    /// errors.
    async fn run_paced(&self, sim: &mut Simulation, tick_ms: u64, state_tx: &watch::Sender<NetworkState>) -> Result<()> {
        let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
        let mut until = SimTime::ZERO;
        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    sim.stop();
                    return Ok(());
                }
                _ = interval.tick() => {
                    until = until + SimTime(1.0);
                    sim.run(Some(until))?;
                    let _ = state_tx.send(NetworkState::from_simulation(sim));
                }
            }
        }
    }
}

fn build_peer_type(name: &str, spec: &PeerTypeSpec) -> Result<PeerType> {
    let bandwidth_ul = spec.bandwidth_ul.to_distribution()?;
    let bandwidth_dl = spec.bandwidth_dl.to_distribution()?;
    let services: Vec<ServiceKind> =
        spec.services.iter().map(|(kind, value)| parse_service(kind, value)).collect::<Result<_>>()?;
    let peer_type_name = name.to_string();

    Ok(PeerType {
        locations: spec.location.locations(),
        location_weights: spec.location.weights(),
        bandwidth_ul,
        bandwidth_dl,
        builder: Arc::new(move |sim: &mut Simulation, peer_id| {
            for service in &services {
                service.attach(sim, peer_id);
            }
            tracing::debug!(peer = %peer_id, peer_type = %peer_type_name, "peer created");
        }),
        services: spec.services.clone(),
    })
}

/// A parsed, ready-to-attach service subrecord. Kept as a small closed
/// enum (rather than trait objects per kind) because the set of service
/// names a peer type can name is fixed and known at config-parse time.
enum ServiceKind {
    ConnectionManager(ConnectionManagerConfig),
    Gossip { fanout: usize },
    PullGossip { fanout: usize, round_time: SimTime, init_timeout: Distribution },
    RangedPullGossip { fanout: usize, round_time: SimTime, init_timeout: Distribution },
    MessageProducer { interval: Distribution, ttl: u32, fanout: usize, payload_size: usize, limit: Option<u64> },
    Downtime(DisruptionMode),
    Slowdown(DisruptionMode, f64),
}

/// How a disruption runner decides when to flip state, resolved from
/// `DisruptionSpec` at config-parse time. `Fixed` takes priority when a
/// `schedule_ms` is present; otherwise the runner polls on `interval`
/// against `mtbf`/`availability`.
enum DisruptionMode {
    Scheduled(Vec<SimTime>),
    Probed { interval: SimTime, mtbf: SimTime, availability: f64 },
}

impl ServiceKind {
    /// A handful of services (`ConnectionManager`, the pull-gossip variants)
    /// implement both `Handler` and `Runner` on the same type, so they're
    /// registered twice, once per registry, as two independently-constructed
    /// instances. Neither keeps state outside the peer's own storage bucket,
    /// so the two copies never need to agree with each other.
    fn attach(&self, sim: &mut Simulation, peer_id: crate::peer::PeerId) {
        match self {
            ServiceKind::ConnectionManager(config) => {
                let Some(peer) = sim.peers.get_mut(&peer_id) else { return };
                peer.add_handler("connection_manager", Box::new(ConnectionManager::new(config.clone())));
                peer.add_runner("connection_manager", Box::new(ConnectionManager::new(config.clone())));
            }
            ServiceKind::Gossip { fanout } => {
                let Some(peer) = sim.peers.get_mut(&peer_id) else { return };
                GossipService::install(peer);
                peer.add_handler("gossip", Box::new(GossipService::new(*fanout)));
            }
            ServiceKind::PullGossip { fanout, round_time, init_timeout } => {
                let init_timeout = SimTime(init_timeout.sample(&mut sim.rng).max(0.0));
                let Some(peer) = sim.peers.get_mut(&peer_id) else { return };
                PullGossipService::install(peer);
                peer.add_handler("pull_gossip", Box::new(PullGossipService::new(*fanout, *round_time, init_timeout)));
                peer.add_runner("pull_gossip", Box::new(PullGossipService::new(*fanout, *round_time, init_timeout)));
            }
            ServiceKind::RangedPullGossip { fanout, round_time, init_timeout } => {
                let init_timeout = SimTime(init_timeout.sample(&mut sim.rng).max(0.0));
                let Some(peer) = sim.peers.get_mut(&peer_id) else { return };
                RangedPullGossipService::install(peer);
                peer.add_handler(
                    "ranged_pull_gossip",
                    Box::new(RangedPullGossipService::new(*fanout, *round_time, init_timeout)),
                );
                peer.add_runner(
                    "ranged_pull_gossip",
                    Box::new(RangedPullGossipService::new(*fanout, *round_time, init_timeout)),
                );
            }
            ServiceKind::MessageProducer { interval, ttl, fanout, payload_size, limit } => {
                let Some(peer) = sim.peers.get_mut(&peer_id) else { return };
                let producer = match limit {
                    Some(n) => MessageProducer::limited(interval.clone(), *ttl, *fanout, *payload_size, *n),
                    None => MessageProducer::new(interval.clone(), *ttl, *fanout, *payload_size),
                };
                peer.add_runner("message_producer", Box::new(producer));
            }
            ServiceKind::Downtime(mode) => {
                let downtime = match mode {
                    DisruptionMode::Scheduled(events) => Downtime::scheduled(events.clone()),
                    DisruptionMode::Probed { interval, mtbf, availability } => {
                        Downtime::probed(*interval, *mtbf, *availability)
                    }
                };
                let Some(peer) = sim.peers.get_mut(&peer_id) else { return };
                peer.add_runner("downtime", Box::new(downtime));
            }
            ServiceKind::Slowdown(mode, reduction) => {
                let slowdown = match mode {
                    DisruptionMode::Scheduled(events) => Slowdown::scheduled(events.clone(), *reduction),
                    DisruptionMode::Probed { interval, mtbf, availability } => {
                        Slowdown::probed(*interval, *mtbf, *availability, *reduction)
                    }
                };
                let Some(peer) = sim.peers.get_mut(&peer_id) else { return };
                peer.add_runner("slowdown", Box::new(slowdown));
            }
        }
    }
}

fn deserialize_value<T: DeserializeOwned>(value: &serde_yaml::Value) -> Result<T> {
    serde_yaml::from_value(value.clone()).map_err(Error::from)
}

fn parse_service(kind: &str, value: &serde_yaml::Value) -> Result<ServiceKind> {
    match kind {
        "connection_manager" => {
            let raw: ConnectionManagerSpec = deserialize_value(value)?;
            Ok(ServiceKind::ConnectionManager(raw.into()))
        }
        "gossip" => {
            let raw: GossipSpec = deserialize_value(value)?;
            Ok(ServiceKind::Gossip { fanout: raw.fanout })
        }
        "pull_gossip" => {
            let raw: PullGossipSpec = deserialize_value(value)?;
            Ok(ServiceKind::PullGossip {
                fanout: raw.fanout,
                round_time: SimTime::from_millis(raw.round_time_ms),
                init_timeout: raw.init_timeout.to_distribution()?,
            })
        }
        "ranged_pull_gossip" => {
            let raw: PullGossipSpec = deserialize_value(value)?;
            Ok(ServiceKind::RangedPullGossip {
                fanout: raw.fanout,
                round_time: SimTime::from_millis(raw.round_time_ms),
                init_timeout: raw.init_timeout.to_distribution()?,
            })
        }
        "message_producer" => {
            let raw: MessageProducerSpec = deserialize_value(value)?;
            Ok(ServiceKind::MessageProducer {
                interval: raw.interval.to_distribution()?,
                ttl: raw.ttl,
                fanout: raw.fanout,
                payload_size: raw.payload_size,
                limit: raw.limit,
            })
        }
        "downtime" => {
            let raw: DisruptionSpec = deserialize_value(value)?;
            Ok(ServiceKind::Downtime(disruption_mode(&raw)))
        }
        "slowdown" => {
            let raw: SlowdownSpec = deserialize_value(value)?;
            Ok(ServiceKind::Slowdown(disruption_mode(&raw.base), raw.reduction))
        }
        other => Err(Error::MalformedDistribution(format!("unknown service '{other}'"))),
    }
}

/// `schedule_ms`, when present, selects the fixed-timeline variant over
/// the randomized probe; the two are mutually exclusive in a single
/// `downtime`/`slowdown` subrecord.
fn disruption_mode(raw: &DisruptionSpec) -> DisruptionMode {
    match &raw.schedule_ms {
        Some(events) => DisruptionMode::Scheduled(events.iter().copied().map(SimTime::from_millis).collect()),
        None => DisruptionMode::Probed {
            interval: SimTime::from_millis(raw.interval_ms),
            mtbf: SimTime::from_millis(raw.mtbf_ms),
            availability: raw.availability,
        },
    }
}

#[derive(serde::Deserialize)]
struct ConnectionManagerSpec {
    #[serde(default)]
    ping_interval_ms: Option<f64>,
    #[serde(default)]
    max_silence_ms: Option<f64>,
    #[serde(default)]
    min_peers: Option<usize>,
    #[serde(default)]
    max_peers: Option<usize>,
    #[serde(default)]
    peer_list_number: Option<usize>,
    #[serde(default)]
    peer_batch_request_number: Option<usize>,
    #[serde(default)]
    min_keep_time_ms: Option<f64>,
}

impl From<ConnectionManagerSpec> for ConnectionManagerConfig {
    fn from(raw: ConnectionManagerSpec) -> Self {
        let defaults = ConnectionManagerConfig::default();
        ConnectionManagerConfig {
            ping_interval: raw.ping_interval_ms.map(SimTime::from_millis).unwrap_or(defaults.ping_interval),
            max_silence: raw.max_silence_ms.map(SimTime::from_millis).unwrap_or(defaults.max_silence),
            min_peers: raw.min_peers.unwrap_or(defaults.min_peers),
            max_peers: raw.max_peers.unwrap_or(defaults.max_peers),
            peer_list_number: raw.peer_list_number.unwrap_or(defaults.peer_list_number),
            peer_batch_request_number: raw.peer_batch_request_number.unwrap_or(defaults.peer_batch_request_number),
            min_keep_time: raw.min_keep_time_ms.map(SimTime::from_millis).unwrap_or(defaults.min_keep_time),
        }
    }
}

#[derive(serde::Deserialize)]
struct GossipSpec {
    fanout: usize,
}

#[derive(serde::Deserialize)]
struct PullGossipSpec {
    fanout: usize,
    round_time_ms: f64,
    /// Delay before this peer's first round, sampled once when the
    /// service is attached. Distinct from `round_time`: reusing the round
    /// interval as the first-tick delay would make every peer's initial
    /// sync fire in lockstep with its own period instead of being spread
    /// out the way a freshly-joined peer's first anti-entropy round is.
    init_timeout: crate::config::FieldSpec,
}

#[derive(serde::Deserialize)]
struct MessageProducerSpec {
    interval: crate::config::FieldSpec,
    ttl: u32,
    fanout: usize,
    payload_size: usize,
    #[serde(default)]
    limit: Option<u64>,
}

#[derive(serde::Deserialize)]
struct DisruptionSpec {
    #[serde(default)]
    interval_ms: f64,
    #[serde(default)]
    mtbf_ms: f64,
    #[serde(default)]
    availability: f64,
    /// Fixed list of millisecond timeout deltas between toggles,
    /// alternating start/end. When present, overrides the randomized
    /// `interval`/`mtbf`/`availability` probe with a deterministic
    /// timeline.
    #[serde(default)]
    schedule_ms: Option<Vec<f64>>,
}

#[derive(serde::Deserialize)]
struct SlowdownSpec {
    #[serde(flatten)]
    base: DisruptionSpec,
    reduction: f64,
}

/// Exercises `build_peer_type`/`parse_service` end to end without a full
/// YAML file, to catch wiring mistakes (a service name that doesn't
/// attach anything, a config field that doesn't round-trip).
#[cfg(test)]
mod tests {
    use super::*;

    fn peer_type_spec(services_yaml: &str) -> PeerTypeSpec {
        let services: indexmap::IndexMap<String, serde_yaml::Value> = serde_yaml::from_str(services_yaml).unwrap();
        PeerTypeSpec {
            location: crate::config::LocationSpec::Fixed("eu".into()),
            bandwidth_ul: crate::config::FieldSpec::Scalar(1_000_000.0),
            bandwidth_dl: crate::config::FieldSpec::Scalar(1_000_000.0),
            services,
        }
    }

    #[test]
    fn builds_peer_type_with_connection_manager() {
        let spec = peer_type_spec("connection_manager: {min_peers: 2, max_peers: 4}\n");
        let peer_type = build_peer_type("basic", &spec).unwrap();
        assert_eq!(peer_type.locations, vec!["eu".to_string()]);
    }

    #[test]
    fn rejects_unknown_service_name() {
        let spec = peer_type_spec("not_a_real_service: {}\n");
        assert!(build_peer_type("basic", &spec).is_err());
    }
}

//! tests/component/mod.rs

mod connection_manager;
mod gossip;
mod ranged_pull_gossip;

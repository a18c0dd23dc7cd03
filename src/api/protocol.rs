//! src/api/protocol.rs
//!
//! The wire contract for the visualizer's WebSocket endpoint: every
//! message is a full topology snapshot, not an incremental diff,
//! pushed over a `watch` channel each time the simulation ticks.

use serde::Serialize;

use crate::domain::NetworkState;

#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum WebSocketMessage {
    #[serde(rename = "snapshot")]
    Snapshot(NetworkState),
}

impl From<NetworkState> for WebSocketMessage {
    fn from(state: NetworkState) -> Self {
        WebSocketMessage::Snapshot(state)
    }
}

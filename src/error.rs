//! src/error.rs
//!
//! Defines the library's custom, comprehensive `Error` enum using `thiserror`.
//! Every kind named in the error-handling design is represented as its own
//! variant rather than a single opaque string, so callers can match on them.

use crate::peer::PeerId;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize or deserialize experiment state: {0}")]
    Serialization(#[from] serde_yaml::Error),

    #[error("unknown peer type '{0}'")]
    UnknownPeerType(String),

    #[error("missing required field '{field}' for peer type '{peer_type}'")]
    MissingField { peer_type: String, field: &'static str },

    #[error("malformed distribution: {0}")]
    MalformedDistribution(String),

    #[error("{receiver:?} is not connected to {sender:?}, cannot send")]
    NotConnected { sender: PeerId, receiver: PeerId },

    #[error("peer {peer:?} has no handler registered for message kind {kind}")]
    UnhandledMessage { peer: PeerId, kind: &'static str },

    #[error("peer {peer:?} has no storage bucket named '{bucket}'")]
    UnknownStorage { peer: PeerId, bucket: String },

    #[error("no known latency between locations '{0}' and '{1}'")]
    LatencyUnknown(String, String),

    #[error("Tokio task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("API server error: {0}")]
    ApiServer(String),
}

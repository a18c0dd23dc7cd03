//! Peer services: collaborators a peer type attaches via its
//! `PeerType::builder`. Each lives in its own module, mirroring the
//! `p2psimpy.services` package layout.

pub mod connection_manager;
pub mod disruption;
pub mod gossip;

//! Error types for the ChatFusion server core.
//!
//! This module provides strongly-typed errors for the different layers:
//! - [`ConnectionError`]: one socket's buffers and decoder
//! - [`FederationError`]: fusion negotiation and leader changes
//! - [`DispatchError`]: a frame that the sending connection's role does not
//!   allow, or that fails validation
//!
//! Every error is terminal for the connection (or negotiation) it concerns.
//! Nothing here is retried; errors surface as log lines and closed
//! connections.

use std::io;

use fusion_proto::{DecodeError, Opcode, ProtocolError};
use thiserror::Error;

use crate::connection::ConnId;

/// Errors raised by a connection controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Data queued after `close_when_all_sent` or close
    #[error("connection {0} is closing")]
    Closing(ConnId),

    /// No connection with this id
    #[error("unknown connection {0}")]
    Unknown(ConnId),

    /// Peer closed its side of the stream
    #[error("peer closed the connection")]
    PeerClosed,

    /// Peer sent a malformed frame
    #[error("malformed frame: {0}")]
    Decode(#[from] DecodeError),

    /// A frame could not be encoded
    #[error("failed to encode frame: {0}")]
    Encode(#[from] ProtocolError),

    /// Underlying transport error
    #[error("transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// Returns true if the peer broke the protocol, as opposed to going away.
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

/// Convert io::Error to ConnectionError (for transport errors)
impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        ConnectionError::Transport(err.to_string())
    }
}

/// Errors raised by the federation controller.
///
/// Every check runs before federation state is touched, so an error leaves
/// the state as it was.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FederationError {
    /// A fusion negotiation is already in flight
    #[error("a fusion is already in progress")]
    AlreadyFusing,

    /// Asked to fuse with our own address
    #[error("refusing to fuse with own address {0}")]
    SelfFusion(std::net::SocketAddr),

    /// Peer or member name is malformed or equals our own name
    #[error("invalid server name {0:?}")]
    InvalidServerName(String),

    /// Peer or member name is already part of this federation
    #[error("server name {0:?} is already known")]
    NameConflict(String),

    /// `FusionMerge` for a name nobody announced
    #[error("unexpected merge from {0:?}")]
    UnknownPendingMember(String),

    /// `FusionChangeLeader` on a link that is not our current leader
    #[error("leader change received from a non-leader link")]
    NotLeaderLink,

    /// Member traffic reached a server that is not the leader
    #[error("member traffic received while subordinate")]
    NotLeader,

    /// Sending to a peer failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Errors raised while dispatching a decoded frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The sending connection's role does not accept this frame
    #[error("unexpected {opcode} from {role} connection")]
    UnexpectedFrame {
        /// Role of the sending connection
        role: &'static str,
        /// Opcode of the frame
        opcode: Opcode,
    },

    /// Client traffic claims another origin server or sender
    #[error("client {username:?} sent a frame as {sender:?}@{origin:?}")]
    Spoofed {
        /// Logged username of the connection
        username: String,
        /// Sender carried by the frame
        sender: String,
        /// Origin server carried by the frame
        origin: String,
    },

    /// Message body empty or over the size bound
    #[error("message size out of bounds: {0} bytes")]
    InvalidMessage(usize),

    /// Federation state machine rejected the frame
    #[error(transparent)]
    Federation(#[from] FederationError),

    /// Sending the reply failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_decode_errors_are_protocol_violations() {
        assert!(ConnectionError::Decode(DecodeError::UnknownOpcode(7)).is_protocol_violation());
        assert!(!ConnectionError::PeerClosed.is_protocol_violation());
        assert!(!ConnectionError::Closing(ConnId::new(1)).is_protocol_violation());
        assert!(!ConnectionError::Transport("reset".to_string()).is_protocol_violation());
    }

    #[test]
    fn io_errors_become_transport_errors() {
        let err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        assert_eq!(ConnectionError::from(err), ConnectionError::Transport("reset by peer".to_string()));
    }

    #[test]
    fn unexpected_frame_names_role_and_opcode() {
        let err = DispatchError::UnexpectedFrame { role: "client", opcode: Opcode::FusionMerge };
        assert_eq!(err.to_string(), "unexpected FusionMerge(15) from client connection");
    }
}

//! Field groups carried by frames.
//!
//! Frames with a single field store it inline in the [`Frame`](crate::Frame)
//! variant; the structures here are shared by several frames or handed
//! around by the server as a unit.

use std::{
    fmt,
    net::{SocketAddr, SocketAddrV6},
};

use bytes::Bytes;

/// The part of `address` that survives the wire: IP and port.
///
/// IPv6 flow info and scope id are cleared, so an address compares equal to
/// its decoded copy.
#[must_use]
pub fn wire_address(address: SocketAddr) -> SocketAddr {
    match address {
        SocketAddr::V4(_) => address,
        SocketAddr::V6(v6) => SocketAddr::V6(SocketAddrV6::new(*v6.ip(), v6.port(), 0, 0)),
    }
}

/// Name and listening address of a federation peer.
///
/// # Invariants
///
/// - The name is unique within a federation.
/// - The address is the peer's listening socket, not the ephemeral address
///   of one of its connections.
/// - The address carries no IPv6 flow info or scope id ([`wire_address`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerIdentity {
    /// Server name
    pub name: String,
    /// Listening address
    pub address: SocketAddr,
}

impl ServerIdentity {
    /// Create a new identity, keeping only the wire part of `address`
    pub fn new(name: impl Into<String>, address: SocketAddr) -> Self {
        Self { name: name.into(), address: wire_address(address) }
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// A leader's self-description during fusion (`FusionInit`, `FusionInitOk`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Leader name
    pub name: String,
    /// Leader listening address
    pub address: SocketAddr,
    /// Names of the leader's fused members
    pub members: Vec<String>,
}

impl ServerInfo {
    /// The (name, address) part of this description
    #[must_use]
    pub fn identity(&self) -> ServerIdentity {
        ServerIdentity::new(self.name.clone(), self.address)
    }
}

/// Chat message for every logged user of the federation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicMessage {
    /// Server the sender is logged on
    pub origin_server: String,
    /// Sender username
    pub sender: String,
    /// Message body
    pub text: String,
}

/// Chat message for a single user, routed by server name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMessage {
    /// Server the sender is logged on
    pub origin_server: String,
    /// Sender username
    pub sender: String,
    /// Server the recipient is logged on
    pub dest_server: String,
    /// Recipient username
    pub recipient: String,
    /// Message body
    pub text: String,
}

/// One block of a file for a single user, routed like [`DirectMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlock {
    /// Server the sender is logged on
    pub origin_server: String,
    /// Sender username
    pub sender: String,
    /// Server the recipient is logged on
    pub dest_server: String,
    /// Recipient username
    pub recipient: String,
    /// Sender-chosen identifier shared by every block of one file
    pub file_id: i64,
    /// File name as shown to the recipient
    pub file_name: String,
    /// Total number of blocks in the file (always positive)
    pub block_count: i32,
    /// Block payload
    pub data: Bytes,
}

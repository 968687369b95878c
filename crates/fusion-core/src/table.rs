//! Connection table.
//!
//! Owns every [`Connection`] of a node, keyed by [`ConnId`]. The federation
//! controller and the client registry address peers through this table, so
//! neither of them holds a connection directly.
//!
//! Outbound connections are only recorded here; the readiness loop picks them
//! up with [`Connections::take_pending_connects`] and opens the sockets.

use std::{collections::BTreeMap, net::SocketAddr};

use fusion_proto::Frame;

use crate::{
    connection::{ConnId, Connection, Role},
    error::ConnectionError,
};

/// Every connection of a node.
#[derive(Debug, Default)]
pub struct Connections {
    conns: BTreeMap<ConnId, Connection>,
    next_id: u64,
    pending_connects: Vec<(ConnId, SocketAddr)>,
}

impl Connections {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> ConnId {
        self.next_id += 1;
        ConnId::new(self.next_id)
    }

    /// Register an accepted socket
    pub fn accept(&mut self, remote: SocketAddr) -> ConnId {
        let id = self.allocate();
        self.conns.insert(id, Connection::accepted(id, remote));
        id
    }

    /// Register an outbound connection to `remote` with the given role.
    ///
    /// Frames may be queued right away; they are written once the connect
    /// completes.
    pub fn connect(&mut self, remote: SocketAddr, role: Role) -> ConnId {
        let id = self.allocate();
        self.conns.insert(id, Connection::outbound(id, remote, role));
        self.pending_connects.push((id, remote));
        id
    }

    /// Outbound connections registered since the last call
    pub fn take_pending_connects(&mut self) -> Vec<(ConnId, SocketAddr)> {
        std::mem::take(&mut self.pending_connects)
    }

    /// Look up a connection
    #[must_use]
    pub fn get(&self, id: ConnId) -> Option<&Connection> {
        self.conns.get(&id)
    }

    /// Look up a connection mutably
    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        self.conns.get_mut(&id)
    }

    /// Role of a connection
    #[must_use]
    pub fn role(&self, id: ConnId) -> Option<&Role> {
        self.conns.get(&id).map(Connection::role)
    }

    /// Replace the role of a connection (no-op for unknown ids)
    pub fn set_role(&mut self, id: ConnId, role: Role) {
        if let Some(conn) = self.conns.get_mut(&id) {
            conn.set_role(role);
        }
    }

    /// Returns true if the connection exists and still accepts traffic
    #[must_use]
    pub fn is_open(&self, id: ConnId) -> bool {
        self.conns.get(&id).is_some_and(|c| !c.is_closing())
    }

    /// Encode and queue a frame.
    ///
    /// # Errors
    ///
    /// Returns `Unknown` for a missing connection, or the connection's error.
    pub fn send(&mut self, id: ConnId, frame: &Frame) -> Result<(), ConnectionError> {
        self.conns.get_mut(&id).ok_or(ConnectionError::Unknown(id))?.queue_frame(frame)
    }

    /// Queue already encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns `Unknown` for a missing connection, or the connection's error.
    pub fn send_bytes(&mut self, id: ConnId, bytes: &[u8]) -> Result<(), ConnectionError> {
        self.conns.get_mut(&id).ok_or(ConnectionError::Unknown(id))?.queue_data(bytes)
    }

    /// Ask a connection to close once its queue is drained
    pub fn close_when_all_sent(&mut self, id: ConnId) {
        if let Some(conn) = self.conns.get_mut(&id) {
            conn.close_when_all_sent();
        }
    }

    /// Drop a connection from the table
    pub fn remove(&mut self, id: ConnId) -> Option<Connection> {
        self.pending_connects.retain(|(pending, _)| *pending != id);
        self.conns.remove(&id)
    }

    /// Ids of connections that finished draining after a close request
    #[must_use]
    pub fn finished(&self) -> Vec<ConnId> {
        self.conns.values().filter(|c| c.is_finished()).map(Connection::id).collect()
    }

    /// Every id, in allocation order
    #[must_use]
    pub fn ids(&self) -> Vec<ConnId> {
        self.conns.keys().copied().collect()
    }

    /// Iterate over connections in allocation order
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.conns.values()
    }

    /// Number of connections
    #[must_use]
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    /// Returns true if there are no connections
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}

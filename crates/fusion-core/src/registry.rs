//! Local client registry.
//!
//! Tracks which usernames are logged on this server and delivers chat frames
//! to them. The federation layer only needs the four operations of
//! [`ClientRegistry`]; [`LocalRegistry`] is the in-memory implementation used
//! by the server.
//!
//! # Invariants
//!
//! - A username is held by at most one connection at a time.
//! - Delivery never blocks: frames are queued on the client connection.

use std::collections::BTreeMap;

use fusion_proto::{Frame, PublicMessage};

use crate::{connection::ConnId, table::Connections};

/// Result of a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Username reserved for the connection
    Accepted,
    /// Username already taken
    Refused,
}

/// Result of a direct delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Frame queued on the recipient's connection
    Delivered,
    /// No such user logged here
    NotFound,
}

/// Usernames logged on this server, and how to reach them.
pub trait ClientRegistry {
    /// Reserve `username` for `conn`.
    fn try_login(&mut self, conn: ConnId, username: &str) -> LoginOutcome;

    /// Queue `message` on every logged client connection.
    fn broadcast_locally(&self, conns: &mut Connections, message: &PublicMessage);

    /// Queue `frame` on the connection of `username`.
    fn deliver_direct(&self, conns: &mut Connections, username: &str, frame: &Frame) -> Delivery;

    /// Release `username`.
    fn on_disconnect(&mut self, username: &str);

    /// Logged usernames, sorted
    fn usernames(&self) -> Vec<String>;
}

/// In-memory [`ClientRegistry`].
#[derive(Debug, Default)]
pub struct LocalRegistry {
    clients: BTreeMap<String, ConnId>,
}

impl LocalRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connection a username is logged on
    #[must_use]
    pub fn connection_of(&self, username: &str) -> Option<ConnId> {
        self.clients.get(username).copied()
    }
}

impl ClientRegistry for LocalRegistry {
    fn try_login(&mut self, conn: ConnId, username: &str) -> LoginOutcome {
        if self.clients.contains_key(username) {
            return LoginOutcome::Refused;
        }
        self.clients.insert(username.to_string(), conn);
        LoginOutcome::Accepted
    }

    fn broadcast_locally(&self, conns: &mut Connections, message: &PublicMessage) {
        let bytes = match Frame::PublicMessage(message.clone()).to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping public message that cannot be encoded");
                return;
            },
        };

        for (username, &conn) in &self.clients {
            if let Err(e) = conns.send_bytes(conn, &bytes) {
                tracing::debug!(username = %username, conn = %conn, error = %e, "Skipped client");
            }
        }
    }

    fn deliver_direct(&self, conns: &mut Connections, username: &str, frame: &Frame) -> Delivery {
        let Some(&conn) = self.clients.get(username) else {
            return Delivery::NotFound;
        };
        match conns.send(conn, frame) {
            Ok(()) => Delivery::Delivered,
            Err(e) => {
                tracing::debug!(username = %username, conn = %conn, error = %e, "Direct delivery failed");
                Delivery::NotFound
            },
        }
    }

    fn on_disconnect(&mut self, username: &str) {
        self.clients.remove(username);
    }

    fn usernames(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }
}

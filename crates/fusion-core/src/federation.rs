//! Federation controller.
//!
//! Servers fuse into a two-level tree: one leader, every other server a direct
//! member of it. All inter-server traffic goes through the leader.
//!
//! ```text
//!                 ┌──────────┐
//!                 │  alpha   │  leader (smallest name)
//!                 └──────────┘
//!                 ↑    ↑     ↑
//!        ┌────────┘    │     └────────┐
//!   ┌─────────┐   ┌─────────┐   ┌─────────┐
//!   │  beta   │   │  delta  │   │  gamma  │  members
//!   └─────────┘   └─────────┘   └─────────┘
//! ```
//!
//! ## Fusion
//!
//! Fusing two trees is negotiated between their leaders:
//!
//! 1. The initiating leader opens a connection and sends `FusionInit` with
//!    its name, address and member names.
//! 2. The responding leader answers `FusionInitOk` with its own description,
//!    `FusionInitKo` if it is already fusing, or `FusionInitForward` if it is
//!    not a leader.
//! 3. Both leaders then apply the same rule: the lexicographically smaller
//!    name leads the merged tree.
//! 4. The losing leader tells each of its members to move
//!    (`FusionChangeLeader`), and each member reconnects to the winner with
//!    `FusionMerge`. The winner only accepts merges it was told to expect.
//!
//! A member can reach the winner before the loser's `FusionInitOk` does. While
//! its own attempt is in flight, the winner holds such early merges and
//! settles them against the announced member list once the answer arrives.
//!
//! ## Invariants
//!
//! - A server has a leader link or members, never both.
//! - Server names are unique within a tree; a fusion that would duplicate one
//!   is refused before any state changes.
//! - At most one fusion is negotiated at a time (`fusing`).
//! - Every public message reaches each server of the tree exactly once.

use std::{
    collections::{BTreeMap, BTreeSet},
    net::SocketAddr,
};

use fusion_proto::{limits::is_valid_server_name, Frame, ServerIdentity, ServerInfo};

use crate::{
    connection::{ConnId, Role},
    error::{ConnectionError, FederationError},
    table::Connections,
};

/// Result alias for federation operations
pub type Result<T> = std::result::Result<T, FederationError>;

/// Where a chat frame entered this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A client logged on this server
    Local,
    /// One of our members (we are the leader)
    Member,
    /// Our leader link
    Leader,
}

/// Outcome of routing a frame by destination server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Destination is this server
    Local,
    /// Frame queued on this connection
    Forwarded(ConnId),
    /// No path to the destination; frame dropped
    Unroutable,
}

/// Connection to our leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderLink {
    /// Connection carrying leader traffic
    pub conn: ConnId,
    /// Leader name and listening address
    pub identity: ServerIdentity,
}

/// Federation state of one server.
#[derive(Debug)]
pub struct Federation {
    identity: ServerIdentity,
    members: BTreeMap<String, ConnId>,
    leader: Option<LeaderLink>,
    pending_members: BTreeSet<String>,
    early_merges: BTreeMap<String, ConnId>,
    fusing: bool,
    attempt: Option<ConnId>,
}

impl Federation {
    /// A fresh, unfused server leading only itself
    #[must_use]
    pub fn new(identity: ServerIdentity) -> Self {
        Self {
            identity,
            members: BTreeMap::new(),
            leader: None,
            pending_members: BTreeSet::new(),
            early_merges: BTreeMap::new(),
            fusing: false,
            attempt: None,
        }
    }

    /// Our name and listening address
    #[must_use]
    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// Our name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Returns true if no other server leads us
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.leader.is_none()
    }

    /// Link to our leader, if we are subordinate
    #[must_use]
    pub fn leader(&self) -> Option<&LeaderLink> {
        self.leader.as_ref()
    }

    /// Fused members by name
    #[must_use]
    pub fn members(&self) -> &BTreeMap<String, ConnId> {
        &self.members
    }

    /// Member names announced by a fused leader but not merged yet
    #[must_use]
    pub fn pending_members(&self) -> &BTreeSet<String> {
        &self.pending_members
    }

    /// Returns true while a fusion is being negotiated
    #[must_use]
    pub fn is_fusing(&self) -> bool {
        self.fusing
    }

    /// Our description for `FusionInit` / `FusionInitOk`
    #[must_use]
    pub fn self_info(&self) -> ServerInfo {
        ServerInfo {
            name: self.identity.name.clone(),
            address: self.identity.address,
            members: self.members.keys().cloned().collect(),
        }
    }

    // =========================================================================
    // Negotiation
    // =========================================================================

    /// Start fusing with the server listening on `remote`.
    ///
    /// A subordinate forwards the request to its leader instead.
    ///
    /// # Errors
    ///
    /// - `AlreadyFusing` if a negotiation is in flight
    /// - `SelfFusion` if `remote` is our own address
    pub fn initiate(&mut self, conns: &mut Connections, remote: SocketAddr) -> Result<()> {
        if self.fusing {
            return Err(FederationError::AlreadyFusing);
        }
        if remote == self.identity.address {
            return Err(FederationError::SelfFusion(remote));
        }

        if let Some(leader) = &self.leader {
            tracing::info!(remote = %remote, leader = %leader.identity, "Forwarding fusion request to leader");
            conns.send(leader.conn, &Frame::FusionRequest { remote })?;
            return Ok(());
        }

        tracing::info!(server = %self.identity, remote = %remote, "Starting fusion");
        self.send_init(conns, remote)
    }

    fn send_init(&mut self, conns: &mut Connections, remote: SocketAddr) -> Result<()> {
        let init = Frame::FusionInit(self.self_info()).to_bytes().map_err(ConnectionError::from)?;
        let conn = conns.connect(remote, Role::FusionAttempt);
        conns.send_bytes(conn, &init)?;
        self.fusing = true;
        self.attempt = Some(conn);
        Ok(())
    }

    /// Handle `FusionInit` received on a fresh connection.
    ///
    /// # Errors
    ///
    /// Returns `InvalidServerName` or `NameConflict` if the peer's tree cannot
    /// be merged with ours. The caller closes `from`.
    pub fn on_fusion_init(&mut self, conns: &mut Connections, from: ConnId, peer: ServerInfo) -> Result<()> {
        if let Some(leader) = &self.leader {
            tracing::info!(peer = %peer.name, leader = %leader.identity, "Redirecting fusion to leader");
            conns.send(from, &Frame::FusionInitForward { leader: leader.identity.address })?;
            conns.close_when_all_sent(from);
            return Ok(());
        }
        if self.fusing {
            tracing::info!(peer = %peer.name, "Refusing fusion while another is in progress");
            conns.send(from, &Frame::FusionInitKo)?;
            conns.close_when_all_sent(from);
            return Ok(());
        }

        self.check_peer(&peer)?;
        conns.send(from, &Frame::FusionInitOk(self.self_info()))?;
        self.merge(conns, from, peer)
    }

    /// Handle `FusionInitOk` on our fusion attempt.
    ///
    /// # Errors
    ///
    /// Returns `InvalidServerName` or `NameConflict` if the peer's tree cannot
    /// be merged with ours. The caller closes `from`, which ends the attempt.
    pub fn on_fusion_init_ok(&mut self, conns: &mut Connections, from: ConnId, peer: ServerInfo) -> Result<()> {
        self.check_peer(&peer)?;
        self.merge(conns, from, peer)
    }

    /// Handle `FusionInitKo` on our fusion attempt.
    pub fn on_fusion_init_ko(&mut self, conns: &mut Connections, from: ConnId) {
        tracing::info!(conn = %from, "Fusion refused by peer");
        self.end_attempt(conns);
        conns.close_when_all_sent(from);
    }

    /// Handle `FusionInitForward`: the peer is not a leader, retry with its
    /// leader.
    ///
    /// # Errors
    ///
    /// Returns `SelfFusion` if the peer's leader is us.
    pub fn on_fusion_init_forward(
        &mut self,
        conns: &mut Connections,
        from: ConnId,
        leader: SocketAddr,
    ) -> Result<()> {
        conns.close_when_all_sent(from);
        self.end_attempt(conns);

        if leader == self.identity.address {
            return Err(FederationError::SelfFusion(leader));
        }

        tracing::info!(leader = %leader, "Fusion forwarded, retrying with leader");
        self.send_init(conns, leader)
    }

    /// Handle `FusionRequest` from one of our members.
    ///
    /// A request we cannot act on is dropped with a warning; the member link
    /// stays up.
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the outgoing frame cannot be queued.
    pub fn on_fusion_request(&mut self, conns: &mut Connections, remote: SocketAddr) -> Result<()> {
        match self.initiate(conns, remote) {
            Err(FederationError::Connection(e)) => Err(e.into()),
            Err(error) => {
                tracing::warn!(remote = %remote, error = %error, "Fusion request refused");
                Ok(())
            },
            Ok(()) => Ok(()),
        }
    }

    /// Handle `FusionChangeLeader`: reconnect to the new leader and announce
    /// ourselves with `FusionMerge`.
    ///
    /// # Errors
    ///
    /// - `NotLeaderLink` if `from` is not our current leader link
    /// - `SelfFusion` if the new leader's address is ours
    pub fn on_change_leader(
        &mut self,
        conns: &mut Connections,
        from: ConnId,
        new_leader: ServerIdentity,
    ) -> Result<()> {
        if self.leader.as_ref().map(|l| l.conn) != Some(from) {
            return Err(FederationError::NotLeaderLink);
        }
        if new_leader.address == self.identity.address {
            return Err(FederationError::SelfFusion(new_leader.address));
        }

        let merge = Frame::FusionMerge { name: self.identity.name.clone() }
            .to_bytes()
            .map_err(ConnectionError::from)?;

        tracing::info!(leader = %new_leader, "Moving to new leader");
        let conn = conns.connect(new_leader.address, Role::Leader { identity: new_leader.clone() });
        conns.send_bytes(conn, &merge)?;
        conns.close_when_all_sent(from);
        self.leader = Some(LeaderLink { conn, identity: new_leader });
        Ok(())
    }

    /// Handle `FusionMerge` from a server announced by a fused leader.
    ///
    /// While our own fusion attempt is pending, an unannounced merge is held
    /// until the peer's answer tells us whether to expect it.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPendingMember` if `name` was not announced and no
    /// attempt is pending.
    pub fn on_fusion_merge(&mut self, conns: &mut Connections, from: ConnId, name: String) -> Result<()> {
        if self.pending_members.remove(&name) {
            tracing::info!(member = %name, conn = %from, "Member merged");
            conns.set_role(from, Role::Member { name: name.clone() });
            self.members.insert(name, from);
            return Ok(());
        }

        if self.attempt.is_some() && self.leader.is_none() && !self.is_known(&name) {
            tracing::debug!(member = %name, conn = %from, "Merge arrived before fusion answer, holding");
            conns.set_role(from, Role::PendingMember { name: name.clone() });
            if let Some(previous) = self.early_merges.insert(name, from) {
                conns.close_when_all_sent(previous);
            }
            return Ok(());
        }

        Err(FederationError::UnknownPendingMember(name))
    }

    /// Forget whatever `conn` meant to the federation.
    ///
    /// Called by the node for every closed connection.
    pub fn on_closed(&mut self, conns: &mut Connections, conn: ConnId, role: &Role) {
        match role {
            Role::Member { name } if self.members.get(name) == Some(&conn) => {
                tracing::warn!(member = %name, "Member disconnected");
                self.members.remove(name);
            },
            Role::PendingMember { name } if self.early_merges.get(name) == Some(&conn) => {
                self.early_merges.remove(name);
            },
            Role::Leader { identity } if self.leader.as_ref().map(|l| l.conn) == Some(conn) => {
                tracing::warn!(leader = %identity, "Leader disconnected, now leading self");
                self.leader = None;
            },
            Role::FusionAttempt if self.attempt == Some(conn) => {
                tracing::warn!(conn = %conn, "Fusion attempt closed before completing");
                self.end_attempt(conns);
            },
            _ => {},
        }
    }

    /// Leave the fusing state. Merges still held were never announced.
    fn end_attempt(&mut self, conns: &mut Connections) {
        self.fusing = false;
        self.attempt = None;
        for (name, conn) in std::mem::take(&mut self.early_merges) {
            tracing::warn!(member = %name, conn = %conn, "Dropping unannounced merge");
            conns.close_when_all_sent(conn);
        }
    }

    /// Refuse a peer whose names would collide with ours.
    fn check_peer(&self, peer: &ServerInfo) -> Result<()> {
        if !is_valid_server_name(&peer.name) || peer.name == self.identity.name {
            return Err(FederationError::InvalidServerName(peer.name.clone()));
        }
        if self.is_known(&peer.name) {
            return Err(FederationError::NameConflict(peer.name.clone()));
        }
        let mut seen = BTreeSet::new();
        for member in &peer.members {
            if !is_valid_server_name(member) || *member == self.identity.name {
                return Err(FederationError::InvalidServerName(member.clone()));
            }
            if *member == peer.name || !seen.insert(member.as_str()) || self.is_known(member) {
                return Err(FederationError::NameConflict(member.clone()));
            }
        }
        Ok(())
    }

    fn is_known(&self, name: &str) -> bool {
        self.members.contains_key(name) || self.pending_members.contains(name)
    }

    /// Apply the leadership rule to a validated peer on `peer_conn`.
    fn merge(&mut self, conns: &mut Connections, peer_conn: ConnId, peer: ServerInfo) -> Result<()> {
        if self.identity.name < peer.name {
            tracing::info!(
                peer = %peer.name,
                announced = peer.members.len(),
                "Fusion complete, keeping leadership"
            );
            conns.set_role(peer_conn, Role::Member { name: peer.name.clone() });
            self.members.insert(peer.name, peer_conn);
            for name in peer.members {
                match self.early_merges.remove(&name) {
                    Some(conn) => {
                        tracing::info!(member = %name, conn = %conn, "Member merged");
                        conns.set_role(conn, Role::Member { name: name.clone() });
                        self.members.insert(name, conn);
                    },
                    None => {
                        self.pending_members.insert(name);
                    },
                }
            }
        } else {
            let identity = peer.identity();
            let change = Frame::FusionChangeLeader(identity.clone()).to_bytes().map_err(ConnectionError::from)?;

            tracing::info!(
                leader = %identity,
                moving = self.members.len(),
                "Fusion complete, handing leadership over"
            );
            for (name, conn) in std::mem::take(&mut self.members) {
                if let Err(e) = conns.send_bytes(conn, &change) {
                    tracing::debug!(member = %name, error = %e, "Could not notify member of leader change");
                }
                conns.close_when_all_sent(conn);
            }
            self.pending_members.clear();
            conns.set_role(peer_conn, Role::Leader { identity: identity.clone() });
            self.leader = Some(LeaderLink { conn: peer_conn, identity });
        }

        self.end_attempt(conns);
        Ok(())
    }

    // =========================================================================
    // Forwarding
    // =========================================================================

    /// Send an encoded public message to the rest of the tree.
    ///
    /// - from a local client: to every member (leader) or to the leader
    /// - from a member: to every member except `origin_server`
    /// - from the leader: nowhere, the leader already fanned it out
    ///
    /// # Errors
    ///
    /// Returns `NotLeader` for member traffic on a subordinate.
    pub fn forward_public(
        &self,
        conns: &mut Connections,
        origin: Origin,
        origin_server: &str,
        bytes: &[u8],
    ) -> Result<()> {
        match origin {
            Origin::Local => match &self.leader {
                Some(leader) => send_logged(conns, leader.conn, bytes),
                None => {
                    for &conn in self.members.values() {
                        send_logged(conns, conn, bytes);
                    }
                },
            },
            Origin::Member => {
                if !self.is_leader() {
                    return Err(FederationError::NotLeader);
                }
                for (name, &conn) in &self.members {
                    if name != origin_server {
                        send_logged(conns, conn, bytes);
                    }
                }
            },
            Origin::Leader => {},
        }
        Ok(())
    }

    /// Route an encoded direct message or file block to `dest_server`.
    pub fn route(&self, conns: &mut Connections, origin: Origin, dest_server: &str, bytes: &[u8]) -> Route {
        if dest_server == self.identity.name {
            return Route::Local;
        }

        let next_hop = match (&self.leader, origin) {
            // The leader routes by name; anything it sends us is for us.
            (Some(_), Origin::Leader) => None,
            (Some(leader), _) => Some(leader.conn),
            (None, _) => self.members.get(dest_server).copied(),
        };

        match next_hop {
            Some(conn) => {
                send_logged(conns, conn, bytes);
                Route::Forwarded(conn)
            },
            None => {
                tracing::warn!(dest_server = %dest_server, "No route to server, dropping frame");
                Route::Unroutable
            },
        }
    }
}

fn send_logged(conns: &mut Connections, conn: ConnId, bytes: &[u8]) {
    if let Err(e) = conns.send_bytes(conn, bytes) {
        tracing::debug!(conn = %conn, error = %e, "Dropped frame for peer");
    }
}

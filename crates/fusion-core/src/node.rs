//! Sans-IO chat server.
//!
//! [`Node`] ties the connection table, the client registry and the federation
//! controller together. The readiness loop (or the simulation harness) owns
//! the sockets and calls into the node when one is ready; the node decodes,
//! dispatches by connection role, and queues replies.
//!
//! ## Dispatch
//!
//! | Role           | Accepted frames                                       |
//! |----------------|-------------------------------------------------------|
//! | unlogged       | `AnonymousLogin`, `FusionInit`, `FusionMerge`         |
//! | fusion-attempt | `FusionInitOk`, `FusionInitKo`, `FusionInitForward`   |
//! | client         | `PublicMessage`, `DirectMessage`, `FileBlock`         |
//! | pending-member | none; held until the merge is confirmed               |
//! | member         | chat frames, `FusionRequest`                          |
//! | leader         | chat frames, `FusionChangeLeader`                     |
//!
//! Anything else closes the connection.

use std::{
    collections::BTreeMap,
    io::{self, Read, Write},
    net::SocketAddr,
};

use fusion_proto::{
    limits::{is_valid_message, is_valid_username},
    DirectMessage, FileBlock, Frame, PublicMessage, ServerIdentity,
};

use crate::{
    connection::{ConnId, Interest, Role},
    error::{ConnectionError, DispatchError, FederationError},
    federation::{Federation, Origin, Route},
    registry::{ClientRegistry, Delivery, LocalRegistry, LoginOutcome},
    report::NodeReport,
    table::Connections,
};

/// One chat server.
#[derive(Debug)]
pub struct Node<R = LocalRegistry> {
    federation: Federation,
    conns: Connections,
    registry: R,
    held: BTreeMap<ConnId, Vec<Frame>>,
    closed: Vec<ConnId>,
}

impl Node<LocalRegistry> {
    /// Unfused server with an empty in-memory registry
    #[must_use]
    pub fn new(identity: ServerIdentity) -> Self {
        Self::with_registry(identity, LocalRegistry::new())
    }
}

impl<R: ClientRegistry> Node<R> {
    /// Unfused server with the given registry
    pub fn with_registry(identity: ServerIdentity, registry: R) -> Self {
        Self {
            federation: Federation::new(identity),
            conns: Connections::new(),
            registry,
            held: BTreeMap::new(),
            closed: Vec::new(),
        }
    }

    /// Our name and listening address
    #[must_use]
    pub fn identity(&self) -> &ServerIdentity {
        self.federation.identity()
    }

    /// Federation state
    #[must_use]
    pub fn federation(&self) -> &Federation {
        &self.federation
    }

    /// Client registry
    #[must_use]
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Connection table
    #[must_use]
    pub fn connections(&self) -> &Connections {
        &self.conns
    }

    // =========================================================================
    // Socket events
    // =========================================================================

    /// Register an accepted socket
    pub fn accept(&mut self, remote: SocketAddr) -> ConnId {
        let id = self.conns.accept(remote);
        tracing::debug!(conn = %id, remote = %remote, "Accepted connection");
        id
    }

    /// Outbound connect completed
    pub fn on_connected(&mut self, id: ConnId) {
        if let Some(conn) = self.conns.get_mut(id) {
            conn.on_connected();
            tracing::debug!(conn = %id, remote = %conn.remote(), "Connected");
        }
    }

    /// Outbound connect failed
    pub fn on_connect_failed(&mut self, id: ConnId, error: &io::Error) {
        tracing::warn!(conn = %id, error = %error, "Connect failed");
        self.close(id);
    }

    /// Socket of `id` is readable: drain it and dispatch every frame.
    pub fn on_readable<S: Read>(&mut self, id: ConnId, src: &mut S) {
        let Some(conn) = self.conns.get_mut(id) else {
            return;
        };
        let outcome = conn.on_readable(src);

        self.dispatch_all(id, outcome.frames);
        if self.conns.get(id).is_some() {
            self.on_read_end(id, outcome.end);
        }
        self.release_held();
    }

    fn on_read_end(&mut self, id: ConnId, end: Option<ConnectionError>) {
        match end {
            None => {},
            Some(ConnectionError::PeerClosed) => {
                tracing::debug!(conn = %id, "Peer closed connection");
                self.close(id);
            },
            Some(e) => {
                tracing::warn!(conn = %id, error = %e, "Connection failed");
                self.close(id);
            },
        }
    }

    /// Socket of `id` is writable: flush as much as it takes.
    pub fn on_writable<S: Write>(&mut self, id: ConnId, dst: &mut S) {
        let Some(conn) = self.conns.get_mut(id) else {
            return;
        };
        let result = conn.on_writable(dst);
        let finished = conn.is_finished();
        match result {
            Ok(()) if finished => self.close(id),
            Ok(()) => {},
            Err(e) => {
                tracing::warn!(conn = %id, error = %e, "Write failed");
                self.close(id);
            },
        }
    }

    /// Readiness events `id` needs, or `None` if it is gone
    #[must_use]
    pub fn interest(&self, id: ConnId) -> Option<Interest> {
        self.conns.get(id).map(|c| c.interest())
    }

    /// Outbound connections the driver must open
    pub fn take_pending_connects(&mut self) -> Vec<(ConnId, SocketAddr)> {
        self.conns.take_pending_connects()
    }

    /// Connections closed since the last call; the driver drops their sockets.
    ///
    /// Connections that finished draining after a close request are closed
    /// here too.
    pub fn take_closed(&mut self) -> Vec<ConnId> {
        for id in self.conns.finished() {
            self.close(id);
        }
        std::mem::take(&mut self.closed)
    }

    /// Close a connection now and forget what it stood for
    pub fn close(&mut self, id: ConnId) {
        let Some(conn) = self.conns.remove(id) else {
            return;
        };
        let role = conn.role();
        if let Role::Client { username } = role {
            tracing::info!(username = %username, "Client logged out");
            self.registry.on_disconnect(username);
        }
        self.held.remove(&id);
        self.federation.on_closed(&mut self.conns, id, role);
        self.closed.push(id);
    }

    /// Close every connection immediately
    pub fn shutdown_now(&mut self) {
        for id in self.conns.ids() {
            self.close(id);
        }
    }

    // =========================================================================
    // Operator commands
    // =========================================================================

    /// Start a fusion with the server listening on `remote`.
    ///
    /// Refusals are logged; nothing is returned to the operator.
    pub fn initiate_fusion(&mut self, remote: SocketAddr) {
        if let Err(e) = self.federation.initiate(&mut self.conns, remote) {
            tracing::warn!(remote = %remote, error = %e, "Fusion not started");
        }
    }

    /// Snapshot for the `INFO` command
    #[must_use]
    pub fn report(&self) -> NodeReport {
        NodeReport::capture(&self.federation, &self.conns, self.registry.usernames())
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Dispatch `frames` in order until one fails or the connection stops
    /// reading. A pending member's frames are held instead.
    fn dispatch_all(&mut self, id: ConnId, frames: Vec<Frame>) {
        let mut frames = frames.into_iter();
        while let Some(frame) = frames.next() {
            if !self.conns.is_open(id) {
                break;
            }
            if let Some(Role::PendingMember { .. }) = self.conns.role(id) {
                tracing::trace!(conn = %id, opcode = %frame.opcode(), "Frame held");
                self.held.entry(id).or_default().extend(std::iter::once(frame).chain(frames.by_ref()));
                break;
            }
            tracing::trace!(conn = %id, opcode = %frame.opcode(), "Frame received");
            if let Err(e) = self.dispatch(id, frame) {
                tracing::warn!(conn = %id, error = %e, "Closing connection");
                self.close(id);
                break;
            }
        }
    }

    /// Settle held frames: dispatch them once their merge is confirmed, drop
    /// them if it never will be.
    fn release_held(&mut self) {
        let settled: Vec<ConnId> = self
            .held
            .keys()
            .copied()
            .filter(|id| !matches!(self.conns.role(*id), Some(Role::PendingMember { .. })))
            .collect();
        for id in settled {
            let Some(frames) = self.held.remove(&id) else {
                continue;
            };
            if matches!(self.conns.role(id), Some(Role::Member { .. })) {
                tracing::debug!(conn = %id, frames = frames.len(), "Releasing held frames");
                self.dispatch_all(id, frames);
            } else {
                tracing::debug!(conn = %id, frames = frames.len(), "Dropping held frames");
            }
        }
    }

    fn dispatch(&mut self, id: ConnId, frame: Frame) -> Result<(), DispatchError> {
        let Some(role) = self.conns.role(id).cloned() else {
            return Ok(());
        };

        match (role, frame) {
            (Role::Unlogged, Frame::AnonymousLogin { username }) => self.login(id, username),
            (Role::Unlogged, Frame::FusionInit(peer)) => {
                Ok(self.federation.on_fusion_init(&mut self.conns, id, peer)?)
            },
            (Role::Unlogged, Frame::FusionMerge { name }) => {
                Ok(self.federation.on_fusion_merge(&mut self.conns, id, name)?)
            },

            (Role::FusionAttempt, Frame::FusionInitOk(peer)) => {
                Ok(self.federation.on_fusion_init_ok(&mut self.conns, id, peer)?)
            },
            (Role::FusionAttempt, Frame::FusionInitKo) => {
                self.federation.on_fusion_init_ko(&mut self.conns, id);
                Ok(())
            },
            (Role::FusionAttempt, Frame::FusionInitForward { leader }) => {
                Ok(self.federation.on_fusion_init_forward(&mut self.conns, id, leader)?)
            },

            (Role::Client { username }, Frame::PublicMessage(message)) => {
                self.check_client(&username, &message.sender, &message.origin_server)?;
                check_text(&message.text)?;
                self.public(Origin::Local, message)
            },
            (Role::Client { username }, Frame::DirectMessage(message)) => {
                self.check_client(&username, &message.sender, &message.origin_server)?;
                check_text(&message.text)?;
                self.direct(Origin::Local, message);
                Ok(())
            },
            (Role::Client { username }, Frame::FileBlock(block)) => {
                self.check_client(&username, &block.sender, &block.origin_server)?;
                self.file(Origin::Local, block);
                Ok(())
            },

            (Role::Member { .. }, Frame::PublicMessage(message)) => self.public(Origin::Member, message),
            (Role::Leader { .. }, Frame::PublicMessage(message)) => self.public(Origin::Leader, message),
            (Role::Member { .. }, Frame::DirectMessage(message)) => {
                self.direct(Origin::Member, message);
                Ok(())
            },
            (Role::Leader { .. }, Frame::DirectMessage(message)) => {
                self.direct(Origin::Leader, message);
                Ok(())
            },
            (Role::Member { .. }, Frame::FileBlock(block)) => {
                self.file(Origin::Member, block);
                Ok(())
            },
            (Role::Leader { .. }, Frame::FileBlock(block)) => {
                self.file(Origin::Leader, block);
                Ok(())
            },

            (Role::Member { .. }, Frame::FusionRequest { remote }) => {
                Ok(self.federation.on_fusion_request(&mut self.conns, remote)?)
            },
            (Role::Leader { .. }, Frame::FusionChangeLeader(leader)) => {
                Ok(self.federation.on_change_leader(&mut self.conns, id, leader)?)
            },

            (role, frame) => Err(DispatchError::UnexpectedFrame { role: role.label(), opcode: frame.opcode() }),
        }
    }

    fn login(&mut self, id: ConnId, username: String) -> Result<(), DispatchError> {
        let outcome = if is_valid_username(&username) {
            self.registry.try_login(id, &username)
        } else {
            LoginOutcome::Refused
        };

        match outcome {
            LoginOutcome::Accepted => {
                tracing::info!(conn = %id, username = %username, "Client logged in");
                let server_name = self.federation.name().to_string();
                self.conns.set_role(id, Role::Client { username });
                self.conns.send(id, &Frame::LoginAccepted { server_name })?;
            },
            LoginOutcome::Refused => {
                tracing::info!(conn = %id, username = %username, "Login refused");
                self.conns.send(id, &Frame::LoginRefused)?;
                self.conns.close_when_all_sent(id);
            },
        }
        Ok(())
    }

    fn check_client(&self, username: &str, sender: &str, origin: &str) -> Result<(), DispatchError> {
        if sender != username || origin != self.federation.name() {
            return Err(DispatchError::Spoofed {
                username: username.to_string(),
                sender: sender.to_string(),
                origin: origin.to_string(),
            });
        }
        Ok(())
    }

    fn public(&mut self, origin: Origin, message: PublicMessage) -> Result<(), DispatchError> {
        if origin == Origin::Member && !self.federation.is_leader() {
            return Err(FederationError::NotLeader.into());
        }

        self.registry.broadcast_locally(&mut self.conns, &message);
        let origin_server = message.origin_server.clone();
        let bytes = Frame::PublicMessage(message).to_bytes().map_err(ConnectionError::from)?;
        self.federation.forward_public(&mut self.conns, origin, &origin_server, &bytes)?;
        Ok(())
    }

    fn direct(&mut self, origin: Origin, message: DirectMessage) {
        let dest_server = message.dest_server.clone();
        let recipient = message.recipient.clone();
        self.deliver(origin, &dest_server, &recipient, Frame::DirectMessage(message));
    }

    fn file(&mut self, origin: Origin, block: FileBlock) {
        let dest_server = block.dest_server.clone();
        let recipient = block.recipient.clone();
        self.deliver(origin, &dest_server, &recipient, Frame::FileBlock(block));
    }

    fn deliver(&mut self, origin: Origin, dest_server: &str, recipient: &str, frame: Frame) {
        if dest_server == self.federation.name() {
            if self.registry.deliver_direct(&mut self.conns, recipient, &frame) == Delivery::NotFound {
                tracing::debug!(recipient = %recipient, "Recipient not logged here, dropping frame");
            }
            return;
        }

        let bytes = match frame.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping frame that cannot be encoded");
                return;
            },
        };
        match self.federation.route(&mut self.conns, origin, dest_server, &bytes) {
            Route::Forwarded(conn) => tracing::trace!(conn = %conn, dest_server = %dest_server, "Forwarded"),
            Route::Local | Route::Unroutable => {},
        }
    }
}

fn check_text(text: &str) -> Result<(), DispatchError> {
    if is_valid_message(text) {
        Ok(())
    } else {
        Err(DispatchError::InvalidMessage(text.len()))
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, net::Ipv4Addr};

    use fusion_proto::FrameReader;

    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port)
    }

    fn node(name: &str, port: u16) -> Node {
        Node::new(ServerIdentity::new(name, addr(port)))
    }

    /// Feed `frames` as one readable event on `id`.
    fn feed(node: &mut Node, id: ConnId, frames: &[Frame]) {
        let mut bytes = Vec::new();
        for frame in frames {
            bytes.extend_from_slice(&frame.to_bytes().unwrap());
        }
        let mut src = Input(VecDeque::from(bytes));
        node.on_readable(id, &mut src);
    }

    /// Everything queued on `id`, decoded.
    fn drain(node: &mut Node, id: ConnId) -> Vec<Frame> {
        let mut out = Vec::new();
        node.on_writable(id, &mut out);
        let mut reader = FrameReader::new();
        let mut input = out.as_slice();
        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame(&mut input).unwrap() {
            frames.push(frame);
        }
        frames
    }

    struct Input(VecDeque<u8>);

    impl Read for Input {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.0.read(buf)
        }
    }

    fn login(node: &mut Node, username: &str) -> ConnId {
        let id = node.accept(addr(40000));
        feed(node, id, &[Frame::AnonymousLogin { username: username.to_string() }]);
        id
    }

    #[test]
    fn login_then_duplicate_is_refused() {
        let mut node = node("alpha", 7001);
        let bob = login(&mut node, "bob");
        assert_eq!(drain(&mut node, bob), vec![Frame::LoginAccepted { server_name: "alpha".to_string() }]);

        let again = login(&mut node, "bob");
        assert_eq!(drain(&mut node, again), vec![Frame::LoginRefused]);
        assert!(node.take_closed().contains(&again));
        assert!(node.connections().get(bob).is_some());
    }

    #[test]
    fn invalid_username_is_refused() {
        let mut node = node("alpha", 7001);
        let id = login(&mut node, &"x".repeat(30));
        assert_eq!(drain(&mut node, id), vec![Frame::LoginRefused]);
    }

    #[test]
    fn logout_frees_username() {
        let mut node = node("alpha", 7001);
        let bob = login(&mut node, "bob");
        node.close(bob);
        assert!(node.registry().usernames().is_empty());

        let again = login(&mut node, "bob");
        assert_eq!(drain(&mut node, again), vec![Frame::LoginAccepted { server_name: "alpha".to_string() }]);
    }

    #[test]
    fn public_message_reaches_local_clients() {
        let mut node = node("alpha", 7001);
        let bob = login(&mut node, "bob");
        let eve = login(&mut node, "eve");
        drain(&mut node, bob);
        drain(&mut node, eve);

        let message =
            PublicMessage { origin_server: "alpha".to_string(), sender: "bob".to_string(), text: "hi".to_string() };
        feed(&mut node, bob, &[Frame::PublicMessage(message.clone())]);

        assert_eq!(drain(&mut node, eve), vec![Frame::PublicMessage(message.clone())]);
        assert_eq!(drain(&mut node, bob), vec![Frame::PublicMessage(message)]);
    }

    #[test]
    fn spoofed_sender_closes_client() {
        let mut node = node("alpha", 7001);
        let bob = login(&mut node, "bob");
        let message =
            PublicMessage { origin_server: "alpha".to_string(), sender: "eve".to_string(), text: "hi".to_string() };
        feed(&mut node, bob, &[Frame::PublicMessage(message)]);

        assert!(node.connections().get(bob).is_none());
        assert!(node.registry().usernames().is_empty());
    }

    #[test]
    fn direct_message_for_local_user() {
        let mut node = node("alpha", 7001);
        let bob = login(&mut node, "bob");
        let eve = login(&mut node, "eve");
        drain(&mut node, eve);

        let message = DirectMessage {
            origin_server: "alpha".to_string(),
            sender: "bob".to_string(),
            dest_server: "alpha".to_string(),
            recipient: "eve".to_string(),
            text: "psst".to_string(),
        };
        feed(&mut node, bob, &[Frame::DirectMessage(message.clone())]);
        assert_eq!(drain(&mut node, eve), vec![Frame::DirectMessage(message)]);
    }

    #[test]
    fn frames_outside_role_close_connection() {
        let mut node = node("alpha", 7001);
        let id = node.accept(addr(40000));
        feed(&mut node, id, &[Frame::FusionInitKo]);
        assert!(node.connections().get(id).is_none());
        assert_eq!(node.take_closed(), vec![id]);
    }

    #[test]
    fn frames_after_refusal_are_ignored() {
        let mut node = node("alpha", 7001);
        let _bob = login(&mut node, "bob");
        let id = node.accept(addr(40000));
        feed(
            &mut node,
            id,
            &[Frame::AnonymousLogin { username: "bob".to_string() }, Frame::FusionMerge { name: "x".to_string() }],
        );
        assert_eq!(drain(&mut node, id), vec![Frame::LoginRefused]);
    }

    #[test]
    fn fusion_init_makes_member() {
        let mut node = node("alpha", 7001);
        let id = node.accept(addr(40000));
        let peer = fusion_proto::ServerInfo { name: "beta".to_string(), address: addr(7002), members: vec![] };
        feed(&mut node, id, &[Frame::FusionInit(peer)]);

        let expected = fusion_proto::ServerInfo { name: "alpha".to_string(), address: addr(7001), members: vec![] };
        assert_eq!(drain(&mut node, id), vec![Frame::FusionInitOk(expected)]);
        assert_eq!(node.federation().members().get("beta"), Some(&id));

        node.close(id);
        assert!(node.federation().members().is_empty());
    }

    fn with_member(node: &mut Node, name: &str, port: u16) -> ConnId {
        let id = node.accept(addr(40000));
        let peer = fusion_proto::ServerInfo { name: name.to_string(), address: addr(port), members: vec![] };
        feed(node, id, &[Frame::FusionInit(peer)]);
        drain(node, id);
        id
    }

    #[test]
    fn refused_fusion_request_keeps_member() {
        let mut node = node("alpha", 7001);
        let beta = with_member(&mut node, "beta", 7002);
        node.initiate_fusion(addr(7003));
        assert!(node.federation().is_fusing());

        feed(&mut node, beta, &[Frame::FusionRequest { remote: addr(7004) }]);
        feed(&mut node, beta, &[Frame::FusionRequest { remote: addr(7001) }]);

        assert_eq!(node.federation().members().get("beta"), Some(&beta));
        assert!(node.connections().is_open(beta));
        assert!(!node.take_closed().contains(&beta));
    }

    #[test]
    fn fusion_request_for_own_address_keeps_member() {
        let mut node = node("alpha", 7001);
        let beta = with_member(&mut node, "beta", 7002);

        feed(&mut node, beta, &[Frame::FusionRequest { remote: addr(7001) }]);

        assert!(!node.federation().is_fusing());
        assert_eq!(node.federation().members().get("beta"), Some(&beta));
        assert!(node.connections().is_open(beta));
    }

    /// `alpha` fusing with `beta`, and `zeta` merging before beta's answer.
    fn early_merge(node: &mut Node, bob: ConnId) -> (ConnId, ConnId, PublicMessage) {
        node.initiate_fusion(addr(7002));
        let (attempt, _) = node.take_pending_connects()[0];
        node.on_connected(attempt);
        drain(node, bob);

        let early = node.accept(addr(40001));
        let message =
            PublicMessage { origin_server: "zeta".to_string(), sender: "carol".to_string(), text: "early".to_string() };
        feed(node, early, &[Frame::FusionMerge { name: "zeta".to_string() }, Frame::PublicMessage(message.clone())]);
        (attempt, early, message)
    }

    #[test]
    fn early_merge_traffic_waits_for_confirmation() {
        let mut node = node("alpha", 7001);
        let bob = login(&mut node, "bob");
        let (attempt, early, message) = early_merge(&mut node, bob);

        assert!(drain(&mut node, bob).is_empty());
        assert_eq!(node.connections().role(early), Some(&Role::PendingMember { name: "zeta".to_string() }));

        let peer =
            fusion_proto::ServerInfo { name: "beta".to_string(), address: addr(7002), members: vec!["zeta".to_string()] };
        feed(&mut node, attempt, &[Frame::FusionInitOk(peer)]);

        assert_eq!(node.federation().members().get("zeta"), Some(&early));
        assert_eq!(drain(&mut node, bob), vec![Frame::PublicMessage(message)]);
    }

    #[test]
    fn unconfirmed_merge_traffic_is_never_delivered() {
        let mut node = node("alpha", 7001);
        let bob = login(&mut node, "bob");
        let (attempt, early, _) = early_merge(&mut node, bob);

        feed(&mut node, attempt, &[Frame::FusionInitKo]);

        assert!(node.take_closed().contains(&early));
        assert!(node.connections().get(early).is_none());
        assert!(node.federation().members().is_empty());
        assert!(drain(&mut node, bob).is_empty());
    }
}

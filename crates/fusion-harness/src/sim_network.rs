//! In-memory network of ChatFusion servers and clients.
//!
//! Every TCP connection is a link: two byte queues, one per direction.
//! Servers are real [`Node`]s; the network plays the readiness loop for them,
//! handing each connection an in-memory `Read`/`Write` that delivers a
//! randomly sized slice of the queued bytes per step. This exercises partial
//! reads, partial writes and frames split at arbitrary byte boundaries.
//!
//! # Determinism
//!
//! Slice sizes come from a `ChaCha20Rng` seeded by the caller, and servers,
//! connections and clients are always visited in a fixed order. The same seed
//! and the same inputs give the same run.

use std::{
    collections::{BTreeMap, VecDeque},
    io::{self, Read, Write},
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

use fusion_core::{ConnId, Interest, Node};
use fusion_proto::{Frame, FrameReader, ServerIdentity};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Steps after which [`SimNetwork::run_until_idle`] gives up.
pub const MAX_STEPS: usize = 100_000;

/// Listening port of every simulated server.
pub const SERVER_PORT: u16 = 7777;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    /// Connecting end
    A,
    /// Accepting end
    B,
}

#[derive(Debug, Clone, Copy)]
struct End {
    link: usize,
    side: Side,
}

/// One simulated TCP connection.
#[derive(Debug, Default)]
struct Link {
    a_to_b: VecDeque<u8>,
    b_to_a: VecDeque<u8>,
    a_closed: bool,
    b_closed: bool,
}

impl Link {
    fn queues(&mut self, side: Side) -> (&mut VecDeque<u8>, &mut VecDeque<u8>) {
        match side {
            Side::A => (&mut self.b_to_a, &mut self.a_to_b),
            Side::B => (&mut self.a_to_b, &mut self.b_to_a),
        }
    }

    fn peer_closed(&self, side: Side) -> bool {
        match side {
            Side::A => self.b_closed,
            Side::B => self.a_closed,
        }
    }

    /// Close one end. Bytes it already sent stay readable by the peer; bytes
    /// sent to it are dropped.
    fn close(&mut self, side: Side) {
        match side {
            Side::A => {
                self.a_closed = true;
                self.b_to_a.clear();
            },
            Side::B => {
                self.b_closed = true;
                self.a_to_b.clear();
            },
        }
    }
}

/// Readable end of a link, limited to `budget` bytes per step.
struct Inbox<'a> {
    queue: &'a mut VecDeque<u8>,
    budget: usize,
    peer_closed: bool,
}

impl Read for Inbox<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.queue.is_empty() {
            return if self.peer_closed { Ok(0) } else { Err(io::ErrorKind::WouldBlock.into()) };
        }
        if self.budget == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.budget).min(self.queue.len());
        for (slot, byte) in buf.iter_mut().zip(self.queue.drain(..n)) {
            *slot = byte;
        }
        self.budget -= n;
        Ok(n)
    }
}

/// Writable end of a link, limited to `budget` bytes per step.
struct Outbox<'a> {
    queue: &'a mut VecDeque<u8>,
    budget: usize,
    peer_closed: bool,
}

impl Write for Outbox<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.peer_closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if self.budget == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.budget);
        self.queue.extend(&buf[..n]);
        self.budget -= n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct SimServer {
    node: Node,
    ends: BTreeMap<ConnId, End>,
}

/// A chat client speaking the wire format over a link.
pub struct SimClient {
    server: String,
    link: usize,
    reader: FrameReader,
    received: Vec<Frame>,
    decode_failed: bool,
}

impl SimClient {
    /// Server the client connected to
    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Frames received so far, in order
    #[must_use]
    pub fn received(&self) -> &[Frame] {
        &self.received
    }
}

/// Simulated network of servers and clients.
pub struct SimNetwork {
    rng: ChaCha20Rng,
    max_chunk: usize,
    servers: BTreeMap<String, SimServer>,
    addresses: BTreeMap<SocketAddr, String>,
    clients: BTreeMap<String, SimClient>,
    links: Vec<Link>,
    next_host: u8,
    next_ephemeral: u16,
}

impl SimNetwork {
    /// Empty network whose slice sizes are drawn from `seed`
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
            max_chunk: 64,
            servers: BTreeMap::new(),
            addresses: BTreeMap::new(),
            clients: BTreeMap::new(),
            links: Vec::new(),
            next_host: 0,
            next_ephemeral: 40_000,
        }
    }

    /// Largest slice delivered per connection and step (at least 1)
    #[must_use]
    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk.max(1);
        self
    }

    fn chunk(&mut self) -> usize {
        self.rng.gen_range(1..=self.max_chunk)
    }

    fn next_address(&mut self) -> SocketAddr {
        self.next_host = self.next_host.wrapping_add(1);
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, self.next_host)), SERVER_PORT)
    }

    fn ephemeral(&mut self, ip: IpAddr) -> SocketAddr {
        self.next_ephemeral = self.next_ephemeral.wrapping_add(1);
        SocketAddr::new(ip, self.next_ephemeral)
    }

    /// Start a server and return its listening address.
    ///
    /// # Panics
    ///
    /// Panics if a server with this name already exists.
    pub fn add_server(&mut self, name: &str) -> SocketAddr {
        assert!(!self.servers.contains_key(name), "server {name} already exists");
        let address = self.next_address();
        let node = Node::new(ServerIdentity::new(name, address));
        self.servers.insert(name.to_string(), SimServer { node, ends: BTreeMap::new() });
        self.addresses.insert(address, name.to_string());
        address
    }

    /// Listening address of a server
    #[must_use]
    pub fn address(&self, name: &str) -> Option<SocketAddr> {
        self.servers.get(name).map(|s| s.node.identity().address)
    }

    /// Server state
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.servers.get(name).map(|s| &s.node)
    }

    /// Names of running servers, sorted
    #[must_use]
    pub fn server_names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    /// Client state
    #[must_use]
    pub fn client(&self, label: &str) -> Option<&SimClient> {
        self.clients.get(label)
    }

    /// Labels of clients, sorted
    #[must_use]
    pub fn client_labels(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    /// Returns true once the server closed the client's connection
    #[must_use]
    pub fn client_disconnected(&self, label: &str) -> bool {
        self.clients.get(label).is_some_and(|c| {
            let link = &self.links[c.link];
            c.decode_failed || (link.b_closed && link.b_to_a.is_empty())
        })
    }

    /// Run the operator `FUSION` command on `initiator`, targeting `target`.
    ///
    /// `target` may also be an address no server listens on.
    pub fn fuse(&mut self, initiator: &str, target: SocketAddr) {
        if let Some(server) = self.servers.get_mut(initiator) {
            server.node.initiate_fusion(target);
        }
    }

    /// Open a client connection labelled `label` to `server`.
    ///
    /// # Panics
    ///
    /// Panics if the label is taken or the server does not exist.
    pub fn connect_client(&mut self, label: &str, server: &str) {
        assert!(!self.clients.contains_key(label), "client {label} already exists");
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1));
        let remote = self.ephemeral(ip);
        let link = self.links.len();
        self.links.push(Link::default());

        let sim = self.servers.get_mut(server).unwrap_or_else(|| panic!("no server {server}"));
        let id = sim.node.accept(remote);
        sim.ends.insert(id, End { link, side: Side::B });

        self.clients.insert(
            label.to_string(),
            SimClient {
                server: server.to_string(),
                link,
                reader: FrameReader::new(),
                received: Vec::new(),
                decode_failed: false,
            },
        );
    }

    /// Queue a frame from a client.
    ///
    /// # Panics
    ///
    /// Panics if the client does not exist or the frame exceeds wire limits.
    pub fn client_send(&mut self, label: &str, frame: &Frame) {
        let client = self.clients.get(label).unwrap_or_else(|| panic!("no client {label}"));
        let bytes = frame.to_bytes().unwrap_or_else(|e| panic!("cannot encode {frame:?}: {e}"));
        let link = &mut self.links[client.link];
        if !link.a_closed {
            link.a_to_b.extend(bytes.iter());
        }
    }

    /// Close a client's side of its connection
    pub fn disconnect_client(&mut self, label: &str) {
        if let Some(client) = self.clients.get(label) {
            self.links[client.link].close(Side::A);
        }
    }

    /// Stop a server abruptly: every one of its connections is cut.
    pub fn crash(&mut self, name: &str) {
        let Some(server) = self.servers.remove(name) else {
            return;
        };
        self.addresses.retain(|_, n| n.as_str() != name);
        for end in server.ends.values() {
            self.links[end.link].close(end.side);
        }
        tracing::debug!(server = %name, "Server crashed");
    }

    /// Step until nothing moves.
    ///
    /// # Errors
    ///
    /// Returns an error if the network is still busy after [`MAX_STEPS`].
    pub fn run_until_idle(&mut self) -> Result<usize, String> {
        for steps in 0..MAX_STEPS {
            if !self.step() {
                return Ok(steps);
            }
        }
        Err(format!("network still busy after {MAX_STEPS} steps"))
    }

    /// Advance every connection once. Returns true if anything happened.
    pub fn step(&mut self) -> bool {
        let mut progress = self.open_connects();
        for name in self.server_names() {
            progress |= self.pump_server(&name);
        }
        for label in self.client_labels() {
            progress |= self.pump_client(&label);
        }
        progress
    }

    fn open_connects(&mut self) -> bool {
        let mut requests = Vec::new();
        for (name, server) in &mut self.servers {
            for (id, remote) in server.node.take_pending_connects() {
                requests.push((name.clone(), id, remote));
            }
        }
        let progress = !requests.is_empty();

        for (initiator, id, remote) in requests {
            let Some(target) = self.addresses.get(&remote).cloned() else {
                if let Some(server) = self.servers.get_mut(&initiator) {
                    server.node.on_connect_failed(id, &io::Error::from(io::ErrorKind::ConnectionRefused));
                }
                continue;
            };

            let Some(initiator_ip) = self.address(&initiator).map(|a| a.ip()) else {
                continue;
            };
            let ephemeral = self.ephemeral(initiator_ip);
            let link = self.links.len();
            self.links.push(Link::default());

            if let Some(server) = self.servers.get_mut(&initiator) {
                server.ends.insert(id, End { link, side: Side::A });
                server.node.on_connected(id);
            }
            if let Some(server) = self.servers.get_mut(&target) {
                let accepted = server.node.accept(ephemeral);
                server.ends.insert(accepted, End { link, side: Side::B });
            }
        }
        progress
    }

    fn pump_server(&mut self, name: &str) -> bool {
        let Some(server) = self.servers.get_mut(name) else {
            return false;
        };
        let mut progress = false;

        for id in server.node.connections().ids() {
            let Some(&end) = server.ends.get(&id) else {
                continue;
            };
            let Some(interest) = server.node.interest(id) else {
                continue;
            };

            if interest.contains(Interest::WRITE) {
                let budget = self.rng.gen_range(1..=self.max_chunk);
                let link = &mut self.links[end.link];
                let peer_closed = link.peer_closed(end.side);
                let (_, outgoing) = link.queues(end.side);
                let before = outgoing.len();
                server.node.on_writable(id, &mut Outbox { queue: &mut *outgoing, budget, peer_closed });
                progress |= outgoing.len() != before;
            }

            if interest.contains(Interest::READ) {
                let budget = self.rng.gen_range(1..=self.max_chunk);
                let link = &mut self.links[end.link];
                let peer_closed = link.peer_closed(end.side);
                let (incoming, _) = link.queues(end.side);
                let before = incoming.len();
                let eof = peer_closed && incoming.is_empty();
                server.node.on_readable(id, &mut Inbox { queue: &mut *incoming, budget, peer_closed });
                progress |= eof || incoming.len() != before;
            }
        }

        for id in server.node.take_closed() {
            if let Some(end) = server.ends.remove(&id) {
                self.links[end.link].close(end.side);
                progress = true;
            }
        }
        progress
    }

    fn pump_client(&mut self, label: &str) -> bool {
        let budget = self.chunk();
        let Some(client) = self.clients.get_mut(label) else {
            return false;
        };
        if client.decode_failed {
            return false;
        }
        let link = &mut self.links[client.link];
        if link.a_closed {
            return false;
        }

        let n = budget.min(link.b_to_a.len());
        if n == 0 {
            return false;
        }
        let bytes: Vec<u8> = link.b_to_a.drain(..n).collect();
        let mut input = bytes.as_slice();
        loop {
            match client.reader.next_frame(&mut input) {
                Ok(Some(frame)) => client.received.push(frame),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(client = %label, error = %e, "Client received a malformed frame");
                    client.decode_failed = true;
                    break;
                },
            }
        }
        true
    }
}

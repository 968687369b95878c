//! Readiness loop.
//!
//! A single thread owns the listener, every socket and the [`Node`]. It
//! blocks in `mio::Poll`, hands ready sockets to the node, then brings the
//! socket registrations in line with what each connection now needs.
//!
//! ```text
//!            ┌────────────────────────────────────────────────┐
//!  console ─>│ command queue ──(waker)──┐                     │
//!            │                          ↓                     │
//!            │  poll ─> accept / read / write ─> Node         │
//!            │    ↑                              │            │
//!            │    └── reregister <─ reap <─ flush <─ connect ─┘
//!            └────────────────────────────────────────────────┘
//! ```
//!
//! Other threads never touch the node: they push onto the command queue
//! through a [`Handle`] and wake the poll.
//!
//! # Invariants
//!
//! - Every socket is registered with the interest its connection reports
//!   after the last event was handled.
//! - Sockets are edge-triggered, so reads and writes always continue until
//!   the socket would block.

use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc,
    },
};

use fusion_core::{ConnId, Interest, Node, NodeReport};
use fusion_proto::ServerIdentity;
use mio::{
    event::Event,
    net::{TcpListener, TcpStream},
    Events, Poll, Token, Waker,
};

use crate::{
    config::Config,
    console::Command,
    error::{Result, ServerError},
};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CONN: usize = 2;

fn token_of(id: ConnId) -> Token {
    Token(FIRST_CONN + id.as_u64() as usize)
}

fn conn_of(token: Token) -> ConnId {
    ConnId::new((token.0 - FIRST_CONN) as u64)
}

fn to_mio(interest: Interest) -> Option<mio::Interest> {
    let readable = interest.contains(Interest::READ).then_some(mio::Interest::READABLE);
    let writable = interest.intersects(Interest::WRITE | Interest::CONNECT).then_some(mio::Interest::WRITABLE);
    match (readable, writable) {
        (Some(r), Some(w)) => Some(r | w),
        (r, w) => r.or(w),
    }
}

enum Request {
    Command(Command),
    Report(Sender<NodeReport>),
}

/// Cross-thread access to a running loop.
#[derive(Clone)]
pub struct Handle {
    requests: Sender<Request>,
    waker: Arc<Waker>,
}

impl Handle {
    fn submit(&self, request: Request) -> Result<()> {
        self.requests.send(request).map_err(|_| ServerError::Stopped)?;
        self.waker.wake()?;
        Ok(())
    }

    /// Queue an operator command.
    ///
    /// # Errors
    ///
    /// Returns `Stopped` if the loop has exited.
    pub fn send(&self, command: Command) -> Result<()> {
        self.submit(Request::Command(command))
    }

    /// Ask the loop for a status snapshot and wait for it.
    ///
    /// # Errors
    ///
    /// Returns `Stopped` if the loop has exited.
    pub fn report(&self) -> Result<NodeReport> {
        let (tx, rx) = mpsc::channel();
        self.submit(Request::Report(tx))?;
        rx.recv().map_err(|_| ServerError::Stopped)
    }
}

struct Socket {
    stream: TcpStream,
    registered: Option<mio::Interest>,
}

/// A bound server, ready to run.
pub struct Server {
    poll: Poll,
    events_capacity: usize,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    node: Node,
    sockets: HashMap<ConnId, Socket>,
    requests: Receiver<Request>,
    handle: Handle,
    running: bool,
}

impl Server {
    /// Bind the listener and set up the poll.
    ///
    /// When the configured port is 0, the advertised address uses the port
    /// the system picked.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the listener or poll cannot be created.
    pub fn bind(config: &Config) -> Result<Self> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(config.listen_addr)?;
        let local_addr = listener.local_addr()?;
        poll.registry().register(&mut listener, LISTENER, mio::Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let (requests_tx, requests) = mpsc::channel();

        let mut advertised = config.advertised();
        if advertised.port() == 0 {
            advertised.set_port(local_addr.port());
        }

        Ok(Self {
            poll,
            events_capacity: config.events_capacity,
            listener: Some(listener),
            local_addr,
            node: Node::new(ServerIdentity::new(config.name.clone(), advertised)),
            sockets: HashMap::new(),
            requests,
            handle: Handle { requests: requests_tx, waker },
            running: true,
        })
    }

    /// Address the listener is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Name and address announced to other servers
    #[must_use]
    pub fn identity(&self) -> &ServerIdentity {
        self.node.identity()
    }

    /// Handle for other threads
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Run until `SHUTDOWNNOW`.
    ///
    /// # Errors
    ///
    /// Returns `Io` if polling fails.
    pub fn run(mut self) -> Result<()> {
        let mut events = Events::with_capacity(self.events_capacity);
        tracing::info!(server = %self.node.identity(), listen = %self.local_addr, "Server running");

        while self.running {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_all(),
                    WAKER => {},
                    token => self.socket_event(conn_of(token), event),
                }
            }

            self.drain_requests();
            self.sync();
        }

        tracing::info!(server = %self.node.identity(), "Server stopped");
        Ok(())
    }

    fn accept_all(&mut self) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        loop {
            match listener.accept() {
                Ok((stream, remote)) => {
                    let id = self.node.accept(remote);
                    self.sockets.insert(id, Socket { stream, registered: None });
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    break;
                },
            }
        }
    }

    fn socket_event(&mut self, id: ConnId, event: &Event) {
        let Some(socket) = self.sockets.get_mut(&id) else {
            return;
        };

        let connecting = self.node.connections().get(id).is_some_and(|c| !c.is_connected());
        if connecting {
            if !event.is_writable() && !event.is_error() {
                return;
            }
            match socket.stream.take_error() {
                Ok(Some(e)) | Err(e) => {
                    self.node.on_connect_failed(id, &e);
                    return;
                },
                Ok(None) => {},
            }
            match socket.stream.peer_addr() {
                Ok(_) => self.node.on_connected(id),
                // Spurious wakeup, the connect is still in progress.
                Err(e) if e.kind() == io::ErrorKind::NotConnected => return,
                Err(e) => {
                    self.node.on_connect_failed(id, &e);
                    return;
                },
            }
        }

        if event.is_readable() || event.is_read_closed() || event.is_error() {
            self.node.on_readable(id, &mut socket.stream);
        }
        if event.is_writable() {
            self.node.on_writable(id, &mut socket.stream);
        }
    }

    fn drain_requests(&mut self) {
        while let Ok(request) = self.requests.try_recv() {
            match request {
                Request::Command(Command::Info) => println!("{}", self.node.report()),
                Request::Command(Command::Shutdown) => {
                    if let Some(mut listener) = self.listener.take() {
                        if let Err(e) = self.poll.registry().deregister(&mut listener) {
                            tracing::debug!(error = %e, "Deregistering listener failed");
                        }
                        tracing::info!("Stopped accepting connections");
                    }
                },
                Request::Command(Command::ShutdownNow) => {
                    tracing::info!("Shutting down");
                    self.node.shutdown_now();
                    self.running = false;
                },
                Request::Command(Command::Fusion(remote)) => self.node.initiate_fusion(remote),
                Request::Report(reply) => {
                    // The caller may have given up waiting.
                    let _ = reply.send(self.node.report());
                },
            }
        }
    }

    /// Open requested connections, flush queued output, drop closed sockets
    /// and refresh registrations.
    fn sync(&mut self) {
        for (id, remote) in self.node.take_pending_connects() {
            match TcpStream::connect(remote) {
                Ok(stream) => {
                    self.sockets.insert(id, Socket { stream, registered: None });
                },
                Err(e) => self.node.on_connect_failed(id, &e),
            }
        }

        for (&id, socket) in &mut self.sockets {
            let ready = self.node.connections().get(id).is_some_and(|c| c.is_connected() && c.pending_output() > 0);
            if ready {
                self.node.on_writable(id, &mut socket.stream);
            }
        }

        for id in self.node.take_closed() {
            if let Some(mut socket) = self.sockets.remove(&id) {
                if socket.registered.is_some() {
                    if let Err(e) = self.poll.registry().deregister(&mut socket.stream) {
                        tracing::debug!(conn = %id, error = %e, "Deregistering socket failed");
                    }
                }
            }
        }

        let registry = self.poll.registry();
        for (&id, socket) in &mut self.sockets {
            let Some(wanted) = self.node.interest(id).and_then(to_mio) else {
                continue;
            };
            if socket.registered == Some(wanted) {
                continue;
            }
            let result = match socket.registered {
                Some(_) => registry.reregister(&mut socket.stream, token_of(id), wanted),
                None => registry.register(&mut socket.stream, token_of(id), wanted),
            };
            match result {
                Ok(()) => socket.registered = Some(wanted),
                Err(e) => tracing::warn!(conn = %id, error = %e, "Socket registration failed"),
            }
        }
    }
}

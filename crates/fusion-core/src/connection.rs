//! Connection controller.
//!
//! One [`Connection`] owns the byte-level state of one socket: an inbound
//! buffer feeding the incremental [`FrameReader`], an outbound queue of
//! fixed-size chunks, and the flags that decide which readiness events the
//! socket needs next.
//!
//! The controller never owns the socket. The readiness loop hands it a
//! `Read` or `Write` when the socket is ready, which keeps the controller
//! testable with in-memory streams.
//!
//! # Lifecycle
//!
//! ```text
//!  connect()                     accept()
//!     │                             │
//!     ↓  on_connected()             ↓
//! ┌────────────┐            ┌────────────┐  close_when_all_sent()  ┌─────────┐
//! │ Connecting │───────────>│    Open    │────────────────────────>│ Closing │
//! └────────────┘            └────────────┘                         └─────────┘
//!                                  │ EOF / decode error                 │ queue drained
//!                                  ↓                                    ↓
//!                               (closed by the node, socket dropped)
//! ```
//!
//! # Invariants
//!
//! - Data is never queued on a closing connection.
//! - Queued data is copied; callers keep no ownership of what they queued.
//! - Frames are delivered in the order their last byte arrived.

use std::{
    collections::VecDeque,
    fmt,
    io::{self, Read, Write},
    net::SocketAddr,
};

use bitflags::bitflags;
use bytes::{Buf, BytesMut};
use fusion_proto::{Frame, FrameReader, ServerIdentity};

use crate::error::ConnectionError;

/// Capacity of the inbound buffer, and the most read from a socket at once.
pub const INBOUND_CAPACITY: usize = 1_024;

/// Size of one outbound chunk.
pub const CHUNK_SIZE: usize = 1_024;

/// Identifier of a connection, unique for the lifetime of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    /// Wrap a raw id
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags! {
    /// Readiness events a connection currently needs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interest: u8 {
        /// Socket should be read
        const READ = 1;
        /// Socket should be written
        const WRITE = 1 << 1;
        /// Outbound connect still in progress
        const CONNECT = 1 << 2;
    }
}

/// What the other end of a connection is, as far as this server knows.
///
/// The role decides which frames the connection may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Accepted, nothing received yet
    Unlogged,
    /// Logged-in local client
    Client {
        /// Username the client logged in with
        username: String,
    },
    /// Outbound connection carrying our `FusionInit`
    FusionAttempt,
    /// Merge received before our fusion answer; frames wait for confirmation
    PendingMember {
        /// Announced server name
        name: String,
    },
    /// Direct child in the federation tree
    Member {
        /// Member server name
        name: String,
    },
    /// Link to our federation leader
    Leader {
        /// Leader name and listening address
        identity: ServerIdentity,
    },
}

impl Role {
    /// Short name for logs and errors
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unlogged => "unlogged",
            Self::Client { .. } => "client",
            Self::FusionAttempt => "fusion-attempt",
            Self::PendingMember { .. } => "pending-member",
            Self::Member { .. } => "member",
            Self::Leader { .. } => "leader",
        }
    }
}

/// Result of draining a readable socket.
#[derive(Debug, Default)]
pub struct ReadOutcome {
    /// Complete frames, in arrival order
    pub frames: Vec<Frame>,
    /// Set when the connection must be closed once `frames` are handled
    pub end: Option<ConnectionError>,
}

/// Byte-level state of one socket.
pub struct Connection {
    id: ConnId,
    remote: SocketAddr,
    role: Role,
    inbound: BytesMut,
    outbound: VecDeque<BytesMut>,
    reader: FrameReader,
    connected: bool,
    closing: bool,
}

impl Connection {
    /// Controller for a socket returned by `accept`
    #[must_use]
    pub fn accepted(id: ConnId, remote: SocketAddr) -> Self {
        Self::new(id, remote, Role::Unlogged, true)
    }

    /// Controller for a socket whose connect is still in progress
    #[must_use]
    pub fn outbound(id: ConnId, remote: SocketAddr, role: Role) -> Self {
        Self::new(id, remote, role, false)
    }

    fn new(id: ConnId, remote: SocketAddr, role: Role, connected: bool) -> Self {
        Self {
            id,
            remote,
            role,
            inbound: BytesMut::with_capacity(INBOUND_CAPACITY),
            outbound: VecDeque::new(),
            reader: FrameReader::new(),
            connected,
            closing: false,
        }
    }

    /// Connection id
    #[must_use]
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Address of the other end
    #[must_use]
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Current role
    #[must_use]
    pub fn role(&self) -> &Role {
        &self.role
    }

    /// Replace the role (login, fusion, merge)
    pub fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    /// Returns true once the outbound connect completed (always true for
    /// accepted sockets)
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Returns true after [`Connection::close_when_all_sent`]
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Returns true when the connection is closing and nothing is left to send
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.closing && self.outbound.is_empty()
    }

    /// Bytes queued but not yet written
    #[must_use]
    pub fn pending_output(&self) -> usize {
        self.outbound.iter().map(BytesMut::len).sum()
    }

    /// Mark the outbound connect as complete
    pub fn on_connected(&mut self) {
        self.connected = true;
    }

    /// Copy `data` to the end of the outbound queue.
    ///
    /// # Errors
    ///
    /// Returns `Closing` if the connection no longer accepts data.
    pub fn queue_data(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        if self.closing {
            return Err(ConnectionError::Closing(self.id));
        }

        let mut rest = data;
        while !rest.is_empty() {
            match self.outbound.back_mut() {
                Some(last) if last.len() < CHUNK_SIZE => {
                    let take = (CHUNK_SIZE - last.len()).min(rest.len());
                    last.extend_from_slice(&rest[..take]);
                    rest = &rest[take..];
                },
                _ => self.outbound.push_back(BytesMut::with_capacity(CHUNK_SIZE)),
            }
        }
        Ok(())
    }

    /// Encode `frame` and queue it.
    ///
    /// # Errors
    ///
    /// Returns `Encode` if the frame violates wire limits, `Closing` if the
    /// connection no longer accepts data.
    pub fn queue_frame(&mut self, frame: &Frame) -> Result<(), ConnectionError> {
        if self.closing {
            return Err(ConnectionError::Closing(self.id));
        }
        let bytes = frame.to_bytes()?;
        self.queue_data(&bytes)
    }

    /// Stop reading and close once every queued byte is written.
    pub fn close_when_all_sent(&mut self) {
        self.closing = true;
    }

    /// Drain `src` until it would block, decoding every complete frame.
    ///
    /// The frames decoded before an end-of-stream or a decode error are still
    /// returned, so the peer's last messages are not lost.
    pub fn on_readable<R: Read>(&mut self, src: &mut R) -> ReadOutcome {
        let mut outcome = ReadOutcome::default();
        if self.closing {
            return outcome;
        }

        let mut scratch = [0u8; INBOUND_CAPACITY];
        loop {
            let room = INBOUND_CAPACITY - self.inbound.len();
            match src.read(&mut scratch[..room]) {
                Ok(0) => {
                    outcome.end = Some(ConnectionError::PeerClosed);
                    break;
                },
                Ok(n) => {
                    self.inbound.extend_from_slice(&scratch[..n]);
                    if let Err(e) = self.decode_into(&mut outcome.frames) {
                        outcome.end = Some(e);
                        break;
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => {
                    outcome.end = Some(e.into());
                    break;
                },
            }
        }
        outcome
    }

    fn decode_into(&mut self, frames: &mut Vec<Frame>) -> Result<(), ConnectionError> {
        while let Some(frame) = self.reader.next_frame(&mut self.inbound)? {
            frames.push(frame);
        }
        Ok(())
    }

    /// Write queued chunks to `dst` until the queue is empty or `dst` would
    /// block.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the socket failed.
    pub fn on_writable<W: Write>(&mut self, dst: &mut W) -> Result<(), ConnectionError> {
        while let Some(chunk) = self.outbound.front_mut() {
            if chunk.is_empty() {
                self.outbound.pop_front();
                continue;
            }
            match dst.write(chunk) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => chunk.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Readiness events this connection needs now.
    #[must_use]
    pub fn interest(&self) -> Interest {
        if !self.connected {
            return Interest::CONNECT;
        }

        let mut interest = Interest::empty();
        if !self.closing && self.inbound.len() < INBOUND_CAPACITY {
            interest |= Interest::READ;
        }
        if !self.outbound.is_empty() {
            interest |= Interest::WRITE;
        }
        interest
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("role", &self.role)
            .field("pending_output", &self.pending_output())
            .field("connected", &self.connected)
            .field("closing", &self.closing)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use fusion_proto::DecodeError;

    use super::*;

    fn remote() -> SocketAddr {
        SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 4242)
    }

    /// Reader returning scripted chunks, then `WouldBlock` (or EOF).
    struct Script {
        chunks: VecDeque<Vec<u8>>,
        eof: bool,
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.front_mut() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    chunk.drain(..n);
                    if chunk.is_empty() {
                        self.chunks.pop_front();
                    }
                    Ok(n)
                },
                None if self.eof => Ok(0),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    /// Writer accepting at most `budget` bytes, `per_call` at a time.
    struct Trickle {
        written: Vec<u8>,
        budget: usize,
        per_call: usize,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.per_call).min(self.budget);
            self.written.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn queue_splits_into_fixed_chunks() {
        let mut conn = Connection::accepted(ConnId::new(1), remote());
        conn.queue_data(&[7u8; CHUNK_SIZE + 10]).unwrap();
        conn.queue_data(&[8u8; 5]).unwrap();

        assert_eq!(conn.outbound.len(), 2);
        assert_eq!(conn.outbound[0].len(), CHUNK_SIZE);
        assert_eq!(conn.outbound[1].len(), 15);
        assert_eq!(conn.pending_output(), CHUNK_SIZE + 15);
    }

    #[test]
    fn queue_after_close_when_all_sent_fails() {
        let mut conn = Connection::accepted(ConnId::new(1), remote());
        conn.close_when_all_sent();
        assert_eq!(conn.queue_data(b"late"), Err(ConnectionError::Closing(ConnId::new(1))));
    }

    #[test]
    fn partial_writes_preserve_order() {
        let mut conn = Connection::accepted(ConnId::new(1), remote());
        let data: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        conn.queue_data(&data).unwrap();

        let mut sink = Trickle { written: Vec::new(), budget: 1000, per_call: 333 };
        conn.on_writable(&mut sink).unwrap();
        assert_eq!(sink.written.len(), 1000);
        assert!(conn.interest().contains(Interest::WRITE));

        sink.budget = usize::MAX;
        conn.on_writable(&mut sink).unwrap();
        assert_eq!(sink.written, data);
        assert!(!conn.interest().contains(Interest::WRITE));
    }

    #[test]
    fn finishes_once_drained_after_close_request() {
        let mut conn = Connection::accepted(ConnId::new(1), remote());
        conn.queue_frame(&Frame::LoginRefused).unwrap();
        conn.close_when_all_sent();
        assert!(!conn.is_finished());
        assert_eq!(conn.interest(), Interest::WRITE);

        let mut sink = Trickle { written: Vec::new(), budget: usize::MAX, per_call: 64 };
        conn.on_writable(&mut sink).unwrap();
        assert!(conn.is_finished());
        assert_eq!(sink.written, vec![3]);
    }

    #[test]
    fn decodes_frames_split_across_reads() {
        let mut bytes = Frame::AnonymousLogin { username: "bob".to_string() }.to_bytes().unwrap().to_vec();
        bytes.extend_from_slice(&Frame::LoginRefused.to_bytes().unwrap());
        let (a, b) = bytes.split_at(3);

        let mut conn = Connection::accepted(ConnId::new(1), remote());
        let mut src = Script { chunks: VecDeque::from([a.to_vec(), b.to_vec()]), eof: false };
        let outcome = conn.on_readable(&mut src);

        assert_eq!(
            outcome.frames,
            vec![Frame::AnonymousLogin { username: "bob".to_string() }, Frame::LoginRefused]
        );
        assert!(outcome.end.is_none());
    }

    #[test]
    fn reads_more_than_one_buffer_per_event() {
        let text = "x".repeat(900);
        let frame = Frame::LoginAccepted { server_name: text };
        let mut stream = Vec::new();
        for _ in 0..3 {
            stream.extend_from_slice(&frame.to_bytes().unwrap());
        }

        let mut conn = Connection::accepted(ConnId::new(1), remote());
        let mut src = Script { chunks: VecDeque::from([stream]), eof: false };
        let outcome = conn.on_readable(&mut src);
        assert_eq!(outcome.frames.len(), 3);
    }

    #[test]
    fn eof_keeps_frames_read_before_it() {
        let mut conn = Connection::accepted(ConnId::new(1), remote());
        let mut src = Script {
            chunks: VecDeque::from([Frame::FusionInitKo.to_bytes().unwrap().to_vec()]),
            eof: true,
        };
        let outcome = conn.on_readable(&mut src);
        assert_eq!(outcome.frames, vec![Frame::FusionInitKo]);
        assert_eq!(outcome.end, Some(ConnectionError::PeerClosed));
    }

    #[test]
    fn decode_error_ends_the_connection() {
        let mut conn = Connection::accepted(ConnId::new(1), remote());
        let mut src = Script { chunks: VecDeque::from([vec![3, 99]]), eof: false };
        let outcome = conn.on_readable(&mut src);
        assert_eq!(outcome.frames, vec![Frame::LoginRefused]);
        assert_eq!(outcome.end, Some(ConnectionError::Decode(DecodeError::UnknownOpcode(99))));
    }

    #[test]
    fn interest_follows_state() {
        let mut conn = Connection::outbound(ConnId::new(2), remote(), Role::FusionAttempt);
        conn.queue_frame(&Frame::FusionInitKo).unwrap();
        assert_eq!(conn.interest(), Interest::CONNECT);

        conn.on_connected();
        assert_eq!(conn.interest(), Interest::READ | Interest::WRITE);

        conn.close_when_all_sent();
        assert_eq!(conn.interest(), Interest::WRITE);
    }
}

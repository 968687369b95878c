//! Frames and the opcode-indexed decoder table.
//!
//! Encoding writes the opcode byte and the fields into a growable buffer.
//! Decoding is the inverse, run incrementally: [`FrameReader`] reads the
//! opcode byte and then switches to the decoder the table selects for it.

use std::net::SocketAddr;

use bytes::{Buf, Bytes, BytesMut};

use crate::{
    limits::{MAX_BLOCK_BYTES, MAX_LIST_LEN, MAX_STRING_BYTES},
    payloads::{DirectMessage, FileBlock, PublicMessage, ServerIdentity, ServerInfo},
    reader::{
        primitives::{
            address_reader, blob_reader, i32_reader, i64_reader, u8_reader, Fail, Just, StringReader,
            U8Reader,
        },
        BoxReader, FlatMap, ProcessStatus, Reader,
    },
    writer::FrameWriter,
    DecodeError, Opcode, ProtocolError, Result,
};

/// One complete protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Client asks to log in under `username`
    AnonymousLogin {
        /// Requested username
        username: String,
    },
    /// Login accepted
    LoginAccepted {
        /// Name of the server the client is now logged on
        server_name: String,
    },
    /// Login refused (username malformed or taken)
    LoginRefused,
    /// Public chat message
    PublicMessage(PublicMessage),
    /// Direct chat message
    DirectMessage(DirectMessage),
    /// File block
    FileBlock(FileBlock),
    /// Leader proposes a fusion
    FusionInit(ServerInfo),
    /// Fusion accepted, carries the responder's description
    FusionInitOk(ServerInfo),
    /// Fusion rejected
    FusionInitKo,
    /// Responder is not a leader; retry with its leader
    FusionInitForward {
        /// Listening address of the responder's leader
        leader: SocketAddr,
    },
    /// Member asks its leader to fuse with `remote`
    FusionRequest {
        /// Listening address of the server to fuse with
        remote: SocketAddr,
    },
    /// The federation has a new leader; reconnect to it
    FusionChangeLeader(ServerIdentity),
    /// A migrating member introduces itself to its new leader
    FusionMerge {
        /// Member name
        name: String,
    },
}

impl Frame {
    /// Opcode identifying this frame on the wire
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::AnonymousLogin { .. } => Opcode::AnonymousLogin,
            Self::LoginAccepted { .. } => Opcode::LoginAccepted,
            Self::LoginRefused => Opcode::LoginRefused,
            Self::PublicMessage(_) => Opcode::PublicMessage,
            Self::DirectMessage(_) => Opcode::DirectMessage,
            Self::FileBlock(_) => Opcode::FileBlock,
            Self::FusionInit(_) => Opcode::FusionInit,
            Self::FusionInitOk(_) => Opcode::FusionInitOk,
            Self::FusionInitKo => Opcode::FusionInitKo,
            Self::FusionInitForward { .. } => Opcode::FusionInitForward,
            Self::FusionRequest { .. } => Opcode::FusionRequest,
            Self::FusionChangeLeader(_) => Opcode::FusionChangeLeader,
            Self::FusionMerge { .. } => Opcode::FusionMerge,
        }
    }

    /// Append the wire encoding of this frame to `dst`.
    ///
    /// # Errors
    ///
    /// Fails if a field exceeds the limits the decoder enforces. `dst` is left
    /// unchanged in that case.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let start = dst.len();
        let result = self.encode_fields(dst);
        if result.is_err() {
            dst.truncate(start);
        }
        result
    }

    /// Encode this frame into a standalone buffer.
    ///
    /// # Errors
    ///
    /// See [`Frame::encode`].
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut dst = BytesMut::new();
        self.encode(&mut dst)?;
        Ok(dst.freeze())
    }

    fn encode_fields(&self, dst: &mut BytesMut) -> Result<()> {
        let mut w = FrameWriter::new(dst, self.opcode());
        match self {
            Self::AnonymousLogin { username } => {
                w.string("username", username)?;
            },
            Self::LoginAccepted { server_name } => {
                w.string("server_name", server_name)?;
            },
            Self::LoginRefused | Self::FusionInitKo => {},
            Self::PublicMessage(m) => {
                w.string("origin_server", &m.origin_server)?
                    .string("sender", &m.sender)?
                    .string("text", &m.text)?;
            },
            Self::DirectMessage(m) => {
                w.string("origin_server", &m.origin_server)?
                    .string("sender", &m.sender)?
                    .string("dest_server", &m.dest_server)?
                    .string("recipient", &m.recipient)?
                    .string("text", &m.text)?;
            },
            Self::FileBlock(b) => {
                if b.block_count <= 0 {
                    return Err(ProtocolError::InvalidBlockCount(b.block_count));
                }
                w.string("origin_server", &b.origin_server)?
                    .string("sender", &b.sender)?
                    .string("dest_server", &b.dest_server)?
                    .string("recipient", &b.recipient)?
                    .i64(b.file_id)
                    .string("file_name", &b.file_name)?
                    .i32(b.block_count)
                    .block(&b.data)?;
            },
            Self::FusionInit(info) | Self::FusionInitOk(info) => {
                w.string("name", &info.name)?.address(&info.address).strings("members", &info.members)?;
            },
            Self::FusionInitForward { leader: address } | Self::FusionRequest { remote: address } => {
                w.address(address);
            },
            Self::FusionChangeLeader(leader) => {
                w.string("name", &leader.name)?.address(&leader.address);
            },
            Self::FusionMerge { name } => {
                w.string("name", name)?;
            },
        }
        Ok(())
    }
}

fn string() -> StringReader {
    StringReader::new(MAX_STRING_BYTES)
}

fn server_info() -> impl Reader<Output = ServerInfo> + Send {
    string()
        .then(address_reader())
        .then(string().repeat::<_, Vec<String>>(i32_reader(), MAX_LIST_LEN))
        .finally(|((name, address), members)| ServerInfo { name, address, members })
}

fn block_count() -> impl Reader<Output = i32> + Send {
    i32_reader().try_finally(|count| {
        if count > 0 {
            Ok(count)
        } else {
            Err(DecodeError::InvalidBlockCount(count))
        }
    })
}

/// Decoder for the fields following `opcode`.
fn decoder(opcode: Opcode) -> BoxReader<Frame> {
    match opcode {
        Opcode::AnonymousLogin => {
            string().finally(|username| Frame::AnonymousLogin { username }).boxed()
        },
        Opcode::LoginAccepted => {
            string().finally(|server_name| Frame::LoginAccepted { server_name }).boxed()
        },
        Opcode::LoginRefused => Just::new(Frame::LoginRefused).boxed(),
        Opcode::PublicMessage => string()
            .then(string())
            .then(string())
            .finally(|((origin_server, sender), text)| {
                Frame::PublicMessage(PublicMessage { origin_server, sender, text })
            })
            .boxed(),
        Opcode::DirectMessage => string()
            .then(string())
            .then(string())
            .then(string())
            .then(string())
            .finally(|((((origin_server, sender), dest_server), recipient), text)| {
                Frame::DirectMessage(DirectMessage {
                    origin_server,
                    sender,
                    dest_server,
                    recipient,
                    text,
                })
            })
            .boxed(),
        Opcode::FileBlock => string()
            .then(string())
            .then(string())
            .then(string())
            .then(i64_reader())
            .then(string())
            .then(block_count())
            .then(blob_reader(MAX_BLOCK_BYTES))
            .finally(
                |(
                    ((((((origin_server, sender), dest_server), recipient), file_id), file_name), block_count),
                    data,
                )| {
                    Frame::FileBlock(FileBlock {
                        origin_server,
                        sender,
                        dest_server,
                        recipient,
                        file_id,
                        file_name,
                        block_count,
                        data,
                    })
                },
            )
            .boxed(),
        Opcode::FusionInit => server_info().finally(Frame::FusionInit).boxed(),
        Opcode::FusionInitOk => server_info().finally(Frame::FusionInitOk).boxed(),
        Opcode::FusionInitKo => Just::new(Frame::FusionInitKo).boxed(),
        Opcode::FusionInitForward => {
            address_reader().finally(|leader| Frame::FusionInitForward { leader }).boxed()
        },
        Opcode::FusionRequest => {
            address_reader().finally(|remote| Frame::FusionRequest { remote }).boxed()
        },
        Opcode::FusionChangeLeader => string()
            .then(address_reader())
            .finally(|(name, address)| Frame::FusionChangeLeader(ServerIdentity { name, address }))
            .boxed(),
        Opcode::FusionMerge => string().finally(|name| Frame::FusionMerge { name }).boxed(),
    }
}

fn select_decoder(byte: u8) -> BoxReader<Frame> {
    match Opcode::from_u8(byte) {
        Some(opcode) => decoder(opcode),
        None => Fail::new(DecodeError::UnknownOpcode(byte)).boxed(),
    }
}

/// Incremental decoder for a stream of frames.
///
/// Reads the opcode byte, then runs the decoder selected for it to
/// completion. Bytes of the next frame are left in the input.
pub struct FrameReader {
    inner: FlatMap<U8Reader, fn(u8) -> BoxReader<Frame>, BoxReader<Frame>>,
}

impl FrameReader {
    /// Create a reader positioned at a frame boundary
    #[must_use]
    pub fn new() -> Self {
        Self { inner: u8_reader().flat_map(select_decoder as fn(u8) -> BoxReader<Frame>) }
    }

    /// Decode the next frame from `src`, resetting for the following one.
    ///
    /// Returns `Ok(None)` when `src` ran out mid-frame; the partial frame is
    /// kept and completed by later calls.
    ///
    /// # Errors
    ///
    /// Returns the decode error if the stream is malformed. The reader cannot
    /// recover from it.
    pub fn next_frame(&mut self, src: &mut dyn Buf) -> std::result::Result<Option<Frame>, DecodeError> {
        match self.inner.process(src) {
            ProcessStatus::Done(frame) => {
                self.inner.reset();
                Ok(Some(frame))
            },
            ProcessStatus::Refill => Ok(None),
            ProcessStatus::Error(e) => Err(e),
        }
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl Reader for FrameReader {
    type Output = Frame;

    fn process(&mut self, src: &mut dyn Buf) -> ProcessStatus<Frame> {
        self.inner.process(src)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}
